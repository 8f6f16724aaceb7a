//! 事件管线 - 来源适配 → 归一化 → 缓存 → 待投递队列 → 分发
//!
//! # 数据流
//! 1. 适配层（`NotificationSource` / `CallStateSource`）接收 OS 事件，按 allow-list 过滤
//! 2. `normalizer` 把原始事件转成 `NotificationEvent`
//! 3. 事件写入 `EventCache`（供控制命令按 uid 查找），同时交给 `Dispatcher`
//! 4. `Dispatcher` 在消费方就绪前排队，就绪后按顺序投递给 `EventSink`
//!
//! # 使用示例
//! ```ignore
//! use notification_listener::notification::{NotificationSource, RawNotification};
//!
//! source.on_posted(RawNotification {
//!     package_name: Some("com.whatsapp".into()),
//!     id: Some(1),
//!     ..Default::default()
//! }, None);
//! ```

pub mod cache;
pub mod dispatcher;
pub mod event;
pub mod handle;
pub mod normalizer;
pub mod sink;
pub mod source;

pub use cache::EventCache;
pub use dispatcher::{DeliveryStats, Dispatcher, Submitted};
pub use event::{EventRecord, EventSource, LiveNotification, NotificationAction, NotificationEvent};
pub use handle::NotificationHandle;
pub use normalizer::{CallState, RawAction, RawCallState, RawInput, RawNotification, SourcePayload};
pub use sink::{EventSink, JsonLinesSink, SharedWriter};
pub use source::{AllowList, CallStateSource, ContactResolver, Ingest, NotificationSource, SourceAdapter};

//! Notification Listener - 监听系统通知与来电状态，缓存并投递给应用回调

pub mod config;
pub mod control;
pub mod dispatch_queue;
pub mod error;
pub mod notification;
pub mod server;
pub mod service;

pub use config::{ServiceConfig, Settings};
pub use control::{ControlChannel, ControlError, ControlRequest, ControlResponse};
pub use dispatch_queue::DispatchQueue;
pub use error::{ListenerError, Result};
pub use notification::{
    AllowList, CallState, EventCache, EventRecord, EventSink, EventSource, JsonLinesSink,
    NotificationAction, NotificationEvent, NotificationHandle, RawNotification, SharedWriter,
};
pub use server::ControlServer;
pub use service::{
    BootAgent, ListenerService, Platform, Preferences, ServiceState, ShellPlatform, Visibility,
};

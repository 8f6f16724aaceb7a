//! 事件来源适配层 - 系统通知流与来电状态流
//!
//! 适配层只有两个入口：发布与移除。它们在 OS 的投递线程上被调用，
//! 只做 allow-list 过滤、归一化、写缓存、交给分发器，全部是非阻塞操作。

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, trace};

use super::cache::EventCache;
use super::dispatcher::{Dispatcher, Submitted};
use super::event::{EventSource, LiveNotification};
use super::handle::NotificationHandle;
use super::normalizer::{self, CallState, RawCallState, RawNotification, SourcePayload};

/// 默认关注的来源（包名子串）
pub const DEFAULT_TARGETS: &[&str] = &[
    "call.status",
    "contacts",
    "incallui",
    "com.android.mms",
    "com.samsung.android.messaging",
    "com.tencent.mobileqq",
    "com.tencent.mm",
    "com.facebook",
    "com.kakao.talk",
    "jp.naver.line.android",
    "com.instagram.android",
    "com.whatsapp",
    "com.twitter.android",
    "com.skype",
    "com.youtube.android",
];

/// 来源白名单，管线中唯一的准入控制
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    /// None 表示全部放行
    targets: Option<Vec<String>>,
}

impl AllowList {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: Some(targets.into_iter().map(Into::into).collect()),
        }
    }

    pub fn any() -> Self {
        Self { targets: None }
    }

    /// 包名包含任一目标即放行
    pub fn admits(&self, origin: &str) -> bool {
        match &self.targets {
            None => true,
            Some(targets) => targets.iter().any(|t| !t.is_empty() && origin.contains(t.as_str())),
        }
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(DEFAULT_TARGETS.iter().copied())
    }
}

/// 号码 -> 联系人名
pub trait ContactResolver: Send + Sync {
    fn display_name(&self, phone_number: &str) -> Option<String>;
}

/// 归一化之后的公共路径：缓存 + 分发
#[derive(Clone)]
pub struct Ingest {
    cache: Arc<EventCache>,
    dispatcher: Arc<Dispatcher>,
    allow: Arc<AllowList>,
    sequence: Arc<AtomicU64>,
}

impl Ingest {
    pub fn new(cache: Arc<EventCache>, dispatcher: Arc<Dispatcher>, allow: AllowList) -> Self {
        Self {
            cache,
            dispatcher,
            allow: Arc::new(allow),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 返回 None 表示被 allow-list 丢弃
    pub fn posted(
        &self,
        payload: SourcePayload,
        handle: Option<Arc<dyn NotificationHandle>>,
    ) -> Option<Submitted> {
        if !self.allow.admits(payload.origin()) {
            trace!(origin = payload.origin(), "Event dropped by allow-list");
            return None;
        }

        let mut event = normalizer::normalize(&payload, Utc::now());
        event.sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        // 先入缓存再分发：排队中的事件在入队时一定在缓存里
        self.cache.put(LiveNotification::new(event.clone(), handle));
        Some(self.dispatcher.submit(event))
    }

    pub fn removed(&self, payload: &SourcePayload) -> bool {
        if !self.allow.admits(payload.origin()) {
            return false;
        }
        let uid = payload.uid();
        let removed = self.cache.remove(&uid).is_some();
        debug!(uid = %uid, removed, "Notification removed");
        removed
    }
}

/// 准入开关：事件在读锁内走完缓存与分发，detach 拿写锁，
/// 因此 detach 返回后不会再有在途的事件落进缓存或队列
#[derive(Default)]
struct Admission(RwLock<bool>);

impl Admission {
    fn enter(&self) -> RwLockReadGuard<'_, bool> {
        self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, attached: bool) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = attached;
    }
}

/// 适配层公共接口，生命周期管理器据此启停订阅
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> EventSource;
    fn attach(&self);
    fn detach(&self);
}

/// 系统通知流适配层
pub struct NotificationSource {
    ingest: Ingest,
    admission: Admission,
}

impl NotificationSource {
    pub fn new(ingest: Ingest) -> Self {
        Self {
            ingest,
            admission: Admission::default(),
        }
    }

    /// OS 发布（或更新）一条通知
    pub fn on_posted(
        &self,
        raw: RawNotification,
        handle: Option<Arc<dyn NotificationHandle>>,
    ) -> Option<Submitted> {
        let attached = self.admission.enter();
        if !*attached {
            debug!(package = ?raw.package_name, "Notification source detached, ignoring post");
            return None;
        }
        self.ingest.posted(SourcePayload::Notification(raw), handle)
    }

    /// OS 移除一条通知
    pub fn on_removed(&self, raw: &RawNotification) -> bool {
        let attached = self.admission.enter();
        if !*attached {
            return false;
        }
        self.ingest.removed(&SourcePayload::Notification(raw.clone()))
    }
}

impl SourceAdapter for NotificationSource {
    fn kind(&self) -> EventSource {
        EventSource::AppNotification
    }

    fn attach(&self) {
        self.admission.set(true);
    }

    fn detach(&self) {
        self.admission.set(false);
    }
}

/// 来电状态流适配层
pub struct CallStateSource {
    ingest: Ingest,
    admission: Admission,
    contacts: Option<Arc<dyn ContactResolver>>,
}

impl CallStateSource {
    pub fn new(ingest: Ingest, contacts: Option<Arc<dyn ContactResolver>>) -> Self {
        Self {
            ingest,
            admission: Admission::default(),
            contacts,
        }
    }

    pub fn on_call_state_changed(&self, state: CallState, phone_number: Option<&str>) -> Option<Submitted> {
        let attached = self.admission.enter();
        if !*attached {
            debug!(?state, "Call state source detached, ignoring change");
            return None;
        }

        // 只有响铃时才查联系人
        let contact_name = match (state, phone_number, &self.contacts) {
            (CallState::Ringing, Some(number), Some(contacts)) => contacts.display_name(number),
            _ => None,
        };
        let raw = RawCallState {
            state,
            phone_number: phone_number.map(str::to_string),
            contact_name,
        };
        self.ingest.posted(SourcePayload::CallState(raw), None)
    }
}

impl SourceAdapter for CallStateSource {
    fn kind(&self) -> EventSource {
        EventSource::TelephonyCall
    }

    fn attach(&self) {
        self.admission.set(true);
    }

    fn detach(&self) {
        self.admission.set(false);
    }
}

//! 服务生命周期 - 监听服务的状态机与组件注册表
//!
//! `ListenerService` 持有管线上的所有组件（缓存、分发器、适配层、持久化），
//! 并按 `Stopped → Starting → Running{Background|Foreground} → ShuttingDown → Stopped`
//! 驱动它们。所有状态转换都在同一把锁里完成，shutdown 与 promote 并发时
//! 后到的一方看到的是已经完成的状态。

use anyhow::Result as AnyResult;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::platform::{IndicatorChannel, Platform, WakeHold};
use super::preferences::Preferences;
use crate::config::{ServiceConfig, Settings};
use crate::dispatch_queue::DispatchQueue;
use crate::error::{ListenerError, Result};
use crate::notification::cache::EventCache;
use crate::notification::dispatcher::Dispatcher;
use crate::notification::sink::EventSink;
use crate::notification::source::{
    AllowList, CallStateSource, ContactResolver, Ingest, NotificationSource, SourceAdapter,
};

/// wake lock 标签
pub const WAKE_LOCK_TAG: &str = "NotificationListener::WAKE_LOCK";

/// 默认 wake-hold 时长：5 分钟
pub const DEFAULT_WAKE_HOLD: Duration = Duration::from_secs(5 * 60);

/// 运行中的可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Background,
    Foreground,
}

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    /// 适配层已启动，等待消费方初始化完成
    Starting,
    Running(Visibility),
    ShuttingDown,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running(Visibility::Background) => "running_background",
            ServiceState::Running(Visibility::Foreground) => "running_foreground",
            ServiceState::ShuttingDown => "shutting_down",
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Running(_))
    }
}

/// 前台资源：drop 即释放 wake-hold
struct Foreground {
    hold: WakeHold,
    config: ServiceConfig,
}

struct Lifecycle {
    state: ServiceState,
    foreground: Option<Foreground>,
}

/// 监听服务
pub struct ListenerService {
    platform: Arc<dyn Platform>,
    prefs: Arc<Preferences>,
    cache: Arc<EventCache>,
    dispatcher: Arc<Dispatcher>,
    notifications: NotificationSource,
    calls: CallStateSource,
    channel: IndicatorChannel,
    wake_hold_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl ListenerService {
    pub fn builder(platform: Arc<dyn Platform>, sink: Arc<dyn EventSink>) -> ListenerServiceBuilder {
        ListenerServiceBuilder::new(platform, sink)
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn has_permission(&self) -> bool {
        self.platform.has_permission()
    }

    /// 启动服务
    ///
    /// 未授权返回 `PermissionDenied` 且不改变任何状态。已在运行时只应用新配置。
    pub fn start(&self, config: ServiceConfig) -> Result<bool> {
        if !self.platform.has_permission() {
            warn!("Start refused: notification listener permission not granted");
            return Err(ListenerError::PermissionDenied);
        }

        let mut lc = self.lock();
        self.prefs.save_service_config(&config);

        if lc.state.is_active() {
            info!(state = lc.state.as_str(), "Service already running, applying config");
            self.apply_visibility(&mut lc, config);
            return Ok(true);
        }

        lc.state = ServiceState::Starting;
        self.prefs.set_service_running(true);
        self.attach_sources();
        info!(foreground = config.foreground, "Service starting");

        self.apply_visibility(&mut lc, config);
        Ok(true)
    }

    fn apply_visibility(&self, lc: &mut Lifecycle, config: ServiceConfig) {
        if config.foreground {
            // 前台失败不影响启动本身
            if let Err(e) = self.promote_locked(lc, config) {
                warn!(error = %e, "Foreground promotion skipped, staying in background");
            }
        } else if lc.foreground.is_some() {
            self.demote_locked(lc);
        }
    }

    /// 切到前台：wake-hold + 指示器
    pub fn promote_to_foreground(&self, config: ServiceConfig) -> Result<bool> {
        let mut lc = self.lock();
        self.promote_locked(&mut lc, config)
    }

    fn promote_locked(&self, lc: &mut Lifecycle, config: ServiceConfig) -> Result<bool> {
        if !self.platform.supports_foreground() {
            return Err(ListenerError::UnsupportedCapability(
                "foreground state not supported on this platform".to_string(),
            ));
        }
        if !lc.state.is_active() {
            info!(state = lc.state.as_str(), "Promote ignored, service not running");
            return Ok(false);
        }

        let config = config.with_foreground(true);
        if let Some(current) = &lc.foreground {
            if current.config == config && current.hold.is_active() {
                debug!("Already in foreground with identical config");
                return Ok(true);
            }
        }

        // 先释放旧的 hold，再申请新的（同一个 tag）
        lc.foreground.take();

        let unsupported = |e: anyhow::Error| ListenerError::UnsupportedCapability(e.to_string());
        self.platform.ensure_channel(&self.channel).map_err(unsupported)?;
        let hold = WakeHold::acquire(self.platform.clone(), WAKE_LOCK_TAG, self.wake_hold_timeout)
            .map_err(unsupported)?;
        if let Err(e) = self.platform.show_indicator(&self.channel, &config) {
            drop(hold);
            return Err(unsupported(e));
        }

        self.prefs.save_service_config(&config);
        lc.foreground = Some(Foreground { hold, config });
        if let ServiceState::Running(_) = lc.state {
            lc.state = ServiceState::Running(Visibility::Foreground);
        }
        info!(state = lc.state.as_str(), "Service promoted to foreground");
        Ok(true)
    }

    /// 回到后台。重复调用无副作用。
    pub fn demote_to_background(&self) -> bool {
        let mut lc = self.lock();
        self.demote_locked(&mut lc);
        true
    }

    fn demote_locked(&self, lc: &mut Lifecycle) {
        let Some(foreground) = lc.foreground.take() else {
            return;
        };
        drop(foreground.hold);
        self.platform.hide_indicator();
        self.prefs.save_service_config(&foreground.config.with_foreground(false));
        if let ServiceState::Running(_) = lc.state {
            lc.state = ServiceState::Running(Visibility::Background);
        }
        info!("Service demoted to background");
    }

    /// 停止服务并释放所有资源；已停止时为空操作
    pub fn shutdown(&self) -> bool {
        let mut lc = self.lock();
        if lc.state == ServiceState::Stopped {
            if self.prefs.service_running() {
                // 上一个进程留下的运行标记
                self.prefs.set_service_running(false);
            }
            return true;
        }

        lc.state = ServiceState::ShuttingDown;
        if let Some(foreground) = lc.foreground.take() {
            drop(foreground.hold);
            self.platform.hide_indicator();
        }
        self.detach_sources();

        let released = self.cache.clear();
        let dropped = self.dispatcher.reset();
        self.prefs.set_service_running(false);
        lc.state = ServiceState::Stopped;

        info!(released, dropped, "Service stopped");
        true
    }

    /// 外部触发（开机广播等）后的重启：按持久化的配置重新 start
    pub fn restart_after_external_trigger(&self) -> Result<bool> {
        if !self.prefs.service_running() {
            info!("Service was not running before restart, skipping");
            return Ok(false);
        }
        let config = self.prefs.service_config().unwrap_or_default();
        info!(foreground = config.foreground, "Restarting service from persisted config");
        self.start(config)
    }

    /// 消费方初始化完成。只有在 `Starting` 时才会切到 `Running` 并冲刷队列；
    /// 其它状态下不做任何记录，每次启动都要重新通知。
    pub fn consumer_initialized(&self) -> bool {
        let mut lc = self.lock();
        if lc.state == ServiceState::Starting {
            self.enter_running(&mut lc);
            true
        } else {
            debug!(state = lc.state.as_str(), "Consumer initialized outside of startup, ignored");
            false
        }
    }

    fn enter_running(&self, lc: &mut Lifecycle) {
        let visibility = if lc.foreground.is_some() {
            Visibility::Foreground
        } else {
            Visibility::Background
        };
        lc.state = ServiceState::Running(visibility);
        let flushed = self.dispatcher.mark_ready().unwrap_or(0);
        info!(state = lc.state.as_str(), flushed, "Service running");
    }

    fn attach_sources(&self) {
        let adapters: [&dyn SourceAdapter; 2] = [&self.notifications, &self.calls];
        for adapter in adapters {
            if let Err(e) = self.platform.subscribe(adapter.kind()) {
                warn!(source = %adapter.kind(), error = %e, "Failed to subscribe event source");
                continue;
            }
            adapter.attach();
        }
    }

    fn detach_sources(&self) {
        let adapters: [&dyn SourceAdapter; 2] = [&self.notifications, &self.calls];
        for adapter in adapters {
            adapter.detach();
            self.platform.unsubscribe(adapter.kind());
        }
    }

    /// 当前进程在运行，或者持久化标记显示上次未正常停止
    pub fn is_running(&self) -> bool {
        self.state() != ServiceState::Stopped || self.prefs.service_running()
    }

    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn wake_hold_active(&self) -> bool {
        self.lock()
            .foreground
            .as_ref()
            .map(|f| f.hold.is_active())
            .unwrap_or(false)
    }

    pub fn foreground_config(&self) -> Option<ServiceConfig> {
        self.lock().foreground.as_ref().map(|f| f.config.clone())
    }

    pub fn cache(&self) -> &Arc<EventCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn preferences(&self) -> &Arc<Preferences> {
        &self.prefs
    }

    pub fn notifications(&self) -> &NotificationSource {
        &self.notifications
    }

    pub fn calls(&self) -> &CallStateSource {
        &self.calls
    }

    /// 等待排队的投递与落盘完成
    pub fn sync(&self) {
        self.dispatcher.sync();
    }
}

/// `ListenerService` 构建器
pub struct ListenerServiceBuilder {
    platform: Arc<dyn Platform>,
    sink: Arc<dyn EventSink>,
    allow: AllowList,
    preferences: Option<PathBuf>,
    contacts: Option<Arc<dyn ContactResolver>>,
    wake_hold_timeout: Duration,
    channel: IndicatorChannel,
}

impl ListenerServiceBuilder {
    pub fn new(platform: Arc<dyn Platform>, sink: Arc<dyn EventSink>) -> Self {
        let defaults = Settings::default();
        Self {
            platform,
            sink,
            allow: AllowList::default(),
            preferences: None,
            contacts: None,
            wake_hold_timeout: DEFAULT_WAKE_HOLD,
            channel: IndicatorChannel {
                id: defaults.indicator_channel_id,
                name: defaults.indicator_channel_name,
                high_importance: true,
            },
        }
    }

    /// 按运行参数配置（allow-list、持久化路径、wake-hold、渠道）
    pub fn settings(mut self, settings: &Settings) -> Self {
        self.allow = if settings.allow_all {
            AllowList::any()
        } else {
            AllowList::new(settings.allow_list.iter().cloned())
        };
        self.preferences = Some(settings.preferences_path());
        self.wake_hold_timeout = settings.wake_hold_timeout();
        self.channel = IndicatorChannel {
            id: settings.indicator_channel_id.clone(),
            name: settings.indicator_channel_name.clone(),
            high_importance: true,
        };
        self
    }

    pub fn allow_list(mut self, allow: AllowList) -> Self {
        self.allow = allow;
        self
    }

    /// 持久化文件路径；不设置则只在内存中
    pub fn preferences(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences = Some(path.into());
        self
    }

    pub fn contacts(mut self, contacts: Arc<dyn ContactResolver>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub fn wake_hold_timeout(mut self, timeout: Duration) -> Self {
        self.wake_hold_timeout = timeout;
        self
    }

    pub fn channel(mut self, channel: IndicatorChannel) -> Self {
        self.channel = channel;
        self
    }

    pub fn build(self) -> AnyResult<Arc<ListenerService>> {
        let queue = Arc::new(DispatchQueue::new("nl-dispatch")?);
        let prefs = Arc::new(match self.preferences {
            Some(path) => Preferences::open(path, queue.clone())?,
            None => Preferences::in_memory(queue.clone()),
        });

        let cache = Arc::new(EventCache::new());
        let dispatcher = Arc::new(Dispatcher::new(self.sink, queue, prefs.clone()));
        let ingest = Ingest::new(cache.clone(), dispatcher.clone(), self.allow);

        Ok(Arc::new(ListenerService {
            platform: self.platform,
            prefs,
            cache,
            dispatcher,
            notifications: NotificationSource::new(ingest.clone()),
            calls: CallStateSource::new(ingest, self.contacts),
            channel: self.channel,
            wake_hold_timeout: self.wake_hold_timeout,
            lifecycle: Mutex::new(Lifecycle {
                state: ServiceState::Stopped,
                foreground: None,
            }),
        }))
    }
}

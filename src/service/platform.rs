//! 平台接口 - 生命周期管理器依赖的 OS 能力
//!
//! 权限检查、事件流订阅、wake-hold、前台指示器都由外层 shell 实现；
//! 核心只通过这个 trait 使用它们。

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ServiceConfig;
use crate::notification::event::EventSource;

/// 前台指示器使用的通知渠道
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorChannel {
    pub id: String,
    pub name: String,
    /// 高优先级
    pub high_importance: bool,
}

pub trait Platform: Send + Sync {
    /// 是否已获得通知监听权限
    fn has_permission(&self) -> bool;

    /// 平台版本是否支持前台状态
    fn supports_foreground(&self) -> bool;

    /// 订阅 / 退订 OS 事件流
    fn subscribe(&self, source: EventSource) -> Result<()>;
    fn unsubscribe(&self, source: EventSource);

    /// 获取有时限的 wake lock；超时后由 OS 自动失效
    fn acquire_wake_lock(&self, tag: &str, timeout: Duration) -> Result<()>;
    /// 释放 wake lock（未持有时为空操作）
    fn release_wake_lock(&self, tag: &str);

    /// 创建（或复用）通知渠道
    fn ensure_channel(&self, channel: &IndicatorChannel) -> Result<()>;
    fn show_indicator(&self, channel: &IndicatorChannel, config: &ServiceConfig) -> Result<()>;
    fn hide_indicator(&self);
}

/// 有作用域的 wake-hold：drop 时释放，到期后自然失效
pub struct WakeHold {
    platform: Arc<dyn Platform>,
    tag: String,
    deadline: Instant,
}

impl WakeHold {
    pub fn acquire(platform: Arc<dyn Platform>, tag: &str, timeout: Duration) -> Result<Self> {
        platform.acquire_wake_lock(tag, timeout)?;
        debug!(tag, timeout_secs = timeout.as_secs(), "Wake hold acquired");
        Ok(Self {
            platform,
            tag: tag.to_string(),
            deadline: Instant::now() + timeout,
        })
    }

    /// 未到期
    pub fn is_active(&self) -> bool {
        Instant::now() < self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl Drop for WakeHold {
    fn drop(&mut self) {
        self.platform.release_wake_lock(&self.tag);
        debug!(tag = %self.tag, "Wake hold released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::shell::ShellPlatform;

    #[test]
    fn test_wake_hold_released_on_drop() {
        let platform = Arc::new(ShellPlatform::new(true, true));
        let hold = WakeHold::acquire(platform.clone(), "test", Duration::from_secs(60)).unwrap();
        assert!(platform.wake_lock_held());
        assert!(hold.is_active());
        assert!(hold.remaining() > Duration::from_secs(50));

        drop(hold);
        assert!(!platform.wake_lock_held());
    }

    #[test]
    fn test_wake_hold_lapses_on_timeout() {
        let platform = Arc::new(ShellPlatform::new(true, true));
        let hold = WakeHold::acquire(platform.clone(), "test", Duration::from_millis(20)).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert!(!hold.is_active());
        assert!(!platform.wake_lock_held());
        assert_eq!(hold.remaining(), Duration::ZERO);
    }
}

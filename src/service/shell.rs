//! 进程内 shell 平台 - 在没有真实 OS 集成时模拟平台能力
//!
//! `nl serve` 通过 stdio 注入事件时使用它；它记录 wake lock、指示器、订阅状态，
//! 测试也直接用它来检查资源是否释放。

use anyhow::Result;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::platform::{IndicatorChannel, Platform};
use crate::config::{ServiceConfig, Settings};
use crate::notification::event::EventSource;
use crate::notification::handle::NotificationHandle;
use crate::notification::sink::SharedWriter;
use crate::notification::source::ContactResolver;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// 记录状态的平台实现
pub struct ShellPlatform {
    permission: AtomicBool,
    foreground_supported: AtomicBool,
    wake_lock: Mutex<Option<(String, Instant)>>,
    acquisitions: Mutex<usize>,
    channels: Mutex<Vec<IndicatorChannel>>,
    indicator: Mutex<Option<ServiceConfig>>,
    subscriptions: Mutex<HashSet<EventSource>>,
}

impl ShellPlatform {
    pub fn new(permission: bool, foreground_supported: bool) -> Self {
        Self {
            permission: AtomicBool::new(permission),
            foreground_supported: AtomicBool::new(foreground_supported),
            wake_lock: Mutex::new(None),
            acquisitions: Mutex::new(0),
            channels: Mutex::new(Vec::new()),
            indicator: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.permission_granted, settings.foreground_supported)
    }

    /// 模拟用户在系统设置里授权 / 撤销
    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// wake lock 持有且未到期
    pub fn wake_lock_held(&self) -> bool {
        lock(&self.wake_lock)
            .as_ref()
            .map(|(_, deadline)| Instant::now() < *deadline)
            .unwrap_or(false)
    }

    pub fn wake_lock_acquisitions(&self) -> usize {
        *lock(&self.acquisitions)
    }

    pub fn indicator(&self) -> Option<ServiceConfig> {
        lock(&self.indicator).clone()
    }

    pub fn channels(&self) -> Vec<IndicatorChannel> {
        lock(&self.channels).clone()
    }

    pub fn is_subscribed(&self, source: EventSource) -> bool {
        lock(&self.subscriptions).contains(&source)
    }
}

impl Platform for ShellPlatform {
    fn has_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn supports_foreground(&self) -> bool {
        self.foreground_supported.load(Ordering::SeqCst)
    }

    fn subscribe(&self, source: EventSource) -> Result<()> {
        info!(%source, "Subscribed to event source");
        lock(&self.subscriptions).insert(source);
        Ok(())
    }

    fn unsubscribe(&self, source: EventSource) {
        if lock(&self.subscriptions).remove(&source) {
            info!(%source, "Unsubscribed from event source");
        }
    }

    fn acquire_wake_lock(&self, tag: &str, timeout: Duration) -> Result<()> {
        *lock(&self.acquisitions) += 1;
        *lock(&self.wake_lock) = Some((tag.to_string(), Instant::now() + timeout));
        Ok(())
    }

    fn release_wake_lock(&self, _tag: &str) {
        lock(&self.wake_lock).take();
    }

    fn ensure_channel(&self, channel: &IndicatorChannel) -> Result<()> {
        let mut channels = lock(&self.channels);
        if !channels.contains(channel) {
            channels.push(channel.clone());
        }
        Ok(())
    }

    fn show_indicator(&self, channel: &IndicatorChannel, config: &ServiceConfig) -> Result<()> {
        info!(channel = %channel.id, title = %config.title, "Foreground indicator shown");
        *lock(&self.indicator) = Some(config.clone());
        Ok(())
    }

    fn hide_indicator(&self) {
        if lock(&self.indicator).take().is_some() {
            info!("Foreground indicator removed");
        }
    }
}

/// 静态通讯录
#[derive(Debug, Default, Clone)]
pub struct StaticContacts {
    book: HashMap<String, String>,
}

impl StaticContacts {
    pub fn new(book: HashMap<String, String>) -> Self {
        Self { book }
    }
}

impl ContactResolver for StaticContacts {
    fn display_name(&self, phone_number: &str) -> Option<String> {
        self.book.get(phone_number).cloned()
    }
}

/// 通过 stdio 注入的通知句柄：被调用时向 stdout 写一行 `handle_invoked`
pub struct ShellHandle {
    uid: String,
    out: SharedWriter,
}

impl ShellHandle {
    pub fn new(uid: impl Into<String>, out: SharedWriter) -> Self {
        Self { uid: uid.into(), out }
    }
}

impl NotificationHandle for ShellHandle {
    fn open(&self) -> Result<()> {
        self.out.write_line(&json!({
            "method": "handle_invoked",
            "params": { "uid": self.uid, "kind": "open" },
        }))
    }

    fn trigger(&self, action_index: usize, input: Option<&HashMap<String, String>>) -> Result<()> {
        if input.map(|i| i.is_empty()).unwrap_or(false) {
            warn!(uid = %self.uid, action_index, "Input action triggered without matching keys");
        }
        self.out.write_line(&json!({
            "method": "handle_invoked",
            "params": {
                "uid": self.uid,
                "kind": "action",
                "index": action_index,
                "input": input,
            },
        }))
    }
}

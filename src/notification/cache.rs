//! 事件缓存 - 当前存活通知的 uid 索引
//!
//! 适配层回调线程写（发布/移除），控制通道线程读并通过句柄触发副作用。
//! 所有操作在同一把锁内完成，`get` 只会看到完整的旧值或不存在。

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::event::{LiveNotification, NotificationEvent};

#[derive(Default)]
pub struct EventCache {
    entries: Mutex<HashMap<String, LiveNotification>>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LiveNotification>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 按 uid 写入，返回被替换的旧条目（调用方丢弃即释放旧句柄）
    pub fn put(&self, entry: LiveNotification) -> Option<LiveNotification> {
        let uid = entry.uid().to_string();
        let prior = self.lock().insert(uid.clone(), entry);
        if prior.is_some() {
            debug!(uid = %uid, "Cached notification replaced");
        }
        prior
    }

    /// 幂等移除
    pub fn remove(&self, uid: &str) -> Option<LiveNotification> {
        self.lock().remove(uid)
    }

    pub fn get(&self, uid: &str) -> Option<LiveNotification> {
        self.lock().get(uid).cloned()
    }

    /// 只取可序列化部分
    pub fn event(&self, uid: &str) -> Option<NotificationEvent> {
        self.lock().get(uid).map(|entry| entry.event.clone())
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.lock().contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 排序后的 uid 列表
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.lock().keys().cloned().collect();
        uids.sort();
        uids
    }

    /// 清空并返回被丢弃的条目数
    pub fn clear(&self) -> usize {
        let drained: Vec<LiveNotification> = self.lock().drain().map(|(_, v)| v).collect();
        // 句柄在锁外释放
        drained.len()
    }
}

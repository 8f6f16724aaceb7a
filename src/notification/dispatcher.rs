//! 事件分发器 - 消费方就绪闸门
//!
//! 未就绪时事件进入待投递队列；`mark_ready` 在同一把锁内置位并按到达顺序冲刷队列，
//! 之后的 `submit` 直接投递。投递本身在调度队列上执行，不阻塞适配层回调线程。
//! 交给调度队列的动作都发生在锁内，所以消费方看到的顺序就是 `submit` 的调用顺序。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::event::{EventRecord, NotificationEvent};
use super::sink::EventSink;
use crate::dispatch_queue::DispatchQueue;
use crate::error::ListenerError;
use crate::service::preferences::Preferences;

/// submit 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    /// 已交给调度队列
    Dispatched,
    /// 消费方未就绪，已排队
    Queued,
    /// 调度队列已关闭，事件丢弃
    Dropped,
}

#[derive(Default)]
struct GateState {
    ready: bool,
    pending: VecDeque<NotificationEvent>,
}

/// 投递统计
#[derive(Debug, Default)]
pub struct DeliveryStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }
}

/// 事件分发器
pub struct Dispatcher {
    gate: Mutex<GateState>,
    sink: Arc<dyn EventSink>,
    queue: Arc<DispatchQueue>,
    prefs: Arc<Preferences>,
    stats: Arc<DeliveryStats>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn EventSink>, queue: Arc<DispatchQueue>, prefs: Arc<Preferences>) -> Self {
        info!(sink = sink.name(), "Dispatcher created");
        Self {
            gate: Mutex::new(GateState::default()),
            sink,
            queue,
            prefs,
            stats: Arc::new(DeliveryStats::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 就绪则立即投递，否则入队
    pub fn submit(&self, event: NotificationEvent) -> Submitted {
        let mut gate = self.lock();
        if gate.ready {
            debug!(uid = %event.uid, "Dispatching event immediately");
            self.hand_off(event)
        } else {
            debug!(uid = %event.uid, pending = gate.pending.len() + 1, "Consumer not ready, queueing event");
            gate.pending.push_back(event);
            Submitted::Queued
        }
    }

    /// 置位就绪并按顺序冲刷队列。重复调用返回 `None`，不再冲刷。
    pub fn mark_ready(&self) -> Option<usize> {
        let mut gate = self.lock();
        if gate.ready {
            return None;
        }
        gate.ready = true;

        let mut flushed = 0;
        while let Some(event) = gate.pending.pop_front() {
            self.hand_off(event);
            flushed += 1;
        }
        info!(flushed, "Consumer ready, pending queue flushed");
        Some(flushed)
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// 待投递队列的 uid（按顺序）
    pub fn pending_uids(&self) -> Vec<String> {
        self.lock().pending.iter().map(|e| e.uid.clone()).collect()
    }

    /// 生命周期完全重启时复位：回到未就绪，丢弃尚未投递的事件
    pub(crate) fn reset(&self) -> usize {
        let mut gate = self.lock();
        gate.ready = false;
        let dropped = gate.pending.len();
        gate.pending.clear();
        if dropped > 0 {
            warn!(dropped, "Dispatcher reset with undelivered events");
        }
        dropped
    }

    pub fn stats(&self) -> &DeliveryStats {
        &self.stats
    }

    /// 等待所有已交出的投递完成
    pub fn sync(&self) {
        self.queue.sync();
    }

    fn hand_off(&self, event: NotificationEvent) -> Submitted {
        let sink = self.sink.clone();
        let prefs = self.prefs.clone();
        let stats = self.stats.clone();
        let uid = event.uid.clone();

        let posted = self.queue.post(move || {
            // 回调 id 在投递时读取，registerEventHandle 之后的事件带上新 id
            let record = EventRecord {
                callback: prefs.event_callback().unwrap_or(0),
                event,
            };
            match sink.deliver(&record) {
                Ok(()) => {
                    stats.delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    stats.failed.fetch_add(1, Ordering::SeqCst);
                    let err = ListenerError::InternalDeliveryFailure(e.to_string());
                    warn!(sink = sink.name(), uid = %record.event.uid, error = %err, "Event delivery failed, dropping");
                }
            }
        });

        if posted {
            Submitted::Dispatched
        } else {
            self.stats.failed.fetch_add(1, Ordering::SeqCst);
            warn!(uid = %uid, queue = self.queue.name(), "Dispatch queue closed, dropping event");
            Submitted::Dropped
        }
    }
}

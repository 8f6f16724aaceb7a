//! 原始通知句柄 - 对平台对象的最小抽象
//!
//! 生产环境由 OS 适配层实现（打开 contentIntent、发送 actionIntent），测试里用 fake。
//! 句柄由缓存条目独占持有；被替换或移除时只是丢掉一个 `Arc`，仍持有引用的控制命令不受影响。

use anyhow::Result;
use std::collections::HashMap;

pub trait NotificationHandle: Send + Sync {
    /// 点击通知本身
    fn open(&self) -> Result<()>;

    /// 触发第 `action_index` 个操作；`input` 为已过滤的 key -> 文本
    fn trigger(&self, action_index: usize, input: Option<&HashMap<String, String>>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    /// 记录调用的 fake 句柄
    #[derive(Default)]
    pub struct RecordingHandle {
        pub opened: Mutex<usize>,
        pub triggered: Mutex<Vec<(usize, Option<HashMap<String, String>>)>>,
    }

    impl RecordingHandle {
        pub fn open_count(&self) -> usize {
            *self.opened.lock().unwrap()
        }

        pub fn triggers(&self) -> Vec<(usize, Option<HashMap<String, String>>)> {
            self.triggered.lock().unwrap().clone()
        }
    }

    impl NotificationHandle for RecordingHandle {
        fn open(&self) -> Result<()> {
            *self.opened.lock().unwrap() += 1;
            Ok(())
        }

        fn trigger(&self, action_index: usize, input: Option<&HashMap<String, String>>) -> Result<()> {
            self.triggered
                .lock()
                .unwrap()
                .push((action_index, input.cloned()));
            Ok(())
        }
    }
}

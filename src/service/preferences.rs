//! 持久化状态 - 回调 id、服务配置、运行标记
//!
//! 内存快照放在 `RwLock` 里，写入时同步替换快照，再把落盘交给调度队列
//! （与 SharedPreferences 的 apply 语义一致）。落盘用 fs2 文件锁 + 临时文件 rename。
//!
//! 存储位置：`<data_dir>/preferences.json`

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::dispatch_queue::DispatchQueue;

/// 持久化的键值区域
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// initialize 注册的调度回调 id
    pub dispatcher_callback: Option<i64>,
    /// registerEventHandle 注册的事件回调 id
    pub event_callback: Option<i64>,
    /// 当前服务配置（整体替换，不合并）
    pub service_config: Option<ServiceConfig>,
    /// 跨进程重启回答 isServiceRunning
    pub service_running: bool,
}

pub struct Preferences {
    path: Option<PathBuf>,
    state: RwLock<PersistedState>,
    writer: Arc<DispatchQueue>,
}

impl Preferences {
    /// 打开（或新建）磁盘上的存储
    pub fn open(path: impl Into<PathBuf>, writer: Arc<DispatchQueue>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            match Self::load_file(&path) {
                Ok(state) => state,
                Err(e) => {
                    // 损坏的文件不阻止服务启动
                    warn!(path = %path.display(), error = %e, "Discarding unreadable preferences");
                    PersistedState::default()
                }
            }
        } else {
            PersistedState::default()
        };

        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            writer,
        })
    }

    /// 仅内存，用于测试
    pub fn in_memory(writer: Arc<DispatchQueue>) -> Self {
        Self {
            path: None,
            state: RwLock::new(PersistedState::default()),
            writer,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, PersistedState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> PersistedState {
        self.read().clone()
    }

    pub fn dispatcher_callback(&self) -> Option<i64> {
        self.read().dispatcher_callback
    }

    pub fn event_callback(&self) -> Option<i64> {
        self.read().event_callback
    }

    pub fn service_config(&self) -> Option<ServiceConfig> {
        self.read().service_config.clone()
    }

    pub fn service_running(&self) -> bool {
        self.read().service_running
    }

    pub fn set_dispatcher_callback(&self, id: i64) {
        self.update(|s| s.dispatcher_callback = Some(id));
    }

    pub fn set_event_callback(&self, id: i64) {
        self.update(|s| s.event_callback = Some(id));
    }

    pub fn save_service_config(&self, config: &ServiceConfig) {
        let config = config.clone();
        self.update(move |s| s.service_config = Some(config));
    }

    pub fn set_service_running(&self, running: bool) {
        self.update(|s| s.service_running = running);
    }

    /// 修改快照并排队落盘。落盘在写锁内排队，保证磁盘写入顺序与修改顺序一致。
    fn update(&self, f: impl FnOnce(&mut PersistedState)) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        f(&mut state);

        let Some(path) = self.path.clone() else {
            return;
        };
        let snapshot = state.clone();
        let posted = self.writer.post(move || {
            if let Err(e) = Self::write_file(&path, &snapshot) {
                warn!(path = %path.display(), error = %e, "Failed to persist preferences");
            }
        });
        if !posted {
            // 队列已关闭（进程退出中），直接同步写
            if let Some(path) = self.path.as_ref() {
                if let Err(e) = Self::write_file(path, &state) {
                    warn!(path = %path.display(), error = %e, "Failed to persist preferences");
                }
            }
        }
    }

    /// 等待已排队的落盘完成
    pub fn flush(&self) {
        self.writer.sync();
    }

    fn lock_path(path: &Path) -> PathBuf {
        path.with_extension("json.lock")
    }

    fn open_lock(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(Self::lock_path(path))
            .context("Failed to open preferences lock file")
    }

    /// 读取磁盘上的状态（共享锁）
    pub fn load_file(path: &Path) -> Result<PersistedState> {
        let lock = Self::open_lock(path)?;
        lock.lock_shared()?;
        let content = fs::read_to_string(path);
        lock.unlock()?;

        let content = content.with_context(|| format!("Failed to read {}", path.display()))?;
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Invalid preferences file {}", path.display()))?;
        Ok(state)
    }

    /// 写入磁盘（独占锁 + 原子替换）
    pub fn write_file(path: &Path, state: &PersistedState) -> Result<()> {
        let lock = Self::open_lock(path)?;
        lock.lock_exclusive()?;

        let temp_path = path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
            temp.sync_all()?;
            fs::rename(&temp_path, path)?;
            Ok(())
        })();

        lock.unlock()?;
        if result.is_ok() {
            debug!(path = %path.display(), "Preferences persisted");
        }
        result
    }
}

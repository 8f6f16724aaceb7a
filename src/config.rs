//! 配置 - 前台指示器配置与运行参数
//!
//! `ServiceConfig` 由调用方在 startService 时提供并持久化；
//! `Settings` 从数据目录下的 `settings.json` 读取（默认 `~/.config/notification-listener/`，
//! 不存在则用默认值）。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::notification::source::DEFAULT_TARGETS;

/// 前台指示器配置（持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// 标题
    pub title: String,
    /// 描述
    #[serde(alias = "desc")]
    pub description: String,
    /// 副标题
    #[serde(alias = "subTitle")]
    pub subtitle: String,
    /// 是否显示时间
    #[serde(alias = "showWhen")]
    pub show_timestamp: bool,
    /// 是否保持前台状态
    pub foreground: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            title: "Notification Listener".to_string(),
            description: "Listening for notifications".to_string(),
            subtitle: String::new(),
            show_timestamp: false,
            foreground: false,
        }
    }
}

impl ServiceConfig {
    /// 复制一份并设置 foreground 标记
    pub fn with_foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }
}

/// 运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 数据目录（preferences.json、日志）
    pub data_dir: PathBuf,
    /// 目标包名列表（子串匹配）
    pub allow_list: Vec<String>,
    /// 为 true 时忽略 allow_list，接收所有来源
    pub allow_all: bool,
    /// 前台 wake-hold 时长（秒）
    pub wake_hold_secs: u64,
    /// 前台指示器所用的通知渠道
    pub indicator_channel_id: String,
    pub indicator_channel_name: String,
    /// shell 平台：是否视为已授权
    pub permission_granted: bool,
    /// shell 平台：是否支持前台状态
    pub foreground_supported: bool,
    /// shell 平台：号码 -> 联系人名
    pub contacts: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: Self::default_data_dir(),
            allow_list: DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect(),
            allow_all: false,
            wake_hold_secs: 5 * 60,
            indicator_channel_id: "flutter_notifications_listener_channel".to_string(),
            indicator_channel_name: "Notifications Listener".to_string(),
            permission_granted: true,
            foreground_supported: true,
            contacts: HashMap::new(),
        }
    }
}

impl Settings {
    /// 默认数据目录
    pub fn default_data_dir() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("notification-listener")
    }

    /// 配置文件路径（默认数据目录下）
    pub fn path() -> PathBuf {
        Self::default_data_dir().join("settings.json")
    }

    /// `NL_DATA_DIR` 指定的数据目录
    pub fn data_dir_override() -> Option<PathBuf> {
        std::env::var("NL_DATA_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
    }

    /// 加载配置；`NL_DATA_DIR` 存在时从该目录读取 settings.json 并以它为数据目录
    pub fn load() -> Result<Self> {
        Self::load_in(Self::data_dir_override())
    }

    /// 从指定数据目录加载（None 表示默认目录）
    pub fn load_in(data_dir: Option<PathBuf>) -> Result<Self> {
        let path = match &data_dir {
            Some(dir) => dir.join("settings.json"),
            None => Self::path(),
        };
        let mut settings = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid settings file {}", path.display()))?
        } else {
            Self::default()
        };

        if let Some(dir) = data_dir {
            settings.data_dir = dir;
        }
        Ok(settings)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn wake_hold_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_hold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_config_accepts_plugin_aliases() {
        let json = r#"{"title":"Listener","desc":"running","subTitle":"sub","showWhen":true,"foreground":true}"#;
        let cfg: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.title, "Listener");
        assert_eq!(cfg.description, "running");
        assert_eq!(cfg.subtitle, "sub");
        assert!(cfg.show_timestamp);
        assert!(cfg.foreground);
    }

    #[test]
    fn test_service_config_missing_fields_use_defaults() {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"foreground":true}"#).unwrap();
        assert_eq!(cfg.title, ServiceConfig::default().title);
        assert!(cfg.foreground);
        assert!(!cfg.show_timestamp);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.wake_hold_timeout(), Duration::from_secs(300));
        assert!(settings.allow_list.iter().any(|t| t == "com.whatsapp"));
        assert!(settings.preferences_path().ends_with("preferences.json"));
    }

    #[test]
    fn test_settings_partial_file() {
        let settings: Settings = serde_json::from_str(r#"{"allow_all":true,"wake_hold_secs":10}"#).unwrap();
        assert!(settings.allow_all);
        assert_eq!(settings.wake_hold_secs, 10);
        assert!(settings.permission_granted);
    }

    #[test]
    fn test_load_in_reads_overridden_dir() {
        // Given: 自定义数据目录下的 settings.json
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("settings.json"),
            r#"{"allow_all":true,"data_dir":"/elsewhere"}"#,
        )
        .unwrap();

        // When
        let settings = Settings::load_in(Some(tmp.path().to_path_buf())).unwrap();

        // Then: 读取该目录的配置，数据目录仍是该目录
        assert!(settings.allow_all);
        assert_eq!(settings.data_dir, tmp.path());
    }

    #[test]
    fn test_load_in_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load_in(Some(tmp.path().to_path_buf())).unwrap();
        assert!(!settings.allow_all);
        assert_eq!(settings.data_dir, tmp.path());
    }
}

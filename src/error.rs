//! 错误分类 - 生命周期与控制通道共用
//!
//! 每个错误都带一个稳定的 wire code，控制通道把它原样回传给调用方。

use thiserror::Error;

/// 监听服务的错误类型
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// 未获得通知监听权限
    #[error("notification listener permission not granted")]
    PermissionDenied,

    /// uid 不在缓存中（调用方视图已过期）
    #[error("notification not found: {uid}")]
    NotFound { uid: String },

    /// action 下标越界
    #[error("action index {index} out of range for {uid} ({len} actions)")]
    IndexOutOfRange { uid: String, index: i64, len: usize },

    /// 平台不支持该能力
    #[error("unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// 投递给消费方失败
    #[error("failed to deliver event: {0}")]
    InternalDeliveryFailure(String),

    /// 持久化失败
    #[error("preference storage failed: {0}")]
    Storage(String),
}

impl ListenerError {
    /// 控制通道使用的错误码
    pub fn code(&self) -> &'static str {
        match self {
            ListenerError::PermissionDenied => "permissionDenied",
            ListenerError::NotFound { .. } => "notFound",
            ListenerError::IndexOutOfRange { .. } => "indexOutOfRange",
            ListenerError::UnsupportedCapability(_) => "unsupported",
            ListenerError::InternalDeliveryFailure(_) => "deliveryFailed",
            ListenerError::Storage(_) => "storage",
        }
    }

    pub fn not_found(uid: impl Into<String>) -> Self {
        ListenerError::NotFound { uid: uid.into() }
    }
}

impl From<std::io::Error> for ListenerError {
    fn from(e: std::io::Error) -> Self {
        ListenerError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ListenerError {
    fn from(e: serde_json::Error) -> Self {
        ListenerError::Storage(e.to_string())
    }
}

/// 库内统一的 Result 别名
pub type Result<T, E = ListenerError> = std::result::Result<T, E>;

//! 服务层 - 生命周期、持久化与平台接口

pub mod launchd;
pub mod lifecycle;
pub mod platform;
pub mod preferences;
pub mod shell;

pub use launchd::{AgentStatus, BootAgent};
pub use lifecycle::{ListenerService, ListenerServiceBuilder, ServiceState, Visibility, WAKE_LOCK_TAG};
pub use platform::{IndicatorChannel, Platform, WakeHold};
pub use preferences::{PersistedState, Preferences};
pub use shell::{ShellHandle, ShellPlatform, StaticContacts};

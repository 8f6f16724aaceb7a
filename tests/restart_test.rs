use anyhow::Result;
use notification_listener::{
    EventRecord, EventSink, ListenerService, Preferences, ServiceConfig, ServiceState, Settings,
    ShellPlatform, Visibility,
};
use std::sync::Arc;

struct NullSink;

impl EventSink for NullSink {
    fn name(&self) -> &str {
        "null"
    }

    fn deliver(&self, _record: &EventRecord) -> Result<()> {
        Ok(())
    }
}

fn settings(dir: &std::path::Path) -> Settings {
    Settings {
        data_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn build(settings: &Settings, platform: Arc<ShellPlatform>) -> Arc<ListenerService> {
    ListenerService::builder(platform, Arc::new(NullSink))
        .settings(settings)
        .build()
        .unwrap()
}

#[test]
fn test_restart_after_reboot_restores_config() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let config = ServiceConfig {
        title: "Listening".into(),
        description: "chat apps".into(),
        subtitle: "sub".into(),
        show_timestamp: true,
        foreground: true,
    };

    // Given: 第一个进程以前台配置启动后退出（未 stopService）
    {
        let service = build(&settings, Arc::new(ShellPlatform::new(true, true)));
        service.start(config.clone()).unwrap();
        service.preferences().set_event_callback(9);
        service.sync();
        service.preferences().flush();
    }

    let persisted = Preferences::load_file(&settings.preferences_path()).unwrap();
    assert!(persisted.service_running);
    assert_eq!(persisted.service_config, Some(config.clone()));

    // When: 新进程收到开机触发
    let platform = Arc::new(ShellPlatform::new(true, true));
    let service = build(&settings, platform.clone());
    assert!(service.is_running());
    assert_eq!(service.restart_after_external_trigger(), Ok(true));
    service.consumer_initialized();

    // Then: 同样的配置、前台状态、回调 id
    assert_eq!(service.state(), ServiceState::Running(Visibility::Foreground));
    assert_eq!(platform.indicator(), Some(config));
    assert_eq!(service.preferences().event_callback(), Some(9));
}

#[test]
fn test_restart_respects_permission() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    {
        let service = build(&settings, Arc::new(ShellPlatform::new(true, true)));
        service.start(ServiceConfig::default()).unwrap();
        service.preferences().flush();
    }

    let service = build(&settings, Arc::new(ShellPlatform::new(false, true)));
    let err = service.restart_after_external_trigger().unwrap_err();

    assert_eq!(err.code(), "permissionDenied");
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
fn test_stop_clears_running_flag_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    {
        let service = build(&settings, Arc::new(ShellPlatform::new(true, true)));
        service.start(ServiceConfig::default()).unwrap();
        service.shutdown();
        service.preferences().flush();
    }

    let service = build(&settings, Arc::new(ShellPlatform::new(true, true)));
    assert!(!service.is_running());
    assert_eq!(service.restart_after_external_trigger(), Ok(false));
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[test]
fn test_corrupt_preferences_start_fresh() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    std::fs::write(settings.preferences_path(), "{not json").unwrap();

    let service = build(&settings, Arc::new(ShellPlatform::new(true, true)));

    assert!(!service.is_running());
    assert!(service.preferences().service_config().is_none());
}

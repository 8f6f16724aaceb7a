//! 控制通道 - 对仍在缓存中的通知执行操作，并管理服务生命周期
//!
//! 类型化接口在 `ControlChannel` 上；`handle_request` 把 wire 请求
//! （`{"id", "method", "params"}`）映射到这些接口上，错误带稳定的 code 回传。

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{ListenerError, Result};
use crate::notification::event::LiveNotification;
use crate::service::lifecycle::ListenerService;

/// 控制请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// 控制响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControlError>,
}

/// 控制错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl ControlError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: "invalidParams".to_string(),
            message: message.into(),
        }
    }
}

impl From<ListenerError> for ControlError {
    fn from(e: ListenerError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl ControlResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self { id, result: Some(result), error: None }
    }

    pub fn err(id: Option<Value>, error: ControlError) -> Self {
        Self { id, result: None, error: Some(error) }
    }
}

/// 去掉 `plugin.` / `service.` 前缀并统一成 camelCase
pub fn canonical_method(method: &str) -> &str {
    let name = method
        .strip_prefix("plugin.")
        .or_else(|| method.strip_prefix("service."))
        .unwrap_or(method);
    match name {
        "tap_action" => "tapAction",
        "send_input" => "sendInput",
        "get_full_notification" => "getFullNotification",
        "start_service" => "startService",
        "stop_service" => "stopService",
        "has_permission" => "hasPermission",
        "is_service_running" => "isServiceRunning",
        "register_event_handle" => "registerEventHandle",
        "promote_to_foreground" => "promoteToForeground",
        "demote_to_background" => "demoteToBackground",
        other => other,
    }
}

/// 控制通道处理器
pub struct ControlChannel {
    service: Arc<ListenerService>,
}

impl ControlChannel {
    pub fn new(service: Arc<ListenerService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<ListenerService> {
        &self.service
    }

    /// 注册调度回调；服务处于 Starting 时消费方初始化随之完成
    pub fn initialize(&self, callback_id: i64) -> bool {
        self.service.preferences().set_dispatcher_callback(callback_id);
        self.service.consumer_initialized();
        true
    }

    pub fn register_event_handle(&self, callback_id: i64) -> bool {
        self.service.preferences().set_event_callback(callback_id);
        info!(callback_id, "Event handle registered");
        true
    }

    /// 未授权时返回 false（不抛错）
    pub fn start_service(&self, config: ServiceConfig) -> Result<bool> {
        match self.service.start(config) {
            Err(ListenerError::PermissionDenied) => Ok(false),
            other => other,
        }
    }

    pub fn stop_service(&self) -> bool {
        self.service.shutdown()
    }

    pub fn has_permission(&self) -> bool {
        self.service.has_permission()
    }

    pub fn is_service_running(&self) -> bool {
        self.service.is_running()
    }

    pub fn promote_to_foreground(&self, config: ServiceConfig) -> Result<bool> {
        self.service.promote_to_foreground(config)
    }

    pub fn demote_to_background(&self) -> bool {
        self.service.demote_to_background()
    }

    fn live(&self, uid: &str) -> Result<LiveNotification> {
        self.service
            .cache()
            .get(uid)
            .ok_or_else(|| ListenerError::not_found(uid))
    }

    fn checked_index(entry: &LiveNotification, index: i64) -> Result<usize> {
        let len = entry.event.actions.len();
        usize::try_from(index)
            .ok()
            .filter(|i| *i < len)
            .ok_or_else(|| ListenerError::IndexOutOfRange {
                uid: entry.event.uid.clone(),
                index,
                len,
            })
    }

    /// 点击通知
    pub fn tap(&self, uid: &str) -> Result<bool> {
        let entry = self.live(uid)?;
        let Some(handle) = entry.handle.as_ref() else {
            debug!(uid, "Notification has no live handle");
            return Ok(false);
        };
        match handle.open() {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(uid, error = %e, "Failed to open notification");
                Ok(false)
            }
        }
    }

    /// 触发第 index 个操作
    pub fn tap_action(&self, uid: &str, index: i64) -> Result<bool> {
        let entry = self.live(uid)?;
        let index = Self::checked_index(&entry, index)?;
        Ok(Self::trigger(&entry, index, None))
    }

    /// 向带输入槽的操作提交文本；只保留操作声明过的 key
    pub fn send_input(&self, uid: &str, index: i64, data: &HashMap<String, String>) -> Result<bool> {
        let entry = self.live(uid)?;
        let index = Self::checked_index(&entry, index)?;
        let action = &entry.event.actions[index];
        if !action.accepts_input {
            return Err(ListenerError::UnsupportedCapability(format!(
                "action {} of {} does not accept input",
                index, uid
            )));
        }

        let filtered: HashMap<String, String> = data
            .iter()
            .filter(|(key, _)| action.input_keys.iter().any(|k| k == *key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self::trigger(&entry, index, Some(&filtered)))
    }

    fn trigger(entry: &LiveNotification, index: usize, input: Option<&HashMap<String, String>>) -> bool {
        let Some(handle) = entry.handle.as_ref() else {
            debug!(uid = %entry.event.uid, "Notification has no live handle");
            return false;
        };
        match handle.trigger(index, input) {
            Ok(()) => true,
            Err(e) => {
                warn!(uid = %entry.event.uid, index, error = %e, "Failed to trigger action");
                false
            }
        }
    }

    pub fn get_full_notification(&self, uid: &str) -> Result<Value> {
        self.service
            .cache()
            .event(uid)
            .map(|e| e.to_value())
            .ok_or_else(|| ListenerError::not_found(uid))
    }

    /// 处理 wire 请求
    pub fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        let params = Params::new(request.params.unwrap_or(Value::Null));
        match self.dispatch(&request.method, &params) {
            Ok(value) => ControlResponse::ok(request.id, value),
            Err(error) => {
                debug!(method = %request.method, code = %error.code, "Control request failed");
                ControlResponse::err(request.id, error)
            }
        }
    }

    fn dispatch(&self, method: &str, params: &Params) -> std::result::Result<Value, ControlError> {
        let value = match canonical_method(method) {
            "initialize" => json!(self.initialize(params.i64(0, "callbackId")?)),
            "initialized" => json!(self.service.consumer_initialized()),
            "registerEventHandle" => json!(self.register_event_handle(params.i64(0, "callbackId")?)),
            "startService" => json!(self.start_service(params.config()?)?),
            "stopService" => json!(self.stop_service()),
            "hasPermission" => json!(self.has_permission()),
            "isServiceRunning" => json!(self.is_service_running()),
            "promoteToForeground" => json!(self.promote_to_foreground(params.config()?)?),
            "demoteToBackground" => json!(self.demote_to_background()),
            "tap" => json!(self.tap(&params.string(0, "uid")?)?),
            "tapAction" => json!(self.tap_action(&params.string(0, "uid")?, params.i64(1, "index")?)?),
            "sendInput" => json!(self.send_input(
                &params.string(0, "uid")?,
                params.i64(1, "index")?,
                &params.input(2, "data")?,
            )?),
            "getFullNotification" => self.get_full_notification(&params.string(0, "uid")?)?,
            _ => {
                return Err(ControlError {
                    code: "notImplemented".to_string(),
                    message: format!("Method not found: {}", method),
                })
            }
        };
        Ok(value)
    }
}

/// 参数访问：既支持位置数组，也支持命名对象
struct Params(Value);

impl Params {
    fn new(value: Value) -> Self {
        Self(value)
    }

    fn get(&self, position: usize, name: &str) -> Option<&Value> {
        match &self.0 {
            Value::Array(items) => items.get(position),
            Value::Object(map) => map.get(name),
            // 单个标量参数
            other if position == 0 && !other.is_null() => Some(other),
            _ => None,
        }
    }

    fn i64(&self, position: usize, name: &str) -> std::result::Result<i64, ControlError> {
        self.get(position, name)
            .and_then(Value::as_i64)
            .ok_or_else(|| ControlError::invalid_params(format!("missing integer parameter `{}`", name)))
    }

    fn string(&self, position: usize, name: &str) -> std::result::Result<String, ControlError> {
        self.get(position, name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ControlError::invalid_params(format!("missing string parameter `{}`", name)))
    }

    fn input(&self, position: usize, name: &str) -> std::result::Result<HashMap<String, String>, ControlError> {
        let Some(Value::Object(map)) = self.get(position, name) else {
            return Err(ControlError::invalid_params(format!("missing object parameter `{}`", name)));
        };
        Ok(map
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect())
    }

    /// ServiceConfig：整个 params，或位置 0 / `config` 字段；缺省用默认配置
    fn config(&self) -> std::result::Result<ServiceConfig, ControlError> {
        let value = match &self.0 {
            Value::Null => return Ok(ServiceConfig::default()),
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            Value::Object(map) => map.get("config").cloned().unwrap_or_else(|| self.0.clone()),
            other => other.clone(),
        };
        if value.is_null() {
            return Ok(ServiceConfig::default());
        }
        serde_json::from_value(value).map_err(|e| ControlError::invalid_params(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::event::{EventRecord, EventSource, NotificationAction, NotificationEvent};
    use crate::notification::handle::fake::RecordingHandle;
    use crate::notification::handle::NotificationHandle;
    use crate::notification::sink::EventSink;
    use crate::notification::source::AllowList;
    use crate::service::shell::ShellPlatform;

    struct Discard;

    impl EventSink for Discard {
        fn name(&self) -> &str {
            "discard"
        }
        fn deliver(&self, _record: &EventRecord) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn channel(platform: Arc<ShellPlatform>) -> ControlChannel {
        let service = ListenerService::builder(platform, Arc::new(Discard))
            .allow_list(AllowList::any())
            .build()
            .unwrap();
        ControlChannel::new(service)
    }

    /// 直接放一条带句柄的通知进缓存
    fn seed(channel: &ControlChannel) -> Arc<RecordingHandle> {
        let handle = Arc::new(RecordingHandle::default());
        let event = NotificationEvent::new(EventSource::AppNotification, "com.whatsapp", 7, None)
            .with_action(NotificationAction::new("Mark as read"))
            .with_action(NotificationAction::new("Reply").with_inputs(["reply_text"]));
        let dyn_handle: Arc<dyn NotificationHandle> = handle.clone();
        channel
            .service()
            .cache()
            .put(LiveNotification::new(event, Some(dyn_handle)));
        handle
    }

    fn request(method: &str, params: Value) -> ControlRequest {
        ControlRequest {
            id: Some(json!(1)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    #[test]
    fn test_canonical_method() {
        assert_eq!(canonical_method("plugin.tap_action"), "tapAction");
        assert_eq!(canonical_method("service.initialized"), "initialized");
        assert_eq!(canonical_method("plugin.sendInput"), "sendInput");
        assert_eq!(canonical_method("tap"), "tap");
    }

    #[test]
    fn test_tap_action_errors_leave_state_unchanged() {
        // Given: 缓存里一条有两个操作的通知
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        let handle = seed(&channel);

        // When / Then: 越界与不存在
        let err = channel.tap_action("com.whatsapp_7", 2).unwrap_err();
        assert_eq!(err.code(), "indexOutOfRange");
        let err = channel.tap_action("com.whatsapp_7", -1).unwrap_err();
        assert_eq!(err.code(), "indexOutOfRange");
        let err = channel.tap_action("missing_1", 0).unwrap_err();
        assert_eq!(err, ListenerError::not_found("missing_1"));

        assert!(handle.triggers().is_empty());
        assert_eq!(channel.service().cache().len(), 1);
    }

    #[test]
    fn test_tap_and_tap_action() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        let handle = seed(&channel);

        assert_eq!(channel.tap("com.whatsapp_7"), Ok(true));
        assert_eq!(channel.tap_action("com.whatsapp_7", 0), Ok(true));

        assert_eq!(handle.open_count(), 1);
        assert_eq!(handle.triggers(), vec![(0, None)]);
    }

    #[test]
    fn test_send_input_without_slots_is_unsupported() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        let handle = seed(&channel);
        let mut data = HashMap::new();
        data.insert("reply_text".to_string(), "hi".to_string());

        let err = channel.send_input("com.whatsapp_7", 0, &data).unwrap_err();

        assert_eq!(err.code(), "unsupported");
        assert!(handle.triggers().is_empty());
    }

    #[test]
    fn test_send_input_filters_unknown_keys() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        let handle = seed(&channel);
        let mut data = HashMap::new();
        data.insert("reply_text".to_string(), "on my way".to_string());
        data.insert("other".to_string(), "ignored".to_string());

        assert_eq!(channel.send_input("com.whatsapp_7", 1, &data), Ok(true));

        let triggers = handle.triggers();
        let input = triggers[0].1.clone().unwrap();
        assert_eq!(triggers[0].0, 1);
        assert_eq!(input.len(), 1);
        assert_eq!(input["reply_text"], "on my way");
    }

    #[test]
    fn test_wire_request_positional_and_named() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        seed(&channel);

        let resp = channel.handle_request(request("plugin.tap_action", json!(["com.whatsapp_7", 0])));
        assert_eq!(resp.result, Some(json!(true)));

        let resp = channel.handle_request(request(
            "sendInput",
            json!({"uid": "com.whatsapp_7", "index": 1, "data": {"reply_text": "ok"}}),
        ));
        assert!(resp.error.is_none());

        let resp = channel.handle_request(request("getFullNotification", json!("com.whatsapp_7")));
        assert_eq!(resp.result.unwrap()["uid"], "com.whatsapp_7");
    }

    #[test]
    fn test_wire_errors_carry_codes() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));

        let resp = channel.handle_request(request("tap", json!(["nope_1"])));
        assert_eq!(resp.error.unwrap().code, "notFound");

        let resp = channel.handle_request(request("tapAction", json!({"uid": "x"})));
        assert_eq!(resp.error.unwrap().code, "invalidParams");

        let resp = channel.handle_request(request("plugin.unknown", Value::Null));
        assert_eq!(resp.error.unwrap().code, "notImplemented");
    }

    #[test]
    fn test_start_service_without_permission_returns_false() {
        let platform = Arc::new(ShellPlatform::new(false, true));
        let channel = channel(platform.clone());

        let resp = channel.handle_request(request(
            "plugin.startService",
            json!({"title": "t", "desc": "d", "foreground": true}),
        ));

        assert_eq!(resp.result, Some(json!(false)));
        assert!(!channel.is_service_running());
        assert!(!platform.wake_lock_held());
    }

    #[test]
    fn test_stop_when_not_running_returns_true() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        assert!(channel.stop_service());
        assert!(!channel.is_service_running());
    }

    #[test]
    fn test_lifecycle_over_wire() {
        let platform = Arc::new(ShellPlatform::new(true, true));
        let channel = channel(platform.clone());

        let resp = channel.handle_request(request("plugin.startService", json!({"foreground": false})));
        assert_eq!(resp.result, Some(json!(true)));
        channel.handle_request(request("service.initialized", Value::Null));
        assert!(channel.service().dispatcher().is_ready());

        let resp = channel.handle_request(request("promoteToForeground", json!({"title": "On"})));
        assert_eq!(resp.result, Some(json!(true)));
        assert_eq!(platform.indicator().map(|c| c.title), Some("On".to_string()));

        channel.handle_request(request("demoteToBackground", Value::Null));
        assert!(!platform.wake_lock_held());

        let resp = channel.handle_request(request("plugin.stopService", Value::Null));
        assert_eq!(resp.result, Some(json!(true)));
        assert!(!channel.is_service_running());
    }

    #[test]
    fn test_register_event_handle_persists() {
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        channel.handle_request(request("plugin.registerEventHandle", json!([77])));
        channel.handle_request(request("plugin.initialize", json!([12])));

        let prefs = channel.service().preferences();
        assert_eq!(prefs.event_callback(), Some(77));
        assert_eq!(prefs.dispatcher_callback(), Some(12));
    }

    #[test]
    fn test_initialize_before_start_keeps_readiness_gate() {
        use crate::service::lifecycle::ServiceState;

        // Given: 消费方在 startService 之前调用 initialize
        let channel = channel(Arc::new(ShellPlatform::new(true, true)));
        assert!(channel.initialize(1));

        // When
        assert_eq!(channel.start_service(ServiceConfig::default()), Ok(true));

        // Then: 等待本次启动后的 initialize
        assert_eq!(channel.service().state(), ServiceState::Starting);
        assert!(!channel.service().dispatcher().is_ready());

        channel.initialize(1);
        assert!(channel.service().dispatcher().is_ready());
    }
}

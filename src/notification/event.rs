//! 统一通知事件结构
//!
//! 所有来源（应用通知、来电状态）归一化后的事件记录。可序列化部分会跨边界投递；
//! 原始句柄只存在于缓存条目 `LiveNotification` 中，从不跨边界。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::handle::NotificationHandle;

/// 事件来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// 系统通知流
    AppNotification,
    /// 来电状态流
    TelephonyCall,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::AppNotification => "app_notification",
            EventSource::TelephonyCall => "telephony_call",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知上的操作按钮
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub label: String,
    /// 是否能携带文本输入
    pub accepts_input: bool,
    /// 期望的输入 key
    #[serde(default)]
    pub input_keys: Vec<String>,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            accepts_input: false,
            input_keys: Vec::new(),
        }
    }

    /// 声明输入槽；空列表表示不接受输入
    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self.accepts_input = !self.input_keys.is_empty();
        self
    }
}

/// 归一化后的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// 由包名 + 来源 id (+ tag) 推导
    pub uid: String,
    pub source: EventSource,
    pub package_name: String,
    pub title: String,
    pub text: String,
    /// 来源相关的元数据
    pub extras: Map<String, Value>,
    /// 顺序即控制命令使用的下标
    pub actions: Vec<NotificationAction>,
    /// 接收时间
    pub posted_at: DateTime<Utc>,
    /// 进程内单调递增的接收序号，仅用于诊断
    #[serde(default)]
    pub sequence: u64,
}

impl NotificationEvent {
    pub fn new(
        source: EventSource,
        package_name: impl Into<String>,
        id: i64,
        tag: Option<&str>,
    ) -> Self {
        let package_name = package_name.into();
        Self {
            uid: compute_uid(&package_name, id, tag),
            source,
            package_name,
            title: String::new(),
            text: String::new(),
            extras: Map::new(),
            actions: Vec::new(),
            posted_at: Utc::now(),
            sequence: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    /// 序列化为 JSON（getFullNotification 的返回值）
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// uid 推导：`{package}_{id}` 或 `{package}_{id}_{tag}`
pub fn compute_uid(package_name: &str, id: i64, tag: Option<&str>) -> String {
    match tag.filter(|t| !t.is_empty()) {
        Some(tag) => format!("{}_{}_{}", package_name, id, tag),
        None => format!("{}_{}", package_name, id),
    }
}

/// 缓存条目：事件 + 独占的原始句柄
#[derive(Clone)]
pub struct LiveNotification {
    pub event: NotificationEvent,
    pub handle: Option<Arc<dyn NotificationHandle>>,
}

impl LiveNotification {
    pub fn new(event: NotificationEvent, handle: Option<Arc<dyn NotificationHandle>>) -> Self {
        Self { event, handle }
    }

    pub fn uid(&self) -> &str {
        &self.event.uid
    }
}

impl fmt::Debug for LiveNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveNotification")
            .field("event", &self.event)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// 投递给消费方的记录
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    /// registerEventHandle 注册的回调 id，未注册为 0
    pub callback: i64,
    pub event: NotificationEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_is_deterministic() {
        assert_eq!(compute_uid("com.whatsapp", 12, None), "com.whatsapp_12");
        assert_eq!(compute_uid("com.whatsapp", 12, Some("chat")), "com.whatsapp_12_chat");
        assert_eq!(compute_uid("com.whatsapp", 12, Some("")), "com.whatsapp_12");
        assert_eq!(
            compute_uid("com.whatsapp", 12, Some("chat")),
            compute_uid("com.whatsapp", 12, Some("chat"))
        );
    }

    #[test]
    fn test_action_inputs_set_accepts_input() {
        let plain = NotificationAction::new("Mark read");
        assert!(!plain.accepts_input);

        let reply = NotificationAction::new("Reply").with_inputs(["reply_text"]);
        assert!(reply.accepts_input);
        assert_eq!(reply.input_keys, vec!["reply_text".to_string()]);
    }

    #[test]
    fn test_event_serializes_without_handle() {
        let event = NotificationEvent::new(EventSource::AppNotification, "com.skype", 3, None)
            .with_title("Alice")
            .with_text("hi")
            .with_action(NotificationAction::new("Reply").with_inputs(["text"]));

        let value = event.to_value();
        assert_eq!(value["uid"], "com.skype_3");
        assert_eq!(value["source"], "app_notification");
        assert_eq!(value["actions"][0]["acceptsInput"], true);
        assert!(value.get("handle").is_none());

        let parsed: NotificationEvent = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.uid, event.uid);
    }
}

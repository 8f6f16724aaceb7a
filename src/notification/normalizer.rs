//! 事件归一化 - 原始来源事件 -> `NotificationEvent`
//!
//! 纯函数，永不失败：缺失字段一律归一为空字符串 / 空列表。
//! OS 丢掉的事件无法重新请求，所以宁可投递一个不完整的事件也不报错。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event::{EventSource, NotificationAction, NotificationEvent};

/// 来电状态流使用的包名，同时也是 allow-list 中的来源标识
pub const CALL_STATUS_PACKAGE: &str = "call.status";

/// 原始应用通知（字段全部可选）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawNotification {
    pub package_name: Option<String>,
    pub id: Option<i64>,
    pub tag: Option<String>,
    pub key: Option<String>,
    /// 来源给出的发布时间（epoch 毫秒）
    pub post_time: Option<i64>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub sub_text: Option<String>,
    pub big_text: Option<String>,
    pub can_tap: Option<bool>,
    pub has_large_icon: Option<bool>,
    pub actions: Option<Vec<RawAction>>,
    pub extras: Option<Map<String, Value>>,
}

/// 原始操作按钮
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAction {
    pub title: Option<String>,
    pub inputs: Option<Vec<RawInput>>,
}

/// 原始输入槽
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawInput {
    pub result_key: Option<String>,
    pub label: Option<String>,
}

/// 来电状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Ringing,
    #[serde(alias = "offhook")]
    OffHook,
}

impl CallState {
    pub fn status_name(&self) -> &'static str {
        match self {
            CallState::Idle => "CALL_STATE_IDLE",
            CallState::Ringing => "CALL_STATE_RINGING",
            CallState::OffHook => "CALL_STATE_OFFHOOK",
        }
    }
}

/// 原始来电状态事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCallState {
    pub state: CallState,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// 适配层在响铃时解析出的联系人名
    #[serde(default)]
    pub contact_name: Option<String>,
}

/// 来源事件
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePayload {
    Notification(RawNotification),
    CallState(RawCallState),
}

impl SourcePayload {
    pub fn source(&self) -> EventSource {
        match self {
            SourcePayload::Notification(_) => EventSource::AppNotification,
            SourcePayload::CallState(_) => EventSource::TelephonyCall,
        }
    }

    /// allow-list 匹配用的来源标识
    pub fn origin(&self) -> &str {
        match self {
            SourcePayload::Notification(raw) => raw.package_name.as_deref().unwrap_or(""),
            SourcePayload::CallState(_) => CALL_STATUS_PACKAGE,
        }
    }

    /// 不做完整归一化，只推导 uid（用于移除事件）
    pub fn uid(&self) -> String {
        match self {
            SourcePayload::Notification(raw) => notification_uid(raw),
            SourcePayload::CallState(_) => call_uid(),
        }
    }
}

pub fn notification_uid(raw: &RawNotification) -> String {
    super::event::compute_uid(
        raw.package_name.as_deref().unwrap_or(""),
        raw.id.unwrap_or(0),
        raw.tag.as_deref(),
    )
}

/// 来电只保留一个活跃条目，每次状态变化替换它
pub fn call_uid() -> String {
    super::event::compute_uid(CALL_STATUS_PACKAGE, 0, None)
}

/// 归一化入口
pub fn normalize(payload: &SourcePayload, received_at: DateTime<Utc>) -> NotificationEvent {
    match payload {
        SourcePayload::Notification(raw) => normalize_notification(raw, received_at),
        SourcePayload::CallState(raw) => normalize_call_state(raw, received_at),
    }
}

fn normalize_notification(raw: &RawNotification, received_at: DateTime<Utc>) -> NotificationEvent {
    let package_name = raw.package_name.clone().unwrap_or_default();
    let id = raw.id.unwrap_or(0);

    let mut event = NotificationEvent::new(
        EventSource::AppNotification,
        package_name.clone(),
        id,
        raw.tag.as_deref(),
    )
    .with_title(raw.title.clone().unwrap_or_default())
    .with_text(raw.text.clone().unwrap_or_default());
    event.posted_at = received_at;

    // 来源自带的 extras 先放，固定字段覆盖同名项
    if let Some(extras) = &raw.extras {
        for (k, v) in extras {
            event.extras.insert(k.clone(), v.clone());
        }
    }
    event.extras.insert("package_name".into(), Value::from(package_name));
    event.extras.insert("id".into(), Value::from(id));
    if let Some(tag) = raw.tag.as_ref().filter(|t| !t.is_empty()) {
        event.extras.insert("tag".into(), Value::from(tag.clone()));
    }
    event.extras.insert("key".into(), Value::from(raw.key.clone().unwrap_or_default()));
    event.extras.insert(
        "post_time".into(),
        Value::from(raw.post_time.unwrap_or_else(|| received_at.timestamp_millis())),
    );
    event.extras.insert("sub_text".into(), Value::from(raw.sub_text.clone().unwrap_or_default()));
    event.extras.insert("big_text".into(), Value::from(raw.big_text.clone().unwrap_or_default()));
    event.extras.insert("can_tap".into(), Value::from(raw.can_tap.unwrap_or(false)));
    event.extras.insert("has_large_icon".into(), Value::from(raw.has_large_icon.unwrap_or(false)));

    event.actions = raw
        .actions
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(normalize_action)
        .collect();

    event
}

fn normalize_action(raw: &RawAction) -> NotificationAction {
    let keys: Vec<String> = raw
        .inputs
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|input| input.result_key.clone())
        .filter(|key| !key.is_empty())
        .collect();

    NotificationAction::new(raw.title.clone().unwrap_or_default()).with_inputs(keys)
}

fn normalize_call_state(raw: &RawCallState, received_at: DateTime<Utc>) -> NotificationEvent {
    let number = raw.phone_number.clone().unwrap_or_default();
    // 只有响铃时才显示联系人名
    let title = match raw.state {
        CallState::Ringing => raw.contact_name.clone().unwrap_or_default(),
        _ => String::new(),
    };

    let mut event = NotificationEvent::new(EventSource::TelephonyCall, CALL_STATUS_PACKAGE, 0, None)
        .with_title(title)
        .with_text(number.clone())
        .with_extra("package_name", CALL_STATUS_PACKAGE)
        .with_extra("call_state", raw.state.status_name())
        .with_extra("phone_number", number);
    event.posted_at = received_at;
    event
}

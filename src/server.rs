//! stdio 控制服务 - 按行读取 JSON 请求，写回响应与事件
//!
//! 除了控制通道的方法之外，shell 还通过 `source.posted` / `source.removed` /
//! `source.callState` 注入 OS 事件。事件与响应共用同一个 stdout 写出器。

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::control::{ControlChannel, ControlError, ControlRequest, ControlResponse};
use crate::notification::dispatcher::Submitted;
use crate::notification::handle::NotificationHandle;
use crate::notification::normalizer::{self, CallState, RawNotification};
use crate::notification::sink::SharedWriter;
use crate::service::shell::ShellHandle;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallStateParams {
    state: CallState,
    #[serde(default, alias = "phone_number")]
    phone_number: Option<String>,
}

fn submitted_name(submitted: Option<Submitted>) -> &'static str {
    match submitted {
        Some(Submitted::Dispatched) => "dispatched",
        Some(Submitted::Queued) => "queued",
        Some(Submitted::Dropped) => "dropped",
        None => "ignored",
    }
}

/// stdio 控制服务
pub struct ControlServer {
    channel: ControlChannel,
    out: SharedWriter,
}

impl ControlServer {
    pub fn new(channel: ControlChannel, out: SharedWriter) -> Self {
        Self { channel, out }
    }

    pub fn channel(&self) -> &ControlChannel {
        &self.channel
    }

    /// 运行（stdio 模式），直到 stdin EOF
    pub async fn run(&self) -> Result<()> {
        info!("Control server started (stdio)");
        self.serve(BufReader::new(tokio::io::stdin())).await?;
        info!("Control server input closed");
        Ok(())
    }

    pub async fn serve<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                break;
            }
            if let Some(response) = self.handle_line(line.trim()) {
                self.out.write_line(&response)?;
            }
        }
        Ok(())
    }

    /// 处理一行输入；空行或无法解析的行没有响应
    pub fn handle_line(&self, line: &str) -> Option<Value> {
        if line.is_empty() {
            return None;
        }
        match serde_json::from_str::<ControlRequest>(line) {
            Ok(request) => serde_json::to_value(self.handle_request(request)).ok(),
            Err(e) => {
                warn!(error = %e, "Failed to parse control request");
                None
            }
        }
    }

    pub fn handle_request(&self, request: ControlRequest) -> ControlResponse {
        let id = request.id.clone();
        let params = request.params.clone().unwrap_or(Value::Null);
        let method = request.method.clone();
        let result = match method.as_str() {
            "source.posted" => self.inject_posted(params),
            "source.removed" => self.inject_removed(params),
            "source.callState" => self.inject_call_state(params),
            _ => return self.channel.handle_request(request),
        };
        match result {
            Ok(value) => ControlResponse::ok(id, value),
            Err(error) => ControlResponse::err(id, error),
        }
    }

    fn inject_posted(&self, params: Value) -> std::result::Result<Value, ControlError> {
        let raw: RawNotification = parse(params)?;
        let uid = normalizer::notification_uid(&raw);
        let handle: Arc<dyn NotificationHandle> = Arc::new(ShellHandle::new(uid.clone(), self.out.clone()));
        let submitted = self.channel.service().notifications().on_posted(raw, Some(handle));
        Ok(json!({ "uid": uid, "submitted": submitted_name(submitted) }))
    }

    fn inject_removed(&self, params: Value) -> std::result::Result<Value, ControlError> {
        let raw: RawNotification = parse(params)?;
        let removed = self.channel.service().notifications().on_removed(&raw);
        Ok(json!({ "uid": normalizer::notification_uid(&raw), "removed": removed }))
    }

    fn inject_call_state(&self, params: Value) -> std::result::Result<Value, ControlError> {
        let call: CallStateParams = parse(params)?;
        let submitted = self
            .channel
            .service()
            .calls()
            .on_call_state_changed(call.state, call.phone_number.as_deref());
        Ok(json!({ "uid": normalizer::call_uid(), "submitted": submitted_name(submitted) }))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> std::result::Result<T, ControlError> {
    serde_json::from_value(params).map_err(|e| ControlError {
        code: "invalidParams".to_string(),
        message: e.to_string(),
    })
}

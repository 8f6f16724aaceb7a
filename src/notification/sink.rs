//! 消费方接口 - 事件流的出口

use anyhow::Result;
use serde_json::json;
use std::io::Write;
use std::sync::{Arc, Mutex};

use super::event::EventRecord;

/// 消费方 trait（应用回调）
pub trait EventSink: Send + Sync {
    /// 名称（用于日志）
    fn name(&self) -> &str;

    /// 投递一条记录。返回错误视为 InternalDeliveryFailure：记录日志后丢弃。
    fn deliver(&self, record: &EventRecord) -> Result<()>;
}

/// 多方共享的按行写出器（stdout 或文件）
#[derive(Clone)]
pub struct SharedWriter {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl SharedWriter {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// 写一行 JSON 并 flush；整行在锁内完成，不会与其他写者交错
    pub fn write_line(&self, value: &serde_json::Value) -> Result<()> {
        let line = serde_json::to_string(value)?;
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(line.as_bytes())?;
        guard.write_all(b"\n")?;
        guard.flush()?;
        Ok(())
    }
}

/// 以 `sink_event` 行写出事件
pub struct JsonLinesSink {
    out: SharedWriter,
}

impl JsonLinesSink {
    pub fn new(out: SharedWriter) -> Self {
        Self { out }
    }
}

impl EventSink for JsonLinesSink {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn deliver(&self, record: &EventRecord) -> Result<()> {
        self.out.write_line(&json!({
            "method": "sink_event",
            "params": record,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::event::{EventSource, NotificationEvent};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_lines_sink_writes_sink_event() {
        let buf = Buffer::default();
        let sink = JsonLinesSink::new(SharedWriter::new(buf.clone()));
        let record = EventRecord {
            callback: 99,
            event: NotificationEvent::new(EventSource::AppNotification, "com.skype", 1, None),
        };

        sink.deliver(&record).unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let line: serde_json::Value = serde_json::from_str(out.trim()).unwrap();
        assert_eq!(line["method"], "sink_event");
        assert_eq!(line["params"]["callback"], 99);
        assert_eq!(line["params"]["event"]["uid"], "com.skype_1");
        assert!(out.ends_with('\n'));
    }
}

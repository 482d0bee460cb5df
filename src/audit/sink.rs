//! 审计日志 Sink 模块
//!
//! `LogSink` 是审计日志的持久化后端接口，可以是文件、数据库或外部
//! 日志服务。本模块提供记录序列化（结构化 JSON 行或人类可读文本行）
//! 和用于测试的内存实现。
//!
//! Sink 写入失败绝不传播给认证调用方，由审计服务捕获后走诊断通道。

use serde::Serialize;
use std::sync::{Arc, RwLock};

use crate::audit::event::AuthenticationEvent;
use crate::error::{AuditError, Error, Result};

/// 记录格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordFormat {
    /// 每行一条 JSON 记录
    #[default]
    Structured,
    /// 单行人类可读文本
    Line,
}

/// 日志 Sink trait
///
/// 实现此 trait 以对接持久化后端。`append` 必须是原子的：
/// 一条记录要么完整写入，要么完全不写。
pub trait LogSink: Send + Sync {
    /// 追加一条序列化后的记录
    fn append(&self, record: &str) -> Result<()>;
}

/// 结构化记录的序列化形态
#[derive(Serialize)]
struct StructuredRecord<'a> {
    timestamp: String,
    level: &'static str,
    #[serde(rename = "type")]
    event_type: &'a str,
    id: &'a str,
    user: Option<&'a str>,
    ip: Option<&'a str>,
    success: bool,
    classification: &'a str,
    metadata: &'a std::collections::HashMap<String, serde_json::Value>,
}

/// 将事件序列化为指定格式的一条记录
pub fn format_record(event: &AuthenticationEvent, format: RecordFormat) -> Result<String> {
    let timestamp = event
        .timestamp
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    let level = if event.success { "INFO" } else { "WARN" };

    match format {
        RecordFormat::Structured => {
            let record = StructuredRecord {
                timestamp,
                level,
                event_type: event.event_type.as_str(),
                id: &event.event_id,
                user: event.user_id.as_deref(),
                ip: event.ip_address.as_deref(),
                success: event.success,
                classification: event.classification.as_str(),
                metadata: &event.metadata,
            };
            serde_json::to_string(&record)
                .map_err(|e| Error::Audit(AuditError::WriteFailed(e.to_string())))
        }
        RecordFormat::Line => Ok(format!(
            "{} [{}] {} id={} user={} ip={} success={} classification={} metadata={}",
            timestamp,
            level,
            event.event_type,
            event.event_id,
            event.user_id.as_deref().unwrap_or("-"),
            event.ip_address.as_deref().unwrap_or("-"),
            event.success,
            event.classification,
            serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string()),
        )),
    }
}

/// 内存 Sink
///
/// 捕获所有追加的记录供测试断言，可配置为失败。
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Arc<RwLock<Vec<String>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemorySink {
    /// 创建新的内存 Sink
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置后续写入是否失败
    pub fn set_failing(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    /// 获取所有已写入的记录
    pub fn records(&self) -> Vec<String> {
        self.records.read().unwrap().clone()
    }

    /// 已写入记录数量
    pub fn record_count(&self) -> usize {
        self.records.read().unwrap().len()
    }
}

impl Clone for InMemorySink {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            fail: Arc::clone(&self.fail),
        }
    }
}

impl LogSink for InMemorySink {
    fn append(&self, record: &str) -> Result<()> {
        if *self.fail.read().unwrap() {
            return Err(Error::Audit(AuditError::WriteFailed(
                "simulated sink failure".to_string(),
            )));
        }
        self.records.write().unwrap().push(record.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{Classification, EventType};
    use chrono::Utc;

    fn event() -> AuthenticationEvent {
        let mut event = AuthenticationEvent::new(EventType::MfaFailure, false)
            .with_user("u1")
            .with_ip("10.0.0.xxx")
            .with_classification(Classification::Confidential)
            .with_metadata("failure_reason", "code mismatch")
            .with_timestamp(Utc::now());
        event.event_id = "evt_test".to_string();
        event
    }

    #[test]
    fn test_structured_format_is_json_line() {
        let record = format_record(&event(), RecordFormat::Structured).unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&record).unwrap();
        assert_eq!(parsed["type"], "MFA_FAILURE");
        assert_eq!(parsed["id"], "evt_test");
        assert_eq!(parsed["user"], "u1");
        assert_eq!(parsed["level"], "WARN");
        assert_eq!(parsed["classification"], "CONFIDENTIAL");
        assert!(!record.contains('\n'));
    }

    #[test]
    fn test_line_format_contains_fields() {
        let record = format_record(&event(), RecordFormat::Line).unwrap();

        assert!(record.contains("[WARN]"));
        assert!(record.contains("MFA_FAILURE"));
        assert!(record.contains("id=evt_test"));
        assert!(record.contains("user=u1"));
        assert!(record.contains("classification=CONFIDENTIAL"));
    }

    #[test]
    fn test_success_maps_to_info_level() {
        let mut event = event();
        event.success = true;
        let record = format_record(&event, RecordFormat::Line).unwrap();
        assert!(record.contains("[INFO]"));
    }

    #[test]
    fn test_in_memory_sink_append() {
        let sink = InMemorySink::new();
        sink.append("record-1").unwrap();
        sink.append("record-2").unwrap();

        assert_eq!(sink.record_count(), 2);
        assert_eq!(sink.records()[0], "record-1");
    }

    #[test]
    fn test_in_memory_sink_failure() {
        let sink = InMemorySink::new();
        sink.set_failing(true);

        assert!(matches!(
            sink.append("record"),
            Err(Error::Audit(AuditError::WriteFailed(_)))
        ));
        assert_eq!(sink.record_count(), 0);
    }
}

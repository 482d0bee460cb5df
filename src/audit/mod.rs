//! 安全审计与合规模块
//!
//! 围绕追加写入的认证事件日志构建的审计管道：
//!
//! - **event**: 事件模型、敏感级别和查询过滤器
//! - **privacy**: 写入前的敏感字段哈希与 IP 匿名化
//! - **sink**: 日志持久化接口与记录序列化
//! - **alert**: 滑动窗口模式检测与安全告警
//! - **report**: 合规报告聚合
//! - **service**: 组合以上所有部分的门面，MFA 引擎和上层认证流程
//!   只与它交互

pub mod alert;
pub mod event;
pub mod privacy;
pub mod report;
pub mod service;
pub mod sink;

pub use alert::{AlertConfig, AlertEngine, AlertSeverity, AlertType, SecurityAlert};
pub use event::{AuthenticationEvent, Classification, EventFilter, EventType};
pub use privacy::{PrivacyConfig, PrivacyFilter, anonymize_ip, hash_sensitive};
pub use report::{AuditReport, ComplianceSection};
pub use service::{AuditConfig, AuditService, ErasureReceipt, RetentionSweepOutcome};
pub use sink::{InMemorySink, LogSink, RecordFormat};

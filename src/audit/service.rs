//! 审计与合规门面模块
//!
//! `AuditService` 是 MFA 引擎和上层认证流程唯一调用的审计入口，
//! 组合了事件存储、隐私过滤、告警引擎和日志 Sink：
//!
//! - `log_event` 绝不向调用方报错：Sink 写入失败走 tracing 诊断通道，
//!   认证路径不被审计故障阻塞
//! - 查询按时间倒序分页返回
//! - `delete_user_data` 实现 GDPR 式擦除：移除用户全部事件和告警，
//!   并先写入一条不含个人数据的墓碑事件
//! - 高危告警进入推送队列，由宿主在认证关键路径之外调用
//!   `flush_notifications` 排空
//! - 保留期清理移除过期事件和已处理的过期告警，未处理告警永久保留

use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::audit::alert::{AlertConfig, AlertEngine, SecurityAlert};
use crate::audit::event::{AuthenticationEvent, Classification, EventFilter, EventType};
use crate::audit::privacy::{PrivacyConfig, PrivacyFilter, hash_sensitive};
use crate::audit::report::{AuditReport, build_report};
use crate::audit::sink::{LogSink, RecordFormat, format_record};
use crate::clock::Clock;
use crate::delivery::Notifier;
use crate::error::{AuditError, Error, Result, StorageError};
use crate::random::generate_id;

/// 审计服务配置
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// 事件与已处理告警的保留期
    pub retention: Duration,

    /// Sink 记录格式
    pub record_format: RecordFormat,

    /// 隐私过滤配置
    pub privacy: PrivacyConfig,

    /// 告警规则配置
    pub alert: AlertConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention: Duration::days(90),
            record_format: RecordFormat::Structured,
            privacy: PrivacyConfig::default(),
            alert: AlertConfig::default(),
        }
    }
}

impl AuditConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置保留期
    pub fn with_retention(mut self, retention: Duration) -> Self {
        assert!(retention > Duration::zero(), "retention must be positive");
        self.retention = retention;
        self
    }

    /// 设置记录格式
    pub fn with_record_format(mut self, format: RecordFormat) -> Self {
        self.record_format = format;
        self
    }

    /// 设置隐私过滤配置
    pub fn with_privacy(mut self, privacy: PrivacyConfig) -> Self {
        self.privacy = privacy;
        self
    }

    /// 设置告警规则配置
    pub fn with_alert(mut self, alert: AlertConfig) -> Self {
        self.alert = alert;
        self
    }
}

/// 擦除回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErasureReceipt {
    /// 移除的事件数
    pub events_removed: usize,
    /// 移除的告警数
    pub alerts_removed: usize,
    /// 墓碑事件 ID
    pub tombstone_event_id: String,
    /// 擦除时间
    pub erased_at: DateTime<Utc>,
}

/// 保留期清理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionSweepOutcome {
    /// 移除的过期事件数
    pub events_removed: usize,
    /// 移除的已处理过期告警数
    pub alerts_removed: usize,
}

/// 审计与合规门面
pub struct AuditService {
    config: AuditConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn LogSink>,
    notifier: Option<Arc<dyn Notifier>>,
    privacy: PrivacyFilter,
    alert_engine: AlertEngine,
    events: RwLock<Vec<AuthenticationEvent>>,
    alerts: RwLock<Vec<SecurityAlert>>,
    pending_notifications: Mutex<VecDeque<SecurityAlert>>,
}

impl AuditService {
    /// 创建新的审计服务
    pub fn new(config: AuditConfig, sink: Arc<dyn LogSink>, clock: Arc<dyn Clock>) -> Self {
        let privacy = PrivacyFilter::new(config.privacy.clone());
        let alert_engine = AlertEngine::new(config.alert.clone());
        Self {
            config,
            clock,
            sink,
            notifier: None,
            privacy,
            alert_engine,
            events: RwLock::new(Vec::new()),
            alerts: RwLock::new(Vec::new()),
            pending_notifications: Mutex::new(VecDeque::new()),
        }
    }

    /// 设置高危告警推送器
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    // ========================================================================
    // 写入路径
    // ========================================================================

    /// 写入一条审计事件
    ///
    /// 规范化、隐私过滤、Sink 追加、告警规则评估。任何内部失败都被
    /// 捕获并走诊断通道，绝不影响认证调用方。
    pub fn log_event(&self, mut event: AuthenticationEvent) {
        let now = self.clock.now();
        if event.event_id.is_empty() {
            event.event_id = generate_id("evt");
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(now);
        }

        self.privacy.apply(&mut event);

        match format_record(&event, self.config.record_format) {
            Ok(record) => {
                if let Err(e) = self.sink.append(&record) {
                    error!(event_id = %event.event_id, error = %e, "audit sink append failed");
                }
            }
            Err(e) => {
                error!(event_id = %event.event_id, error = %e, "audit record serialization failed");
            }
        }

        // 新 IP 规则需要该用户不含当前事件的历史
        let history: Vec<AuthenticationEvent> = match &event.user_id {
            Some(user_id) => self
                .events
                .read()
                .unwrap()
                .iter()
                .filter(|e| e.user_id.as_deref() == Some(user_id.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        self.events.write().unwrap().push(event.clone());

        for alert in self.alert_engine.evaluate(&event, &history, now) {
            debug!(alert_id = %alert.alert_id, severity = %alert.severity, "detector raised alert");
            self.store_alert(alert);
        }
    }

    /// 显式创建一条安全告警
    ///
    /// HIGH/CRITICAL 告警额外进入推送队列。返回告警 ID。
    pub fn generate_security_alert(&self, alert: SecurityAlert) -> String {
        let alert_id = alert.alert_id.clone();
        self.store_alert(alert);
        alert_id
    }

    fn store_alert(&self, alert: SecurityAlert) {
        if alert.severity.requires_notification() {
            self.pending_notifications
                .lock()
                .unwrap()
                .push_back(alert.clone());
        }
        self.alerts.write().unwrap().push(alert);
    }

    /// 排空高危告警推送队列
    ///
    /// 推送失败只记录诊断日志，本服务不重试。返回尝试推送的数量。
    /// 由宿主在认证关键路径之外调度。
    pub async fn flush_notifications(&self) -> usize {
        let pending: Vec<SecurityAlert> = {
            let mut queue = self.pending_notifications.lock().unwrap();
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return 0;
        }

        let Some(notifier) = &self.notifier else {
            debug!(count = pending.len(), "no notifier configured, dropping queued alerts");
            return 0;
        };

        let count = pending.len();
        for alert in pending {
            if let Err(e) = notifier.notify(&alert).await {
                warn!(alert_id = %alert.alert_id, error = %e, "alert notification failed");
            }
        }
        count
    }

    // ========================================================================
    // 查询路径
    // ========================================================================

    /// 查询事件，按时间倒序分页返回
    pub fn get_events(&self, filter: &EventFilter) -> Vec<AuthenticationEvent> {
        let events = self.events.read().unwrap();
        let mut matched: Vec<AuthenticationEvent> = events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect()
    }

    /// 生成合规报告（忽略过滤器的分页设置）
    pub fn generate_report(&self, filter: &EventFilter) -> AuditReport {
        let events = self.events.read().unwrap();
        let matched: Vec<AuthenticationEvent> = events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        build_report(&matched, self.config.retention, self.clock.now())
    }

    /// 获取安全告警
    pub fn get_security_alerts(&self, include_resolved: bool) -> Vec<SecurityAlert> {
        self.alerts
            .read()
            .unwrap()
            .iter()
            .filter(|a| include_resolved || !a.resolved)
            .cloned()
            .collect()
    }

    /// 将告警标记为已处理
    pub fn resolve_alert(&self, alert_id: &str, resolved_by: &str) -> Result<()> {
        let mut alerts = self.alerts.write().unwrap();
        let alert = alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id)
            .ok_or_else(|| StorageError::NotFound(format!("alert '{}'", alert_id)))?;
        alert.resolve(resolved_by, self.clock.now());
        Ok(())
    }

    // ========================================================================
    // 擦除与保留
    // ========================================================================

    /// GDPR 式用户数据擦除
    ///
    /// 移除引用该用户的全部事件和告警，并先写入一条不含个人数据的
    /// 墓碑事件（用户引用以哈希形式保留，用于不可抵赖）。墓碑写入
    /// 失败视为致命：合规要求擦除必须得到确认。
    pub fn delete_user_data(&self, user_id: &str, reason: &str) -> Result<ErasureReceipt> {
        let now = self.clock.now();

        let events_removed = {
            let mut events = self.events.write().unwrap();
            let before = events.len();
            events.retain(|e| e.user_id.as_deref() != Some(user_id));
            before - events.len()
        };
        let alerts_removed = {
            let mut alerts = self.alerts.write().unwrap();
            let before = alerts.len();
            alerts.retain(|a| a.user_id.as_deref() != Some(user_id));
            before - alerts.len()
        };

        let mut tombstone = AuthenticationEvent::new(EventType::DataErasure, true)
            .with_timestamp(now)
            .with_classification(Classification::Confidential)
            .with_metadata("action", "user_data_erasure")
            .with_metadata("user_ref", hash_sensitive(user_id))
            .with_metadata("reason", reason)
            .with_metadata("events_removed", events_removed)
            .with_metadata("alerts_removed", alerts_removed);
        tombstone.event_id = generate_id("evt");

        let record = format_record(&tombstone, self.config.record_format)
            .map_err(|e| Error::Audit(AuditError::ErasureFailed(e.to_string())))?;
        self.sink
            .append(&record)
            .map_err(|e| Error::Audit(AuditError::ErasureFailed(e.to_string())))?;
        self.events.write().unwrap().push(tombstone.clone());

        Ok(ErasureReceipt {
            events_removed,
            alerts_removed,
            tombstone_event_id: tombstone.event_id,
            erased_at: now,
        })
    }

    /// 保留期清理
    ///
    /// 移除早于保留期的事件和已处理的过期告警；未处理告警无论多旧
    /// 都保留。由宿主按日调度。
    pub fn run_retention_sweep(&self) -> RetentionSweepOutcome {
        let cutoff = self.clock.now() - self.config.retention;

        let events_removed = {
            let mut events = self.events.write().unwrap();
            let before = events.len();
            events.retain(|e| e.timestamp.is_none_or(|t| t >= cutoff));
            before - events.len()
        };
        let alerts_removed = {
            let mut alerts = self.alerts.write().unwrap();
            let before = alerts.len();
            alerts.retain(|a| !a.resolved || a.created_at >= cutoff);
            before - alerts.len()
        };

        if events_removed > 0 || alerts_removed > 0 {
            debug!(events_removed, alerts_removed, "retention sweep completed");
        }
        RetentionSweepOutcome {
            events_removed,
            alerts_removed,
        }
    }
}

//! 安全告警与模式检测模块
//!
//! `AlertEngine` 在每条事件写入时同步评估三条独立的检测规则：
//!
//! - **失败登录**：按来源 IP 的滑动窗口计数，达到阈值发 HIGH 告警并
//!   重置该 IP 的计数器
//! - **权限违规**：每条 `PERMISSION_DENIED` 事件立即发 MEDIUM 告警
//! - **可疑活动**：有足够历史记录的用户从 24 小时内未见过的 IP 发起
//!   认证时发 MEDIUM 告警
//!
//! 滑动窗口计数器是进程内的临时状态，不持久化；告警本身由审计服务
//! 持有并参与保留期清理。

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::audit::event::{AuthenticationEvent, EventType};
use crate::random::generate_id;

/// 告警严重级别（有序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    /// 低
    Low,
    /// 中
    Medium,
    /// 高
    High,
    /// 紧急
    Critical,
}

impl AlertSeverity {
    /// 获取级别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
        }
    }

    /// 是否需要推送给 Notifier
    pub fn requires_notification(&self) -> bool {
        *self >= AlertSeverity::High
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertType {
    /// 重复的失败登录
    FailedLoginAttempts,
    /// 权限违规
    PermissionViolation,
    /// 可疑活动
    SuspiciousActivity,
    /// 其他
    Custom(String),
}

impl AlertType {
    /// 获取类型名称
    pub fn as_str(&self) -> &str {
        match self {
            AlertType::FailedLoginAttempts => "FAILED_LOGIN_ATTEMPTS",
            AlertType::PermissionViolation => "PERMISSION_VIOLATION",
            AlertType::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
            AlertType::Custom(name) => name,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 安全告警
///
/// 创建后只有 `resolved`/`resolved_at`/`resolved_by` 可变。
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityAlert {
    /// 告警 ID
    pub alert_id: String,
    /// 告警类型
    pub alert_type: AlertType,
    /// 严重级别
    pub severity: AlertSeverity,
    /// 标题
    pub title: String,
    /// 描述
    pub description: String,
    /// 关联用户 ID
    pub user_id: Option<String>,
    /// 触发告警的事件 ID 列表
    pub related_event_ids: Vec<String>,
    /// 是否已处理
    pub resolved: bool,
    /// 处理时间
    pub resolved_at: Option<DateTime<Utc>>,
    /// 处理人
    pub resolved_by: Option<String>,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 附加元数据
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SecurityAlert {
    /// 创建新的告警
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: generate_id("alert"),
            alert_type,
            severity,
            title: title.into(),
            description: description.into(),
            user_id: None,
            related_event_ids: Vec::new(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// 设置关联用户
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 设置关联事件
    pub fn with_related_events(mut self, event_ids: Vec<String>) -> Self {
        self.related_event_ids = event_ids;
        self
    }

    /// 设置创建时间
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// 添加一条元数据
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 标记为已处理
    pub fn resolve(&mut self, by: impl Into<String>, at: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(at);
        self.resolved_by = Some(by.into());
    }
}

/// 滑动窗口计数器
///
/// 按 `(规则, 维度)` 键保存，窗口过期或阈值触发时重置。
#[derive(Debug, Clone, Copy)]
struct ThresholdTracker {
    count: u32,
    window_start: DateTime<Utc>,
}

/// 告警规则配置
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// 失败登录告警阈值
    pub failed_login_threshold: u32,

    /// 失败登录滑动窗口
    pub failed_login_window: Duration,

    /// 触发新 IP 检测所需的最少历史事件数
    pub new_ip_min_history: usize,

    /// 新 IP 检测的回看窗口
    pub new_ip_lookback: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            failed_login_threshold: 5,
            failed_login_window: Duration::minutes(5),
            new_ip_min_history: 5,
            new_ip_lookback: Duration::hours(24),
        }
    }
}

impl AlertConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置失败登录阈值
    pub fn with_failed_login_threshold(mut self, threshold: u32) -> Self {
        assert!(threshold > 0, "threshold must be positive");
        self.failed_login_threshold = threshold;
        self
    }

    /// 设置失败登录窗口
    pub fn with_failed_login_window(mut self, window: Duration) -> Self {
        self.failed_login_window = window;
        self
    }

    /// 设置新 IP 检测的最少历史事件数
    pub fn with_new_ip_min_history(mut self, min_history: usize) -> Self {
        self.new_ip_min_history = min_history;
        self
    }
}

/// 告警引擎
///
/// 规则评估是同步的，在 `log_event` 的调用线程上完成；计数器表
/// 用互斥锁保护以支持并发事件写入。
#[derive(Debug)]
pub struct AlertEngine {
    config: AlertConfig,
    trackers: Mutex<HashMap<String, ThresholdTracker>>,
}

impl AlertEngine {
    /// 创建新的告警引擎
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            trackers: Mutex::new(HashMap::new()),
        }
    }

    /// 对一条已规范化的事件评估全部规则
    ///
    /// `history` 是该事件用户的既有事件（不含当前事件），供新 IP
    /// 规则使用。返回本次触发的告警。
    pub fn evaluate(
        &self,
        event: &AuthenticationEvent,
        history: &[AuthenticationEvent],
        now: DateTime<Utc>,
    ) -> Vec<SecurityAlert> {
        let mut alerts = Vec::new();

        if let Some(alert) = self.rule_failed_logins(event, now) {
            alerts.push(alert);
        }
        if let Some(alert) = self.rule_permission_violation(event, now) {
            alerts.push(alert);
        }
        if let Some(alert) = self.rule_new_ip(event, history, now) {
            alerts.push(alert);
        }

        alerts
    }

    /// 失败登录规则：按 IP 滑动窗口计数
    fn rule_failed_logins(
        &self,
        event: &AuthenticationEvent,
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        if event.success
            || !matches!(
                event.event_type,
                EventType::LoginFailed | EventType::MfaFailure
            )
        {
            return None;
        }
        let ip = event.ip_address.as_deref()?;
        let key = format!("failed_login:{}", ip);

        let mut trackers = self.trackers.lock().unwrap();
        let tracker = trackers.entry(key.clone()).or_insert(ThresholdTracker {
            count: 0,
            window_start: now,
        });

        // 窗口已过，从当前事件重新开始计数
        if now - tracker.window_start > self.config.failed_login_window {
            tracker.count = 0;
            tracker.window_start = now;
        }
        tracker.count += 1;

        if tracker.count < self.config.failed_login_threshold {
            return None;
        }

        // 触发后重置，下一次失败从新窗口开始
        trackers.remove(&key);

        let mut alert = SecurityAlert::new(
            AlertType::FailedLoginAttempts,
            AlertSeverity::High,
            format!("Repeated authentication failures from {}", ip),
            format!(
                "{} failed attempts from {} within {} minutes",
                self.config.failed_login_threshold,
                ip,
                self.config.failed_login_window.num_minutes(),
            ),
        )
        .with_created_at(now)
        .with_related_events(vec![event.event_id.clone()])
        .with_metadata("ip", ip)
        .with_metadata("threshold", self.config.failed_login_threshold);
        alert.user_id = event.user_id.clone();
        Some(alert)
    }

    /// 权限违规规则：无窗口，逐条告警
    fn rule_permission_violation(
        &self,
        event: &AuthenticationEvent,
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        if event.event_type != EventType::PermissionDenied {
            return None;
        }

        let mut alert = SecurityAlert::new(
            AlertType::PermissionViolation,
            AlertSeverity::Medium,
            "Permission denied",
            format!(
                "Access denied for user {}",
                event.user_id.as_deref().unwrap_or("unknown"),
            ),
        )
        .with_created_at(now)
        .with_related_events(vec![event.event_id.clone()]);
        alert.user_id = event.user_id.clone();
        Some(alert)
    }

    /// 新 IP 规则：有足够历史的用户从近期未见过的 IP 发起认证
    fn rule_new_ip(
        &self,
        event: &AuthenticationEvent,
        history: &[AuthenticationEvent],
        now: DateTime<Utc>,
    ) -> Option<SecurityAlert> {
        let user_id = event.user_id.as_deref()?;
        let ip = event.ip_address.as_deref()?;

        if history.len() <= self.config.new_ip_min_history {
            return None;
        }

        let lookback_start = now - self.config.new_ip_lookback;
        let seen_recently = history.iter().any(|e| {
            e.ip_address.as_deref() == Some(ip)
                && e.timestamp.is_some_and(|t| t >= lookback_start)
        });
        if seen_recently {
            return None;
        }

        let mut alert = SecurityAlert::new(
            AlertType::SuspiciousActivity,
            AlertSeverity::Medium,
            format!("New IP address for user {}", user_id),
            format!(
                "User {} authenticated from {} which was not seen in the last {} hours",
                user_id,
                ip,
                self.config.new_ip_lookback.num_hours(),
            ),
        )
        .with_created_at(now)
        .with_related_events(vec![event.event_id.clone()])
        .with_metadata("ip", ip);
        alert.user_id = Some(user_id.to_string());
        Some(alert)
    }
}

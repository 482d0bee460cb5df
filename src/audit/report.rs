//! 合规报告模块
//!
//! 对一批过滤后的事件做聚合：总量与按类型计数、合规检查
//! （未打合规标记的 SECRET 事件、超出保留期的事件）和启发式建议。
//! 报告本身的敏感级别取其包含事件的最大级别。

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::audit::event::{AuthenticationEvent, Classification};
use crate::random::generate_id;

/// 失败率超过此比例时给出建议
const FAILURE_RATE_ADVISORY: f64 = 0.3;

/// 合规检查结果
#[derive(Debug, Clone, Default)]
pub struct ComplianceSection {
    /// 缺少合规标记的 SECRET 级事件 ID
    pub unflagged_secret_events: Vec<String>,

    /// 超出保留期仍在存储中的事件 ID
    pub retention_violations: Vec<String>,
}

impl ComplianceSection {
    /// 是否通过全部合规检查
    pub fn is_compliant(&self) -> bool {
        self.unflagged_secret_events.is_empty() && self.retention_violations.is_empty()
    }
}

/// 审计报告
#[derive(Debug, Clone)]
pub struct AuditReport {
    /// 报告 ID
    pub report_id: String,
    /// 生成时间
    pub generated_at: DateTime<Utc>,
    /// 事件总数
    pub total_events: usize,
    /// 成功事件数
    pub successes: usize,
    /// 失败事件数
    pub failures: usize,
    /// 按事件类型的计数
    pub events_by_type: HashMap<String, usize>,
    /// 报告级别 = 包含事件的最大级别
    pub classification: Classification,
    /// 合规检查
    pub compliance: ComplianceSection,
    /// 启发式建议
    pub recommendations: Vec<String>,
}

/// SECRET 级事件需要携带的合规标记字段
const COMPLIANCE_FLAG_FIELD: &str = "compliance_flag";

/// 从一批事件构建报告
pub fn build_report(
    events: &[AuthenticationEvent],
    retention: Duration,
    now: DateTime<Utc>,
) -> AuditReport {
    let total_events = events.len();
    let successes = events.iter().filter(|e| e.success).count();
    let failures = total_events - successes;

    let mut events_by_type: HashMap<String, usize> = HashMap::new();
    for event in events {
        *events_by_type
            .entry(event.event_type.as_str().to_string())
            .or_default() += 1;
    }

    let classification = events
        .iter()
        .map(|e| e.classification)
        .max()
        .unwrap_or(Classification::Open);

    let retention_cutoff = now - retention;
    let mut compliance = ComplianceSection::default();
    for event in events {
        if event.classification == Classification::Secret
            && !event.metadata.contains_key(COMPLIANCE_FLAG_FIELD)
        {
            compliance.unflagged_secret_events.push(event.event_id.clone());
        }
        if event.timestamp.is_some_and(|t| t < retention_cutoff) {
            compliance.retention_violations.push(event.event_id.clone());
        }
    }

    let recommendations = build_recommendations(total_events, failures, &compliance);

    AuditReport {
        report_id: generate_id("report"),
        generated_at: now,
        total_events,
        successes,
        failures,
        events_by_type,
        classification,
        compliance,
        recommendations,
    }
}

fn build_recommendations(
    total: usize,
    failures: usize,
    compliance: &ComplianceSection,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    if total > 0 {
        let failure_rate = failures as f64 / total as f64;
        if failure_rate > FAILURE_RATE_ADVISORY {
            recommendations.push(format!(
                "Failure rate is {:.0}%; review recent authentication failures for abuse patterns",
                failure_rate * 100.0,
            ));
        }
    }
    if !compliance.unflagged_secret_events.is_empty() {
        recommendations.push(format!(
            "{} SECRET-classified event(s) lack a compliance flag; review their handling",
            compliance.unflagged_secret_events.len(),
        ));
    }
    if !compliance.retention_violations.is_empty() {
        recommendations.push(format!(
            "{} event(s) exceed the retention window; run a retention sweep",
            compliance.retention_violations.len(),
        ));
    }

    recommendations
}

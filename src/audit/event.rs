//! 审计事件模型模块
//!
//! 定义追加写入审计日志的认证事件及其查询过滤器。
//!
//! 事件的 `classification` 是有序的敏感级别，报告的级别取其包含事件
//! 的最大值。事件在进入存储前由隐私过滤器处理（见 `privacy` 模块），
//! 存储中绝不出现原始的敏感 metadata 或完整 IP。

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// 事件敏感级别（有序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// 公开
    Open,
    /// 受限
    Restricted,
    /// 机密
    Confidential,
    /// 绝密
    Secret,
}

impl Classification {
    /// 获取级别名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Open => "OPEN",
            Classification::Restricted => "RESTRICTED",
            Classification::Confidential => "CONFIDENTIAL",
            Classification::Secret => "SECRET",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 认证事件类型
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// 登录成功
    LoginSuccess,
    /// 登录失败
    LoginFailed,
    /// 登出
    Logout,
    /// MFA 验证成功
    MfaSuccess,
    /// MFA 验证失败
    MfaFailure,
    /// MFA 挑战已发送
    MfaChallengeSent,
    /// MFA 方式已启用
    MfaEnabled,
    /// MFA 方式已禁用
    MfaDisabled,
    /// 权限被拒绝
    PermissionDenied,
    /// 用户数据擦除（墓碑事件）
    DataErasure,
    /// 其他事件
    Custom(String),
}

impl EventType {
    /// 获取事件类型名称
    pub fn as_str(&self) -> &str {
        match self {
            EventType::LoginSuccess => "LOGIN_SUCCESS",
            EventType::LoginFailed => "LOGIN_FAILED",
            EventType::Logout => "LOGOUT",
            EventType::MfaSuccess => "MFA_SUCCESS",
            EventType::MfaFailure => "MFA_FAILURE",
            EventType::MfaChallengeSent => "MFA_CHALLENGE_SENT",
            EventType::MfaEnabled => "MFA_ENABLED",
            EventType::MfaDisabled => "MFA_DISABLED",
            EventType::PermissionDenied => "PERMISSION_DENIED",
            EventType::DataErasure => "DATA_ERASURE",
            EventType::Custom(name) => name,
        }
    }

    /// 从名称解析事件类型
    pub fn from_str_name(name: &str) -> Self {
        match name {
            "LOGIN_SUCCESS" => EventType::LoginSuccess,
            "LOGIN_FAILED" => EventType::LoginFailed,
            "LOGOUT" => EventType::Logout,
            "MFA_SUCCESS" => EventType::MfaSuccess,
            "MFA_FAILURE" => EventType::MfaFailure,
            "MFA_CHALLENGE_SENT" => EventType::MfaChallengeSent,
            "MFA_ENABLED" => EventType::MfaEnabled,
            "MFA_DISABLED" => EventType::MfaDisabled,
            "PERMISSION_DENIED" => EventType::PermissionDenied,
            "DATA_ERASURE" => EventType::DataErasure,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EventTypeVisitor;

        impl Visitor<'_> for EventTypeVisitor {
            type Value = EventType;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an event type string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<EventType, E> {
                Ok(EventType::from_str_name(value))
            }
        }

        deserializer.deserialize_str(EventTypeVisitor)
    }
}

/// 认证事件
///
/// 追加写入后不可变。`event_id` 和 `timestamp` 为空时由审计服务在
/// 写入时补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationEvent {
    /// 事件 ID（为空时写入前自动分配）
    pub event_id: String,

    /// 事件时间（缺省时写入前取当前时钟）
    pub timestamp: Option<DateTime<Utc>>,

    /// 事件类型
    pub event_type: EventType,

    /// 关联用户 ID（墓碑事件为 None）
    pub user_id: Option<String>,

    /// 会话 ID
    pub session_id: Option<String>,

    /// 来源 IP（存储前已匿名化）
    pub ip_address: Option<String>,

    /// 认证方式（totp / sms / email / backup_code / webauthn）
    pub method: Option<String>,

    /// 操作是否成功
    pub success: bool,

    /// 敏感级别
    pub classification: Classification,

    /// 附加元数据（敏感字段存储前已哈希）
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuthenticationEvent {
    /// 创建新的事件
    pub fn new(event_type: EventType, success: bool) -> Self {
        Self {
            event_id: String::new(),
            timestamp: None,
            event_type,
            user_id: None,
            session_id: None,
            ip_address: None,
            method: None,
            success,
            classification: Classification::Restricted,
            metadata: HashMap::new(),
        }
    }

    /// 设置用户 ID
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 设置会话 ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// 设置来源 IP
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// 设置认证方式
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// 设置敏感级别
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = classification;
        self
    }

    /// 设置事件时间
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
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
}

/// 事件查询过滤器
///
/// 所有条件为 AND 关系；`offset`/`limit` 作用于倒序排序后的结果。
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// 按用户 ID 过滤
    pub user_id: Option<String>,

    /// 按事件类型过滤
    pub event_type: Option<EventType>,

    /// 按敏感级别过滤（精确匹配）
    pub classification: Option<Classification>,

    /// 按来源 IP 过滤（匿名化后的值）
    pub ip_address: Option<String>,

    /// 按成功标志过滤
    pub success: Option<bool>,

    /// 起始时间（含）
    pub from: Option<DateTime<Utc>>,

    /// 截止时间（含）
    pub until: Option<DateTime<Utc>>,

    /// 跳过的记录数
    pub offset: usize,

    /// 返回的最大记录数（None 表示不限）
    pub limit: Option<usize>,
}

impl EventFilter {
    /// 创建空过滤器（匹配全部事件）
    pub fn new() -> Self {
        Self::default()
    }

    /// 按用户过滤
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// 按事件类型过滤
    pub fn with_event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// 按敏感级别过滤
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    /// 按来源 IP 过滤
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// 按成功标志过滤
    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// 设置时间范围
    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    /// 设置分页
    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// 判断事件是否匹配过滤条件
    pub fn matches(&self, event: &AuthenticationEvent) -> bool {
        if let Some(user_id) = &self.user_id
            && event.user_id.as_deref() != Some(user_id.as_str())
        {
            return false;
        }
        if let Some(event_type) = &self.event_type
            && &event.event_type != event_type
        {
            return false;
        }
        if let Some(classification) = self.classification
            && event.classification != classification
        {
            return false;
        }
        if let Some(ip) = &self.ip_address
            && event.ip_address.as_deref() != Some(ip.as_str())
        {
            return false;
        }
        if let Some(success) = self.success
            && event.success != success
        {
            return false;
        }
        if let Some(from) = self.from
            && event.timestamp.is_none_or(|t| t < from)
        {
            return false;
        }
        if let Some(until) = self.until
            && event.timestamp.is_none_or(|t| t > until)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_classification_ordering() {
        assert!(Classification::Open < Classification::Restricted);
        assert!(Classification::Restricted < Classification::Confidential);
        assert!(Classification::Confidential < Classification::Secret);

        let max = [
            Classification::Restricted,
            Classification::Secret,
            Classification::Open,
        ]
        .into_iter()
        .max();
        assert_eq!(max, Some(Classification::Secret));
    }

    #[test]
    fn test_event_type_roundtrip() {
        for event_type in [
            EventType::LoginFailed,
            EventType::MfaSuccess,
            EventType::DataErasure,
            EventType::Custom("SESSION_REVOKED".to_string()),
        ] {
            assert_eq!(
                EventType::from_str_name(event_type.as_str()),
                event_type.clone()
            );
        }
    }

    #[test]
    fn test_event_builder() {
        let event = AuthenticationEvent::new(EventType::MfaFailure, false)
            .with_user("u1")
            .with_ip("192.168.1.10")
            .with_method("totp")
            .with_classification(Classification::Confidential)
            .with_metadata("failure_reason", "code mismatch");

        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert!(!event.success);
        assert_eq!(event.classification, Classification::Confidential);
        assert_eq!(
            event.metadata.get("failure_reason"),
            Some(&serde_json::json!("code mismatch"))
        );
        // ID 和时间戳留给审计服务补齐
        assert!(event.event_id.is_empty());
        assert!(event.timestamp.is_none());
    }

    #[test]
    fn test_filter_matches() {
        let now = Utc::now();
        let event = AuthenticationEvent::new(EventType::LoginFailed, false)
            .with_user("u1")
            .with_ip("10.0.0.xxx")
            .with_timestamp(now);

        assert!(EventFilter::new().matches(&event));
        assert!(EventFilter::new().for_user("u1").matches(&event));
        assert!(!EventFilter::new().for_user("u2").matches(&event));
        assert!(
            EventFilter::new()
                .with_event_type(EventType::LoginFailed)
                .matches(&event)
        );
        assert!(!EventFilter::new().with_success(true).matches(&event));
        assert!(
            EventFilter::new()
                .between(now - Duration::hours(1), now + Duration::hours(1))
                .matches(&event)
        );
        assert!(
            !EventFilter::new()
                .between(now + Duration::hours(1), now + Duration::hours(2))
                .matches(&event)
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = AuthenticationEvent::new(EventType::MfaSuccess, true)
            .with_user("u1")
            .with_timestamp(Utc::now());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"MFA_SUCCESS\""));

        let parsed: AuthenticationEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, EventType::MfaSuccess);
    }
}

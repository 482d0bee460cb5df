//! 审计隐私过滤模块
//!
//! 事件在进入审计存储前经过两道处理：
//!
//! 1. **敏感字段哈希**：命中配置字段列表的 metadata 值被替换为
//!    `sha256:<hex>`，原始值不落盘
//! 2. **IP 匿名化**：IPv4 掩掉末位八位组，IPv6 掩掉末段
//!
//! 过滤发生在写入路径上，审计存储和日志 Sink 中都不会出现原始值。

use sha2::{Digest, Sha256};

use crate::audit::event::AuthenticationEvent;
use crate::random::hex_encode;

/// 默认的敏感字段列表
const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "code",
    "credential",
    "api_key",
];

/// 隐私过滤配置
#[derive(Debug, Clone)]
pub struct PrivacyConfig {
    /// 需要哈希的 metadata 字段名（小写比较）
    pub sensitive_fields: Vec<String>,

    /// 是否匿名化 IP 地址
    pub anonymize_ip: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            anonymize_ip: true,
        }
    }
}

impl PrivacyConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个敏感字段
    pub fn with_sensitive_field(mut self, field: impl Into<String>) -> Self {
        self.sensitive_fields.push(field.into().to_lowercase());
        self
    }

    /// 设置是否匿名化 IP
    pub fn with_anonymize_ip(mut self, anonymize: bool) -> Self {
        self.anonymize_ip = anonymize;
        self
    }
}

/// 隐私过滤器
#[derive(Debug, Clone, Default)]
pub struct PrivacyFilter {
    config: PrivacyConfig,
}

impl PrivacyFilter {
    /// 创建新的过滤器
    pub fn new(config: PrivacyConfig) -> Self {
        Self { config }
    }

    /// 就地处理事件：哈希敏感字段并匿名化 IP
    pub fn apply(&self, event: &mut AuthenticationEvent) {
        for (key, value) in event.metadata.iter_mut() {
            if self.is_sensitive(key) && !is_already_hashed(value) {
                *value = serde_json::Value::String(hash_sensitive_value(value));
            }
        }

        if self.config.anonymize_ip
            && let Some(ip) = &event.ip_address
        {
            event.ip_address = Some(anonymize_ip(ip));
        }
    }

    /// 字段名是否命中敏感列表（不区分大小写的包含匹配）
    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.config
            .sensitive_fields
            .iter()
            .any(|field| key.contains(field.as_str()))
    }
}

/// 值是否已经是哈希形式（避免重复哈希）
fn is_already_hashed(value: &serde_json::Value) -> bool {
    matches!(value, serde_json::Value::String(s) if s.starts_with("sha256:"))
}

/// 计算 metadata 值的哈希表示
fn hash_sensitive_value(value: &serde_json::Value) -> String {
    let canonical = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    hash_sensitive(&canonical)
}

/// 将字符串替换为 `sha256:<hex>` 形式
///
/// 擦除墓碑中的用户引用也使用此函数。
pub fn hash_sensitive(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("sha256:{}", hex_encode(&digest))
}

/// 匿名化 IP 地址
///
/// IPv4 掩掉末位八位组，IPv6 掩掉末段；无法识别的格式整体哈希。
pub fn anonymize_ip(ip: &str) -> String {
    if let Some(prefix) = ip.rsplit_once('.').map(|(p, _)| p) {
        // IPv4: 192.168.1.10 -> 192.168.1.xxx
        if prefix.split('.').count() == 3 {
            return format!("{}.xxx", prefix);
        }
    }
    if let Some((prefix, _)) = ip.rsplit_once(':') {
        // IPv6: 末段置空
        return format!("{}:xxxx", prefix);
    }
    hash_sensitive(ip)
}

//! # GuardRS
//!
//! 进程内的多因素认证与安全审计库。
//!
//! ## 功能特性
//!
//! - **TOTP**: RFC 6238 时间动态码，含注册 URI 生成
//! - **短信/邮件验证码**: 带 TTL 和尝试次数记账的一次性挑战
//! - **备用恢复码**: 确定性带密钥哈希的单次使用恢复码
//! - **WebAuthn/FIDO2**: 完整的断言验证（挑战、Origin、RP-id 哈希、
//!   签名、计数器单调性）
//! - **审计日志**: 追加写入、敏感级别标注、写入前隐私过滤
//! - **告警引擎**: 滑动窗口模式检测（失败登录、权限违规、新 IP）
//! - **合规**: GDPR 式用户数据擦除（带墓碑）、保留期清理、合规报告
//!
//! MFA 引擎的每个认证决策都经由审计门面记录；审计写入路径绝不向
//! 认证调用方报错。存储、投递、推送和时钟都是注入的接口，内存实现
//! 开箱即用。
//!
//! ## MFA 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use guardrs::audit::{AuditConfig, AuditService, InMemorySink};
//! use guardrs::clock::{Clock, SystemClock};
//! use guardrs::delivery::InMemoryDelivery;
//! use guardrs::mfa::{
//!     InMemoryChallengeStore, InMemoryCredentialStore, MfaConfig, MfaEngine, MfaMethod, User,
//!     WebauthnConfig,
//! };
//!
//! # tokio_test::block_on(async {
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
//! let audit = Arc::new(AuditService::new(
//!     AuditConfig::default(),
//!     Arc::new(InMemorySink::new()),
//!     Arc::clone(&clock),
//! ));
//! let delivery = InMemoryDelivery::new();
//!
//! let engine = MfaEngine::new(
//!     MfaConfig::new(
//!         "ExampleApp",
//!         WebauthnConfig::new("example.com", "ExampleApp", "https://example.com"),
//!         b"deployment-specific-key".to_vec(),
//!     ),
//!     Arc::new(InMemoryCredentialStore::new()),
//!     Arc::new(InMemoryChallengeStore::new()),
//!     Arc::new(delivery.clone()),
//!     Arc::clone(&audit),
//!     clock,
//! );
//!
//! let user = User::new("user-1").with_phone("+8613800000000");
//! engine.send_challenge(&user, MfaMethod::Sms).await.unwrap();
//!
//! let code = delivery.last_code().unwrap();
//! assert!(engine.validate_code(&user, &code, MfaMethod::Sms).await.unwrap());
//! # });
//! ```
//!
//! ## 审计示例
//!
//! ```rust
//! use std::sync::Arc;
//! use guardrs::audit::{
//!     AuditConfig, AuditService, AuthenticationEvent, EventFilter, EventType, InMemorySink,
//! };
//! use guardrs::clock::SystemClock;
//!
//! let audit = AuditService::new(
//!     AuditConfig::default(),
//!     Arc::new(InMemorySink::new()),
//!     Arc::new(SystemClock::new()),
//! );
//!
//! audit.log_event(
//!     AuthenticationEvent::new(EventType::LoginFailed, false)
//!         .with_user("user-1")
//!         .with_ip("192.168.1.10"),
//! );
//!
//! let events = audit.get_events(&EventFilter::new().for_user("user-1"));
//! // IP 在存储前已匿名化
//! assert_eq!(events[0].ip_address.as_deref(), Some("192.168.1.xxx"));
//! ```

pub mod audit;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod mfa;
pub mod random;

pub use error::{Error, Result};

// ============================================================================
// 时钟与投递导出
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use delivery::{
    ChallengeMessage, Delivery, DeliveryOutcome, Destination, InMemoryDelivery, InMemoryNotifier,
    Notifier,
};

// ============================================================================
// 随机数生成函数导出
// ============================================================================

pub use random::{
    constant_time_compare, constant_time_compare_str, generate_id, generate_numeric_code,
    generate_random_base64_url, generate_random_bytes, generate_random_hex,
};

// ============================================================================
// MFA 相关导出
// ============================================================================

pub use mfa::{
    ChallengeIssued, EnrollmentPayload, MfaConfig, MfaEngine, MfaMethod, TotpConfig, TotpSecret,
    TotpVerifier, User, WebauthnConfig,
};

// ============================================================================
// 审计相关导出
// ============================================================================

pub use audit::{
    AlertSeverity, AlertType, AuditConfig, AuditService, AuthenticationEvent, Classification,
    EventFilter, EventType, SecurityAlert,
};

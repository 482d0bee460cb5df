//! 多因素认证模块
//!
//! 提供完整的 MFA 挑战/验证能力：
//!
//! - **totp**: RFC 6238 时间动态码
//! - **backup**: 一次性备用恢复码
//! - **webauthn**: WebAuthn/FIDO2 注册与断言验证
//! - **store**: 凭证与挑战的存储抽象
//! - **engine**: 协调以上所有部分的引擎，所有认证决策都写入审计管道

use std::fmt;

pub mod backup;
pub mod engine;
pub mod store;
pub mod totp;
pub mod webauthn;

pub use backup::{BackupCodeConfig, BackupCodeGenerator, BackupCodeSet, CodeScheme};
pub use engine::{ChallengeIssued, EnrollmentPayload, MfaConfig, MfaEngine, User};
pub use store::{
    Challenge, ChallengeAttempt, ChallengeKey, ChallengePurpose, ChallengeStore, CredentialStore,
    InMemoryChallengeStore, InMemoryCredentialStore,
};
pub use totp::{TotpAlgorithm, TotpConfig, TotpProvisioning, TotpSecret, TotpVerifier};
pub use webauthn::{
    AssertionCeremony, AssertionOutcome, AssertionResponse, CoseAlgorithm, RegistrationCeremony,
    RegistrationResponse, WebauthnConfig, WebauthnCredential, WebauthnVerifier,
};

/// MFA 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MfaMethod {
    /// 基于时间的动态码
    Totp,
    /// 短信验证码
    Sms,
    /// 邮件验证码
    Email,
    /// 备用恢复码
    BackupCode,
    /// WebAuthn/FIDO2
    Webauthn,
}

impl MfaMethod {
    /// 获取方式名称（用于审计事件和存储键）
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Totp => "totp",
            MfaMethod::Sms => "sms",
            MfaMethod::Email => "email",
            MfaMethod::BackupCode => "backup_code",
            MfaMethod::Webauthn => "webauthn",
        }
    }
}

impl fmt::Display for MfaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

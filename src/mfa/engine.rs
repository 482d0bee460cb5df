//! MFA 引擎模块
//!
//! 多因素认证的核心协调者：签发密钥与挑战、验证提交的凭据、
//! 维护用户的启用方式集合。依赖注入的凭证存储、挑战存储、
//! 投递通道和时钟，所有认证决策都通过审计门面记录。
//!
//! 验证的失败语义刻意收敛：码错误、挑战过期、尝试耗尽都统一返回
//! `Ok(false)`，具体子原因只进入审计事件的 metadata，调用方无法
//! 区分——配置性问题（不支持的方式、缺少注册）才返回错误。

use chrono::Duration;
use std::sync::Arc;
use tracing::warn;

use crate::audit::event::{AuthenticationEvent, EventType};
use crate::audit::service::AuditService;
use crate::clock::Clock;
use crate::delivery::{ChallengeMessage, Delivery, Destination};
use crate::error::{ConfigError, DeliveryError, Error, Result};
use crate::mfa::MfaMethod;
use crate::mfa::backup::{BackupCodeConfig, BackupCodeGenerator, BackupCodeSet};
use crate::mfa::store::{
    Challenge, ChallengeAttempt, ChallengeKey, ChallengePurpose, ChallengeStore, CredentialStore,
};
use crate::mfa::totp::{TotpConfig, TotpProvisioning, TotpVerifier};
use crate::mfa::webauthn::{
    AssertionCeremony, AssertionOutcome, AssertionResponse, RegistrationCeremony,
    RegistrationResponse, WebauthnConfig, WebauthnCredential, WebauthnVerifier,
};
use crate::random::{generate_numeric_code, generate_random_base64_url};

/// WebAuthn 仪式挑战的字节长度
const CEREMONY_CHALLENGE_BYTES: usize = 32;

/// 认证主体
///
/// 由外部身份系统拥有，这里只读取 ID 和投递地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// 用户 ID
    pub id: String,
    /// 邮箱（邮件挑战和 TOTP 账户标签用）
    pub email: Option<String>,
    /// 手机号（短信挑战用）
    pub phone: Option<String>,
}

impl User {
    /// 创建新的用户引用
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            phone: None,
        }
    }

    /// 设置邮箱
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// 设置手机号
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// TOTP 账户标签：优先邮箱，退回用户 ID
    fn account_label(&self) -> &str {
        self.email.as_deref().unwrap_or(&self.id)
    }
}

/// MFA 引擎配置
#[derive(Debug, Clone)]
pub struct MfaConfig {
    /// TOTP 签发者名称（出现在认证器应用中）
    pub issuer: String,

    /// TOTP 配置
    pub totp: TotpConfig,

    /// 备用码配置
    pub backup: BackupCodeConfig,

    /// WebAuthn 配置
    pub webauthn: WebauthnConfig,

    /// 短信/邮件挑战的有效期
    pub challenge_ttl: Duration,

    /// 短信/邮件验证码位数
    pub challenge_digits: usize,

    /// 挑战的最大尝试次数
    pub max_attempts: u32,

    /// 备用码哈希密钥（部署专属）
    backup_hash_key: Vec<u8>,
}

impl MfaConfig {
    /// 创建新的配置
    pub fn new(
        issuer: impl Into<String>,
        webauthn: WebauthnConfig,
        backup_hash_key: Vec<u8>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            totp: TotpConfig::default(),
            backup: BackupCodeConfig::default(),
            webauthn,
            challenge_ttl: Duration::minutes(5),
            challenge_digits: 6,
            max_attempts: 3,
            backup_hash_key,
        }
    }

    /// 设置 TOTP 配置
    pub fn with_totp(mut self, totp: TotpConfig) -> Self {
        self.totp = totp;
        self
    }

    /// 设置备用码配置
    pub fn with_backup(mut self, backup: BackupCodeConfig) -> Self {
        self.backup = backup;
        self
    }

    /// 设置挑战有效期
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        assert!(ttl > Duration::zero(), "challenge TTL must be positive");
        self.challenge_ttl = ttl;
        self
    }

    /// 设置验证码位数
    pub fn with_challenge_digits(mut self, digits: usize) -> Self {
        assert!((4..=10).contains(&digits), "digits must be between 4 and 10");
        self.challenge_digits = digits;
        self
    }

    /// 设置最大尝试次数
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        assert!(attempts > 0, "max attempts must be positive");
        self.max_attempts = attempts;
        self
    }
}

/// 注册载荷
///
/// `generate_secret` 的返回值。明文密钥/备用码只在这里出现一次，
/// 调用方必须立即捕获。
#[derive(Debug, Clone)]
pub enum EnrollmentPayload {
    /// TOTP 注册载荷
    Totp(TotpProvisioning),
    /// 备用码集合
    BackupCodes(BackupCodeSet),
    /// WebAuthn 注册仪式参数
    WebauthnCeremony(RegistrationCeremony),
}

/// 挑战签发结果
#[derive(Debug, Clone)]
pub enum ChallengeIssued {
    /// 验证码已通过带外通道投递
    Delivered {
        /// 投递目标
        destination: Destination,
        /// 挑战剩余有效秒数
        ttl_seconds: i64,
    },
    /// WebAuthn 断言仪式参数，交给客户端发起签名
    WebauthnCeremony(AssertionCeremony),
}

/// MFA 引擎
pub struct MfaEngine {
    config: MfaConfig,
    credentials: Arc<dyn CredentialStore>,
    challenges: Arc<dyn ChallengeStore>,
    delivery: Arc<dyn Delivery>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditService>,
    totp: TotpVerifier,
    backup: BackupCodeGenerator,
    webauthn: WebauthnVerifier,
}

impl MfaEngine {
    /// 创建新的 MFA 引擎
    pub fn new(
        config: MfaConfig,
        credentials: Arc<dyn CredentialStore>,
        challenges: Arc<dyn ChallengeStore>,
        delivery: Arc<dyn Delivery>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let totp = TotpVerifier::new(config.totp.clone());
        let backup = BackupCodeGenerator::new(config.backup.clone(), config.backup_hash_key.clone());
        let webauthn = WebauthnVerifier::new(config.webauthn.clone());
        Self {
            config,
            credentials,
            challenges,
            delivery,
            clock,
            audit,
            totp,
            backup,
            webauthn,
        }
    }

    // ========================================================================
    // 注册
    // ========================================================================

    /// 为用户生成某个认证方式的密钥材料
    ///
    /// 方式已启用时是幂等的空操作（记一条警告日志，返回 `None`）。
    /// 短信/邮件没有长期密钥，请求它们是配置错误。
    pub async fn generate_secret(
        &self,
        user: &User,
        method: MfaMethod,
    ) -> Result<Option<EnrollmentPayload>> {
        if self.credentials.enabled_methods(&user.id).await?.contains(&method) {
            warn!(user_id = %user.id, method = %method, "method already enabled, skipping enrollment");
            return Ok(None);
        }

        let payload = match method {
            MfaMethod::Totp => {
                let secret = self.totp.generate_secret()?;
                self.credentials
                    .store_totp_secret(&user.id, secret.clone())
                    .await?;
                EnrollmentPayload::Totp(self.totp.provisioning(
                    &secret,
                    user.account_label(),
                    &self.config.issuer,
                ))
            }
            MfaMethod::BackupCode => {
                let set = self.backup.generate()?;
                self.credentials
                    .store_backup_codes(&user.id, set.hashed_codes.clone())
                    .await?;
                EnrollmentPayload::BackupCodes(set)
            }
            MfaMethod::Webauthn => {
                let challenge = generate_random_base64_url(CEREMONY_CHALLENGE_BYTES)?;
                self.put_ceremony_challenge(&user.id, ChallengePurpose::WebauthnRegistration, &challenge)
                    .await?;
                EnrollmentPayload::WebauthnCeremony(self.webauthn.registration_ceremony(
                    &challenge,
                    &user.id,
                    user.account_label(),
                ))
            }
            MfaMethod::Sms | MfaMethod::Email => {
                return Err(Error::Config(ConfigError::UnsupportedMethod(format!(
                    "{} has no enrollment secret",
                    method
                ))));
            }
        };

        Ok(Some(payload))
    }

    /// 完成 WebAuthn 注册仪式
    ///
    /// 校验注册响应、持久化凭证并启用 WebAuthn 方式。
    pub async fn finish_webauthn_registration(
        &self,
        user: &User,
        response: &RegistrationResponse,
    ) -> Result<WebauthnCredential> {
        let key = ChallengeKey::new(&user.id, ChallengePurpose::WebauthnRegistration);
        let challenge = self
            .challenges
            .take(&key, self.clock.now())
            .await?
            .ok_or_else(|| Error::validation("no pending webauthn registration"))?;

        let credential = self.webauthn.verify_registration(&challenge.code, response)?;
        self.credentials
            .add_webauthn_credential(&user.id, credential.clone())
            .await?;
        self.credentials
            .set_method_enabled(&user.id, MfaMethod::Webauthn, true)
            .await?;

        self.audit.log_event(
            AuthenticationEvent::new(EventType::MfaEnabled, true)
                .with_user(&user.id)
                .with_method(MfaMethod::Webauthn.as_str())
                .with_metadata("credential_id", credential.credential_id.clone()),
        );
        Ok(credential)
    }

    // ========================================================================
    // 挑战签发
    // ========================================================================

    /// 签发一个挑战
    ///
    /// 短信/邮件生成数字验证码并经投递通道发出；WebAuthn 生成仪式
    /// 参数交给调用方。已有未过期挑战时复用其验证码（重发语义），
    /// 投递失败不破坏挑战状态。
    pub async fn send_challenge(&self, user: &User, method: MfaMethod) -> Result<ChallengeIssued> {
        match method {
            MfaMethod::Sms => {
                let phone = user.phone.clone().ok_or_else(|| {
                    Error::Delivery(DeliveryError::MissingDestination("phone number".to_string()))
                })?;
                self.send_code_challenge(user, method, Destination::Sms(phone))
                    .await
            }
            MfaMethod::Email => {
                let email = user.email.clone().ok_or_else(|| {
                    Error::Delivery(DeliveryError::MissingDestination("email address".to_string()))
                })?;
                self.send_code_challenge(user, method, Destination::Email(email))
                    .await
            }
            MfaMethod::Webauthn => self.issue_assertion_ceremony(user).await,
            MfaMethod::Totp | MfaMethod::BackupCode => Err(Error::Config(
                ConfigError::UnsupportedMethod(format!("{} does not use challenges", method)),
            )),
        }
    }

    async fn send_code_challenge(
        &self,
        user: &User,
        method: MfaMethod,
        destination: Destination,
    ) -> Result<ChallengeIssued> {
        let purpose = match method {
            MfaMethod::Sms => ChallengePurpose::SmsCode,
            _ => ChallengePurpose::EmailCode,
        };
        let key = ChallengeKey::new(&user.id, purpose);
        let now = self.clock.now();

        // 未过期的挑战直接重发，不重置验证码或尝试计数
        let (code, ttl_seconds) = match self.challenges.get(&key, now).await? {
            Some(existing) => (existing.code, (existing.expires_at - now).num_seconds()),
            None => {
                let code = generate_numeric_code(self.config.challenge_digits);
                self.challenges
                    .put(
                        key,
                        Challenge {
                            code: code.clone(),
                            created_at: now,
                            expires_at: now + self.config.challenge_ttl,
                            attempts_remaining: self.config.max_attempts,
                        },
                    )
                    .await?;
                (code, self.config.challenge_ttl.num_seconds())
            }
        };

        let outcome = self
            .delivery
            .send(&destination, &ChallengeMessage { code, ttl_seconds })
            .await;

        let event = AuthenticationEvent::new(EventType::MfaChallengeSent, outcome.is_ok())
            .with_user(&user.id)
            .with_method(method.as_str());
        match outcome {
            Ok(_) => {
                self.audit.log_event(event);
                Ok(ChallengeIssued::Delivered {
                    destination,
                    ttl_seconds,
                })
            }
            Err(e) => {
                // 挑战保持有效，调用方可重试投递
                self.audit
                    .log_event(event.with_metadata("delivery_error", e.to_string()));
                Err(e)
            }
        }
    }

    async fn issue_assertion_ceremony(&self, user: &User) -> Result<ChallengeIssued> {
        let credentials = self.credentials.webauthn_credentials(&user.id).await?;
        if credentials.is_empty() {
            return Err(Error::Config(ConfigError::MissingEnrollment {
                user_id: user.id.clone(),
                method: MfaMethod::Webauthn.as_str().to_string(),
            }));
        }

        let challenge = generate_random_base64_url(CEREMONY_CHALLENGE_BYTES)?;
        self.put_ceremony_challenge(&user.id, ChallengePurpose::WebauthnAssertion, &challenge)
            .await?;

        self.audit.log_event(
            AuthenticationEvent::new(EventType::MfaChallengeSent, true)
                .with_user(&user.id)
                .with_method(MfaMethod::Webauthn.as_str()),
        );

        let allow = credentials.into_iter().map(|c| c.credential_id).collect();
        Ok(ChallengeIssued::WebauthnCeremony(
            self.webauthn.assertion_ceremony(&challenge, allow),
        ))
    }

    /// 存入一次性仪式挑战（单次尝试，取出即消费）
    async fn put_ceremony_challenge(
        &self,
        user_id: &str,
        purpose: ChallengePurpose,
        challenge: &str,
    ) -> Result<()> {
        let now = self.clock.now();
        self.challenges
            .put(
                ChallengeKey::new(user_id, purpose),
                Challenge {
                    code: challenge.to_string(),
                    created_at: now,
                    expires_at: now + self.config.challenge_ttl,
                    attempts_remaining: 1,
                },
            )
            .await
    }

    // ========================================================================
    // 验证
    // ========================================================================

    /// 验证提交的凭据
    ///
    /// 码错误、过期、耗尽统一返回 `Ok(false)`；不支持的方式或缺少
    /// 注册返回错误。每次调用都发出一条审计事件。
    pub async fn validate_code(
        &self,
        user: &User,
        submitted: &str,
        method: MfaMethod,
    ) -> Result<bool> {
        let (valid, failure_reason) = match method {
            MfaMethod::Totp => self.validate_totp(user, submitted).await?,
            MfaMethod::Sms | MfaMethod::Email => {
                self.validate_challenge_code(user, submitted, method).await?
            }
            MfaMethod::BackupCode => self.validate_backup_code(user, submitted).await?,
            MfaMethod::Webauthn => self.validate_assertion(user, submitted).await?,
        };

        let mut event = AuthenticationEvent::new(
            if valid {
                EventType::MfaSuccess
            } else {
                EventType::MfaFailure
            },
            valid,
        )
        .with_user(&user.id)
        .with_method(method.as_str());
        if let Some(reason) = failure_reason {
            event = event.with_metadata("failure_reason", reason);
        }
        self.audit.log_event(event);

        Ok(valid)
    }

    async fn validate_totp(&self, user: &User, submitted: &str) -> Result<(bool, Option<String>)> {
        let secret = self.credentials.totp_secret(&user.id).await?.ok_or_else(|| {
            Error::Config(ConfigError::MissingEnrollment {
                user_id: user.id.clone(),
                method: MfaMethod::Totp.as_str().to_string(),
            })
        })?;

        let valid = self
            .totp
            .verify_at(&secret, submitted, self.clock.unix_timestamp())?;
        Ok((valid, (!valid).then(|| "code outside accepted window".to_string())))
    }

    async fn validate_challenge_code(
        &self,
        user: &User,
        submitted: &str,
        method: MfaMethod,
    ) -> Result<(bool, Option<String>)> {
        let purpose = match method {
            MfaMethod::Sms => ChallengePurpose::SmsCode,
            _ => ChallengePurpose::EmailCode,
        };
        let key = ChallengeKey::new(&user.id, purpose);

        let attempt = self
            .challenges
            .check_and_consume(&key, submitted, self.clock.now())
            .await?;
        Ok(match attempt {
            ChallengeAttempt::Validated => (true, None),
            ChallengeAttempt::Mismatch { remaining } => (
                false,
                Some(format!("code mismatch, {} attempts remaining", remaining)),
            ),
            ChallengeAttempt::Exhausted => (false, Some("attempts exhausted".to_string())),
            ChallengeAttempt::Expired => (false, Some("challenge expired".to_string())),
            ChallengeAttempt::NotFound => (false, Some("no active challenge".to_string())),
        })
    }

    async fn validate_backup_code(
        &self,
        user: &User,
        submitted: &str,
    ) -> Result<(bool, Option<String>)> {
        let hashed = self.backup.hash_code(submitted);
        let hit = self.credentials.consume_backup_code(&user.id, &hashed).await?;
        Ok((hit, (!hit).then(|| "code not recognized".to_string())))
    }

    async fn validate_assertion(
        &self,
        user: &User,
        submitted: &str,
    ) -> Result<(bool, Option<String>)> {
        let credentials = self.credentials.webauthn_credentials(&user.id).await?;
        if credentials.is_empty() {
            return Err(Error::Config(ConfigError::MissingEnrollment {
                user_id: user.id.clone(),
                method: MfaMethod::Webauthn.as_str().to_string(),
            }));
        }

        let Ok(response) = serde_json::from_str::<AssertionResponse>(submitted) else {
            return Ok((false, Some("malformed assertion response".to_string())));
        };

        let key = ChallengeKey::new(&user.id, ChallengePurpose::WebauthnAssertion);
        let Some(challenge) = self.challenges.take(&key, self.clock.now()).await? else {
            return Ok((false, Some("no pending ceremony".to_string())));
        };

        let Some(credential) = credentials
            .iter()
            .find(|c| c.credential_id == response.credential_id)
        else {
            return Ok((false, Some("unknown credential".to_string())));
        };

        match self
            .webauthn
            .verify_assertion(&challenge.code, credential, &response)
        {
            AssertionOutcome::Verified { new_counter } => {
                self.credentials
                    .update_webauthn_counter(&user.id, &credential.credential_id, new_counter)
                    .await?;
                Ok((true, None))
            }
            AssertionOutcome::Rejected { reason } => Ok((false, Some(reason))),
        }
    }

    // ========================================================================
    // 启用状态管理
    // ========================================================================

    /// 启用一个认证方式
    pub async fn enable_mfa(&self, user: &User, method: MfaMethod) -> Result<()> {
        self.credentials
            .set_method_enabled(&user.id, method, true)
            .await?;
        self.audit.log_event(
            AuthenticationEvent::new(EventType::MfaEnabled, true)
                .with_user(&user.id)
                .with_method(method.as_str()),
        );
        Ok(())
    }

    /// 禁用一个认证方式并清除其注册材料和未决挑战
    pub async fn disable_mfa(&self, user: &User, method: MfaMethod) -> Result<()> {
        self.credentials
            .set_method_enabled(&user.id, method, false)
            .await?;
        self.credentials
            .remove_method_material(&user.id, method)
            .await?;

        for purpose in challenge_purposes(method) {
            self.challenges
                .remove(&ChallengeKey::new(&user.id, *purpose))
                .await?;
        }

        self.audit.log_event(
            AuthenticationEvent::new(EventType::MfaDisabled, true)
                .with_user(&user.id)
                .with_method(method.as_str()),
        );
        Ok(())
    }

    /// 获取用户已启用的认证方式
    pub async fn enabled_methods(
        &self,
        user: &User,
    ) -> Result<std::collections::HashSet<MfaMethod>> {
        self.credentials.enabled_methods(&user.id).await
    }

    // ========================================================================
    // 维护
    // ========================================================================

    /// 清理已过期的挑战，返回清理数量（由宿主周期性调度）
    pub async fn sweep_expired_challenges(&self) -> Result<usize> {
        self.challenges.sweep_expired(self.clock.now()).await
    }

    /// 删除用户在 MFA 侧的全部状态（配合审计侧的 `delete_user_data`）
    pub async fn purge_user(&self, user_id: &str) -> Result<()> {
        self.credentials.remove_user(user_id).await?;
        self.challenges.remove_user(user_id).await?;
        Ok(())
    }
}

/// 某个认证方式关联的挑战用途
fn challenge_purposes(method: MfaMethod) -> &'static [ChallengePurpose] {
    match method {
        MfaMethod::Sms => &[ChallengePurpose::SmsCode],
        MfaMethod::Email => &[ChallengePurpose::EmailCode],
        MfaMethod::Webauthn => &[
            ChallengePurpose::WebauthnRegistration,
            ChallengePurpose::WebauthnAssertion,
        ],
        MfaMethod::Totp | MfaMethod::BackupCode => &[],
    }
}

//! MFA 存储抽象模块
//!
//! 定义两个存储 trait 及其内存实现：
//!
//! - **CredentialStore**: 用户的长期注册材料（TOTP 密钥、备用码哈希、
//!   WebAuthn 凭证、已启用的认证方式）
//! - **ChallengeStore**: 短期挑战状态（SMS/邮件验证码、WebAuthn 仪式
//!   挑战），带 TTL 和尝试次数记账
//!
//! `check_and_consume` 在存储锁内完成比较和状态变更，保证同一挑战的
//! 并发验证最多只有一个成功。时间由调用方注入，存储本身不持有时钟。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{Result, StorageError};
use crate::mfa::MfaMethod;
use crate::mfa::totp::TotpSecret;
use crate::mfa::webauthn::WebauthnCredential;
use crate::random::constant_time_compare_str;

// ============================================================================
// 凭证存储
// ============================================================================

/// 凭证存储 trait
///
/// 持久化用户的 MFA 注册材料。实现此 trait 以对接数据库。
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// 获取用户已启用的认证方式
    async fn enabled_methods(&self, user_id: &str) -> Result<HashSet<MfaMethod>>;

    /// 启用或禁用某个认证方式
    async fn set_method_enabled(
        &self,
        user_id: &str,
        method: MfaMethod,
        enabled: bool,
    ) -> Result<()>;

    /// 获取用户的 TOTP 密钥
    async fn totp_secret(&self, user_id: &str) -> Result<Option<TotpSecret>>;

    /// 存储用户的 TOTP 密钥（覆盖旧密钥）
    async fn store_totp_secret(&self, user_id: &str, secret: TotpSecret) -> Result<()>;

    /// 存储用户的备用码哈希集合（替换旧集合）
    async fn store_backup_codes(&self, user_id: &str, hashed_codes: HashSet<String>) -> Result<()>;

    /// 原子地消费一个备用码哈希
    ///
    /// 命中则从集合中移除并返回 `true`；未命中返回 `false`。
    /// 移除与查找在同一个锁内完成，同一个码不可能被消费两次。
    async fn consume_backup_code(&self, user_id: &str, hashed_code: &str) -> Result<bool>;

    /// 剩余备用码数量
    async fn remaining_backup_codes(&self, user_id: &str) -> Result<usize>;

    /// 获取用户的所有 WebAuthn 凭证
    async fn webauthn_credentials(&self, user_id: &str) -> Result<Vec<WebauthnCredential>>;

    /// 添加一个 WebAuthn 凭证
    async fn add_webauthn_credential(
        &self,
        user_id: &str,
        credential: WebauthnCredential,
    ) -> Result<()>;

    /// 更新 WebAuthn 凭证的签名计数器
    async fn update_webauthn_counter(
        &self,
        user_id: &str,
        credential_id: &str,
        counter: u32,
    ) -> Result<()>;

    /// 删除某个认证方式的注册材料（禁用方式时调用）
    async fn remove_method_material(&self, user_id: &str, method: MfaMethod) -> Result<()>;

    /// 删除用户的全部注册材料（GDPR 擦除的一部分）
    async fn remove_user(&self, user_id: &str) -> Result<()>;
}

/// 单个用户的注册材料
#[derive(Debug, Clone, Default)]
struct UserCredentials {
    enabled: HashSet<MfaMethod>,
    totp: Option<TotpSecret>,
    backup_codes: HashSet<String>,
    webauthn: Vec<WebauthnCredential>,
}

/// 内存凭证存储
///
/// 用于测试和开发环境。
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    users: Arc<RwLock<HashMap<String, UserCredentials>>>,
}

impl InMemoryCredentialStore {
    /// 创建新的内存凭证存储
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for InMemoryCredentialStore {
    fn clone(&self) -> Self {
        Self {
            users: Arc::clone(&self.users),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn enabled_methods(&self, user_id: &str) -> Result<HashSet<MfaMethod>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .get(user_id)
            .map(|u| u.enabled.clone())
            .unwrap_or_default())
    }

    async fn set_method_enabled(
        &self,
        user_id: &str,
        method: MfaMethod,
        enabled: bool,
    ) -> Result<()> {
        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.to_string()).or_default();
        if enabled {
            user.enabled.insert(method);
        } else {
            user.enabled.remove(&method);
        }
        Ok(())
    }

    async fn totp_secret(&self, user_id: &str) -> Result<Option<TotpSecret>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .get(user_id)
            .and_then(|u| u.totp.clone()))
    }

    async fn store_totp_secret(&self, user_id: &str, secret: TotpSecret) -> Result<()> {
        let mut users = self.users.write().unwrap();
        users.entry(user_id.to_string()).or_default().totp = Some(secret);
        Ok(())
    }

    async fn store_backup_codes(&self, user_id: &str, hashed_codes: HashSet<String>) -> Result<()> {
        let mut users = self.users.write().unwrap();
        users.entry(user_id.to_string()).or_default().backup_codes = hashed_codes;
        Ok(())
    }

    async fn consume_backup_code(&self, user_id: &str, hashed_code: &str) -> Result<bool> {
        let mut users = self.users.write().unwrap();
        match users.get_mut(user_id) {
            Some(user) => Ok(user.backup_codes.remove(hashed_code)),
            None => Ok(false),
        }
    }

    async fn remaining_backup_codes(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .users
            .read()
            .unwrap()
            .get(user_id)
            .map(|u| u.backup_codes.len())
            .unwrap_or(0))
    }

    async fn webauthn_credentials(&self, user_id: &str) -> Result<Vec<WebauthnCredential>> {
        Ok(self
            .users
            .read()
            .unwrap()
            .get(user_id)
            .map(|u| u.webauthn.clone())
            .unwrap_or_default())
    }

    async fn add_webauthn_credential(
        &self,
        user_id: &str,
        credential: WebauthnCredential,
    ) -> Result<()> {
        let mut users = self.users.write().unwrap();
        let user = users.entry(user_id.to_string()).or_default();
        if user
            .webauthn
            .iter()
            .any(|c| c.credential_id == credential.credential_id)
        {
            return Err(StorageError::AlreadyExists(format!(
                "webauthn credential '{}'",
                credential.credential_id
            ))
            .into());
        }
        user.webauthn.push(credential);
        Ok(())
    }

    async fn update_webauthn_counter(
        &self,
        user_id: &str,
        credential_id: &str,
        counter: u32,
    ) -> Result<()> {
        let mut users = self.users.write().unwrap();
        let credential = users
            .get_mut(user_id)
            .and_then(|u| {
                u.webauthn
                    .iter_mut()
                    .find(|c| c.credential_id == credential_id)
            })
            .ok_or_else(|| {
                StorageError::NotFound(format!("webauthn credential '{}'", credential_id))
            })?;
        credential.counter = counter;
        Ok(())
    }

    async fn remove_method_material(&self, user_id: &str, method: MfaMethod) -> Result<()> {
        let mut users = self.users.write().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            match method {
                MfaMethod::Totp => user.totp = None,
                MfaMethod::BackupCode => user.backup_codes.clear(),
                MfaMethod::Webauthn => user.webauthn.clear(),
                // SMS/邮件没有长期注册材料
                MfaMethod::Sms | MfaMethod::Email => {}
            }
        }
        Ok(())
    }

    async fn remove_user(&self, user_id: &str) -> Result<()> {
        self.users.write().unwrap().remove(user_id);
        Ok(())
    }
}

// ============================================================================
// 挑战存储
// ============================================================================

/// 挑战用途
///
/// 同一用户不同用途的挑战互相独立。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengePurpose {
    /// 短信验证码
    SmsCode,
    /// 邮件验证码
    EmailCode,
    /// WebAuthn 注册仪式
    WebauthnRegistration,
    /// WebAuthn 认证仪式
    WebauthnAssertion,
}

/// 挑战键：用户 + 用途
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeKey {
    /// 用户 ID
    pub user_id: String,
    /// 挑战用途
    pub purpose: ChallengePurpose,
}

impl ChallengeKey {
    /// 创建新的挑战键
    pub fn new(user_id: impl Into<String>, purpose: ChallengePurpose) -> Self {
        Self {
            user_id: user_id.into(),
            purpose,
        }
    }
}

/// 待验证的挑战
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// 挑战内容（数字验证码或 Base64 URL 挑战串）
    pub code: String,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 剩余尝试次数
    pub attempts_remaining: u32,
}

impl Challenge {
    /// 是否已过期
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// 挑战验证结果
///
/// 挑战在 `Validated` / `Exhausted` / `Expired` 时已被移除，
/// 之后的重试得到 `NotFound`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeAttempt {
    /// 验证通过，挑战已消费
    Validated,
    /// 码不匹配，还有剩余尝试次数
    Mismatch {
        /// 剩余尝试次数
        remaining: u32,
    },
    /// 尝试次数耗尽，挑战已移除
    Exhausted,
    /// 挑战已过期
    Expired,
    /// 没有待验证的挑战
    NotFound,
}

/// 挑战存储 trait
///
/// 时间由调用方传入，便于确定性测试。
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// 存入挑战（覆盖同键的旧挑战）
    async fn put(&self, key: ChallengeKey, challenge: Challenge) -> Result<()>;

    /// 读取未过期的挑战
    ///
    /// 已过期的挑战被惰性移除并返回 `None`。
    async fn get(&self, key: &ChallengeKey, now: DateTime<Utc>) -> Result<Option<Challenge>>;

    /// 原子地验证并消费挑战
    ///
    /// 比较、尝试次数递减和移除都发生在同一个锁内。
    async fn check_and_consume(
        &self,
        key: &ChallengeKey,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeAttempt>;

    /// 原子地取出挑战（WebAuthn 仪式用）
    ///
    /// 无论后续验证结果如何，挑战都只能取出一次。过期挑战返回 `None`。
    async fn take(&self, key: &ChallengeKey, now: DateTime<Utc>) -> Result<Option<Challenge>>;

    /// 移除挑战
    async fn remove(&self, key: &ChallengeKey) -> Result<()>;

    /// 清理所有已过期的挑战，返回清理数量
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// 移除用户的全部挑战（GDPR 擦除的一部分）
    async fn remove_user(&self, user_id: &str) -> Result<()>;
}

/// 内存挑战存储
#[derive(Debug, Default)]
pub struct InMemoryChallengeStore {
    challenges: Arc<Mutex<HashMap<ChallengeKey, Challenge>>>,
}

impl InMemoryChallengeStore {
    /// 创建新的内存挑战存储
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clone for InMemoryChallengeStore {
    fn clone(&self) -> Self {
        Self {
            challenges: Arc::clone(&self.challenges),
        }
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put(&self, key: ChallengeKey, challenge: Challenge) -> Result<()> {
        self.challenges.lock().unwrap().insert(key, challenge);
        Ok(())
    }

    async fn get(&self, key: &ChallengeKey, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        let mut challenges = self.challenges.lock().unwrap();
        match challenges.get(key) {
            Some(challenge) if challenge.is_expired(now) => {
                challenges.remove(key);
                Ok(None)
            }
            Some(challenge) => Ok(Some(challenge.clone())),
            None => Ok(None),
        }
    }

    async fn check_and_consume(
        &self,
        key: &ChallengeKey,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<ChallengeAttempt> {
        let mut challenges = self.challenges.lock().unwrap();

        let Some(challenge) = challenges.get_mut(key) else {
            return Ok(ChallengeAttempt::NotFound);
        };

        if challenge.is_expired(now) {
            challenges.remove(key);
            return Ok(ChallengeAttempt::Expired);
        }

        if constant_time_compare_str(&challenge.code, code) {
            challenges.remove(key);
            return Ok(ChallengeAttempt::Validated);
        }

        challenge.attempts_remaining = challenge.attempts_remaining.saturating_sub(1);
        if challenge.attempts_remaining == 0 {
            challenges.remove(key);
            return Ok(ChallengeAttempt::Exhausted);
        }

        Ok(ChallengeAttempt::Mismatch {
            remaining: challenge.attempts_remaining,
        })
    }

    async fn take(&self, key: &ChallengeKey, now: DateTime<Utc>) -> Result<Option<Challenge>> {
        let mut challenges = self.challenges.lock().unwrap();
        match challenges.remove(key) {
            Some(challenge) if challenge.is_expired(now) => Ok(None),
            other => Ok(other),
        }
    }

    async fn remove(&self, key: &ChallengeKey) -> Result<()> {
        self.challenges.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut challenges = self.challenges.lock().unwrap();
        let before = challenges.len();
        challenges.retain(|_, c| !c.is_expired(now));
        Ok(before - challenges.len())
    }

    async fn remove_user(&self, user_id: &str) -> Result<()> {
        self.challenges
            .lock()
            .unwrap()
            .retain(|k, _| k.user_id != user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn challenge(code: &str, now: DateTime<Utc>, ttl_minutes: i64, attempts: u32) -> Challenge {
        Challenge {
            code: code.to_string(),
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            attempts_remaining: attempts,
        }
    }

    fn key(user_id: &str) -> ChallengeKey {
        ChallengeKey::new(user_id, ChallengePurpose::SmsCode)
    }

    // ========================================================================
    // 凭证存储
    // ========================================================================

    #[tokio::test]
    async fn test_enabled_methods_roundtrip() {
        let store = InMemoryCredentialStore::new();

        assert!(store.enabled_methods("u1").await.unwrap().is_empty());

        store
            .set_method_enabled("u1", MfaMethod::Totp, true)
            .await
            .unwrap();
        store
            .set_method_enabled("u1", MfaMethod::Sms, true)
            .await
            .unwrap();

        let methods = store.enabled_methods("u1").await.unwrap();
        assert_eq!(methods.len(), 2);
        assert!(methods.contains(&MfaMethod::Totp));

        store
            .set_method_enabled("u1", MfaMethod::Totp, false)
            .await
            .unwrap();
        assert!(
            !store
                .enabled_methods("u1")
                .await
                .unwrap()
                .contains(&MfaMethod::Totp)
        );
    }

    #[tokio::test]
    async fn test_totp_secret_storage() {
        let store = InMemoryCredentialStore::new();
        let secret = TotpSecret::from_bytes(vec![1u8; 20]);

        assert!(store.totp_secret("u1").await.unwrap().is_none());

        store.store_totp_secret("u1", secret.clone()).await.unwrap();
        assert_eq!(store.totp_secret("u1").await.unwrap(), Some(secret));
    }

    #[tokio::test]
    async fn test_consume_backup_code_exactly_once() {
        let store = InMemoryCredentialStore::new();
        let codes: HashSet<String> = ["hash-a", "hash-b"].iter().map(|s| s.to_string()).collect();
        store.store_backup_codes("u1", codes).await.unwrap();

        assert!(store.consume_backup_code("u1", "hash-a").await.unwrap());
        // 同一个码第二次消费失败
        assert!(!store.consume_backup_code("u1", "hash-a").await.unwrap());
        assert_eq!(store.remaining_backup_codes("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_webauthn_credential_storage() {
        let store = InMemoryCredentialStore::new();
        let credential = WebauthnCredential {
            credential_id: "cred-1".to_string(),
            algorithm: crate::mfa::webauthn::CoseAlgorithm::Ed25519,
            public_key: vec![0u8; 32],
            counter: 0,
        };

        store
            .add_webauthn_credential("u1", credential.clone())
            .await
            .unwrap();
        // 重复的凭证 ID 被拒绝
        assert!(
            store
                .add_webauthn_credential("u1", credential)
                .await
                .is_err()
        );

        store
            .update_webauthn_counter("u1", "cred-1", 7)
            .await
            .unwrap();
        let credentials = store.webauthn_credentials("u1").await.unwrap();
        assert_eq!(credentials[0].counter, 7);

        // 未知凭证更新计数器报错
        assert!(
            store
                .update_webauthn_counter("u1", "missing", 1)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_remove_method_material_is_scoped() {
        let store = InMemoryCredentialStore::new();
        store
            .store_totp_secret("u1", TotpSecret::from_bytes(vec![1u8; 20]))
            .await
            .unwrap();
        let codes: HashSet<String> = ["hash-a"].iter().map(|s| s.to_string()).collect();
        store.store_backup_codes("u1", codes).await.unwrap();

        store
            .remove_method_material("u1", MfaMethod::Totp)
            .await
            .unwrap();

        assert!(store.totp_secret("u1").await.unwrap().is_none());
        // 其他方式的材料不受影响
        assert_eq!(store.remaining_backup_codes("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_user_clears_credentials() {
        let store = InMemoryCredentialStore::new();
        store
            .set_method_enabled("u1", MfaMethod::Totp, true)
            .await
            .unwrap();

        store.remove_user("u1").await.unwrap();
        assert!(store.enabled_methods("u1").await.unwrap().is_empty());
    }

    // ========================================================================
    // 挑战存储
    // ========================================================================

    #[tokio::test]
    async fn test_check_and_consume_success() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("123456", now, 5, 3))
            .await
            .unwrap();

        let attempt = store
            .check_and_consume(&key("u1"), "123456", now)
            .await
            .unwrap();
        assert_eq!(attempt, ChallengeAttempt::Validated);

        // 成功后挑战已消费
        let attempt = store
            .check_and_consume(&key("u1"), "123456", now)
            .await
            .unwrap();
        assert_eq!(attempt, ChallengeAttempt::NotFound);
    }

    #[tokio::test]
    async fn test_check_and_consume_attempt_accounting() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("123456", now, 5, 3))
            .await
            .unwrap();

        assert_eq!(
            store
                .check_and_consume(&key("u1"), "000000", now)
                .await
                .unwrap(),
            ChallengeAttempt::Mismatch { remaining: 2 }
        );
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "000000", now)
                .await
                .unwrap(),
            ChallengeAttempt::Mismatch { remaining: 1 }
        );
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "000000", now)
                .await
                .unwrap(),
            ChallengeAttempt::Exhausted
        );

        // 耗尽后即使提交正确的码也无法通过
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "123456", now)
                .await
                .unwrap(),
            ChallengeAttempt::NotFound
        );
    }

    #[tokio::test]
    async fn test_check_and_consume_expired() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("123456", now, 5, 3))
            .await
            .unwrap();

        let later = now + Duration::minutes(6);
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "123456", later)
                .await
                .unwrap(),
            ChallengeAttempt::Expired
        );
        // 过期挑战已被移除
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "123456", later)
                .await
                .unwrap(),
            ChallengeAttempt::NotFound
        );
    }

    #[tokio::test]
    async fn test_get_lazy_expiry() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("123456", now, 5, 3))
            .await
            .unwrap();

        assert!(store.get(&key("u1"), now).await.unwrap().is_some());
        assert!(
            store
                .get(&key("u1"), now + Duration::minutes(6))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        let k = ChallengeKey::new("u1", ChallengePurpose::WebauthnAssertion);
        store
            .put(k.clone(), challenge("challenge-bytes", now, 5, 1))
            .await
            .unwrap();

        assert!(store.take(&k, now).await.unwrap().is_some());
        assert!(store.take(&k, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_challenge() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("111111", now, 5, 3))
            .await
            .unwrap();
        store
            .put(key("u1"), challenge("222222", now, 5, 3))
            .await
            .unwrap();

        // 旧挑战被覆盖后不再有效
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "111111", now)
                .await
                .unwrap(),
            ChallengeAttempt::Mismatch { remaining: 2 }
        );
        assert_eq!(
            store
                .check_and_consume(&key("u1"), "222222", now)
                .await
                .unwrap(),
            ChallengeAttempt::Validated
        );
    }

    #[tokio::test]
    async fn test_purposes_are_independent() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        let sms = ChallengeKey::new("u1", ChallengePurpose::SmsCode);
        let email = ChallengeKey::new("u1", ChallengePurpose::EmailCode);

        store.put(sms.clone(), challenge("111111", now, 5, 3)).await.unwrap();
        store
            .put(email.clone(), challenge("222222", now, 5, 3))
            .await
            .unwrap();

        assert_eq!(
            store.check_and_consume(&sms, "111111", now).await.unwrap(),
            ChallengeAttempt::Validated
        );
        assert_eq!(
            store
                .check_and_consume(&email, "222222", now)
                .await
                .unwrap(),
            ChallengeAttempt::Validated
        );
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("111111", now, 5, 3))
            .await
            .unwrap();
        store
            .put(key("u2"), challenge("222222", now, 30, 3))
            .await
            .unwrap();

        let swept = store.sweep_expired(now + Duration::minutes(10)).await.unwrap();
        assert_eq!(swept, 1);
        assert!(
            store
                .get(&key("u2"), now + Duration::minutes(10))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_remove_user_clears_challenges() {
        let store = InMemoryChallengeStore::new();
        let now = Utc::now();
        store
            .put(key("u1"), challenge("111111", now, 5, 3))
            .await
            .unwrap();
        store
            .put(
                ChallengeKey::new("u1", ChallengePurpose::EmailCode),
                challenge("222222", now, 5, 3),
            )
            .await
            .unwrap();
        store
            .put(key("u2"), challenge("333333", now, 5, 3))
            .await
            .unwrap();

        store.remove_user("u1").await.unwrap();

        assert!(store.get(&key("u1"), now).await.unwrap().is_none());
        assert!(store.get(&key("u2"), now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_validation_single_winner() {
        let store = Arc::new(InMemoryChallengeStore::new());
        let now = Utc::now();
        store
            .put(key("u1"), challenge("123456", now, 5, 5))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.check_and_consume(&key("u1"), "123456", now).await
            }));
        }

        let mut validated = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == ChallengeAttempt::Validated {
                validated += 1;
            }
        }
        assert_eq!(validated, 1);
    }
}

//! WebAuthn / FIDO2 断言验证模块
//!
//! 提供注册仪式参数构建、注册响应校验和完整的断言验证。
//!
//! 断言验证执行全部检查而不只是结构检查：
//!
//! 1. clientDataJSON 的 type / challenge / origin
//! 2. authenticatorData 的 RP-id 哈希、用户在场 (UP) / 用户验证 (UV) 标志
//! 3. 对 `authenticatorData || SHA-256(clientDataJSON)` 的签名
//!    （ES256 或 Ed25519）
//! 4. 签名计数器严格递增
//!
//! COSE 密钥的 CBOR 解析在客户端侧库完成，注册响应直接携带解码后的
//! 公钥字节（ES256 为 SEC1 编码点，Ed25519 为 32 字节原始公钥）。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CryptoError, Error, Result, ValidationError};
use crate::random::constant_time_compare_str;

/// 用户在场标志位
const FLAG_USER_PRESENT: u8 = 0x01;
/// 用户验证标志位
const FLAG_USER_VERIFIED: u8 = 0x04;

/// 支持的 COSE 签名算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoseAlgorithm {
    /// ECDSA w/ SHA-256 (COSE -7)
    Es256,
    /// EdDSA / Ed25519 (COSE -8)
    Ed25519,
}

impl CoseAlgorithm {
    /// COSE 算法标识
    pub fn cose_id(&self) -> i32 {
        match self {
            CoseAlgorithm::Es256 => -7,
            CoseAlgorithm::Ed25519 => -8,
        }
    }

    /// 从 COSE 算法标识创建
    pub fn from_cose_id(id: i32) -> Option<Self> {
        match id {
            -7 => Some(CoseAlgorithm::Es256),
            -8 => Some(CoseAlgorithm::Ed25519),
            _ => None,
        }
    }
}

/// WebAuthn 配置
#[derive(Debug, Clone)]
pub struct WebauthnConfig {
    /// Relying Party ID（通常是域名）
    pub rp_id: String,
    /// Relying Party 显示名称
    pub rp_name: String,
    /// 期望的 Origin（如 "https://example.com"）
    pub origin: String,
    /// 是否要求用户验证 (UV)，默认只要求用户在场 (UP)
    pub require_user_verification: bool,
    /// 仪式超时（毫秒）
    pub timeout_ms: u32,
}

impl WebauthnConfig {
    /// 创建新的配置
    pub fn new(
        rp_id: impl Into<String>,
        rp_name: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            rp_id: rp_id.into(),
            rp_name: rp_name.into(),
            origin: origin.into(),
            require_user_verification: false,
            timeout_ms: 60_000,
        }
    }

    /// 要求用户验证
    pub fn with_user_verification(mut self, required: bool) -> Self {
        self.require_user_verification = required;
        self
    }
}

/// 注册仪式参数
///
/// 发送给客户端以发起凭证创建。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationCeremony {
    /// 随机挑战（Base64 URL 编码）
    pub challenge: String,
    /// Relying Party ID
    pub rp_id: String,
    /// Relying Party 名称
    pub rp_name: String,
    /// 用户句柄
    pub user_id: String,
    /// 用户显示名
    pub user_name: String,
    /// 支持的公钥算法（COSE 标识）
    pub pub_key_algorithms: Vec<i32>,
    /// 证明（attestation）偏好
    pub attestation: String,
    /// 认证器选择：是否要求用户验证
    pub user_verification: String,
    /// 仪式超时（毫秒）
    pub timeout_ms: u32,
}

/// 断言仪式参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionCeremony {
    /// 随机挑战（Base64 URL 编码）
    pub challenge: String,
    /// Relying Party ID
    pub rp_id: String,
    /// 允许的凭证 ID 列表
    pub allow_credentials: Vec<String>,
    /// 是否要求用户验证
    pub user_verification: String,
    /// 仪式超时（毫秒）
    pub timeout_ms: u32,
}

/// 注册响应
///
/// 所有字节字段均为 Base64 URL 编码。公钥由客户端侧库从
/// attestationObject 中解出后传入。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResponse {
    /// 凭证 ID
    pub credential_id: String,
    /// clientDataJSON
    pub client_data_json: String,
    /// authenticatorData
    pub authenticator_data: String,
    /// COSE 算法标识
    pub algorithm: i32,
    /// 解码后的公钥字节
    pub public_key: String,
}

/// 断言响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionResponse {
    /// 凭证 ID
    pub credential_id: String,
    /// clientDataJSON
    pub client_data_json: String,
    /// authenticatorData
    pub authenticator_data: String,
    /// 签名
    pub signature: String,
}

/// 已注册的 WebAuthn 凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebauthnCredential {
    /// 凭证 ID（Base64 URL 编码）
    pub credential_id: String,
    /// 签名算法
    pub algorithm: CoseAlgorithm,
    /// 公钥字节
    pub public_key: Vec<u8>,
    /// 签名计数器（单调递增）
    pub counter: u32,
}

/// 断言验证结果
///
/// 所有拒绝原因统一折叠为 `Rejected`，只用于审计 metadata，
/// 不向认证调用方区分。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionOutcome {
    /// 验证通过，携带需要持久化的新计数器值
    Verified {
        /// 新的签名计数器
        new_counter: u32,
    },
    /// 验证失败
    Rejected {
        /// 失败原因（仅进入审计 metadata）
        reason: String,
    },
}

impl AssertionOutcome {
    fn rejected(reason: impl Into<String>) -> Self {
        AssertionOutcome::Rejected {
            reason: reason.into(),
        }
    }
}

/// clientDataJSON 的相关字段
#[derive(Debug, Deserialize)]
struct ClientData {
    #[serde(rename = "type")]
    ceremony_type: String,
    challenge: String,
    origin: String,
}

/// 解析后的 authenticatorData 头部
#[derive(Debug)]
struct AuthenticatorData {
    rp_id_hash: [u8; 32],
    flags: u8,
    counter: u32,
}

impl AuthenticatorData {
    fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 37 {
            return None;
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[0..32]);
        let flags = bytes[32];
        let counter = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);
        Some(Self {
            rp_id_hash,
            flags,
            counter,
        })
    }
}

/// WebAuthn 验证器
#[derive(Debug, Clone)]
pub struct WebauthnVerifier {
    config: WebauthnConfig,
}

impl WebauthnVerifier {
    /// 创建新的验证器
    pub fn new(config: WebauthnConfig) -> Self {
        Self { config }
    }

    /// 获取配置
    pub fn config(&self) -> &WebauthnConfig {
        &self.config
    }

    /// 构建注册仪式参数
    pub fn registration_ceremony(
        &self,
        challenge: &str,
        user_id: &str,
        user_name: &str,
    ) -> RegistrationCeremony {
        RegistrationCeremony {
            challenge: challenge.to_string(),
            rp_id: self.config.rp_id.clone(),
            rp_name: self.config.rp_name.clone(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            pub_key_algorithms: vec![
                CoseAlgorithm::Es256.cose_id(),
                CoseAlgorithm::Ed25519.cose_id(),
            ],
            attestation: "none".to_string(),
            user_verification: self.user_verification_policy(),
            timeout_ms: self.config.timeout_ms,
        }
    }

    /// 构建断言仪式参数
    pub fn assertion_ceremony(
        &self,
        challenge: &str,
        allow_credentials: Vec<String>,
    ) -> AssertionCeremony {
        AssertionCeremony {
            challenge: challenge.to_string(),
            rp_id: self.config.rp_id.clone(),
            allow_credentials,
            user_verification: self.user_verification_policy(),
            timeout_ms: self.config.timeout_ms,
        }
    }

    /// 校验注册响应并构建凭证
    ///
    /// 注册属于 enrollment 流程，失败直接返回错误（区别于断言验证的
    /// 统一 `Rejected` 折叠）。
    pub fn verify_registration(
        &self,
        expected_challenge: &str,
        response: &RegistrationResponse,
    ) -> Result<WebauthnCredential> {
        let client_data_bytes = decode_b64url(&response.client_data_json)?;
        let client_data: ClientData = serde_json::from_slice(&client_data_bytes)
            .map_err(|e| Error::Validation(ValidationError::Malformed(e.to_string())))?;

        if client_data.ceremony_type != "webauthn.create" {
            return Err(Error::validation("unexpected client data type"));
        }
        if !constant_time_compare_str(&client_data.challenge, expected_challenge) {
            return Err(Error::validation("registration challenge mismatch"));
        }
        if client_data.origin != self.config.origin {
            return Err(Error::validation("origin mismatch"));
        }

        let auth_bytes = decode_b64url(&response.authenticator_data)?;
        let auth_data = AuthenticatorData::parse(&auth_bytes)
            .ok_or_else(|| Error::validation("authenticator data too short"))?;

        if auth_data.rp_id_hash != rp_id_hash(&self.config.rp_id) {
            return Err(Error::validation("relying party id hash mismatch"));
        }
        if auth_data.flags & FLAG_USER_PRESENT == 0 {
            return Err(Error::validation("user presence flag not set"));
        }
        if self.config.require_user_verification && auth_data.flags & FLAG_USER_VERIFIED == 0 {
            return Err(Error::validation("user verification flag not set"));
        }

        let algorithm = CoseAlgorithm::from_cose_id(response.algorithm)
            .ok_or_else(|| Error::validation("unsupported COSE algorithm"))?;
        let public_key = decode_b64url(&response.public_key)?;
        validate_public_key(algorithm, &public_key)?;

        Ok(WebauthnCredential {
            credential_id: response.credential_id.clone(),
            algorithm,
            public_key,
            counter: auth_data.counter,
        })
    }

    /// 完整验证断言响应
    ///
    /// 任何失败（格式错误、挑战不符、签名无效、计数器回退）都折叠为
    /// `Rejected`，原因字符串只进入审计 metadata。
    pub fn verify_assertion(
        &self,
        expected_challenge: &str,
        credential: &WebauthnCredential,
        response: &AssertionResponse,
    ) -> AssertionOutcome {
        if response.credential_id != credential.credential_id {
            return AssertionOutcome::rejected("unknown credential id");
        }

        let Ok(client_data_bytes) = decode_b64url(&response.client_data_json) else {
            return AssertionOutcome::rejected("client data not base64url");
        };
        let Ok(client_data) = serde_json::from_slice::<ClientData>(&client_data_bytes) else {
            return AssertionOutcome::rejected("client data not valid JSON");
        };

        if client_data.ceremony_type != "webauthn.get" {
            return AssertionOutcome::rejected("unexpected client data type");
        }
        if !constant_time_compare_str(&client_data.challenge, expected_challenge) {
            return AssertionOutcome::rejected("challenge mismatch");
        }
        if client_data.origin != self.config.origin {
            return AssertionOutcome::rejected("origin mismatch");
        }

        let Ok(auth_bytes) = decode_b64url(&response.authenticator_data) else {
            return AssertionOutcome::rejected("authenticator data not base64url");
        };
        let Some(auth_data) = AuthenticatorData::parse(&auth_bytes) else {
            return AssertionOutcome::rejected("authenticator data too short");
        };

        if auth_data.rp_id_hash != rp_id_hash(&self.config.rp_id) {
            return AssertionOutcome::rejected("relying party id hash mismatch");
        }
        if auth_data.flags & FLAG_USER_PRESENT == 0 {
            return AssertionOutcome::rejected("user presence flag not set");
        }
        if self.config.require_user_verification && auth_data.flags & FLAG_USER_VERIFIED == 0 {
            return AssertionOutcome::rejected("user verification flag not set");
        }

        // 签名覆盖 authenticatorData || SHA-256(clientDataJSON)
        let client_data_hash = Sha256::digest(&client_data_bytes);
        let mut message = Vec::with_capacity(auth_bytes.len() + 32);
        message.extend_from_slice(&auth_bytes);
        message.extend_from_slice(&client_data_hash);

        let Ok(signature) = decode_b64url(&response.signature) else {
            return AssertionOutcome::rejected("signature not base64url");
        };
        if let Err(reason) =
            verify_signature(credential.algorithm, &credential.public_key, &message, &signature)
        {
            return AssertionOutcome::rejected(reason);
        }

        // 计数器必须严格递增；两侧都为 0 表示认证器不支持计数器
        if (auth_data.counter != 0 || credential.counter != 0)
            && auth_data.counter <= credential.counter
        {
            return AssertionOutcome::rejected("signature counter did not increase");
        }

        AssertionOutcome::Verified {
            new_counter: auth_data.counter,
        }
    }

    fn user_verification_policy(&self) -> String {
        if self.config.require_user_verification {
            "required".to_string()
        } else {
            "preferred".to_string()
        }
    }
}

// ============================================================================
// 辅助函数
// ============================================================================

/// 计算 RP ID 的 SHA-256 哈希
fn rp_id_hash(rp_id: &str) -> [u8; 32] {
    let digest = Sha256::digest(rp_id.as_bytes());
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);
    hash
}

/// Base64 URL 解码
fn decode_b64url(input: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(input)
        .map_err(|e| Error::Validation(ValidationError::Malformed(e.to_string())))
}

/// 校验公钥字节可被解析
fn validate_public_key(algorithm: CoseAlgorithm, public_key: &[u8]) -> Result<()> {
    match algorithm {
        CoseAlgorithm::Es256 => {
            p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| Error::Crypto(CryptoError::InvalidKey(e.to_string())))?;
        }
        CoseAlgorithm::Ed25519 => {
            let bytes: [u8; 32] = public_key
                .try_into()
                .map_err(|_| Error::Crypto(CryptoError::InvalidKey("bad length".to_string())))?;
            ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|e| Error::Crypto(CryptoError::InvalidKey(e.to_string())))?;
        }
    }
    Ok(())
}

/// 验证签名
fn verify_signature(
    algorithm: CoseAlgorithm,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> std::result::Result<(), &'static str> {
    match algorithm {
        CoseAlgorithm::Es256 => {
            use p256::ecdsa::signature::Verifier;
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|_| "invalid ES256 public key")?;
            let sig =
                p256::ecdsa::Signature::from_der(signature).map_err(|_| "invalid DER signature")?;
            key.verify(message, &sig).map_err(|_| "signature invalid")
        }
        CoseAlgorithm::Ed25519 => {
            use ed25519_dalek::Verifier;
            let bytes: [u8; 32] = public_key
                .try_into()
                .map_err(|_| "invalid Ed25519 public key")?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
                .map_err(|_| "invalid Ed25519 public key")?;
            let sig = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|_| "invalid signature encoding")?;
            key.verify(message, &sig).map_err(|_| "signature invalid")
        }
    }
}

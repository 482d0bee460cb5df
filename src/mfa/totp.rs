//! TOTP (基于时间的一次性密码) 实现模块
//!
//! 符合 RFC 6238，兼容 Google Authenticator、Authy 等应用。
//! 验证是无状态的：根据存储的共享密钥重算当前时间步前后窗口内的码，
//! 使用常量时间比较。
//!
//! ## 示例
//!
//! ```rust
//! use guardrs::mfa::totp::{TotpConfig, TotpVerifier};
//!
//! let verifier = TotpVerifier::new(TotpConfig::default());
//! let secret = verifier.generate_secret().unwrap();
//!
//! let now = chrono::Utc::now().timestamp() as u64;
//! let code = verifier.code_at(&secret, now).unwrap();
//! assert!(verifier.verify_at(&secret, &code, now).unwrap());
//! ```

use base32::{Alphabet, decode as base32_decode, encode as base32_encode};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::error::{Error, Result, ValidationError};
use crate::random::{constant_time_compare, generate_random_bytes};

/// TOTP 哈希算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotpAlgorithm {
    /// SHA-1（默认，最广泛支持）
    #[default]
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-512
    Sha512,
}

impl TotpAlgorithm {
    /// 获取算法名称（用于 otpauth URI）
    pub fn as_str(&self) -> &'static str {
        match self {
            TotpAlgorithm::Sha1 => "SHA1",
            TotpAlgorithm::Sha256 => "SHA256",
            TotpAlgorithm::Sha512 => "SHA512",
        }
    }
}

/// TOTP 配置
#[derive(Debug, Clone)]
pub struct TotpConfig {
    /// 时间步长（秒），默认 30 秒
    pub time_step: u64,

    /// 验证码位数，默认 6 位
    pub digits: u32,

    /// 哈希算法
    pub algorithm: TotpAlgorithm,

    /// 允许的时间偏差窗口（前后各多少个时间步），默认 1
    pub skew: u64,

    /// 密钥长度（字节），默认 20 字节（160 位）
    pub secret_length: usize,
}

impl Default for TotpConfig {
    fn default() -> Self {
        Self {
            time_step: 30,
            digits: 6,
            algorithm: TotpAlgorithm::Sha1,
            skew: 1,
            secret_length: 20,
        }
    }
}

impl TotpConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置时间步长
    pub fn with_time_step(mut self, seconds: u64) -> Self {
        self.time_step = seconds;
        self
    }

    /// 设置验证码位数
    pub fn with_digits(mut self, digits: u32) -> Self {
        assert!((6..=8).contains(&digits), "digits must be between 6 and 8");
        self.digits = digits;
        self
    }

    /// 设置哈希算法
    pub fn with_algorithm(mut self, algorithm: TotpAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// 设置时间偏差窗口
    pub fn with_skew(mut self, skew: u64) -> Self {
        self.skew = skew;
        self
    }

    /// 设置密钥长度
    pub fn with_secret_length(mut self, length: usize) -> Self {
        assert!(length >= 16, "secret length must be at least 16 bytes");
        self.secret_length = length;
        self
    }
}

/// TOTP 密钥信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpSecret {
    /// 原始密钥字节
    pub raw: Vec<u8>,

    /// Base32 编码的密钥（用于显示和 URI）
    pub base32: String,
}

impl TotpSecret {
    /// 从原始字节创建
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let base32 = base32_encode(Alphabet::Rfc4648 { padding: false }, &bytes);
        Self { raw: bytes, base32 }
    }

    /// 从 Base32 字符串创建
    pub fn from_base32(base32: &str) -> Result<Self> {
        let clean = base32.replace([' ', '-'], "").to_uppercase();
        let raw = base32_decode(Alphabet::Rfc4648 { padding: false }, &clean).ok_or_else(|| {
            Error::Validation(ValidationError::Malformed("invalid base32 secret".to_string()))
        })?;
        Ok(Self { raw, base32: clean })
    }
}

/// TOTP 注册（provisioning）载荷
///
/// 包含签发者、账户标签和新生成的共享密钥。密钥明文只在这里
/// 返回一次，之后无法再读取。
#[derive(Debug, Clone)]
pub struct TotpProvisioning {
    /// 签发者名称
    pub issuer: String,
    /// 账户标签（通常是用户邮箱）
    pub account: String,
    /// Base32 编码的共享密钥
    pub secret_base32: String,
    /// otpauth:// URI（可用于生成二维码）
    pub uri: String,
}

/// TOTP 验证器
///
/// 无状态：调用方传入存储的密钥和参考时间戳。
#[derive(Debug, Clone)]
pub struct TotpVerifier {
    config: TotpConfig,
}

impl TotpVerifier {
    /// 创建新的 TOTP 验证器
    pub fn new(config: TotpConfig) -> Self {
        Self { config }
    }

    /// 生成新的 TOTP 密钥
    pub fn generate_secret(&self) -> Result<TotpSecret> {
        let bytes = generate_random_bytes(self.config.secret_length)?;
        Ok(TotpSecret::from_bytes(bytes))
    }

    /// 生成指定时间的 TOTP 验证码
    pub fn code_at(&self, secret: &TotpSecret, timestamp: u64) -> Result<String> {
        let counter = timestamp / self.config.time_step;
        self.hotp(&secret.raw, counter)
    }

    /// 在指定时间验证 TOTP 验证码
    ///
    /// 在 `timestamp` 前后各 `skew` 个时间步内逐一比较，
    /// 每次比较都是常量时间的。
    pub fn verify_at(&self, secret: &TotpSecret, code: &str, timestamp: u64) -> Result<bool> {
        let normalized = code.replace([' ', '-'], "");
        if normalized.len() != self.config.digits as usize {
            return Ok(false);
        }

        let current_counter = (timestamp / self.config.time_step) as i64;
        for offset in -(self.config.skew as i64)..=(self.config.skew as i64) {
            let counter = current_counter + offset;
            if counter < 0 {
                continue;
            }
            let expected = self.hotp(&secret.raw, counter as u64)?;
            if constant_time_compare(normalized.as_bytes(), expected.as_bytes()) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// 构建注册载荷
    ///
    /// 格式: otpauth://totp/Issuer:account?secret=...&issuer=...
    pub fn provisioning(&self, secret: &TotpSecret, account: &str, issuer: &str) -> TotpProvisioning {
        let label = format!("{}:{}", issuer, account);
        let uri = format!(
            "otpauth://totp/{}?secret={}&digits={}&period={}&algorithm={}&issuer={}",
            urlencoding::encode(&label),
            secret.base32,
            self.config.digits,
            self.config.time_step,
            self.config.algorithm.as_str(),
            urlencoding::encode(issuer)
        );

        TotpProvisioning {
            issuer: issuer.to_string(),
            account: account.to_string(),
            secret_base32: secret.base32.clone(),
            uri,
        }
    }

    /// 获取配置
    pub fn config(&self) -> &TotpConfig {
        &self.config
    }

    // ========================================================================
    // 内部方法
    // ========================================================================

    /// 生成 HOTP 验证码 (RFC 4226)
    fn hotp(&self, secret: &[u8], counter: u64) -> Result<String> {
        let counter_bytes = counter.to_be_bytes();

        let hash = match self.config.algorithm {
            TotpAlgorithm::Sha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(secret).map_err(|_| {
                    Error::Validation(ValidationError::Malformed("invalid secret key".to_string()))
                })?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
            TotpAlgorithm::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| {
                    Error::Validation(ValidationError::Malformed("invalid secret key".to_string()))
                })?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
            TotpAlgorithm::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(secret).map_err(|_| {
                    Error::Validation(ValidationError::Malformed("invalid secret key".to_string()))
                })?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
        };

        // 动态截断
        let offset = (hash[hash.len() - 1] & 0x0f) as usize;
        let binary = ((hash[offset] & 0x7f) as u32) << 24
            | (hash[offset + 1] as u32) << 16
            | (hash[offset + 2] as u32) << 8
            | (hash[offset + 3] as u32);

        let modulo = 10u32.pow(self.config.digits);
        let code = binary % modulo;

        Ok(format!(
            "{:0width$}",
            code,
            width = self.config.digits as usize
        ))
    }
}

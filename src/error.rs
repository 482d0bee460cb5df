//! 统一错误类型模块
//!
//! 提供 guardrs 库中所有操作的错误类型定义。
//!
//! 注意：错误码/过期/次数耗尽不属于错误——`validate_code` 对这些情况
//! 统一返回 `Ok(false)`，具体子原因只保留在审计事件的 metadata 中，
//! 避免向调用方泄露可被利用的差异信息。

use std::fmt;

/// guardrs 库的统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// guardrs 库的错误类型
#[derive(Debug)]
pub enum Error {
    /// 配置错误（不支持的认证方式、缺少注册信息等），致命且不重试
    Config(ConfigError),

    /// 验证输入错误（格式非法等，区别于验证失败）
    Validation(ValidationError),

    /// 挑战投递失败，挑战状态保持不变，调用方可重试投递
    Delivery(DeliveryError),

    /// 审计管道错误
    Audit(AuditError),

    /// 存储错误
    Storage(StorageError),

    /// 加密错误
    Crypto(CryptoError),

    /// 内部错误
    Internal(String),
}

impl Error {
    /// 创建一个内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 创建一个验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(ValidationError::Custom(msg.into()))
    }

    /// 创建一个配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(ConfigError::Invalid(msg.into()))
    }
}

/// 配置相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 该认证方式不支持请求的操作
    UnsupportedMethod(String),
    /// 用户未注册请求的认证方式
    MissingEnrollment { user_id: String, method: String },
    /// 缺少必需的配置
    MissingRequired(String),
    /// 无效的配置值
    Invalid(String),
}

/// 验证输入相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 字段为空
    EmptyField(String),
    /// 输入格式非法（无法解析的断言响应等）
    Malformed(String),
    /// 自定义验证错误
    Custom(String),
}

/// 投递相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// 收件目标缺失（用户没有手机号/邮箱）
    MissingDestination(String),
    /// 传输失败
    SendFailed(String),
}

/// 审计管道相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// 写入日志 Sink 失败；绝不向认证调用方传播，仅上报诊断通道
    WriteFailed(String),
    /// 用户数据擦除失败；合规要求必须向调用方确认，视为致命
    ErasureFailed(String),
}

/// 存储相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 记录未找到
    NotFound(String),
    /// 记录已存在
    AlreadyExists(String),
    /// 操作失败
    OperationFailed(String),
}

/// 加密相关错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// 随机数生成失败
    RngFailed(String),
    /// 密钥无效
    InvalidKey(String),
    /// 签名验证失败
    SignatureInvalid(String),
}

// ============================================================================
// Display 实现
// ============================================================================

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Config error: {}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Delivery(e) => write!(f, "Delivery error: {}", e),
            Error::Audit(e) => write!(f, "Audit error: {}", e),
            Error::Storage(e) => write!(f, "Storage error: {}", e),
            Error::Crypto(e) => write!(f, "Crypto error: {}", e),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnsupportedMethod(method) => {
                write!(f, "unsupported MFA method: {}", method)
            }
            ConfigError::MissingEnrollment { user_id, method } => {
                write!(
                    f,
                    "user '{}' has no enrollment for method {}",
                    user_id, method
                )
            }
            ConfigError::MissingRequired(key) => {
                write!(f, "missing required configuration: {}", key)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::EmptyField(field) => write!(f, "field '{}' cannot be empty", field),
            ValidationError::Malformed(msg) => write!(f, "malformed input: {}", msg),
            ValidationError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::MissingDestination(what) => {
                write!(f, "no delivery destination: {}", what)
            }
            DeliveryError::SendFailed(msg) => write!(f, "challenge delivery failed: {}", msg),
        }
    }
}

impl fmt::Display for AuditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditError::WriteFailed(msg) => write!(f, "audit log write failed: {}", msg),
            AuditError::ErasureFailed(msg) => write!(f, "user data erasure failed: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotFound(item) => write!(f, "not found: {}", item),
            StorageError::AlreadyExists(item) => write!(f, "already exists: {}", item),
            StorageError::OperationFailed(msg) => write!(f, "storage operation failed: {}", msg),
        }
    }
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::RngFailed(msg) => write!(f, "random number generation failed: {}", msg),
            CryptoError::InvalidKey(msg) => write!(f, "invalid key: {}", msg),
            CryptoError::SignatureInvalid(msg) => {
                write!(f, "signature verification failed: {}", msg)
            }
        }
    }
}

// ============================================================================
// std::error::Error 实现
// ============================================================================

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for ValidationError {}
impl std::error::Error for DeliveryError {}
impl std::error::Error for AuditError {}
impl std::error::Error for StorageError {}
impl std::error::Error for CryptoError {}

// ============================================================================
// From 实现 - 方便错误转换
// ============================================================================

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<DeliveryError> for Error {
    fn from(err: DeliveryError) -> Self {
        Error::Delivery(err)
    }
}

impl From<AuditError> for Error {
    fn from(err: AuditError) -> Self {
        Error::Audit(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err)
    }
}

impl From<CryptoError> for Error {
    fn from(err: CryptoError) -> Self {
        Error::Crypto(err)
    }
}

//! 安全随机数生成模块
//!
//! 提供密码学安全的随机数生成功能，用于生成挑战码、密钥等敏感数据。

use rand::{Rng, TryRngCore, rngs::OsRng};

use crate::error::{CryptoError, Error, Result};

/// 生成指定长度的随机字节数组
///
/// 使用操作系统提供的密码学安全随机数生成器 (CSPRNG)
///
/// # Example
///
/// ```rust
/// use guardrs::random::generate_random_bytes;
///
/// let bytes = generate_random_bytes(32).unwrap();
/// assert_eq!(bytes.len(), 32);
/// ```
pub fn generate_random_bytes(length: usize) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Crypto(CryptoError::RngFailed(format!("{:?}", e))))?;
    Ok(bytes)
}

/// 生成指定长度的十六进制随机字符串
///
/// # Example
///
/// ```rust
/// use guardrs::random::generate_random_hex;
///
/// let hex = generate_random_hex(16).unwrap();
/// assert_eq!(hex.len(), 32); // 16 bytes = 32 hex chars
/// ```
pub fn generate_random_hex(byte_length: usize) -> Result<String> {
    let bytes = generate_random_bytes(byte_length)?;
    Ok(hex_encode(&bytes))
}

/// 生成指定长度的 Base64 URL 安全随机字符串（不含填充）
///
/// # Example
///
/// ```rust
/// use guardrs::random::generate_random_base64_url;
///
/// let token = generate_random_base64_url(32).unwrap();
/// assert!(!token.contains('+'));
/// assert!(!token.contains('/'));
/// ```
pub fn generate_random_base64_url(byte_length: usize) -> Result<String> {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    let bytes = generate_random_bytes(byte_length)?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}

/// 生成指定位数的数字验证码
///
/// 首位可以为 0，输出总是左填充到指定位数。
///
/// # Example
///
/// ```rust
/// use guardrs::random::generate_numeric_code;
///
/// let code = generate_numeric_code(6);
/// assert_eq!(code.len(), 6);
/// assert!(code.chars().all(|c| c.is_ascii_digit()));
/// ```
pub fn generate_numeric_code(digits: usize) -> String {
    let max = 10u64.pow(digits as u32);
    let code = rand::rng().random_range(0..max);
    format!("{:0>width$}", code, width = digits)
}

/// 生成事件/告警 ID
///
/// 格式：`prefix_随机十六进制`
pub fn generate_id(prefix: &str) -> String {
    format!(
        "{}_{}",
        prefix,
        generate_random_hex(16).unwrap_or_else(|_| "unknown".to_string())
    )
}

/// 生成指定范围内的随机数
///
/// 返回 [min, max) 范围内的随机数
pub fn generate_random_in_range(min: u64, max: u64) -> u64 {
    rand::rng().random_range(min..max)
}

// ============================================================================
// 辅助函数
// ============================================================================

/// 将字节数组编码为十六进制字符串
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// 常量时间比较两个字节切片
///
/// 用于防止时序攻击
///
/// # Example
///
/// ```rust
/// use guardrs::random::constant_time_compare;
///
/// assert!(constant_time_compare(b"secret_token", b"secret_token"));
/// assert!(!constant_time_compare(b"secret_token", b"other_token!"));
/// ```
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// 常量时间比较两个字符串
pub fn constant_time_compare_str(a: &str, b: &str) -> bool {
    constant_time_compare(a.as_bytes(), b.as_bytes())
}

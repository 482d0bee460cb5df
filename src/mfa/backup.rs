//! 备用恢复码模块
//!
//! 提供一次性备用码的生成和确定性哈希。
//!
//! 与密码不同，备用码查找需要精确匹配，所以使用确定性的带密钥哈希
//! （HMAC-SHA256）而不是加盐的慢哈希：同一个码总是哈希到同一个值，
//! 但哈希密钥是部署专属的，泄露存储不会泄露备用码本身。
//!
//! 明文码只在生成时返回一次；存储中只保留哈希集合。
//!
//! ## 示例
//!
//! ```rust
//! use guardrs::mfa::backup::{BackupCodeConfig, BackupCodeGenerator};
//!
//! let generator = BackupCodeGenerator::new(
//!     BackupCodeConfig::default(),
//!     b"deployment-specific-hash-key".to_vec(),
//! );
//!
//! let set = generator.generate().unwrap();
//! assert_eq!(set.plain_codes.len(), 10);
//!
//! // 哈希是确定性的，可做精确匹配查找
//! let hash = generator.hash_code(&set.plain_codes[0]);
//! assert!(set.hashed_codes.contains(&hash));
//! ```

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashSet;

use crate::error::Result;
use crate::random::{generate_random_bytes, hex_encode};

/// 备用码生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeScheme {
    /// 随机字符（默认）
    #[default]
    Random,
    /// 顺序编号（前缀 + 序号），用于可审计的批次发放
    Sequential,
}

/// 备用码配置
#[derive(Debug, Clone)]
pub struct BackupCodeConfig {
    /// 生成的备用码数量
    pub count: usize,

    /// 每个码的字符数（不含分隔符）
    pub length: usize,

    /// 生成方式
    pub scheme: CodeScheme,
}

impl Default for BackupCodeConfig {
    fn default() -> Self {
        Self {
            count: 10,
            length: 8,
            scheme: CodeScheme::Random,
        }
    }
}

impl BackupCodeConfig {
    /// 创建新的配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置备用码数量
    pub fn with_count(mut self, count: usize) -> Self {
        assert!(
            count > 0 && count <= 20,
            "code count must be between 1 and 20"
        );
        self.count = count;
        self
    }

    /// 设置码长度
    pub fn with_length(mut self, length: usize) -> Self {
        assert!(
            (6..=16).contains(&length),
            "code length must be between 6 and 16"
        );
        self.length = length;
        self
    }

    /// 设置生成方式
    pub fn with_scheme(mut self, scheme: CodeScheme) -> Self {
        self.scheme = scheme;
        self
    }
}

/// 备用码集合
#[derive(Debug, Clone)]
pub struct BackupCodeSet {
    /// 明文备用码（仅在生成时返回一次，应立即展示给用户）
    pub plain_codes: Vec<String>,

    /// 哈希后的备用码（用于存储）
    pub hashed_codes: HashSet<String>,
}

/// 备用码生成器
#[derive(Clone)]
pub struct BackupCodeGenerator {
    config: BackupCodeConfig,
    hash_key: Vec<u8>,
}

impl std::fmt::Debug for BackupCodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 哈希密钥不进入日志
        f.debug_struct("BackupCodeGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BackupCodeGenerator {
    /// 创建新的备用码生成器
    ///
    /// `hash_key` 必须是部署专属的密钥，不能硬编码。
    pub fn new(config: BackupCodeConfig, hash_key: Vec<u8>) -> Self {
        assert!(!hash_key.is_empty(), "hash key must not be empty");
        Self { config, hash_key }
    }

    /// 生成备用码集合
    pub fn generate(&self) -> Result<BackupCodeSet> {
        let mut plain_codes = Vec::with_capacity(self.config.count);
        let mut seen = HashSet::new();

        match self.config.scheme {
            CodeScheme::Random => {
                while plain_codes.len() < self.config.count {
                    let code = self.random_code()?;
                    if seen.insert(code.clone()) {
                        plain_codes.push(code);
                    }
                }
            }
            CodeScheme::Sequential => {
                let batch = generate_random_bytes(4)?;
                let prefix = hex_encode(&batch).to_uppercase();
                for index in 1..=self.config.count {
                    plain_codes.push(format!(
                        "{}-{:0width$}",
                        prefix,
                        index,
                        width = self.config.length.saturating_sub(prefix.len() + 1).max(2)
                    ));
                }
            }
        }

        let hashed_codes = plain_codes.iter().map(|c| self.hash_code(c)).collect();

        Ok(BackupCodeSet {
            plain_codes,
            hashed_codes,
        })
    }

    /// 计算备用码的确定性带密钥哈希
    ///
    /// 同一个码（规范化后）总是产生同一个哈希，保证精确匹配查找可用。
    pub fn hash_code(&self, code: &str) -> String {
        let normalized = normalize_code(code);
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.hash_key)
            .expect("HMAC accepts any key length");
        mac.update(normalized.as_bytes());
        hex_encode(&mac.finalize().into_bytes())
    }

    /// 获取配置
    pub fn config(&self) -> &BackupCodeConfig {
        &self.config
    }

    // ========================================================================
    // 内部方法
    // ========================================================================

    /// 生成单个随机备用码
    fn random_code(&self) -> Result<String> {
        // 使用的字符集（排除易混淆字符: 0, O, I, l, 1）
        const CHARSET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

        let bytes = generate_random_bytes(self.config.length)?;
        let mut code = String::with_capacity(self.config.length + 1);

        for (i, byte) in bytes.iter().enumerate() {
            // 中间加分隔符便于抄写
            if i > 0 && i * 2 == self.config.length {
                code.push('-');
            }
            let idx = (*byte as usize) % CHARSET.len();
            code.push(CHARSET[idx] as char);
        }

        Ok(code)
    }
}

/// 规范化备用码（移除分隔符和空格，转为大写）
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> BackupCodeGenerator {
        BackupCodeGenerator::new(BackupCodeConfig::default(), b"test-hash-key".to_vec())
    }

    #[test]
    fn test_config_default() {
        let config = BackupCodeConfig::default();
        assert_eq!(config.count, 10);
        assert_eq!(config.length, 8);
        assert_eq!(config.scheme, CodeScheme::Random);
    }

    #[test]
    fn test_config_builder() {
        let config = BackupCodeConfig::new()
            .with_count(8)
            .with_length(10)
            .with_scheme(CodeScheme::Sequential);

        assert_eq!(config.count, 8);
        assert_eq!(config.length, 10);
        assert_eq!(config.scheme, CodeScheme::Sequential);
    }

    #[test]
    fn test_generate_set() {
        let set = generator().generate().unwrap();

        assert_eq!(set.plain_codes.len(), 10);
        assert_eq!(set.hashed_codes.len(), 10);

        // 明文码格式: 4 字符 + '-' + 4 字符
        for code in &set.plain_codes {
            assert_eq!(code.len(), 9);
            assert!(code.contains('-'));
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let set = generator().generate().unwrap();
        let unique: HashSet<_> = set.plain_codes.iter().collect();
        assert_eq!(unique.len(), set.plain_codes.len());
    }

    #[test]
    fn test_hash_is_deterministic() {
        let generator = generator();
        let a = generator.hash_code("ABCD-EFGH");
        let b = generator.hash_code("ABCD-EFGH");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_normalizes_input() {
        let generator = generator();
        // 大小写和分隔符不影响哈希
        assert_eq!(
            generator.hash_code("abcd-efgh"),
            generator.hash_code("ABCDEFGH")
        );
        assert_eq!(
            generator.hash_code("ABCD EFGH"),
            generator.hash_code("ABCD-EFGH")
        );
    }

    #[test]
    fn test_hash_depends_on_key() {
        let a = BackupCodeGenerator::new(BackupCodeConfig::default(), b"key-one".to_vec());
        let b = BackupCodeGenerator::new(BackupCodeConfig::default(), b"key-two".to_vec());

        assert_ne!(a.hash_code("ABCD-EFGH"), b.hash_code("ABCD-EFGH"));
    }

    #[test]
    fn test_generated_hashes_match_plain_codes() {
        let generator = generator();
        let set = generator.generate().unwrap();

        for code in &set.plain_codes {
            assert!(set.hashed_codes.contains(&generator.hash_code(code)));
        }
    }

    #[test]
    fn test_sequential_scheme() {
        let generator = BackupCodeGenerator::new(
            BackupCodeConfig::default()
                .with_scheme(CodeScheme::Sequential)
                .with_count(5)
                .with_length(12),
            b"test-hash-key".to_vec(),
        );
        let set = generator.generate().unwrap();

        assert_eq!(set.plain_codes.len(), 5);
        // 同一批次共享前缀
        let prefix: Vec<_> = set
            .plain_codes
            .iter()
            .map(|c| c.split('-').next().unwrap().to_string())
            .collect();
        assert!(prefix.iter().all(|p| p == &prefix[0]));
    }

    #[test]
    fn test_no_confusing_characters() {
        let set = generator().generate().unwrap();

        let confusing = ['0', 'O', 'I', 'l', '1'];
        for code in &set.plain_codes {
            for ch in confusing {
                assert!(
                    !code.contains(ch),
                    "Code {} contains confusing character {}",
                    code,
                    ch
                );
            }
        }
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("abcd-efgh"), "ABCDEFGH");
        assert_eq!(normalize_code(" AB CD "), "ABCD");
    }

    #[test]
    #[should_panic(expected = "code count must be between 1 and 20")]
    fn test_invalid_count() {
        BackupCodeConfig::default().with_count(0);
    }

    #[test]
    #[should_panic(expected = "hash key must not be empty")]
    fn test_empty_hash_key() {
        BackupCodeGenerator::new(BackupCodeConfig::default(), Vec::new());
    }
}

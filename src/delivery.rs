//! 外部协作者接口模块
//!
//! 定义本库消费、由宿主实现的两个外部协作接口：
//!
//! - **Delivery**: 短信/邮件挑战码的带外投递
//! - **Notifier**: 高危告警的推送（webhook/邮件/IM）
//!
//! 两者都是外部高延迟操作，因此是 async 接口。投递失败不会破坏
//! 挑战状态（挑战保持有效可重发）；告警推送失败只记录诊断日志，
//! 不由本库重试。
//!
//! 内存实现用于测试和开发环境。

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

use crate::audit::alert::SecurityAlert;
use crate::error::{DeliveryError, Error, Result};

// ============================================================================
// 挑战投递
// ============================================================================

/// 投递目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// 短信（手机号）
    Sms(String),
    /// 邮件（邮箱地址）
    Email(String),
}

impl Destination {
    /// 获取目标地址
    pub fn address(&self) -> &str {
        match self {
            Destination::Sms(number) => number,
            Destination::Email(address) => address,
        }
    }
}

/// 待投递的挑战消息
#[derive(Debug, Clone)]
pub struct ChallengeMessage {
    /// 一次性验证码
    pub code: String,
    /// 剩余有效秒数
    pub ttl_seconds: i64,
}

/// 投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// 传输层是否接受了该消息
    pub accepted: bool,
    /// 传输层返回的消息标识（如果有）
    pub provider_ref: Option<String>,
}

/// 挑战投递 trait
///
/// 实现此 trait 以对接真实的短信/邮件网关。
#[async_trait]
pub trait Delivery: Send + Sync {
    /// 投递一条挑战消息
    async fn send(
        &self,
        destination: &Destination,
        message: &ChallengeMessage,
    ) -> Result<DeliveryOutcome>;
}

/// 内存投递实现
///
/// 捕获所有发出的消息供测试断言，可配置为失败。
#[derive(Debug, Default)]
pub struct InMemoryDelivery {
    sent: Arc<RwLock<Vec<(Destination, ChallengeMessage)>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryDelivery {
    /// 创建新的内存投递
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置后续投递是否失败
    pub fn set_failing(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    /// 获取已发送的消息
    pub fn sent(&self) -> Vec<(Destination, ChallengeMessage)> {
        self.sent.read().unwrap().clone()
    }

    /// 获取最后一条发送的验证码
    pub fn last_code(&self) -> Option<String> {
        self.sent
            .read()
            .unwrap()
            .last()
            .map(|(_, m)| m.code.clone())
    }

    /// 已发送消息数量
    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }
}

impl Clone for InMemoryDelivery {
    fn clone(&self) -> Self {
        Self {
            sent: Arc::clone(&self.sent),
            fail: Arc::clone(&self.fail),
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    async fn send(
        &self,
        destination: &Destination,
        message: &ChallengeMessage,
    ) -> Result<DeliveryOutcome> {
        if *self.fail.read().unwrap() {
            return Err(Error::Delivery(DeliveryError::SendFailed(
                "simulated transport failure".to_string(),
            )));
        }

        self.sent
            .write()
            .unwrap()
            .push((destination.clone(), message.clone()));

        Ok(DeliveryOutcome {
            accepted: true,
            provider_ref: None,
        })
    }
}

// ============================================================================
// 告警推送
// ============================================================================

/// 告警推送 trait
///
/// 实现此 trait 以对接 webhook、邮件或 IM 通道。
/// 仅 HIGH/CRITICAL 告警会进入推送队列。
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 推送一条安全告警
    async fn notify(&self, alert: &SecurityAlert) -> Result<()>;
}

/// 内存告警推送实现
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    notified: Arc<RwLock<Vec<SecurityAlert>>>,
    fail: Arc<RwLock<bool>>,
}

impl InMemoryNotifier {
    /// 创建新的内存推送器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置后续推送是否失败
    pub fn set_failing(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    /// 获取已推送的告警
    pub fn notified(&self) -> Vec<SecurityAlert> {
        self.notified.read().unwrap().clone()
    }

    /// 已推送告警数量
    pub fn notified_count(&self) -> usize {
        self.notified.read().unwrap().len()
    }
}

impl Clone for InMemoryNotifier {
    fn clone(&self) -> Self {
        Self {
            notified: Arc::clone(&self.notified),
            fail: Arc::clone(&self.fail),
        }
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, alert: &SecurityAlert) -> Result<()> {
        if *self.fail.read().unwrap() {
            return Err(Error::internal("simulated notification failure"));
        }
        self.notified.write().unwrap().push(alert.clone());
        Ok(())
    }
}

//! 时钟抽象模块
//!
//! 挑战 TTL、滑动窗口和保留期清理都依赖当前时间。通过注入 `Clock`
//! 而不是直接调用壁钟，测试可以确定性地控制时间推进。

use chrono::{DateTime, Duration, Utc};
use std::sync::RwLock;

/// 时钟 trait
pub trait Clock: Send + Sync {
    /// 获取当前 UTC 时间
    fn now(&self) -> DateTime<Utc>;

    /// 获取当前 Unix 时间戳（秒）
    fn unix_timestamp(&self) -> u64 {
        self.now().timestamp().max(0) as u64
    }
}

/// 系统时钟（默认实现）
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// 创建新的系统时钟
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动时钟
///
/// 用于测试，时间只在显式调用 `advance`/`set` 时变化。
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// 以指定时间创建手动时钟
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// 以当前系统时间创建手动时钟
    pub fn from_system() -> Self {
        Self::starting_at(Utc::now())
    }

    /// 推进时间
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap();
        *now += by;
    }

    /// 设置时间
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::from_system();
        let start = clock.now();

        clock.advance(Duration::minutes(10));
        assert_eq!(clock.now(), start + Duration::minutes(10));

        // 时间不会自己流逝
        assert_eq!(clock.now(), start + Duration::minutes(10));
    }

    #[test]
    fn test_manual_clock_set() {
        let clock = ManualClock::from_system();
        let target = clock.now() - Duration::days(30);

        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_unix_timestamp() {
        let clock = SystemClock::new();
        assert!(clock.unix_timestamp() > 1_600_000_000);
    }
}

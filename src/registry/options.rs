//! 注册引擎配置

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// 租约 TTL 环境变量（秒）
pub const ENV_LEASE_TTL: &str = "REGISTRY_LEASE_TTL";
/// 心跳间隔环境变量（秒）
pub const ENV_HEARTBEAT_INTERVAL: &str = "REGISTRY_HEARTBEAT_INTERVAL";
/// 连续心跳失败上限环境变量
pub const ENV_MAX_HEARTBEAT_FAILURES: &str = "REGISTRY_MAX_HEARTBEAT_FAILURES";

/// 重复注册策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// 返回 `AlreadyRegistered`
    #[default]
    Reject,
    /// 停止旧心跳并用新描述符重新写入
    Replace,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reject" => Ok(DuplicatePolicy::Reject),
            "replace" => Ok(DuplicatePolicy::Replace),
            _ => Err(format!("Unknown duplicate policy: {}", s)),
        }
    }
}

/// 注册引擎配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// 租约 TTL
    pub lease_ttl: Duration,
    /// 正常心跳间隔，必须小于 `lease_ttl`
    pub heartbeat_interval: Duration,
    /// 心跳失败后下次重试的等待时间
    pub retry_delay: Duration,
    /// put/delete/query 单次调用超时
    pub call_timeout: Duration,
    /// 单次续约超时
    pub renew_timeout: Duration,
    /// 连续心跳失败多少次后放弃（`None` 表示一直重试直到注销）
    pub max_consecutive_failures: Option<u32>,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(5),
            retry_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(3),
            renew_timeout: Duration::from_secs(2),
            max_consecutive_failures: None,
            duplicate_policy: DuplicatePolicy::Reject,
        }
    }
}

impl EngineOptions {
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_renew_timeout(mut self, timeout: Duration) -> Self {
        self.renew_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: Option<u32>) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// 默认配置叠加环境变量
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// 从环境变量覆盖配置，无法解析的值忽略并告警
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_LEASE_TTL) {
            self.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_HEARTBEAT_INTERVAL) {
            self.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<u32>(&lookup, ENV_MAX_HEARTBEAT_FAILURES) {
            self.max_consecutive_failures = (max > 0).then_some(max);
        }
        self
    }

    /// 修正不合理的组合
    ///
    /// - 心跳间隔必须严格小于 TTL，否则取 TTL 的三分之一
    /// - 续约超时必须小于心跳间隔，否则取心跳间隔的一半
    /// - 所有时长至少 1ms
    pub fn normalized(mut self) -> Self {
        let min = Duration::from_millis(1);
        self.lease_ttl = self.lease_ttl.max(Duration::from_secs(1));
        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lease_ttl {
            let fallback = (self.lease_ttl / 3).max(min);
            warn!(
                interval = ?self.heartbeat_interval,
                ttl = ?self.lease_ttl,
                fallback = ?fallback,
                "⚠️ Heartbeat interval must be shorter than lease TTL, using fallback"
            );
            self.heartbeat_interval = fallback;
        }
        if self.renew_timeout >= self.heartbeat_interval {
            self.renew_timeout = (self.heartbeat_interval / 2).max(min);
        }
        self.retry_delay = self.retry_delay.max(min);
        self.call_timeout = self.call_timeout.max(min);
        self.renew_timeout = self.renew_timeout.max(min);
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "⚠️ Ignoring unparsable environment override");
            None
        }
    }
}

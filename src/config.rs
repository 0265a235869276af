use crate::discovery::config::DiscoveryConfig;
use crate::error::{RegistryError, Result};
use crate::registry::options::{DuplicatePolicy, EngineOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 注册中心配置文件
///
/// ```toml
/// [discovery]
/// backend = "etcd"
/// namespace = "hertz/registry-etcd"
/// backend_config = { endpoints = ["http://127.0.0.1:2379"] }
///
/// [engine]
/// lease_ttl_secs = 60
/// heartbeat_interval_secs = 5
/// duplicate_policy = "reject"
///
/// [logging]
/// filter = "info,flare_registry_core=debug"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 引擎配置（未设置的项使用默认值）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    pub lease_ttl_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub renew_timeout_ms: Option<u64>,
    /// 0 表示一直重试
    pub max_consecutive_failures: Option<u32>,
    pub duplicate_policy: Option<DuplicatePolicy>,
}

impl EngineConfig {
    pub fn to_options(&self) -> EngineOptions {
        let mut options = EngineOptions::default();
        if let Some(secs) = self.lease_ttl_secs {
            options.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            options.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.retry_delay_ms {
            options.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.call_timeout_ms {
            options.call_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.renew_timeout_ms {
            options.renew_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_consecutive_failures {
            options.max_consecutive_failures = (max > 0).then_some(max);
        }
        if let Some(policy) = self.duplicate_policy {
            options.duplicate_policy = policy;
        }
        options
    }
}

/// 日志配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` 语法，未设置时读取 `RUST_LOG`，再回退到 `info`
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
}

impl RegistryConfig {
    pub fn new(discovery: DiscoveryConfig) -> Self {
        Self {
            discovery,
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RegistryError::config(e.to_string()))
    }

    /// 文件配置叠加环境变量后的引擎配置
    pub fn engine_options(&self) -> EngineOptions {
        self.engine.to_options().apply_env()
    }
}

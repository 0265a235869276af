//! 服务发现配置

use crate::discovery::resolver::ResolverOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务发现配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// 后端类型：etcd, consul, eureka, redis, memory
    pub backend: BackendType,

    /// 后端特定配置
    ///
    /// - etcd: `endpoints`（数组）、`username`、`password`、`connect_timeout_secs`
    /// - consul: `url`、`token`、`passing_only`、`deregister_critical_after_secs`
    /// - eureka: `servers`（数组）、`username`、`password`、`metadata_key`
    /// - redis: `url`、`scan_count`
    #[serde(default)]
    pub backend_config: HashMap<String, serde_json::Value>,

    /// 命名空间（etcd/redis/memory 的键前缀）
    #[serde(default)]
    pub namespace: Option<String>,

    /// 解析器配置
    #[serde(default)]
    pub resolver: ResolverOptions,
}

impl DiscoveryConfig {
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            backend_config: HashMap::new(),
            namespace: None,
            resolver: ResolverOptions::default(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.backend_config.insert(key.into(), value);
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub(crate) fn str_option(&self, key: &str) -> Option<String> {
        self.backend_config
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }

    /// 字符串数组；单个字符串也接受，按逗号拆分
    pub(crate) fn list_option(&self, key: &str) -> Option<Vec<String>> {
        match self.backend_config.get(key)? {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            serde_json::Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }

    pub(crate) fn u64_option(&self, key: &str) -> Option<u64> {
        self.backend_config.get(key).and_then(|v| v.as_u64())
    }

    pub(crate) fn bool_option(&self, key: &str) -> Option<bool> {
        self.backend_config.get(key).and_then(|v| v.as_bool())
    }

    /// 用户名和密码同时配置时才生效
    pub(crate) fn credentials(&self) -> Option<(String, String)> {
        Some((self.str_option("username")?, self.str_option("password")?))
    }
}

/// 后端类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Etcd,
    Consul,
    Eureka,
    Redis,
    Memory,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Etcd => "etcd",
            BackendType::Consul => "consul",
            BackendType::Eureka => "eureka",
            BackendType::Redis => "redis",
            BackendType::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "etcd" => Ok(BackendType::Etcd),
            "consul" => Ok(BackendType::Consul),
            "eureka" => Ok(BackendType::Eureka),
            "redis" => Ok(BackendType::Redis),
            "memory" | "mem" => Ok(BackendType::Memory),
            _ => Err(format!("Unknown backend type: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_type_parses_case_insensitively() {
        assert_eq!("ETCD".parse::<BackendType>(), Ok(BackendType::Etcd));
        assert_eq!("mem".parse::<BackendType>(), Ok(BackendType::Memory));
        assert!("zookeeper".parse::<BackendType>().is_err());
    }

    #[test]
    fn list_option_accepts_array_or_csv() {
        let config = DiscoveryConfig::new(BackendType::Etcd)
            .with_option("endpoints", serde_json::json!(["http://a:2379", "http://b:2379"]))
            .with_option("servers", serde_json::json!("http://x/eureka, http://y/eureka"));
        assert_eq!(config.list_option("endpoints").map(|v| v.len()), Some(2));
        assert_eq!(
            config.list_option("servers"),
            Some(vec!["http://x/eureka".to_string(), "http://y/eureka".to_string()])
        );
        assert_eq!(config.list_option("missing"), None);
    }
}

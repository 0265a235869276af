//! 服务发现工厂
//!
//! 按配置创建后端，并构建共享同一后端的注册引擎和解析器

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::config::RegistryConfig;
use crate::discovery::backend::{LeaseBackend, MemoryBackend};
use crate::discovery::config::{BackendType, DiscoveryConfig};
use crate::discovery::resolver::BackendResolver;
use crate::error::{RegistryError, Result};
use crate::registry::{EngineOptions, RegistrationEngine};

/// 服务发现工厂
pub struct DiscoveryFactory;

impl DiscoveryFactory {
    /// 从配置创建注册后端
    pub async fn create_backend(config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        let backend: Arc<dyn LeaseBackend> = match config.backend {
            BackendType::Etcd => Self::etcd(config).await?,
            BackendType::Consul => Self::consul(config)?,
            BackendType::Eureka => Self::eureka(config)?,
            BackendType::Redis => Self::redis(config).await?,
            BackendType::Memory => match &config.namespace {
                Some(namespace) => Arc::new(MemoryBackend::with_namespace(namespace.clone())),
                None => Arc::new(MemoryBackend::new()),
            },
        };

        info!(
            backend = %backend.name(),
            namespace = ?backend.namespace(),
            "✅ Registry backend created"
        );
        Ok(backend)
    }

    /// 从完整配置创建注册引擎和解析器
    ///
    /// 引擎配置会叠加 `REGISTRY_*` 环境变量
    pub async fn create(config: &RegistryConfig) -> Result<(RegistrationEngine, BackendResolver)> {
        let backend = Self::create_backend(&config.discovery).await?;
        Ok(Self::from_backend(
            backend,
            config.engine_options(),
            config.discovery.resolver.clone(),
        ))
    }

    /// 使用已有后端构建引擎和解析器
    pub fn from_backend(
        backend: Arc<dyn LeaseBackend>,
        options: EngineOptions,
        resolver: crate::discovery::resolver::ResolverOptions,
    ) -> (RegistrationEngine, BackendResolver) {
        let engine = RegistrationEngine::new(backend.clone(), options);
        let resolver = BackendResolver::new(backend, resolver);
        (engine, resolver)
    }

    /// 使用默认配置创建
    ///
    /// # 参数
    /// * `backend_type` - 后端类型
    /// * `backend_endpoints` - 后端地址列表（etcd endpoints、consul/redis url、eureka servers）
    ///
    /// # 默认配置
    /// - TTL：60 秒（可通过 `REGISTRY_LEASE_TTL` 调整）
    /// - 心跳间隔：5 秒（可通过 `REGISTRY_HEARTBEAT_INTERVAL` 调整）
    /// - 心跳失败：一直重试（可通过 `REGISTRY_MAX_HEARTBEAT_FAILURES` 设置上限）
    pub async fn create_with_defaults(
        backend_type: BackendType,
        backend_endpoints: Vec<String>,
    ) -> Result<(RegistrationEngine, BackendResolver)> {
        let mut config = DiscoveryConfig::new(backend_type);
        match backend_type {
            BackendType::Etcd => {
                config = config.with_option("endpoints", json!(backend_endpoints));
            }
            BackendType::Eureka => {
                config = config.with_option("servers", json!(backend_endpoints));
            }
            BackendType::Consul | BackendType::Redis => {
                if let Some(url) = backend_endpoints.first() {
                    config = config.with_option("url", json!(url));
                }
            }
            BackendType::Memory => {}
        }

        Self::create(&RegistryConfig::new(config)).await
    }

    #[cfg(feature = "etcd")]
    async fn etcd(config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        use crate::discovery::backend::{EtcdBackend, EtcdOptions};

        let defaults = EtcdOptions::default();
        let options = EtcdOptions {
            endpoints: config
                .list_option("endpoints")
                .unwrap_or(defaults.endpoints),
            namespace: config.namespace.clone().unwrap_or(defaults.namespace),
            credentials: config.credentials(),
            connect_timeout: config
                .u64_option("connect_timeout_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            request_timeout: config
                .u64_option("request_timeout_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        let backend = EtcdBackend::connect(options)
            .await
            .map_err(|e| RegistryError::backend(crate::error::Operation::Connect, "etcd", e))?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "etcd"))]
    async fn etcd(_config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        Err(RegistryError::config("etcd backend is not enabled"))
    }

    #[cfg(feature = "consul")]
    fn consul(config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        use crate::discovery::backend::{ConsulBackend, ConsulOptions};

        let defaults = ConsulOptions::default();
        let options = ConsulOptions {
            url: config.str_option("url").unwrap_or(defaults.url),
            token: config.str_option("token"),
            passing_only: config
                .bool_option("passing_only")
                .unwrap_or(defaults.passing_only),
            deregister_critical_after: config
                .u64_option("deregister_critical_after_secs")
                .map(Duration::from_secs)
                .unwrap_or(defaults.deregister_critical_after),
        };
        Ok(Arc::new(ConsulBackend::new(options)))
    }

    #[cfg(not(feature = "consul"))]
    fn consul(_config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        Err(RegistryError::config("consul backend is not enabled"))
    }

    #[cfg(feature = "eureka")]
    fn eureka(config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        use crate::discovery::backend::{EurekaBackend, EurekaOptions};

        let defaults = EurekaOptions::default();
        let servers = config.list_option("servers").unwrap_or(defaults.servers);
        if servers.is_empty() {
            return Err(RegistryError::config("eureka servers not configured"));
        }
        let options = EurekaOptions {
            servers,
            credentials: config.credentials(),
            metadata_key: config
                .str_option("metadata_key")
                .unwrap_or(defaults.metadata_key),
        };
        Ok(Arc::new(EurekaBackend::new(options)))
    }

    #[cfg(not(feature = "eureka"))]
    fn eureka(_config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        Err(RegistryError::config("eureka backend is not enabled"))
    }

    #[cfg(feature = "redis")]
    async fn redis(config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        use crate::discovery::backend::{RedisBackend, RedisOptions};

        let defaults = RedisOptions::default();
        let options = RedisOptions {
            url: config.str_option("url").unwrap_or(defaults.url),
            namespace: config.namespace.clone().unwrap_or(defaults.namespace),
            scan_count: config
                .u64_option("scan_count")
                .and_then(|n| usize::try_from(n).ok())
                .unwrap_or(defaults.scan_count),
        };
        let backend = RedisBackend::connect(options)
            .await
            .map_err(|e| RegistryError::backend(crate::error::Operation::Connect, "redis", e))?;
        Ok(Arc::new(backend))
    }

    #[cfg(not(feature = "redis"))]
    async fn redis(_config: &DiscoveryConfig) -> Result<Arc<dyn LeaseBackend>> {
        Err(RegistryError::config("redis backend is not enabled"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::resolver::Resolver;

    #[tokio::test]
    async fn memory_backend_from_config() {
        let config = DiscoveryConfig::new(BackendType::Memory).with_namespace("tests");
        let backend = DiscoveryFactory::create_backend(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert_eq!(backend.namespace(), Some("tests"));
    }

    #[tokio::test]
    async fn engine_and_resolver_share_backend() {
        let (engine, resolver) =
            DiscoveryFactory::create_with_defaults(BackendType::Memory, vec![])
                .await
                .unwrap();
        assert_eq!(engine.backend().name(), "memory");
        assert_eq!(resolver.name(), "memory:registry");
    }
}

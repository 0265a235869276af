//! 注册后端抽象和实现
//!
//! 每个后端只需要提供四个带租约语义的原语，心跳、自愈和超时都由引擎统一处理

#[cfg(feature = "consul")]
pub mod consul;
#[cfg(feature = "etcd")]
pub mod etcd;
#[cfg(feature = "eureka")]
pub mod eureka;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "consul")]
pub use consul::{ConsulBackend, ConsulOptions};
#[cfg(feature = "etcd")]
pub use etcd::{EtcdBackend, EtcdOptions};
#[cfg(feature = "eureka")]
pub use eureka::{EurekaBackend, EurekaOptions};
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::{RedisBackend, RedisOptions};

use crate::error::{BackendResult, Operation, RegistryError, Result};
use crate::registry::key::InstanceKey;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// 租约令牌
///
/// 不同后端的"租约"含义不同：etcd 有真正的租约 ID，
/// consul/eureka/redis 是按 TTL 续期的键
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseToken {
    /// 后端分配的租约 ID（etcd、内存后端）
    Lease(i64),
    /// 以 TTL 维持的条目（consul TTL 检查、eureka 续约、redis EXPIRE）
    Ttl(Duration),
}

/// 续约结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// 租约仍然有效
    Alive,
    /// 租约已在服务端失效，需要重新写入
    Expired,
}

/// 查询返回的原始条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// 服务内的实例 ID
    pub id: String,
    /// 编码后的实例记录
    pub value: Vec<u8>,
    /// 后端自身的健康判断（没有健康概念的后端始终为 true）
    pub healthy: bool,
}

impl RawEntry {
    pub fn new(id: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            value,
            healthy: true,
        }
    }
}

/// 带租约语义的后端原语
///
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// 后端名称，用于日志和解析器名称
    fn name(&self) -> &str;

    /// 后端命名空间
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// 写入实例记录并绑定一个 `ttl` 的租约
    async fn put_with_lease(
        &self,
        key: &InstanceKey,
        value: &[u8],
        ttl: Duration,
    ) -> BackendResult<LeaseToken>;

    /// 续约一次
    ///
    /// 租约在服务端已经失效时返回 `Ok(Renewal::Expired)`，
    /// 网络错误等瞬时失败返回 `Err`
    async fn renew(&self, key: &InstanceKey, lease: &LeaseToken) -> BackendResult<Renewal>;

    /// 删除实例记录，条目不存在也视为成功
    async fn delete(&self, key: &InstanceKey) -> BackendResult<()>;

    /// 查询服务下的全部条目
    ///
    /// 服务不存在时返回空列表，后端明确报告"应用不存在"时返回 `BackendError::NotFound`
    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>>;
}

/// 检查 HTTP 响应状态，非 2xx 转换为 `BackendError`
#[cfg(any(feature = "consul", feature = "eureka"))]
pub(crate) async fn ensure_success(resp: reqwest::Response) -> BackendResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(crate::error::BackendError::Auth(body)),
        404 => Err(crate::error::BackendError::NotFound(body)),
        code if status.is_server_error() => Err(crate::error::BackendError::Unavailable(format!(
            "status {code}: {body}"
        ))),
        code => Err(crate::error::BackendError::Rejected { status: code, body }),
    }
}

/// 以调用超时执行一个后端原语，并把错误包装成 `RegistryError`
pub(crate) async fn call_with_timeout<T, F>(
    op: Operation,
    key: &str,
    after: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(RegistryError::backend(op, key, source)),
        Err(_) => Err(RegistryError::timeout(op, key, after)),
    }
}

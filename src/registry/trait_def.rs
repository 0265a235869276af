//! 服务注册 Trait 定义

use crate::error::Result;
use crate::types::ServiceDescriptor;
use async_trait::async_trait;
use std::sync::Arc;

/// 服务注册 Trait
///
/// `register` 返回时实例已经写入后端并开始心跳；
/// `deregister` 返回时心跳已经停止
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册服务实例
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, descriptor: &ServiceDescriptor) -> Result<()>;
}

/// 共享的注册器
pub type SharedRegistry = Arc<dyn Registry>;

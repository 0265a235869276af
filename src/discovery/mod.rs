//! 服务发现模块
//!
//! 后端原语、实例记录编解码、解析器、注册通知，以及按配置构建这些组件的工厂

pub mod backend;
pub mod codec;
pub mod config;
pub mod factory;
pub mod resolver;
pub mod watch;

pub use backend::{LeaseBackend, LeaseToken, MemoryBackend, RawEntry, Renewal};
pub use codec::InstanceRecord;
pub use config::{BackendType, DiscoveryConfig};
pub use factory::DiscoveryFactory;
pub use resolver::{BackendResolver, Resolver, ResolverOptions, TargetMode};
pub use watch::{Notification, NotificationKind, ServiceTable};

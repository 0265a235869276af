//! Flare Registry Core Library
//!
//! Lease/heartbeat managed service registration and discovery over etcd, redis,
//! consul and eureka, with an in-memory backend for tests.
//!
//! ```no_run
//! use flare_registry_core::{BackendType, DiscoveryFactory, Resolver, ServiceDescriptor};
//!
//! # async fn run() -> flare_registry_core::Result<()> {
//! let (engine, resolver) =
//!     DiscoveryFactory::create_with_defaults(BackendType::Etcd, vec!["http://127.0.0.1:2379".into()])
//!         .await?;
//!
//! let descriptor = ServiceDescriptor::new("echo", ":8888").with_tag("idc", "hd1");
//! engine.register(&descriptor).await?;
//!
//! let result = resolver.resolve("echo").await?;
//! println!("{:?}", result.instances);
//!
//! engine.deregister(&descriptor).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod registry;
pub mod types;
pub mod utils;

// Re-exports
pub use config::{EngineConfig, LoggingConfig, RegistryConfig};
pub use discovery::{
    BackendResolver, BackendType, DiscoveryConfig, DiscoveryFactory, InstanceRecord, LeaseBackend,
    LeaseToken, MemoryBackend, Notification, NotificationKind, RawEntry, Renewal, Resolver,
    ResolverOptions, ServiceTable, TargetMode,
};
pub use error::{
    BackendError, BackendResult, CodecError, ErrorCategory, ErrorCode, Operation, RegistryError,
    Result,
};
pub use registry::{
    DuplicatePolicy, EngineOptions, InstanceKey, RegistrationEngine, RegistrationInfo, Registry,
    SharedRegistry,
};
pub use types::{
    DEFAULT_NETWORK, DEFAULT_WEIGHT, ResolveResult, ResolvedInstance, ServiceDescriptor, TargetInfo,
};
pub use utils::{InterfaceIpResolver, IpResolver};

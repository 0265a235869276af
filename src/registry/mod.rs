//! 服务注册模块
//!
//! 注册引擎负责把实例写入后端并用心跳维持租约，
//! 后端只需实现 `LeaseBackend` 中的四个原语

pub mod engine;
mod heartbeat;
pub mod key;
pub mod options;
pub mod trait_def;

pub use engine::{RegistrationEngine, RegistrationInfo};
pub use key::InstanceKey;
pub use options::{DuplicatePolicy, EngineOptions};
pub use trait_def::{Registry, SharedRegistry};

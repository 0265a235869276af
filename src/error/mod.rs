//! Flare Registry Core 错误处理模块
//!
//! 提供统一的错误类型和错误代码分类，后端原语错误与引擎错误分层表示

pub mod code;
pub mod registry_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use registry_error::{
    BackendError, BackendResult, CodecError, Operation, RegistryError, Result,
};

//! 错误代码和错误类别定义
//!
//! 注册中心只关心五类错误，每个类别占用1000个代码范围

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组：
/// - 1000-1999: 参数校验错误（描述符、地址、端口）
/// - 2000-2999: 本地注册状态冲突
/// - 3000-3999: 后端错误（网络、超时、拒绝）
/// - 4000-4999: 实例编解码错误
/// - 5000-5999: 配置与内部错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 参数校验错误 (1000-1999)
    // ============================================================
    InvalidDescriptor = 1000,
    InvalidPort = 1001,
    NoLocalAddress = 1002,

    // ============================================================
    // 注册状态错误 (2000-2999)
    // ============================================================
    AlreadyRegistered = 2000,
    NotRegistered = 2001,
    ServiceNotFound = 2002,

    // ============================================================
    // 后端错误 (3000-3999)
    // ============================================================
    BackendUnavailable = 3000,
    BackendTimeout = 3001,
    BackendRejected = 3002,
    BackendProtocolError = 3003,
    AuthenticationFailed = 3004,

    // ============================================================
    // 编解码错误 (4000-4999)
    // ============================================================
    EncodingError = 4000,
    DecodingError = 4001,

    // ============================================================
    // 配置与内部错误 (5000-5999)
    // ============================================================
    ConfigurationError = 5000,
    InternalError = 5001,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::InvalidDescriptor),
            1001 => Some(ErrorCode::InvalidPort),
            1002 => Some(ErrorCode::NoLocalAddress),
            2000 => Some(ErrorCode::AlreadyRegistered),
            2001 => Some(ErrorCode::NotRegistered),
            2002 => Some(ErrorCode::ServiceNotFound),
            3000 => Some(ErrorCode::BackendUnavailable),
            3001 => Some(ErrorCode::BackendTimeout),
            3002 => Some(ErrorCode::BackendRejected),
            3003 => Some(ErrorCode::BackendProtocolError),
            3004 => Some(ErrorCode::AuthenticationFailed),
            4000 => Some(ErrorCode::EncodingError),
            4001 => Some(ErrorCode::DecodingError),
            5000 => Some(ErrorCode::ConfigurationError),
            5001 => Some(ErrorCode::InternalError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidDescriptor => "INVALID_DESCRIPTOR",
            ErrorCode::InvalidPort => "INVALID_PORT",
            ErrorCode::NoLocalAddress => "NO_LOCAL_ADDRESS",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::NotRegistered => "NOT_REGISTERED",
            ErrorCode::ServiceNotFound => "SERVICE_NOT_FOUND",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::BackendTimeout => "BACKEND_TIMEOUT",
            ErrorCode::BackendRejected => "BACKEND_REJECTED",
            ErrorCode::BackendProtocolError => "BACKEND_PROTOCOL_ERROR",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::EncodingError => "ENCODING_ERROR",
            ErrorCode::DecodingError => "DECODING_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// 获取错误代码的类别
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Validation,
            2000..=2999 => ErrorCategory::State,
            3000..=3999 => ErrorCategory::Backend,
            4000..=4999 => ErrorCategory::Codec,
            _ => ErrorCategory::System,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 只有瞬时的后端错误值得调用方重试，校验和状态冲突重试也不会成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::BackendUnavailable | ErrorCode::BackendTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    State,
    Backend,
    Codec,
    System,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "VALIDATION"),
            ErrorCategory::State => write!(f, "STATE"),
            ErrorCategory::Backend => write!(f, "BACKEND"),
            ErrorCategory::Codec => write!(f, "CODEC"),
            ErrorCategory::System => write!(f, "SYSTEM"),
        }
    }
}

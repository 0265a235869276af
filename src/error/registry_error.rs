//! 注册中心统一错误类型
//!
//! `RegistryError` 是引擎和解析器对外暴露的错误，
//! `BackendError` 是各个后端原语返回的错误，由引擎包装成 `RegistryError::Backend`

use super::code::ErrorCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 注册中心结果类型
pub type Result<T> = std::result::Result<T, RegistryError>;

/// 后端原语结果类型
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// 后端原语操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Put,
    Renew,
    Delete,
    Query,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Connect => "connect",
            Operation::Put => "put",
            Operation::Renew => "renew",
            Operation::Delete => "delete",
            Operation::Query => "query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 注册中心统一错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    /// 服务描述符不合法（服务名为空、地址缺失等）
    #[error("invalid service descriptor: {0}")]
    InvalidDescriptor(String),

    /// 地址端口缺失、为 0 或无法解析
    #[error("invalid port in address `{address}`")]
    InvalidPort { address: String },

    /// 需要替换通配地址，但本机没有非回环 IPv4 地址
    #[error("no non-loopback IPv4 address found on this host")]
    NoLocalAddress,

    #[error("instance {key} is already registered")]
    AlreadyRegistered { key: String },

    #[error("instance {key} has not been registered")]
    NotRegistered { key: String },

    /// 后端明确报告服务不存在
    #[error("service {service} not found")]
    ServiceNotFound { service: String },

    /// 后端原语失败
    #[error("backend {op} failed for {key}: {source}")]
    Backend {
        op: Operation,
        key: String,
        #[source]
        source: BackendError,
    },

    /// 后端原语超过调用超时
    #[error("backend {op} for {key} timed out after {after:?}")]
    Timeout {
        op: Operation,
        key: String,
        after: Duration,
    },

    /// 实例记录编解码失败
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),
}

impl RegistryError {
    /// 创建描述符校验错误
    pub fn invalid_descriptor(reason: impl Into<String>) -> Self {
        RegistryError::InvalidDescriptor(reason.into())
    }

    /// 创建端口错误
    pub fn invalid_port(address: impl Into<String>) -> Self {
        RegistryError::InvalidPort {
            address: address.into(),
        }
    }

    /// 包装后端错误
    pub fn backend(op: Operation, key: impl Into<String>, source: BackendError) -> Self {
        RegistryError::Backend {
            op,
            key: key.into(),
            source,
        }
    }

    /// 创建超时错误
    pub fn timeout(op: Operation, key: impl Into<String>, after: Duration) -> Self {
        RegistryError::Timeout {
            op,
            key: key.into(),
            after,
        }
    }

    /// 创建配置错误
    pub fn config(reason: impl Into<String>) -> Self {
        RegistryError::Config(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::InvalidDescriptor(_) => ErrorCode::InvalidDescriptor,
            RegistryError::InvalidPort { .. } => ErrorCode::InvalidPort,
            RegistryError::NoLocalAddress => ErrorCode::NoLocalAddress,
            RegistryError::AlreadyRegistered { .. } => ErrorCode::AlreadyRegistered,
            RegistryError::NotRegistered { .. } => ErrorCode::NotRegistered,
            RegistryError::ServiceNotFound { .. } => ErrorCode::ServiceNotFound,
            RegistryError::Backend { source, .. } => source.code(),
            RegistryError::Timeout { .. } => ErrorCode::BackendTimeout,
            RegistryError::Codec(CodecError::Encode(_)) => ErrorCode::EncodingError,
            RegistryError::Codec(_) => ErrorCode::DecodingError,
            RegistryError::Config(_) => ErrorCode::ConfigurationError,
        }
    }

    /// 判断调用方是否值得重试
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

/// 后端原语错误
#[derive(Error, Debug)]
pub enum BackendError {
    /// 网络不可达、连接断开等瞬时错误
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// 后端报告条目或服务不存在
    #[error("not found: {0}")]
    NotFound(String),

    /// 后端返回非成功状态
    #[error("backend rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// 响应无法解析，或租约令牌与后端不匹配
    #[error("unexpected backend response: {0}")]
    Protocol(String),

    #[error("backend authentication failed: {0}")]
    Auth(String),
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        BackendError::Unavailable(reason.into())
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        BackendError::Protocol(reason.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BackendError::Unavailable(_) => ErrorCode::BackendUnavailable,
            BackendError::NotFound(_) => ErrorCode::BackendRejected,
            BackendError::Rejected { .. } => ErrorCode::BackendRejected,
            BackendError::Protocol(_) => ErrorCode::BackendProtocolError,
            BackendError::Auth(_) => ErrorCode::AuthenticationFailed,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            BackendError::Rejected {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for BackendError {
    fn from(err: etcd_client::Error) -> Self {
        BackendError::Unavailable(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.kind() == redis::ErrorKind::AuthenticationFailed {
            BackendError::Auth(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Protocol(err.to_string())
        }
    }
}

/// 实例记录编解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode instance record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode instance record: {0}")]
    Decode(#[source] serde_json::Error),

    /// JSON 合法但缺少必要字段
    #[error("invalid instance record: {0}")]
    Invalid(String),
}

impl From<CodecError> for BackendError {
    fn from(err: CodecError) -> Self {
        BackendError::Protocol(err.to_string())
    }
}

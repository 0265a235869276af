//! 日志初始化

use crate::config::LoggingConfig;
use crate::error::{RegistryError, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化全局 tracing subscriber
///
/// `filter` 使用 `EnvFilter` 语法；`json` 为 true 时输出结构化 JSON。
/// 已经初始化过时返回配置错误
pub fn init_tracing(filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| RegistryError::config(format!("invalid log filter `{filter}`: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .try_init()
        .map_err(|e| RegistryError::config(format!("tracing already initialized: {e}")))
}

/// 读取 `RUST_LOG`，未设置时使用 `info`
pub fn init_from_env() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    init_tracing(&filter, false)
}

/// 按配置文件中的 `[logging]` 初始化
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    match &config.filter {
        Some(filter) => init_tracing(filter, config.json),
        None => {
            let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
            init_tracing(&filter, config.json)
        }
    }
}

//! 服务解析器
//!
//! 把目标描述（服务名，或带标签查询串的 `svc?k=v`）解析为当前的实例列表。
//! 每次解析都直接查询后端，不做缓存

use crate::discovery::backend::{LeaseBackend, call_with_timeout};
use crate::discovery::codec;
use crate::error::{BackendError, Operation, RegistryError, Result};
use crate::types::{ResolveResult, TargetInfo};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// 解析 trait
#[async_trait]
pub trait Resolver: Send + Sync {
    /// 由目标信息得到目标描述（也是缓存键）
    fn target(&self, target: &TargetInfo) -> String;

    /// 解析目标描述
    async fn resolve(&self, desc: &str) -> Result<ResolveResult>;

    /// 解析器名称：`<backend>` 或 `<backend>:<namespace>`
    fn name(&self) -> String;
}

/// 目标描述的生成方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// 只用服务名
    #[default]
    ServiceName,
    /// 服务名加排序后的标签查询串，解析时按标签过滤
    WithTags,
}

/// 解析器配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverOptions {
    #[serde(default)]
    pub target_mode: TargetMode,
    /// 跳过后端标记为不健康的实例
    #[serde(default = "default_healthy_only")]
    pub healthy_only: bool,
    #[serde(default = "default_query_timeout", with = "duration_secs")]
    pub query_timeout: Duration,
}

fn default_healthy_only() -> bool {
    true
}

fn default_query_timeout() -> Duration {
    Duration::from_secs(3)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            target_mode: TargetMode::ServiceName,
            healthy_only: default_healthy_only(),
            query_timeout: default_query_timeout(),
        }
    }
}

const TARGET_BASE: &str = "registry://target";

/// 把服务名和标签编码为目标描述：`svc?k1=v1&k2=v2`（键排序、百分号编码）
pub fn encode_target(service_name: &str, tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return service_name.to_string();
    }

    let mut pairs: Vec<(&String, &String)> = tags.iter().collect();
    pairs.sort();

    match Url::parse(TARGET_BASE) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(pairs);
            format!("{}?{}", service_name, url.query().unwrap_or_default())
        }
        Err(_) => service_name.to_string(),
    }
}

/// 解析目标描述，返回服务名和标签过滤条件
pub fn decode_target(desc: &str) -> Result<(String, HashMap<String, String>)> {
    let (service_name, query) = match desc.split_once('?') {
        Some((service_name, query)) => (service_name, Some(query)),
        None => (desc, None),
    };
    if service_name.trim().is_empty() {
        return Err(RegistryError::invalid_descriptor(format!(
            "target `{desc}` has no service name"
        )));
    }
    if service_name.contains('/') {
        return Err(RegistryError::invalid_descriptor(format!(
            "target `{desc}` has a service name containing `/`"
        )));
    }

    let mut filter = HashMap::new();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        let url = Url::parse(&format!("{TARGET_BASE}?{query}")).map_err(|e| {
            RegistryError::invalid_descriptor(format!("target `{desc}` has a bad query: {e}"))
        })?;
        filter.extend(url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())));
    }
    Ok((service_name.to_string(), filter))
}

/// 基于 `LeaseBackend::query` 的解析器
pub struct BackendResolver {
    backend: Arc<dyn LeaseBackend>,
    options: ResolverOptions,
}

impl BackendResolver {
    pub fn new(backend: Arc<dyn LeaseBackend>, options: ResolverOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }
}

#[async_trait]
impl Resolver for BackendResolver {
    fn target(&self, target: &TargetInfo) -> String {
        match self.options.target_mode {
            TargetMode::ServiceName => target.service_name.clone(),
            TargetMode::WithTags => encode_target(&target.service_name, &target.tags),
        }
    }

    async fn resolve(&self, desc: &str) -> Result<ResolveResult> {
        let (service_name, filter) = decode_target(desc)?;

        let entries = call_with_timeout(
            Operation::Query,
            &service_name,
            self.options.query_timeout,
            self.backend.query(&service_name),
        )
        .await
        .map_err(|e| match e {
            RegistryError::Backend {
                source: BackendError::NotFound(_),
                ..
            } => RegistryError::ServiceNotFound {
                service: service_name.clone(),
            },
            other => other,
        })?;

        let total = entries.len();
        let mut instances = Vec::with_capacity(total);
        for entry in entries {
            if self.options.healthy_only && !entry.healthy {
                continue;
            }
            let record = match codec::decode(&entry.value) {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        service = %service_name,
                        backend = %self.backend.name(),
                        entry = %entry.id,
                        error = %e,
                        "⚠️ Skipping undecodable instance record"
                    );
                    continue;
                }
            };
            if !record.matches_tags(&filter) {
                continue;
            }
            instances.push(record.into_resolved());
        }
        instances.sort_by(|a, b| a.address().cmp(b.address()));

        debug!(
            service = %service_name,
            backend = %self.backend.name(),
            total,
            resolved = instances.len(),
            "🔍 Resolved service"
        );

        Ok(ResolveResult {
            cache_key: desc.to_string(),
            instances,
        })
    }

    fn name(&self) -> String {
        match self.backend.namespace() {
            Some(namespace) if !namespace.is_empty() => {
                format!("{}:{}", self.backend.name(), namespace)
            }
            _ => self.backend.name().to_string(),
        }
    }
}

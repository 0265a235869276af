//! Consul 注册后端
//!
//! 通过 agent HTTP API 注册服务并附带 TTL 检查，心跳即调用
//! `/v1/agent/check/pass/<check_id>`。标签以 `k:v` 形式存放，
//! 权重放在 `Weights.Passing`

use super::{LeaseBackend, LeaseToken, RawEntry, Renewal, ensure_success};
use crate::discovery::codec::{self, InstanceRecord};
use crate::error::{BackendError, BackendResult};
use crate::registry::key::InstanceKey;
use crate::types::DEFAULT_NETWORK;
use crate::utils::address::join_host_port;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const TOKEN_HEADER: &str = "X-Consul-Token";

/// Consul 连接配置
#[derive(Debug, Clone)]
pub struct ConsulOptions {
    pub url: String,
    pub token: Option<String>,
    /// 查询时只返回通过健康检查的实例
    pub passing_only: bool,
    /// 检查持续失败多久后由 Consul 自动注销
    pub deregister_critical_after: Duration,
}

impl Default for ConsulOptions {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8500".to_string(),
            token: None,
            passing_only: true,
            deregister_critical_after: Duration::from_secs(60),
        }
    }
}

/// Consul 注册后端
pub struct ConsulBackend {
    http_client: HttpClient,
    options: ConsulOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    service: AgentService,
    #[serde(default)]
    checks: Vec<HealthCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    weights: Option<Weights>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Weights {
    passing: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthCheck {
    status: String,
}

/// 把标签转换为 `k:v` 列表（排序），键中包含 `:` 时报错
pub fn tags_to_slice(tags: &HashMap<String, String>) -> BackendResult<Vec<String>> {
    let mut out = Vec::with_capacity(tags.len());
    for (k, v) in tags {
        if k.is_empty() {
            return Err(BackendError::protocol("tag key is empty"));
        }
        if k.contains(':') {
            return Err(BackendError::protocol(format!(
                "tag key `{k}` must not contain ':'"
            )));
        }
        out.push(format!("{k}:{v}"));
    }
    out.sort();
    Ok(out)
}

/// 解析 `k:v` 标签，不含 `:` 的标签忽略
pub fn split_tags(tags: &[String]) -> HashMap<String, String> {
    tags.iter()
        .filter_map(|tag| tag.split_once(':'))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn format_secs(duration: Duration) -> String {
    format!("{}s", duration.as_secs().max(1))
}

impl ConsulBackend {
    pub fn new(options: ConsulOptions) -> Self {
        Self::with_client(HttpClient::new(), options)
    }

    pub fn with_client(http_client: HttpClient, options: ConsulOptions) -> Self {
        Self {
            http_client,
            options,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.options.url.trim_end_matches('/'), path)
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http_client.put(self.url(path)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.options.token {
            Some(token) => builder.header(TOKEN_HEADER, token),
            None => builder,
        }
    }

    fn service_id(key: &InstanceKey) -> String {
        key.to_string()
    }

    fn check_id(key: &InstanceKey) -> String {
        format!("service:{}", Self::service_id(key))
    }
}

#[async_trait]
impl LeaseBackend for ConsulBackend {
    fn name(&self) -> &str {
        "consul"
    }

    async fn put_with_lease(
        &self,
        key: &InstanceKey,
        value: &[u8],
        ttl: Duration,
    ) -> BackendResult<LeaseToken> {
        let record = codec::decode(value)?;
        let tags = tags_to_slice(&record.tags)?;
        let weight = record.effective_weight();

        let payload = serde_json::json!({
            "ID": Self::service_id(key),
            "Name": key.service_name(),
            "Address": key.address().host(),
            "Port": key.address().port(),
            "Tags": tags,
            "Weights": { "Passing": weight, "Warning": weight },
            "Check": {
                "CheckID": Self::check_id(key),
                "TTL": format_secs(ttl),
                "DeregisterCriticalServiceAfter": format_secs(self.options.deregister_critical_after),
            },
        });

        let resp = self
            .put("/v1/agent/service/register")
            .json(&payload)
            .send()
            .await?;
        ensure_success(resp).await?;

        // TTL 检查初始为 critical，立即通过一次
        let resp = self
            .put(&format!("/v1/agent/check/pass/{}", Self::check_id(key)))
            .send()
            .await?;
        ensure_success(resp).await?;

        debug!(service_id = %Self::service_id(key), "consul service registered");
        Ok(LeaseToken::Ttl(ttl))
    }

    async fn renew(&self, key: &InstanceKey, _lease: &LeaseToken) -> BackendResult<Renewal> {
        let resp = self
            .put(&format!("/v1/agent/check/pass/{}", Self::check_id(key)))
            .send()
            .await?;
        match ensure_success(resp).await {
            Ok(_) => Ok(Renewal::Alive),
            Err(BackendError::NotFound(_)) => Ok(Renewal::Expired),
            // 旧版本 Consul 对未知检查返回 500
            Err(BackendError::Unavailable(body)) if body.contains("Unknown check") => {
                Ok(Renewal::Expired)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &InstanceKey) -> BackendResult<()> {
        let resp = self
            .put(&format!(
                "/v1/agent/service/deregister/{}",
                Self::service_id(key)
            ))
            .send()
            .await?;
        match ensure_success(resp).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        let mut request = self
            .http_client
            .get(self.url(&format!("/v1/health/service/{service_name}")));
        if self.options.passing_only {
            request = request.query(&[("passing", "true")]);
        }
        let resp = ensure_success(self.authorize(request).send().await?).await?;
        let services: Vec<HealthEntry> = resp.json().await?;

        let mut entries = Vec::with_capacity(services.len());
        for entry in services {
            let service = entry.service;
            if service.address.is_empty() {
                continue;
            }
            let record = InstanceRecord {
                network: DEFAULT_NETWORK.to_string(),
                address: join_host_port(&service.address, service.port),
                weight: service.weights.map(|w| w.passing).unwrap_or_default(),
                tags: split_tags(service.tags.as_deref().unwrap_or_default()),
            };
            entries.push(RawEntry {
                id: service.id,
                value: codec::encode(&record)?,
                healthy: entry.checks.iter().all(|c| c.status == "passing"),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_use_colon_separator() {
        let tags = HashMap::from([
            ("idc".to_string(), "hd1".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        assert_eq!(tags_to_slice(&tags).unwrap(), vec!["env:prod", "idc:hd1"]);
    }

    #[test]
    fn tag_keys_with_colon_are_rejected() {
        let tags = HashMap::from([("a:b".to_string(), "c".to_string())]);
        assert!(matches!(tags_to_slice(&tags), Err(BackendError::Protocol(_))));
    }

    #[test]
    fn split_tags_keeps_colons_in_values() {
        let tags = split_tags(&["url:http://x".to_string(), "plain".to_string()]);
        assert_eq!(tags.get("url").map(String::as_str), Some("http://x"));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn health_entries_deserialize() {
        let raw = r#"[{"Node":{},"Service":{"ID":"echo:10.0.0.1:80","Service":"echo",
            "Address":"10.0.0.1","Port":80,"Tags":null,"Weights":{"Passing":5,"Warning":1}},
            "Checks":[{"Status":"passing"}]}]"#;
        let entries: Vec<HealthEntry> = serde_json::from_str(raw).unwrap();
        assert_eq!(entries[0].service.port, 80);
        assert_eq!(entries[0].service.weights.as_ref().map(|w| w.passing), Some(5));
        assert!(entries[0].service.tags.is_none());
    }
}

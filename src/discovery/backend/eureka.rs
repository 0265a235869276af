//! Eureka 注册后端
//!
//! 使用 Eureka REST v2 接口。实例 ID 为 `<service>:<host:port>`，
//! 编码后的实例记录放在实例元数据的 `hertz` 键下，心跳即续约请求

use super::{LeaseBackend, LeaseToken, RawEntry, Renewal, ensure_success};
use crate::discovery::codec::{self, InstanceRecord};
use crate::error::{BackendError, BackendResult};
use crate::registry::key::InstanceKey;
use crate::types::DEFAULT_NETWORK;
use crate::utils::address::join_host_port;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// 实例元数据中存放实例记录的键
pub const DEFAULT_METADATA_KEY: &str = "hertz";

/// Eureka 连接配置
#[derive(Debug, Clone)]
pub struct EurekaOptions {
    /// Eureka 服务地址，例如 `http://127.0.0.1:8761/eureka`，按顺序故障转移
    pub servers: Vec<String>,
    /// HTTP basic 认证
    pub credentials: Option<(String, String)>,
    pub metadata_key: String,
}

impl Default for EurekaOptions {
    fn default() -> Self {
        Self {
            servers: vec!["http://127.0.0.1:8761/eureka".to_string()],
            credentials: None,
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
        }
    }
}

/// Eureka 注册后端
pub struct EurekaBackend {
    http_client: HttpClient,
    options: EurekaOptions,
}

/// Eureka 中的应用名统一大写
fn app_name(service_name: &str) -> String {
    service_name.to_uppercase()
}

/// 解析 `GET /apps/<APP>` 的响应
///
/// `application.instance` 只有一个实例时可能是对象而不是数组；
/// 端口可能是数字或字符串
pub fn parse_application(body: &Value, metadata_key: &str) -> Vec<RawEntry> {
    let instances = match body.pointer("/application/instance") {
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    };

    instances
        .into_iter()
        .filter_map(|instance| parse_instance(instance, metadata_key))
        .collect()
}

fn parse_instance(instance: &Value, metadata_key: &str) -> Option<RawEntry> {
    let ip = instance.get("ipAddr").and_then(Value::as_str)?;
    let port = match instance.pointer("/port/$") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.parse::<u16>().ok(),
        _ => None,
    }?;
    let id = instance
        .get("instanceId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| join_host_port(ip, port));
    let healthy = instance.get("status").and_then(Value::as_str) == Some("UP");
    let address = join_host_port(ip, port);

    let meta = instance
        .pointer("/metadata")
        .and_then(|m| m.get(metadata_key))
        .and_then(Value::as_str);

    let value = match meta {
        // 以 ipAddr:port 为准，权重和标签取自元数据
        Some(raw) => match codec::decode(raw.as_bytes()) {
            Ok(mut record) => {
                record.address = address;
                codec::encode(&record).ok()?
            }
            Err(_) => raw.as_bytes().to_vec(),
        },
        None => codec::encode(&InstanceRecord {
            network: DEFAULT_NETWORK.to_string(),
            address,
            weight: 0,
            tags: HashMap::new(),
        })
        .ok()?,
    };

    Some(RawEntry { id, value, healthy })
}

impl EurekaBackend {
    pub fn new(options: EurekaOptions) -> Self {
        Self::with_client(HttpClient::new(), options)
    }

    pub fn with_client(http_client: HttpClient, options: EurekaOptions) -> Self {
        Self {
            http_client,
            options,
        }
    }

    fn instance_id(key: &InstanceKey) -> String {
        key.to_string()
    }

    /// 依次尝试各个 Eureka 服务地址，连接类错误时切换到下一个
    async fn send<F>(&self, build: F) -> BackendResult<reqwest::Response>
    where
        F: Fn(&HttpClient, &str) -> reqwest::RequestBuilder,
    {
        let mut last_error = BackendError::unavailable("no eureka servers configured");
        for server in &self.options.servers {
            let base = server.trim_end_matches('/');
            let mut request = build(&self.http_client, base).header(ACCEPT, "application/json");
            if let Some((user, password)) = &self.options.credentials {
                request = request.basic_auth(user, Some(password));
            }
            match request.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    warn!(server = %base, error = %e, "⚠️ Eureka server unreachable, trying next");
                    last_error = e.into();
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl LeaseBackend for EurekaBackend {
    fn name(&self) -> &str {
        "eureka"
    }

    async fn put_with_lease(
        &self,
        key: &InstanceKey,
        value: &[u8],
        ttl: Duration,
    ) -> BackendResult<LeaseToken> {
        let meta = String::from_utf8(value.to_vec())
            .map_err(|e| BackendError::protocol(e.to_string()))?;
        let app = app_name(key.service_name());
        let instance_id = Self::instance_id(key);
        let host = key.address().host();
        let mut metadata = serde_json::Map::new();
        metadata.insert(self.options.metadata_key.clone(), Value::String(meta));

        let payload = serde_json::json!({
            "instance": {
                "instanceId": instance_id,
                "hostName": host,
                "app": app,
                "ipAddr": host,
                "status": "UP",
                "port": { "$": key.address().port(), "@enabled": "true" },
                "dataCenterInfo": {
                    "@class": "com.netflix.appinfo.InstanceInfo$DefaultDataCenterInfo",
                    "name": "MyOwn",
                },
                "leaseInfo": { "durationInSecs": ttl.as_secs().max(1) },
                "metadata": metadata,
            }
        });

        let resp = self
            .send(|client, base| client.post(format!("{base}/apps/{app}")).json(&payload))
            .await?;
        ensure_success(resp).await?;

        debug!(app = %app, instance_id = %instance_id, "eureka instance registered");
        Ok(LeaseToken::Ttl(ttl))
    }

    async fn renew(&self, key: &InstanceKey, _lease: &LeaseToken) -> BackendResult<Renewal> {
        let app = app_name(key.service_name());
        let instance_id = Self::instance_id(key);
        let resp = self
            .send(|client, base| client.put(format!("{base}/apps/{app}/{instance_id}")))
            .await?;
        match ensure_success(resp).await {
            Ok(_) => Ok(Renewal::Alive),
            Err(BackendError::NotFound(_)) => Ok(Renewal::Expired),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &InstanceKey) -> BackendResult<()> {
        let app = app_name(key.service_name());
        let instance_id = Self::instance_id(key);
        let resp = self
            .send(|client, base| client.delete(format!("{base}/apps/{app}/{instance_id}")))
            .await?;
        match ensure_success(resp).await {
            Ok(_) | Err(BackendError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        let app = app_name(service_name);
        let resp = self
            .send(|client, base| client.get(format!("{base}/apps/{app}")))
            .await?;
        let resp = match ensure_success(resp).await {
            Ok(resp) => resp,
            Err(BackendError::NotFound(_)) => {
                return Err(BackendError::NotFound(format!("application {app}")));
            }
            Err(e) => return Err(e),
        };
        let body: Value = resp.json().await?;
        Ok(parse_application(&body, &self.options.metadata_key))
    }
}

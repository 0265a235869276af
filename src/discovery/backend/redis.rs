//! Redis 注册后端
//!
//! 实例记录用 `SET .. EX` 写入，心跳即 `EXPIRE`。键不存在时 `EXPIRE` 返回 0，
//! 视为租约失效。注册和注销时在服务频道上发布通知

use super::{LeaseBackend, LeaseToken, RawEntry, Renewal};
use crate::discovery::watch::{Notification, RedisWatcher, ServiceTable};
use crate::error::{BackendError, BackendResult};
use crate::registry::key::{InstanceKey, service_prefix};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_NAMESPACE: &str = "hertz";

/// Redis 连接配置
#[derive(Debug, Clone)]
pub struct RedisOptions {
    pub url: String,
    pub namespace: String,
    /// SCAN 每批返回的数量提示
    pub scan_count: usize,
}

impl Default for RedisOptions {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            scan_count: 100,
        }
    }
}

/// Redis 注册后端
pub struct RedisBackend {
    client: redis::Client,
    conn: ConnectionManager,
    options: RedisOptions,
}

/// 转义 glob 特殊字符
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl RedisBackend {
    pub async fn connect(options: RedisOptions) -> BackendResult<Self> {
        let client = redis::Client::open(options.url.as_str())?;
        let conn = ConnectionManager::new(client.clone()).await?;
        info!(url = %options.url, namespace = %options.namespace, "✅ Connected to redis");
        Ok(Self {
            client,
            conn,
            options,
        })
    }

    /// 服务的通知频道
    pub fn notification_channel(&self, service_name: &str) -> String {
        format!("{}:notify:{}", self.options.namespace.trim_matches('/'), service_name)
    }

    /// 订阅服务的注册/注销通知，应用到调用方自己的 `table`
    pub async fn watch(
        &self,
        service_name: &str,
        table: Arc<ServiceTable>,
        cancel: CancellationToken,
    ) -> BackendResult<JoinHandle<()>> {
        RedisWatcher::spawn(
            self.client.clone(),
            self.notification_channel(service_name),
            table,
            cancel,
        )
        .await
    }

    async fn publish(&self, notification: Notification) {
        let channel = self.notification_channel(&notification.service);
        let payload = match notification.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(channel = %channel, error = %e, "⚠️ Failed to encode notification");
                return;
            }
        };
        let mut conn = self.conn.clone();
        let published: redis::RedisResult<i64> = conn.publish(&channel, payload).await;
        if let Err(e) = published {
            warn!(channel = %channel, error = %e, "⚠️ Failed to publish notification");
        }
    }
}

#[async_trait]
impl LeaseBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.options.namespace)
    }

    async fn put_with_lease(
        &self,
        key: &InstanceKey,
        value: &[u8],
        ttl: Duration,
    ) -> BackendResult<LeaseToken> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(
                key.storage_path(&self.options.namespace),
                value,
                ttl.as_secs().max(1),
            )
            .await?;

        self.publish(Notification::register(
            key.service_name(),
            key.instance_id(),
        ))
        .await;
        Ok(LeaseToken::Ttl(ttl))
    }

    async fn renew(&self, key: &InstanceKey, lease: &LeaseToken) -> BackendResult<Renewal> {
        let LeaseToken::Ttl(ttl) = lease else {
            return Err(BackendError::protocol(format!(
                "redis cannot renew {lease:?}"
            )));
        };
        let secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);

        let mut conn = self.conn.clone();
        let alive: bool = conn
            .expire(key.storage_path(&self.options.namespace), secs)
            .await?;
        Ok(if alive {
            Renewal::Alive
        } else {
            Renewal::Expired
        })
    }

    async fn delete(&self, key: &InstanceKey) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key.storage_path(&self.options.namespace)).await?;

        self.publish(Notification::deregister(
            key.service_name(),
            key.instance_id(),
        ))
        .await;
        Ok(())
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        let prefix = service_prefix(&self.options.namespace, service_name);
        let pattern = format!("{}*", escape_glob(&prefix));
        let mut conn = self.conn.clone();

        let mut keys: Vec<String> = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.options.scan_count)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }
        keys.sort();
        keys.dedup();

        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        Ok(keys
            .into_iter()
            .zip(values)
            // 扫描和读取之间过期的键
            .filter_map(|(path, value)| {
                let value = value?;
                let id = path.strip_prefix(&prefix).unwrap_or(&path).to_string();
                Some(RawEntry::new(id, value))
            })
            .collect())
    }
}

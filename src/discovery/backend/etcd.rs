//! etcd 注册后端
//!
//! 实例记录写在 `/<namespace>/<service>/<host:port>` 下并绑定租约，
//! 续约使用一次性的 keep-alive 请求

use super::{LeaseBackend, LeaseToken, RawEntry, Renewal};
use crate::error::{BackendError, BackendResult};
use crate::registry::key::{InstanceKey, service_prefix};
use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions};
use std::time::Duration;
use tracing::{debug, info};

/// 默认命名空间
pub const DEFAULT_NAMESPACE: &str = "hertz/registry-etcd";

/// etcd 连接配置
#[derive(Debug, Clone)]
pub struct EtcdOptions {
    pub endpoints: Vec<String>,
    pub namespace: String,
    /// 用户名和密码
    pub credentials: Option<(String, String)>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EtcdOptions {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            namespace: DEFAULT_NAMESPACE.to_string(),
            credentials: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// etcd 注册后端
pub struct EtcdBackend {
    client: Client,
    namespace: String,
}

impl EtcdBackend {
    /// 连接 etcd
    pub async fn connect(options: EtcdOptions) -> BackendResult<Self> {
        if options.endpoints.is_empty() {
            return Err(BackendError::unavailable("etcd endpoints not configured"));
        }

        let mut connect = ConnectOptions::new()
            .with_connect_timeout(options.connect_timeout)
            .with_timeout(options.request_timeout);
        if let Some((user, password)) = &options.credentials {
            connect = connect.with_user(user.clone(), password.clone());
        }

        let client = Client::connect(&options.endpoints, Some(connect)).await?;
        info!(
            endpoints = ?options.endpoints,
            namespace = %options.namespace,
            "✅ Connected to etcd"
        );

        Ok(Self::from_client(client, options.namespace))
    }

    /// 使用已有客户端
    pub fn from_client(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// 租约在服务端是否已经不存在
    async fn lease_gone(&self, id: i64) -> bool {
        let mut client = self.client.clone();
        match client.lease_time_to_live(id, None).await {
            Ok(resp) => resp.ttl() <= 0,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl LeaseBackend for EtcdBackend {
    fn name(&self) -> &str {
        "etcd"
    }

    fn namespace(&self) -> Option<&str> {
        Some(&self.namespace)
    }

    async fn put_with_lease(
        &self,
        key: &InstanceKey,
        value: &[u8],
        ttl: Duration,
    ) -> BackendResult<LeaseToken> {
        let mut client = self.client.clone();
        let ttl_secs = i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX);

        let lease = client.lease_grant(ttl_secs, None).await?;
        let path = key.storage_path(&self.namespace);
        client
            .put(
                path.clone(),
                value.to_vec(),
                Some(PutOptions::new().with_lease(lease.id())),
            )
            .await?;

        debug!(key = %path, lease = lease.id(), ttl = ttl_secs, "etcd put with lease");
        Ok(LeaseToken::Lease(lease.id()))
    }

    async fn renew(&self, _key: &InstanceKey, lease: &LeaseToken) -> BackendResult<Renewal> {
        let LeaseToken::Lease(id) = *lease else {
            return Err(BackendError::protocol(format!(
                "etcd cannot renew {lease:?}"
            )));
        };

        let mut client = self.client.clone();
        let result = async {
            let (mut keeper, mut stream) = client.lease_keep_alive(id).await?;
            keeper.keep_alive().await?;
            stream.message().await
        }
        .await;

        match result {
            Ok(Some(resp)) if resp.ttl() > 0 => Ok(Renewal::Alive),
            Ok(_) => Ok(Renewal::Expired),
            Err(etcd_client::Error::LeaseKeepAliveError(_)) => Ok(Renewal::Expired),
            Err(e) => {
                if self.lease_gone(id).await {
                    Ok(Renewal::Expired)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn delete(&self, key: &InstanceKey) -> BackendResult<()> {
        let mut client = self.client.clone();
        client.delete(key.storage_path(&self.namespace), None).await?;
        Ok(())
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        let prefix = service_prefix(&self.namespace, service_name);
        let mut client = self.client.clone();
        let resp = client
            .get(prefix.clone(), Some(GetOptions::new().with_prefix()))
            .await?;

        let mut entries = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let path = kv
                .key_str()
                .map_err(|e| BackendError::protocol(e.to_string()))?;
            let id = path.strip_prefix(&prefix).unwrap_or(path);
            entries.push(RawEntry::new(id, kv.value().to_vec()));
        }
        Ok(entries)
    }
}

//! 内存后端
//!
//! 租约按 tokio 时钟过期，测试里配合 `start_paused` 可以精确推进时间；
//! 另外提供故障注入（失败次数、整体不可用、延迟、服务端租约丢失）

use super::{LeaseBackend, LeaseToken, RawEntry, Renewal};
use crate::error::{BackendError, BackendResult, Operation};
use crate::registry::key::{InstanceKey, service_prefix};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_NAMESPACE: &str = "registry";

struct StoredEntry {
    value: Vec<u8>,
    lease: Option<i64>,
    healthy: bool,
}

struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, StoredEntry>,
    leases: HashMap<i64, Lease>,
    next_lease: i64,
    calls: HashMap<Operation, u64>,
    pending_failures: HashMap<Operation, u32>,
    unavailable: bool,
    latency: Duration,
}

impl State {
    /// 清理过期租约以及绑定在上面的条目
    fn purge(&mut self, now: Instant) {
        self.leases.retain(|_, lease| lease.expires_at > now);
        let leases = &self.leases;
        self.entries
            .retain(|_, entry| entry.lease.is_none_or(|id| leases.contains_key(&id)));
    }

    /// 记录调用并检查注入的故障
    fn enter(&mut self, op: Operation) -> BackendResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.unavailable {
            return Err(BackendError::unavailable("memory backend is down"));
        }
        if let Some(remaining) = self.pending_failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::unavailable(format!("injected {op} failure")));
            }
        }
        Ok(())
    }
}

/// 内存后端
pub struct MemoryBackend {
    namespace: String,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            state: Mutex::new(State {
                next_lease: 1,
                ..State::default()
            }),
        }
    }

    async fn enter(&self, op: Operation) -> BackendResult<()> {
        let latency = self.state.lock().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().await.enter(op)
    }

    /// 写入一个不带租约的原始条目，用于模拟其他客户端或脏数据
    pub async fn insert_raw(&self, service_name: &str, id: &str, value: impl Into<Vec<u8>>) {
        let path = format!("{}{}", service_prefix(&self.namespace, service_name), id);
        self.state.lock().await.entries.insert(
            path,
            StoredEntry {
                value: value.into(),
                lease: None,
                healthy: true,
            },
        );
    }

    /// 修改条目的健康状态
    pub async fn set_healthy(&self, service_name: &str, id: &str, healthy: bool) -> bool {
        let path = format!("{}{}", service_prefix(&self.namespace, service_name), id);
        match self.state.lock().await.entries.get_mut(&path) {
            Some(entry) => {
                entry.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// 让接下来 `times` 次 `op` 调用失败
    pub async fn fail_next(&self, op: Operation, times: u32) {
        self.state.lock().await.pending_failures.insert(op, times);
    }

    /// 模拟整个后端不可用
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.unavailable = !available;
    }

    /// 每次调用前的延迟
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// 模拟服务端丢失全部租约（例如集群重建），绑定租约的条目一并消失
    pub async fn revoke_all_leases(&self) {
        let mut state = self.state.lock().await;
        state.leases.clear();
        state.entries.retain(|_, entry| entry.lease.is_none());
    }

    /// `op` 被调用的次数（包括失败的调用）
    pub async fn call_count(&self, op: Operation) -> u64 {
        self.state
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or_default()
    }

    /// 条目当前是否存在（已过期的不算）
    pub async fn contains(&self, key: &InstanceKey) -> bool {
        let mut state = self.state.lock().await;
        state.purge(Instant::now());
        state.entries.contains_key(&key.storage_path(&self.namespace))
    }

    /// 当前有效条目数
    pub async fn len(&self) -> usize {
        let mut state = self.state.lock().await;
        state.purge(Instant::now());
        state.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeaseBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
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
        self.enter(Operation::Put).await?;

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.purge(now);

        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                expires_at: now + ttl,
            },
        );

        let previous = state.entries.insert(
            key.storage_path(&self.namespace),
            StoredEntry {
                value: value.to_vec(),
                lease: Some(id),
                healthy: true,
            },
        );
        if let Some(old) = previous.and_then(|entry| entry.lease) {
            state.leases.remove(&old);
        }

        Ok(LeaseToken::Lease(id))
    }

    async fn renew(&self, _key: &InstanceKey, lease: &LeaseToken) -> BackendResult<Renewal> {
        self.enter(Operation::Renew).await?;

        let LeaseToken::Lease(id) = lease else {
            return Err(BackendError::protocol(format!(
                "memory backend cannot renew {lease:?}"
            )));
        };

        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.purge(now);

        match state.leases.get_mut(id) {
            Some(lease) => {
                lease.expires_at = now + lease.ttl;
                Ok(Renewal::Alive)
            }
            None => Ok(Renewal::Expired),
        }
    }

    async fn delete(&self, key: &InstanceKey) -> BackendResult<()> {
        self.enter(Operation::Delete).await?;

        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.remove(&key.storage_path(&self.namespace)) {
            if let Some(id) = entry.lease {
                state.leases.remove(&id);
            }
        }
        Ok(())
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        self.enter(Operation::Query).await?;

        let prefix = service_prefix(&self.namespace, service_name);
        let mut state = self.state.lock().await;
        state.purge(Instant::now());

        Ok(state
            .entries
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .map(|(path, entry)| RawEntry {
                id: path[prefix.len()..].to_string(),
                value: entry.value.clone(),
                healthy: entry.healthy,
            })
            .collect())
    }
}

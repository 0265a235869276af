//! 注册引擎
//!
//! 维护"实例键 → 注册句柄"的本地注册表，并为每个已注册实例运行心跳任务。
//!
//! 状态机：`未注册 → (写入中) → 已注册 → (注销中) → 未注册`。
//! 写入中/注销中的键在表里占位为 `Slot::Pending`，同一个键的并发调用
//! 会立即得到 `AlreadyRegistered` 或 `NotRegistered`，
//! 因此同一时刻每个键最多只有一个心跳任务。
//! 占位由 `PendingGuard` 持有，调用方丢弃 future 时占位随之释放。
//! 表锁只保护内存状态，从不跨越后端 I/O。

use crate::discovery::backend::{LeaseBackend, LeaseToken, call_with_timeout};
use crate::discovery::codec::{self, InstanceRecord};
use crate::error::{Operation, RegistryError, Result};
use crate::registry::heartbeat::{Heartbeat, HeartbeatExit};
use crate::registry::key::InstanceKey;
use crate::registry::options::{DuplicatePolicy, EngineOptions};
use crate::registry::trait_def::Registry;
use crate::types::ServiceDescriptor;
use crate::utils::address::{InterfaceIpResolver, IpResolver, normalize_with};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Table = Mutex<HashMap<InstanceKey, Slot>>;

enum Slot {
    /// 写入或注销进行中，值为占位令牌
    Pending(u64),
    Active(RegistrationHandle),
}

/// 只移除仍属于 `token` 的占位
fn release_pending(table: &mut HashMap<InstanceKey, Slot>, key: &InstanceKey, token: u64) {
    if matches!(table.get(key), Some(Slot::Pending(t)) if *t == token) {
        table.remove(key);
    }
}

/// `Slot::Pending` 占位的所有权
///
/// 未解除时 drop 会释放占位：能拿到锁就立即移除，否则交给后台任务
struct PendingGuard {
    table: Weak<Table>,
    key: InstanceKey,
    token: u64,
    armed: bool,
}

impl PendingGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(table) = self.table.upgrade() else {
            return;
        };
        debug!(instance_key = %self.key, "🧹 Releasing abandoned pending slot");

        let released = match table.try_lock() {
            Ok(mut slots) => {
                release_pending(&mut slots, &self.key, self.token);
                true
            }
            Err(_) => false,
        };
        if released {
            return;
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let key = self.key.clone();
            let token = self.token;
            runtime.spawn(async move {
                release_pending(&mut *table.lock().await, &key, token);
            });
        }
    }
}

/// 已注册实例的句柄：持有心跳任务的取消令牌和 JoinHandle
///
/// 句柄被丢弃时取消心跳
struct RegistrationHandle {
    generation: u64,
    lease: watch::Receiver<LeaseToken>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    registered_at: DateTime<Utc>,
}

impl RegistrationHandle {
    /// 取消心跳并等待任务退出
    async fn stop(mut self, key: &InstanceKey) {
        self.cancel.cancel();
        if let Err(e) = (&mut self.task).await {
            error!(instance_key = %key, error = %e, "❌ Heartbeat task panicked");
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// 已注册实例的只读快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub key: InstanceKey,
    pub lease: LeaseToken,
    pub registered_at: DateTime<Utc>,
}

/// 注册引擎
pub struct RegistrationEngine {
    backend: Arc<dyn LeaseBackend>,
    options: EngineOptions,
    ip_resolver: Arc<dyn IpResolver>,
    table: Arc<Table>,
    generation: AtomicU64,
    /// 所有心跳令牌的父令牌，引擎 drop 时取消
    heartbeats: CancellationToken,
}

impl RegistrationEngine {
    /// 创建注册引擎
    ///
    /// 配置会先经过 `EngineOptions::normalized` 修正
    pub fn new(backend: Arc<dyn LeaseBackend>, options: EngineOptions) -> Self {
        Self {
            backend,
            options: options.normalized(),
            ip_resolver: Arc::new(InterfaceIpResolver),
            table: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            heartbeats: CancellationToken::new(),
        }
    }

    /// 替换本机地址探测（测试或多网卡环境）
    pub fn with_ip_resolver(mut self, resolver: Arc<dyn IpResolver>) -> Self {
        self.ip_resolver = resolver;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn LeaseBackend> {
        &self.backend
    }

    /// 计算描述符对应的实例键（校验 + 地址规范化，不涉及 I/O）
    pub fn instance_key(&self, descriptor: &ServiceDescriptor) -> Result<InstanceKey> {
        descriptor.validate()?;
        let address = normalize_with(&descriptor.address, self.ip_resolver.as_ref())?;
        Ok(InstanceKey::new(descriptor.service_name.clone(), address))
    }

    /// 注册实例
    ///
    /// 返回时记录已经写入后端，并且心跳任务已经启动。
    /// 后端写入失败或 future 被丢弃时不会留下任何本地状态。
    ///
    /// `DuplicatePolicy::Replace` 下旧心跳在写入新记录之前停止；
    /// 如果新记录写入失败，旧注册在本地已经不存在，它的后端记录在 TTL 到期后回收
    pub async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let key = self.instance_key(descriptor)?;
        let record = InstanceRecord::from_descriptor(descriptor, key.address());
        let payload = codec::encode(&record)?;

        let (guard, previous) = self.reserve(&key).await?;
        if let Some(previous) = previous {
            info!(instance_key = %key, "🔄 Replacing existing registration");
            previous.stop(&key).await;
        }

        let lease = match call_with_timeout(
            Operation::Put,
            &key.to_string(),
            self.options.call_timeout,
            self.backend
                .put_with_lease(&key, &payload, self.options.lease_ttl),
        )
        .await
        {
            Ok(lease) => lease,
            Err(e) => {
                self.release(guard).await;
                warn!(
                    service = %key.service_name(),
                    instance_key = %key,
                    backend = %self.backend.name(),
                    error = %e,
                    "❌ Failed to register instance"
                );
                return Err(e);
            }
        };

        let handle = self.spawn_heartbeat(key.clone(), payload, lease.clone());
        self.table.lock().await.insert(key.clone(), Slot::Active(handle));
        guard.disarm();

        info!(
            service = %key.service_name(),
            instance_key = %key,
            backend = %self.backend.name(),
            lease = ?lease,
            weight = record.effective_weight(),
            "✅ Service registered"
        );
        Ok(())
    }

    /// 注销实例
    ///
    /// 先停止心跳再删除后端记录，保证心跳的自愈写入不会在删除之后复活记录。
    /// 删除失败时本地状态仍然清除，记录会在 TTL 到期后由后端回收
    pub async fn deregister(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let key = self.instance_key(descriptor)?;

        let (handle, guard) = {
            let mut table = self.table.lock().await;
            match table.remove(&key) {
                Some(Slot::Active(handle)) => {
                    let guard = self.occupy(&mut table, &key);
                    (handle, guard)
                }
                other => {
                    if let Some(pending) = other {
                        table.insert(key.clone(), pending);
                    }
                    return Err(RegistryError::NotRegistered {
                        key: key.to_string(),
                    });
                }
            }
        };

        handle.stop(&key).await;

        let result = call_with_timeout(
            Operation::Delete,
            &key.to_string(),
            self.options.call_timeout,
            self.backend.delete(&key),
        )
        .await;

        self.release(guard).await;

        match &result {
            Ok(()) => info!(
                service = %key.service_name(),
                instance_key = %key,
                backend = %self.backend.name(),
                "✅ Service deregistered"
            ),
            Err(e) => warn!(
                service = %key.service_name(),
                instance_key = %key,
                backend = %self.backend.name(),
                error = %e,
                "⚠️ Failed to delete instance, backend will expire it after TTL"
            ),
        }
        result
    }

    /// 实例当前是否处于已注册状态
    pub async fn is_registered(&self, descriptor: &ServiceDescriptor) -> Result<bool> {
        let key = self.instance_key(descriptor)?;
        Ok(matches!(
            self.table.lock().await.get(&key),
            Some(Slot::Active(_))
        ))
    }

    /// 所有已注册实例的快照
    pub async fn registrations(&self) -> Vec<RegistrationInfo> {
        let table = self.table.lock().await;
        let mut infos: Vec<_> = table
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Active(handle) => Some(RegistrationInfo {
                    key: key.clone(),
                    lease: handle.lease.borrow().clone(),
                    registered_at: handle.registered_at,
                }),
                Slot::Pending(_) => None,
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));
        infos
    }

    /// 注销全部实例
    ///
    /// 逐个停止心跳并删除后端记录，返回第一个删除错误
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<(InstanceKey, RegistrationHandle, PendingGuard)> = {
            let mut table = self.table.lock().await;
            let active: Vec<InstanceKey> = table
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
                .map(|(key, _)| key.clone())
                .collect();
            let mut handles = Vec::with_capacity(active.len());
            for key in active {
                if let Some(Slot::Active(handle)) = table.remove(&key) {
                    let guard = self.occupy(&mut table, &key);
                    handles.push((key, handle, guard));
                }
            }
            handles
        };

        info!(count = handles.len(), "🛑 Shutting down registration engine");

        let mut first_error = None;
        for (key, handle, guard) in handles {
            handle.stop(&key).await;
            let result = call_with_timeout(
                Operation::Delete,
                &key.to_string(),
                self.options.call_timeout,
                self.backend.delete(&key),
            )
            .await;
            self.release(guard).await;
            if let Err(e) = result {
                warn!(instance_key = %key, error = %e, "⚠️ Failed to delete instance during shutdown");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 为键占位
    ///
    /// 键已存在时按重复策略处理：`Reject` 返回错误，
    /// `Replace` 取出旧句柄交给调用方停止
    async fn reserve(
        &self,
        key: &InstanceKey,
    ) -> Result<(PendingGuard, Option<RegistrationHandle>)> {
        let mut table = self.table.lock().await;
        let previous = match table.remove(key) {
            None => None,
            Some(Slot::Active(handle))
                if self.options.duplicate_policy == DuplicatePolicy::Replace =>
            {
                Some(handle)
            }
            Some(slot) => {
                table.insert(key.clone(), slot);
                return Err(RegistryError::AlreadyRegistered {
                    key: key.to_string(),
                });
            }
        };
        Ok((self.occupy(&mut table, key), previous))
    }

    /// 在已加锁的表里写入占位
    fn occupy(&self, table: &mut HashMap<InstanceKey, Slot>, key: &InstanceKey) -> PendingGuard {
        let token = self.generation.fetch_add(1, Ordering::Relaxed);
        table.insert(key.clone(), Slot::Pending(token));
        PendingGuard {
            table: Arc::downgrade(&self.table),
            key: key.clone(),
            token,
            armed: true,
        }
    }

    /// 正常路径上释放占位
    async fn release(&self, guard: PendingGuard) {
        release_pending(&mut *self.table.lock().await, &guard.key, guard.token);
        guard.disarm();
    }

    fn spawn_heartbeat(
        &self,
        key: InstanceKey,
        payload: Vec<u8>,
        lease: LeaseToken,
    ) -> RegistrationHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (lease_tx, lease_rx) = watch::channel(lease);
        let cancel = self.heartbeats.child_token();

        let heartbeat = Heartbeat {
            backend: self.backend.clone(),
            key: key.clone(),
            payload,
            options: self.options.clone(),
            lease: lease_tx,
            cancel: cancel.clone(),
        };
        let table = Arc::downgrade(&self.table);

        let task = tokio::spawn(async move {
            if heartbeat.run().await == HeartbeatExit::Lost {
                // 放弃续约的实例回到未注册状态，允许重新注册
                if let Some(table) = table.upgrade() {
                    let mut table = table.lock().await;
                    let owned = matches!(
                        table.get(&key),
                        Some(Slot::Active(handle)) if handle.generation == generation
                    );
                    if owned {
                        table.remove(&key);
                    }
                }
            }
        });

        RegistrationHandle {
            generation,
            lease: lease_rx,
            cancel,
            task,
            registered_at: Utc::now(),
        }
    }
}

impl Drop for RegistrationEngine {
    fn drop(&mut self) {
        // 无法在 drop 中等待任务退出，只发出取消信号；后端记录在 TTL 后过期
        self.heartbeats.cancel();
    }
}

#[async_trait]
impl Registry for RegistrationEngine {
    async fn register(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        RegistrationEngine::register(self, descriptor).await
    }

    async fn deregister(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        RegistrationEngine::deregister(self, descriptor).await
    }
}

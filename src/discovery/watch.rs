//! 注册/注销通知和服务地址表
//!
//! 后端在注册和注销时发布 `Notification`，订阅方把通知应用到自己持有的 `ServiceTable`。
//! 每个订阅方一张表，互不共享

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Register,
    Deregister,
}

/// 注册/注销通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: NotificationKind,
    pub service: String,
    pub address: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn register(service: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(NotificationKind::Register, service, address)
    }

    pub fn deregister(service: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(NotificationKind::Deregister, service, address)
    }

    fn new(event: NotificationKind, service: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            event,
            service: service.into(),
            address: address.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// 服务名 → 地址集合
#[derive(Debug, Default)]
pub struct ServiceTable {
    services: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 应用一条通知
    pub async fn apply(&self, notification: &Notification) {
        let mut services = self.services.write().await;
        match notification.event {
            NotificationKind::Register => {
                services
                    .entry(notification.service.clone())
                    .or_default()
                    .insert(notification.address.clone());
            }
            NotificationKind::Deregister => {
                if let Some(addresses) = services.get_mut(&notification.service) {
                    addresses.remove(&notification.address);
                    if addresses.is_empty() {
                        services.remove(&notification.service);
                    }
                }
            }
        }
    }

    /// 服务当前已知的地址（排序）
    pub async fn addresses(&self, service: &str) -> Vec<String> {
        self.services
            .read()
            .await
            .get(service)
            .map(|addresses| addresses.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn clear(&self) {
        self.services.write().await.clear();
    }
}

#[cfg(feature = "redis")]
pub use redis_watch::RedisWatcher;

#[cfg(feature = "redis")]
mod redis_watch {
    use super::{Notification, ServiceTable};
    use crate::error::BackendResult;
    use futures::StreamExt;
    use std::sync::Arc;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    /// 订阅 redis 通知频道并更新 `ServiceTable`
    pub struct RedisWatcher;

    impl RedisWatcher {
        /// 订阅频道并启动后台任务，取消令牌触发或连接断开时退出
        ///
        /// 订阅成功后才返回，因此返回之后发布的通知都会被接收
        pub async fn spawn(
            client: redis::Client,
            channel: String,
            table: Arc<ServiceTable>,
            cancel: CancellationToken,
        ) -> BackendResult<JoinHandle<()>> {
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(&channel).await?;
            info!(channel = %channel, "👂 Subscribed to registry notifications");

            Ok(tokio::spawn(async move {
                let mut messages = pubsub.into_on_message();
                loop {
                    let msg = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        msg = messages.next() => msg,
                    };
                    let Some(msg) = msg else {
                        warn!(channel = %channel, "⚠️ Notification stream closed");
                        break;
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "⚠️ Unreadable notification");
                            continue;
                        }
                    };
                    match Notification::from_json(&payload) {
                        Ok(notification) => {
                            debug!(
                                service = %notification.service,
                                address = %notification.address,
                                event = ?notification.event,
                                "📨 Registry notification"
                            );
                            table.apply(&notification).await;
                        }
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "⚠️ Malformed notification")
                        }
                    }
                }
                info!(channel = %channel, "🛑 Notification watcher stopped");
            }))
        }
    }
}

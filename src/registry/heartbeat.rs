//! 心跳任务
//!
//! 每个已注册实例一个后台任务：按间隔续约，失败后按重试间隔加速重试，
//! 租约在服务端失效时重新写入记录（自愈）。取消信号随时生效

use crate::discovery::backend::{LeaseBackend, LeaseToken, Renewal, call_with_timeout};
use crate::error::{Operation, Result};
use crate::registry::key::InstanceKey;
use crate::registry::options::EngineOptions;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 心跳任务退出原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatExit {
    /// 被注销或引擎关闭取消
    Cancelled,
    /// 连续失败达到上限，实例视为丢失
    Lost,
}

pub(crate) struct Heartbeat {
    pub(crate) backend: Arc<dyn LeaseBackend>,
    pub(crate) key: InstanceKey,
    /// 自愈时重新写入的记录
    pub(crate) payload: Vec<u8>,
    pub(crate) options: EngineOptions,
    pub(crate) lease: watch::Sender<LeaseToken>,
    pub(crate) cancel: CancellationToken,
}

impl Heartbeat {
    pub(crate) async fn run(self) -> HeartbeatExit {
        let backend_name = self.backend.name().to_string();
        let mut consecutive_failures: u32 = 0;
        let mut delay = self.options.heartbeat_interval;

        debug!(
            instance_key = %self.key,
            backend = %backend_name,
            interval = ?self.options.heartbeat_interval,
            "💓 Heartbeat task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                outcome = self.beat() => outcome,
            };

            match outcome {
                Ok(()) => {
                    if consecutive_failures > 0 {
                        info!(
                            instance_key = %self.key,
                            backend = %backend_name,
                            consecutive_failures,
                            "✅ Heartbeat recovered"
                        );
                    }
                    consecutive_failures = 0;
                    delay = self.options.heartbeat_interval;
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(
                        instance_key = %self.key,
                        backend = %backend_name,
                        consecutive_failures,
                        error = %e,
                        "⚠️ Heartbeat failed"
                    );

                    if let Some(max) = self.options.max_consecutive_failures {
                        if consecutive_failures >= max {
                            error!(
                                instance_key = %self.key,
                                backend = %backend_name,
                                consecutive_failures,
                                "❌ Heartbeat gave up, instance considered lost"
                            );
                            return HeartbeatExit::Lost;
                        }
                    }
                    delay = self.options.retry_delay;
                }
            }
        }

        info!(instance_key = %self.key, backend = %backend_name, "🛑 Heartbeat task stopped");
        HeartbeatExit::Cancelled
    }

    /// 续约一次，租约失效时重新写入
    async fn beat(&self) -> Result<()> {
        let key = self.key.to_string();
        let lease = self.lease.borrow().clone();

        let renewal = call_with_timeout(
            Operation::Renew,
            &key,
            self.options.renew_timeout,
            self.backend.renew(&self.key, &lease),
        )
        .await?;

        match renewal {
            Renewal::Alive => {
                debug!(instance_key = %self.key, lease = ?lease, "💓 Heartbeat sent");
                Ok(())
            }
            Renewal::Expired => {
                warn!(
                    instance_key = %self.key,
                    lease = ?lease,
                    "🔄 Lease expired on backend, re-registering"
                );
                let fresh = call_with_timeout(
                    Operation::Put,
                    &key,
                    self.options.call_timeout,
                    self.backend
                        .put_with_lease(&self.key, &self.payload, self.options.lease_ttl),
                )
                .await?;
                info!(instance_key = %self.key, lease = ?fresh, "✅ Instance re-registered");
                self.lease.send_replace(fresh);
                Ok(())
            }
        }
    }
}

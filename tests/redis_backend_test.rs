//! redis 后端集成测试
//!
//! 需要运行中的 redis 实例，默认忽略：
//! `cargo test --test redis_backend_test -- --ignored`
//!
//! ```bash
//! docker run -d --name redis-test -p 6379:6379 redis:7
//! ```

#![cfg(feature = "redis")]

use flare_registry_core::discovery::backend::{RedisBackend, RedisOptions};
use flare_registry_core::{
    BackendResolver, EngineOptions, InstanceKey, LeaseBackend, RegistrationEngine, Renewal,
    Resolver, ResolverOptions, ServiceDescriptor, ServiceTable,
};
use flare_registry_core::utils::normalize;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

/// redis 地址，可通过 REDIS_URL 覆盖
fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

async fn connect() -> Arc<RedisBackend> {
    let backend = RedisBackend::connect(RedisOptions {
        url: redis_url(),
        namespace: "flare-registry-test".to_string(),
        ..RedisOptions::default()
    })
    .await
    .expect("Failed to connect to redis");
    Arc::new(backend)
}

fn fast_options() -> EngineOptions {
    EngineOptions::default()
        .with_lease_ttl(Duration::from_secs(3))
        .with_heartbeat_interval(Duration::from_secs(1))
}

#[tokio::test]
#[ignore]
async fn test_redis_register_resolve_deregister() -> anyhow::Result<()> {
    let backend = connect().await;
    let engine = RegistrationEngine::new(backend.clone(), fast_options());
    let resolver = BackendResolver::new(backend.clone(), ResolverOptions::default());
    let descriptor = ServiceDescriptor::new("redis-test-echo", "127.0.0.1:19090").with_tag("env", "test");

    engine.register(&descriptor).await?;
    sleep(Duration::from_secs(5)).await;

    let result = resolver.resolve("redis-test-echo").await?;
    assert_eq!(result.instances.len(), 1);
    assert_eq!(result.instances[0].address(), "127.0.0.1:19090");

    engine.deregister(&descriptor).await?;
    let result = resolver.resolve("redis-test-echo").await?;
    assert!(result.instances.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_expire_reports_missing_key() -> anyhow::Result<()> {
    let backend = connect().await;
    let key = InstanceKey::new(
        "redis-test-expire",
        normalize("127.0.0.1:19091").expect("address"),
    );
    let lease = backend
        .put_with_lease(&key, br#"{"address":"127.0.0.1:19091"}"#, Duration::from_secs(1))
        .await?;

    assert_eq!(backend.renew(&key, &lease).await?, Renewal::Alive);
    sleep(Duration::from_millis(2500)).await;
    assert_eq!(backend.renew(&key, &lease).await?, Renewal::Expired);
    Ok(())
}

#[tokio::test]
#[ignore]
async fn test_redis_notifications_feed_subscriber_table() -> anyhow::Result<()> {
    let backend = connect().await;
    let table = Arc::new(ServiceTable::new());
    let cancel = CancellationToken::new();
    let watcher = backend
        .watch("redis-test-watch", table.clone(), cancel.clone())
        .await?;

    let engine = RegistrationEngine::new(backend.clone(), fast_options());
    let descriptor = ServiceDescriptor::new("redis-test-watch", "127.0.0.1:19092");
    engine.register(&descriptor).await?;
    sleep(Duration::from_millis(300)).await;
    assert_eq!(table.addresses("redis-test-watch").await, vec!["127.0.0.1:19092"]);

    engine.deregister(&descriptor).await?;
    sleep(Duration::from_millis(300)).await;
    assert!(table.addresses("redis-test-watch").await.is_empty());

    cancel.cancel();
    watcher.await.expect("watcher task");
    Ok(())
}

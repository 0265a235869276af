//! 注册引擎集成测试
//!
//! 使用内存后端和暂停的 tokio 时钟，心跳、租约过期和重试都可以确定性地推进。

use async_trait::async_trait;
use flare_registry_core::{
    BackendError, BackendResolver, BackendResult, DuplicatePolicy, EngineOptions, InstanceKey,
    IpResolver, LeaseBackend, LeaseToken, MemoryBackend, Operation, RawEntry, RegistrationEngine,
    RegistryError, Renewal, Resolver, ResolverOptions, ServiceDescriptor, TargetInfo, TargetMode,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const TTL: Duration = Duration::from_secs(10);
const INTERVAL: Duration = Duration::from_secs(3);

struct FixedIp;

impl IpResolver for FixedIp {
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        Some(Ipv4Addr::new(10, 1, 2, 3))
    }
}

/// 创建测试用的引擎配置：TTL 10s，心跳 3s，重试 1s
fn test_options() -> EngineOptions {
    EngineOptions::default()
        .with_lease_ttl(TTL)
        .with_heartbeat_interval(INTERVAL)
        .with_retry_delay(Duration::from_secs(1))
        .with_call_timeout(Duration::from_secs(3))
        .with_renew_timeout(Duration::from_secs(2))
}

fn setup(options: EngineOptions) -> (Arc<MemoryBackend>, RegistrationEngine, BackendResolver) {
    let backend = Arc::new(MemoryBackend::new());
    let engine = RegistrationEngine::new(backend.clone(), options).with_ip_resolver(Arc::new(FixedIp));
    let resolver = BackendResolver::new(backend.clone(), ResolverOptions::default());
    (backend, engine, resolver)
}

/// 创建测试用的服务描述符
fn echo(port: u16) -> ServiceDescriptor {
    ServiceDescriptor::new("echo", format!("127.0.0.1:{port}"))
        .with_weight(5)
        .with_tag("idc", "hd1")
}

async fn resolved_addresses(resolver: &BackendResolver, desc: &str) -> Vec<String> {
    resolver
        .resolve(desc)
        .await
        .unwrap()
        .instances
        .iter()
        .map(|i| i.address().to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn register_then_resolve_returns_instance() {
    let (_backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();

    let result = resolver.resolve("echo").await.unwrap();
    assert_eq!(result.cache_key, "echo");
    assert_eq!(result.instances.len(), 1);

    let instance = &result.instances[0];
    assert_eq!(instance.address(), "127.0.0.1:8888");
    assert_eq!(instance.protocol(), "tcp");
    assert_eq!(instance.weight(), 5);
    assert_eq!(instance.tag("idc"), Some("hd1"));
}

#[tokio::test(start_paused = true)]
async fn deregister_removes_instance() {
    let (backend, engine, resolver) = setup(test_options());
    let descriptor = echo(8888);
    engine.register(&descriptor).await.unwrap();
    engine.deregister(&descriptor).await.unwrap();

    assert!(resolver.resolve("echo").await.unwrap().is_empty());
    assert!(backend.is_empty().await);
    assert!(!engine.is_registered(&descriptor).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_instance_alive_past_ttl() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();

    sleep(TTL * 4).await;

    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["127.0.0.1:8888"]);
    assert!(backend.call_count(Operation::Renew).await >= 12);
}

#[tokio::test(start_paused = true)]
async fn dropped_engine_lets_lease_expire() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();

    drop(engine);
    sleep(TTL + Duration::from_secs(1)).await;

    assert!(resolver.resolve("echo").await.unwrap().is_empty());
    assert!(backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn dropped_engine_stops_every_heartbeat() {
    let (backend, engine, _resolver) = setup(test_options());
    engine.register(&echo(8001)).await.unwrap();
    engine.register(&echo(8002)).await.unwrap();
    sleep(INTERVAL + Duration::from_millis(500)).await;
    assert!(backend.call_count(Operation::Renew).await >= 2);

    drop(engine);
    let renewals = backend.call_count(Operation::Renew).await;
    sleep(INTERVAL * 3).await;
    assert_eq!(backend.call_count(Operation::Renew).await, renewals);
}

#[tokio::test(start_paused = true)]
async fn deregister_stops_heartbeat() {
    let (backend, engine, _resolver) = setup(test_options());
    let descriptor = echo(8888);
    engine.register(&descriptor).await.unwrap();
    sleep(INTERVAL * 2 + Duration::from_millis(500)).await;
    engine.deregister(&descriptor).await.unwrap();

    let renewals = backend.call_count(Operation::Renew).await;
    let puts = backend.call_count(Operation::Put).await;
    sleep(INTERVAL * 5).await;

    assert_eq!(backend.call_count(Operation::Renew).await, renewals);
    assert_eq!(backend.call_count(Operation::Put).await, puts);
    assert!(backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn duplicate_register_is_rejected() {
    let (backend, engine, _resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();

    let err = engine.register(&echo(8888).with_weight(1)).await.unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    assert_eq!(backend.len().await, 1);
    assert_eq!(backend.call_count(Operation::Put).await, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_register_replaces_with_replace_policy() {
    let (backend, engine, resolver) =
        setup(test_options().with_duplicate_policy(DuplicatePolicy::Replace));
    engine.register(&echo(8888)).await.unwrap();
    engine.register(&echo(8888).with_weight(7)).await.unwrap();

    let result = resolver.resolve("echo").await.unwrap();
    assert_eq!(result.instances.len(), 1);
    assert_eq!(result.instances[0].weight(), 7);
    assert_eq!(engine.registrations().await.len(), 1);

    sleep(TTL * 2).await;
    assert_eq!(backend.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn deregister_unknown_instance_fails() {
    let (backend, engine, _resolver) = setup(test_options());
    let err = engine.deregister(&echo(8888)).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotRegistered { .. }));
    assert_eq!(backend.call_count(Operation::Delete).await, 0);
}

#[tokio::test(start_paused = true)]
async fn second_deregister_fails() {
    let (backend, engine, _resolver) = setup(test_options());
    let descriptor = echo(8888);
    engine.register(&descriptor).await.unwrap();

    engine.deregister(&descriptor).await.unwrap();
    let err = engine.deregister(&descriptor).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotRegistered { .. }));
    assert_eq!(backend.call_count(Operation::Delete).await, 1);
}

#[tokio::test(start_paused = true)]
async fn instances_of_one_service_are_isolated() {
    let (_backend, engine, resolver) = setup(test_options());
    let first = echo(8001);
    let second = echo(8002).with_weight(20);
    let third = echo(8003).with_weight(30);
    for descriptor in [&first, &second, &third] {
        engine.register(descriptor).await.unwrap();
    }

    assert_eq!(resolver.resolve("echo").await.unwrap().len(), 3);

    engine.deregister(&second).await.unwrap();

    let result = resolver.resolve("echo").await.unwrap();
    let remaining: Vec<(String, u32)> = result
        .instances
        .iter()
        .map(|i| (i.address().to_string(), i.weight()))
        .collect();
    assert_eq!(
        remaining,
        vec![
            ("127.0.0.1:8001".to_string(), 5),
            ("127.0.0.1:8003".to_string(), 30)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_delete_still_clears_local_state() {
    let (backend, engine, _resolver) = setup(test_options());
    let descriptor = echo(8888);
    engine.register(&descriptor).await.unwrap();
    sleep(INTERVAL + Duration::from_millis(500)).await;

    backend.fail_next(Operation::Delete, 1).await;
    let err = engine.deregister(&descriptor).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Backend {
            op: Operation::Delete,
            ..
        }
    ));
    assert!(!engine.is_registered(&descriptor).await.unwrap());

    let renewals = backend.call_count(Operation::Renew).await;
    sleep(INTERVAL * 3).await;
    assert_eq!(backend.call_count(Operation::Renew).await, renewals);

    let err = engine.deregister(&descriptor).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotRegistered { .. }));

    // 记录留在后端，直到租约过期
    sleep(TTL).await;
    assert!(backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn abandoned_register_leaves_key_free() {
    let (backend, engine, _resolver) = setup(test_options());
    let descriptor = echo(9000);
    backend.set_latency(Duration::from_secs(1)).await;

    let attempt =
        tokio::time::timeout(Duration::from_millis(200), engine.register(&descriptor)).await;
    assert!(attempt.is_err());
    assert!(!engine.is_registered(&descriptor).await.unwrap());
    assert!(engine.registrations().await.is_empty());

    backend.set_latency(Duration::ZERO).await;
    engine.register(&descriptor).await.unwrap();
    assert!(engine.is_registered(&descriptor).await.unwrap());
    engine.deregister(&descriptor).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn abandoned_deregister_leaves_key_free() {
    let (backend, engine, _resolver) = setup(test_options());
    let descriptor = echo(9000);
    engine.register(&descriptor).await.unwrap();
    backend.set_latency(Duration::from_secs(1)).await;

    let attempt =
        tokio::time::timeout(Duration::from_millis(200), engine.deregister(&descriptor)).await;
    assert!(attempt.is_err());
    assert!(!engine.is_registered(&descriptor).await.unwrap());

    // 心跳已经停止
    let renewals = backend.call_count(Operation::Renew).await;
    sleep(INTERVAL * 3).await;
    assert_eq!(backend.call_count(Operation::Renew).await, renewals);

    backend.set_latency(Duration::ZERO).await;
    engine.register(&descriptor).await.unwrap();
    assert!(engine.is_registered(&descriptor).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn failed_replace_drops_old_registration() {
    let (backend, engine, _resolver) =
        setup(test_options().with_duplicate_policy(DuplicatePolicy::Replace));
    engine.register(&echo(8888)).await.unwrap();

    backend.fail_next(Operation::Put, 1).await;
    let err = engine
        .register(&echo(8888).with_weight(7))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::Backend { op: Operation::Put, .. }));
    assert!(!engine.is_registered(&echo(8888)).await.unwrap());

    // 旧记录不再续约，TTL 到期后被后端回收
    assert_eq!(backend.len().await, 1);
    sleep(TTL + Duration::from_secs(1)).await;
    assert!(backend.is_empty().await);

    engine.register(&echo(8888)).await.unwrap();
    assert_eq!(backend.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_put_leaves_no_state() {
    let (backend, engine, _resolver) = setup(test_options());
    backend.fail_next(Operation::Put, 1).await;

    let err = engine.register(&echo(8888)).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Backend {
            op: Operation::Put,
            source: BackendError::Unavailable(_),
            ..
        }
    ));
    assert!(err.is_retryable());
    assert!(!engine.is_registered(&echo(8888)).await.unwrap());
    assert!(engine.registrations().await.is_empty());

    engine.register(&echo(8888)).await.unwrap();
    assert_eq!(backend.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_put_times_out() {
    let (backend, engine, _resolver) = setup(test_options());
    backend.set_latency(Duration::from_secs(10)).await;

    let err = engine.register(&echo(8888)).await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::Timeout {
            op: Operation::Put,
            ..
        }
    ));
    assert!(!engine.is_registered(&echo(8888)).await.unwrap());

    backend.set_latency(Duration::ZERO).await;
    engine.register(&echo(8888)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn transient_renew_failures_are_retried() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();
    backend.fail_next(Operation::Renew, 2).await;

    sleep(TTL * 2).await;

    assert!(engine.is_registered(&echo(8888)).await.unwrap());
    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["127.0.0.1:8888"]);
    // 失败的两次之后按重试间隔立即补上
    assert!(backend.call_count(Operation::Renew).await >= 7);
    assert_eq!(backend.call_count(Operation::Put).await, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_lease_is_healed_by_heartbeat() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();
    let first_lease = engine.registrations().await[0].lease.clone();

    backend.revoke_all_leases().await;
    assert!(resolver.resolve("echo").await.unwrap().is_empty());

    sleep(INTERVAL + Duration::from_millis(100)).await;

    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["127.0.0.1:8888"]);
    assert_eq!(backend.call_count(Operation::Put).await, 2);
    assert_ne!(engine.registrations().await[0].lease, first_lease);
}

#[tokio::test(start_paused = true)]
async fn failure_ceiling_marks_instance_lost() {
    let (backend, engine, _resolver) =
        setup(test_options().with_max_consecutive_failures(Some(3)));
    engine.register(&echo(8888)).await.unwrap();
    backend.set_available(false).await;

    sleep(TTL).await;
    assert!(!engine.is_registered(&echo(8888)).await.unwrap());
    assert_eq!(backend.call_count(Operation::Renew).await, 3);

    backend.set_available(true).await;
    engine.register(&echo(8888)).await.unwrap();
    assert!(engine.is_registered(&echo(8888)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn unlimited_retries_recover_after_outage() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8888)).await.unwrap();

    backend.set_available(false).await;
    sleep(TTL * 3).await;
    assert!(engine.is_registered(&echo(8888)).await.unwrap());

    backend.set_available(true).await;
    sleep(Duration::from_secs(2)).await;

    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["127.0.0.1:8888"]);
    assert_eq!(backend.call_count(Operation::Put).await, 2);
}

#[tokio::test(start_paused = true)]
async fn wildcard_address_is_normalized() {
    let (backend, engine, resolver) = setup(test_options());
    let descriptor = ServiceDescriptor::new("echo", ":8888");
    engine.register(&descriptor).await.unwrap();

    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["10.1.2.3:8888"]);

    // 同一实例的其他写法指向同一个键
    engine
        .deregister(&ServiceDescriptor::new("echo", "0.0.0.0:8888"))
        .await
        .unwrap();
    assert!(backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn zero_weight_resolves_to_default() {
    let (_backend, engine, resolver) = setup(test_options());
    engine
        .register(&ServiceDescriptor::new("echo", "127.0.0.1:8888").with_weight(0))
        .await
        .unwrap();

    let result = resolver.resolve("echo").await.unwrap();
    assert_eq!(result.instances[0].weight(), 10);
}

#[tokio::test(start_paused = true)]
async fn invalid_descriptors_never_reach_backend() {
    let (backend, engine, _resolver) = setup(test_options());

    let err = engine
        .register(&ServiceDescriptor::new("echo", "127.0.0.1:0"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidPort { .. }));

    let err = engine
        .register(&ServiceDescriptor::new("", "127.0.0.1:80"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidDescriptor(_)));

    let err = engine
        .register(&ServiceDescriptor::new("echo/admin", "127.0.0.1:80"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidDescriptor(_)));

    assert_eq!(backend.call_count(Operation::Put).await, 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_registers_have_one_winner() {
    let (backend, engine, _resolver) = setup(test_options());
    backend.set_latency(Duration::from_secs(1)).await;

    let descriptor = echo(8888);
    let (a, b) = tokio::join!(engine.register(&descriptor), engine.register(&descriptor));

    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let err = a.err().or(b.err()).unwrap();
    assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    assert_eq!(backend.call_count(Operation::Put).await, 1);
}

#[tokio::test(start_paused = true)]
async fn deregister_while_register_in_flight_fails() {
    let (backend, engine, _resolver) = setup(test_options());
    backend.set_latency(Duration::from_secs(1)).await;

    let descriptor = echo(8888);
    let (registered, deregistered) =
        tokio::join!(engine.register(&descriptor), engine.deregister(&descriptor));

    registered.unwrap();
    assert!(matches!(
        deregistered,
        Err(RegistryError::NotRegistered { .. })
    ));
    assert!(engine.is_registered(&descriptor).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn shutdown_deregisters_everything() {
    let (backend, engine, _resolver) = setup(test_options());
    engine.register(&echo(8001)).await.unwrap();
    engine.register(&echo(8002)).await.unwrap();
    engine
        .register(&ServiceDescriptor::new("ping", "127.0.0.1:9000"))
        .await
        .unwrap();

    let keys: Vec<String> = engine
        .registrations()
        .await
        .iter()
        .map(|r| r.key.to_string())
        .collect();
    assert_eq!(
        keys,
        vec!["echo:127.0.0.1:8001", "echo:127.0.0.1:8002", "ping:127.0.0.1:9000"]
    );

    engine.shutdown().await.unwrap();
    assert!(engine.registrations().await.is_empty());
    assert!(backend.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn resolve_skips_bad_and_unhealthy_entries() {
    let (backend, engine, resolver) = setup(test_options());
    engine.register(&echo(8001)).await.unwrap();
    engine.register(&echo(8002)).await.unwrap();
    backend.insert_raw("echo", "garbage", "not json").await;
    assert!(backend.set_healthy("echo", "127.0.0.1:8002", false).await);

    assert_eq!(resolved_addresses(&resolver, "echo").await, vec!["127.0.0.1:8001"]);

    let lenient = BackendResolver::new(
        backend.clone(),
        ResolverOptions {
            healthy_only: false,
            ..ResolverOptions::default()
        },
    );
    assert_eq!(
        resolved_addresses(&lenient, "echo").await,
        vec!["127.0.0.1:8001", "127.0.0.1:8002"]
    );
}

#[tokio::test(start_paused = true)]
async fn tag_scoped_targets_filter_instances() {
    let (backend, engine, _resolver) = setup(test_options());
    engine.register(&echo(8001)).await.unwrap();
    engine
        .register(&ServiceDescriptor::new("echo", "127.0.0.1:8002").with_tag("idc", "hd2"))
        .await
        .unwrap();

    let resolver = BackendResolver::new(
        backend.clone(),
        ResolverOptions {
            target_mode: TargetMode::WithTags,
            ..ResolverOptions::default()
        },
    );
    let desc = resolver.target(&TargetInfo::new("echo").with_tag("idc", "hd1"));
    assert_eq!(desc, "echo?idc=hd1");
    assert_eq!(resolved_addresses(&resolver, &desc).await, vec!["127.0.0.1:8001"]);

    let untagged = resolver.target(&TargetInfo::new("echo"));
    assert_eq!(resolved_addresses(&resolver, &untagged).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn resolve_unknown_service_is_empty() {
    let (_backend, _engine, resolver) = setup(test_options());
    let result = resolver.resolve("nobody").await.unwrap();
    assert!(result.is_empty());
    assert_eq!(result.cache_key, "nobody");
}

#[tokio::test(start_paused = true)]
async fn resolver_name_includes_namespace() {
    let (_backend, _engine, resolver) = setup(test_options());
    assert_eq!(resolver.name(), "memory:registry");
}

/// 对任何查询都报告"应用不存在"的后端
struct MissingApplication;

#[async_trait]
impl LeaseBackend for MissingApplication {
    fn name(&self) -> &str {
        "missing"
    }

    async fn put_with_lease(
        &self,
        _key: &InstanceKey,
        _value: &[u8],
        _ttl: Duration,
    ) -> BackendResult<LeaseToken> {
        Err(BackendError::unavailable("read only"))
    }

    async fn renew(&self, _key: &InstanceKey, _lease: &LeaseToken) -> BackendResult<Renewal> {
        Ok(Renewal::Expired)
    }

    async fn delete(&self, _key: &InstanceKey) -> BackendResult<()> {
        Ok(())
    }

    async fn query(&self, service_name: &str) -> BackendResult<Vec<RawEntry>> {
        Err(BackendError::NotFound(format!("application {service_name}")))
    }
}

#[tokio::test]
async fn missing_application_maps_to_service_not_found() {
    let resolver = BackendResolver::new(Arc::new(MissingApplication), ResolverOptions::default());
    let err = resolver.resolve("echo").await.unwrap_err();
    assert!(matches!(
        err,
        RegistryError::ServiceNotFound { ref service } if service == "echo"
    ));
    assert_eq!(resolver.name(), "missing");
}

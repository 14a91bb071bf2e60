//! Tests for async resource factories and the tokio spawner

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prometheus_kernel::builders::{build_driver, ExecutiveBuilder};
use prometheus_kernel::config::{DriverConfig, ExecutiveConfig};
use prometheus_kernel::core::{
    CapabilityRegistry, InvocationBuilder, InvocationContext, KernelError, MetadataBuilder, ResourceError, Spawn,
    ValueResource,
};
use prometheus_kernel::executive::CpuTopology;
use prometheus_kernel::runtime::{AsyncResourceFactory, SpawnedFactory, TokioSpawner};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tokio_spawner_spawn() {
    let spawner = TokioSpawner::current();

    let (tx, rx) = tokio::sync::oneshot::channel();
    spawner.spawn(async move {
        tx.send(123).unwrap();
    });

    let result = rx.await.expect("oneshot result");
    assert_eq!(result, 123);
}

struct Catalog {
    fail: bool,
}

#[async_trait]
impl AsyncResourceFactory for Catalog {
    type Resource = ValueResource<Vec<String>>;

    async fn create(&self) -> Result<Self::Resource, ResourceError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if self.fail {
            return Err(ResourceError::new("catalog offline"));
        }
        Ok(ValueResource::new(vec!["espresso".to_owned(), "ristretto".to_owned()]))
    }
}

#[test]
fn test_spawned_factory_settles_from_runtime() {
    let spawner = TokioSpawner::with_worker_threads(1).unwrap();
    assert!(format!("{spawner:?}").contains("owns_runtime: true"));

    let mut metadata = MetadataBuilder::new();
    let catalog = metadata.process_resource(
        SpawnedFactory::new(Catalog { fail: false }, spawner.clone()).into_definition("catalog"),
    );
    let mut menu = InvocationBuilder::new("menu", |ctx: &InvocationContext<'_>| {
        let items = ctx.object::<Vec<String>>(0).ok_or_else(|| anyhow::anyhow!("no catalog"))?;
        anyhow::ensure!(items.len() == 2, "catalog incomplete");
        Ok(())
    });
    menu.require(catalog);
    metadata.invocation(menu);

    let mut broken = InvocationBuilder::new("broken", |_ctx: &InvocationContext<'_>| Ok(()));
    broken.invocation_resource(SpawnedFactory::new(Catalog { fail: true }, spawner).into_definition("offline"));
    metadata.invocation(broken);

    let executive = Arc::new(
        ExecutiveBuilder::new(ExecutiveConfig {
            pin_threads: false,
            thread_stack_size: 256 * 1024,
            ..ExecutiveConfig::default()
        })
        .with_topology(CpuTopology::from_core_layout(vec![vec![0]]).unwrap())
        .build()
        .unwrap(),
    );
    let driver = build_driver(
        Arc::clone(&executive),
        metadata.build(CapabilityRegistry::new()).unwrap(),
        &DriverConfig { poll_interval_ms: 2 },
    )
    .unwrap();

    driver.invoke("menu").unwrap().wait(Duration::from_secs(10)).unwrap();
    let err = driver.invoke("broken").unwrap().wait(Duration::from_secs(10)).unwrap_err();
    assert!(matches!(err, KernelError::ResourceLoad { ref cause, .. } if cause.message() == "catalog offline"));
    executive.stop_managing();
}

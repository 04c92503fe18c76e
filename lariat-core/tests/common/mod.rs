#![allow(dead_code)]

use lariat_core::config::{CircuitBreakerConfig, ResourceCapacity, RetryConfig};
use lariat_core::{
    MockHypervisor, OperationId, OperationRecord, Orchestrator, OrchestratorConfig,
};
use std::sync::Arc;
use std::time::Duration;

/// Route engine logs through the test harness when RUST_LOG is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with fast retries and a small pool, suitable for tests.
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        capacity: ResourceCapacity {
            cpu: 4,
            memory_mb: 4096,
            disk_gb: 100,
        },
        retry: RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: false,
        },
        breaker: CircuitBreakerConfig {
            failure_threshold: 50,
            cooldown: Duration::from_millis(20),
        },
        call_timeout: Duration::from_secs(1),
        ..Default::default()
    }
}

pub fn engine() -> (Arc<Orchestrator>, Arc<MockHypervisor>) {
    engine_with(test_config(), MockHypervisor::new())
}

pub fn engine_with(
    config: OrchestratorConfig,
    hypervisor: MockHypervisor,
) -> (Arc<Orchestrator>, Arc<MockHypervisor>) {
    init_tracing();
    let hv = Arc::new(hypervisor);
    let orch = Orchestrator::new(config, hv.clone());
    (orch, hv)
}

/// Poll an operation until it reaches a terminal status.
pub async fn wait_op(orch: &Orchestrator, operation: OperationId) -> OperationRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let record = orch.query_operation(operation).unwrap();
        if record.status.is_terminal() {
            return record;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "operation {} did not reach a terminal status",
            operation
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

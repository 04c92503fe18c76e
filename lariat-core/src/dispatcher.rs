//! Command dispatcher: the only path to the hypervisor boundary.
//!
//! Read-only queries retry transient failures with bounded exponential
//! backoff. Mutating commands are re-issued only when the hypervisor's
//! observed state proves re-issue is safe; a command that already landed
//! (the ack was lost) is treated as success, not error. A circuit breaker
//! trips after consecutive transient failures across all VMs and
//! short-circuits further dispatch until a cool-down elapses.

use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{CircuitBreakerConfig, OrchestratorConfig, RetryConfig};
use crate::error::{LariatError, LariatResult};
use crate::hypervisor::{Hypervisor, HypervisorVmState};
use crate::types::{VmId, VmSpec};

/// Successful dispatch, with the number of retries it took.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub retries: u32,
}

/// Failed dispatch, with the retries spent before giving up.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: LariatError,
    pub retries: u32,
}

impl From<DispatchFailure> for LariatError {
    fn from(failure: DispatchFailure) -> Self {
        failure.error
    }
}

pub type DispatchResult<T> = Result<Dispatched<T>, DispatchFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen,
}

/// Trips open after N consecutive transient failures; after the cool-down a
/// single probe call is let through to test recovery.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    /// Check whether a call may proceed. While open and cooling down this
    /// fails fast with `HypervisorUnavailable`.
    fn preflight(&self, operation: &str) -> LariatResult<()> {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed { .. } | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open { since } => {
                if since.elapsed() >= self.config.cooldown {
                    debug!(operation, "circuit breaker half-open, allowing probe");
                    *state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(LariatError::HypervisorUnavailable {
                        operation: operation.to_string(),
                        attempts: 0,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        if *state != (BreakerState::Closed { consecutive_failures: 0 }) {
            if matches!(*state, BreakerState::HalfOpen) {
                debug!("circuit breaker closed after successful probe");
            }
            *state = BreakerState::Closed {
                consecutive_failures: 0,
            };
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        match *state {
            BreakerState::Closed {
                consecutive_failures,
            } => {
                let failures = consecutive_failures + 1;
                if failures >= self.config.failure_threshold {
                    warn!(failures, "circuit breaker opened");
                    *state = BreakerState::Open {
                        since: Instant::now(),
                    };
                } else {
                    *state = BreakerState::Closed {
                        consecutive_failures: failures,
                    };
                }
            }
            BreakerState::HalfOpen => {
                warn!("circuit breaker re-opened after failed probe");
                *state = BreakerState::Open {
                    since: Instant::now(),
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), BreakerState::Open { .. })
    }
}

pub struct CommandDispatcher {
    hypervisor: Arc<dyn Hypervisor>,
    retry: RetryConfig,
    call_timeout: Duration,
    breaker: CircuitBreaker,
}

impl CommandDispatcher {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, config: &OrchestratorConfig) -> Self {
        Self {
            hypervisor,
            retry: config.retry.clone(),
            call_timeout: config.call_timeout,
            breaker: CircuitBreaker::new(config.breaker.clone()),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.retry.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = ((self.retry.base_delay.as_millis() as f64) * factor)
            .min(self.retry.max_delay.as_millis() as f64);
        let mut delay = Duration::from_millis(capped as u64);
        if self.retry.jitter {
            delay = delay.mul_f64(rand::thread_rng().gen_range(0.5..1.5));
        }
        delay
    }

    /// One call against the boundary; a timeout counts as transient.
    async fn call_once<T, Fut>(&self, operation: &str, fut: Fut) -> LariatResult<T>
    where
        Fut: Future<Output = LariatResult<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(LariatError::Timeout {
                operation: operation.to_string(),
                duration: self.call_timeout,
            }),
        }
    }

    /// Retry loop for read-only/idempotent queries: every transient failure
    /// is retried with backoff up to the configured budget.
    async fn dispatch_query<T, F, Fut>(&self, operation: &str, call: F) -> DispatchResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = LariatResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if let Err(error) = self.breaker.preflight(operation) {
                return Err(DispatchFailure {
                    error,
                    retries: attempt - 1,
                });
            }
            match self.call_once(operation, call()).await {
                Ok(value) => {
                    self.breaker.record_success();
                    return Ok(Dispatched {
                        value,
                        retries: attempt - 1,
                    });
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure();
                    if attempt >= self.retry.max_attempts {
                        warn!(operation, attempt, error = %e, "retry budget exhausted");
                        return Err(DispatchFailure {
                            error: LariatError::HypervisorUnavailable {
                                operation: operation.to_string(),
                                attempts: attempt,
                            },
                            retries: attempt - 1,
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    debug!(operation, attempt, ?delay, error = %e, "transient failure, backing off");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => {
                    self.breaker.record_success();
                    return Err(DispatchFailure {
                        error,
                        retries: attempt - 1,
                    });
                }
            }
        }
    }

    /// Retry loop for state-mutating commands. After a transient failure the
    /// hypervisor is probed: if it already reports the command's target
    /// state, the lost ack is treated as success; if it reports anything
    /// else, re-issuing is provably safe and the command is retried; if the
    /// probe itself fails, idempotency cannot be proven and dispatch gives
    /// up.
    async fn dispatch_mutating<F, Fut>(
        &self,
        operation: &str,
        vm: VmId,
        target: Option<HypervisorVmState>,
        call: F,
    ) -> DispatchResult<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = LariatResult<()>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if let Err(error) = self.breaker.preflight(operation) {
                return Err(DispatchFailure {
                    error,
                    retries: attempt - 1,
                });
            }
            match self.call_once(operation, call()).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(Dispatched {
                        value: (),
                        retries: attempt - 1,
                    });
                }
                Err(e) if e.is_transient() => {
                    self.breaker.record_failure();
                    let target = match target {
                        Some(t) => t,
                        None => {
                            // No observable target state: not provably
                            // idempotent, never re-issued.
                            return Err(DispatchFailure {
                                error: LariatError::HypervisorUnavailable {
                                    operation: operation.to_string(),
                                    attempts: attempt,
                                },
                                retries: attempt - 1,
                            });
                        }
                    };
                    let probe = self
                        .call_once("query-state", self.hypervisor.query_state(vm))
                        .await;
                    match probe {
                        Ok(observed) if observed == target => {
                            debug!(operation, %vm, ?observed, "command already applied, treating lost ack as success");
                            self.breaker.record_success();
                            return Ok(Dispatched {
                                value: (),
                                retries: attempt - 1,
                            });
                        }
                        Ok(observed) => {
                            if attempt >= self.retry.max_attempts {
                                warn!(operation, %vm, attempt, "retry budget exhausted");
                                return Err(DispatchFailure {
                                    error: LariatError::HypervisorUnavailable {
                                        operation: operation.to_string(),
                                        attempts: attempt,
                                    },
                                    retries: attempt - 1,
                                });
                            }
                            let delay = self.backoff_delay(attempt);
                            debug!(operation, %vm, ?observed, attempt, ?delay, "command not applied, re-issuing after backoff");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(probe_err) => {
                            warn!(operation, %vm, error = %probe_err, "idempotency probe failed, giving up");
                            return Err(DispatchFailure {
                                error: LariatError::HypervisorUnavailable {
                                    operation: operation.to_string(),
                                    attempts: attempt,
                                },
                                retries: attempt - 1,
                            });
                        }
                    }
                }
                Err(error) => {
                    self.breaker.record_success();
                    return Err(DispatchFailure {
                        error,
                        retries: attempt - 1,
                    });
                }
            }
        }
    }

    /// Single-shot dispatch for commands with no idempotency story.
    async fn dispatch_once<T, Fut>(&self, operation: &str, fut: Fut) -> DispatchResult<T>
    where
        Fut: Future<Output = LariatResult<T>>,
    {
        if let Err(error) = self.breaker.preflight(operation) {
            return Err(DispatchFailure { error, retries: 0 });
        }
        match self.call_once(operation, fut).await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(Dispatched { value, retries: 0 })
            }
            Err(e) if e.is_transient() => {
                self.breaker.record_failure();
                Err(DispatchFailure {
                    error: LariatError::HypervisorUnavailable {
                        operation: operation.to_string(),
                        attempts: 1,
                    },
                    retries: 0,
                })
            }
            Err(error) => {
                self.breaker.record_success();
                Err(DispatchFailure { error, retries: 0 })
            }
        }
    }

    pub async fn create(&self, vm: VmId, name: &str, spec: &VmSpec) -> DispatchResult<String> {
        self.dispatch_once("create", self.hypervisor.create(vm, name, spec))
            .await
    }

    pub async fn destroy(&self, vm: VmId) -> DispatchResult<()> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_mutating("destroy", vm, Some(HypervisorVmState::Unknown), move || {
            let hv = Arc::clone(&hv);
            async move { hv.destroy(vm).await }
        })
        .await
    }

    pub async fn start(&self, vm: VmId) -> DispatchResult<()> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_mutating("start", vm, Some(HypervisorVmState::Running), move || {
            let hv = Arc::clone(&hv);
            async move { hv.start(vm).await }
        })
        .await
    }

    pub async fn stop(&self, vm: VmId) -> DispatchResult<()> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_mutating("stop", vm, Some(HypervisorVmState::Stopped), move || {
            let hv = Arc::clone(&hv);
            async move { hv.stop(vm).await }
        })
        .await
    }

    pub async fn pause(&self, vm: VmId) -> DispatchResult<()> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_mutating("pause", vm, Some(HypervisorVmState::Paused), move || {
            let hv = Arc::clone(&hv);
            async move { hv.pause(vm).await }
        })
        .await
    }

    pub async fn resume(&self, vm: VmId) -> DispatchResult<()> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_mutating("resume", vm, Some(HypervisorVmState::Running), move || {
            let hv = Arc::clone(&hv);
            async move { hv.resume(vm).await }
        })
        .await
    }

    pub async fn query_state(&self, vm: VmId) -> DispatchResult<HypervisorVmState> {
        let hv = Arc::clone(&self.hypervisor);
        self.dispatch_query("query-state", move || {
            let hv = Arc::clone(&hv);
            async move { hv.query_state(vm).await }
        })
        .await
    }

    pub async fn snapshot_create(&self, vm: VmId) -> DispatchResult<String> {
        self.dispatch_once("snapshot-create", self.hypervisor.snapshot_create(vm))
            .await
    }

    pub async fn snapshot_revert(&self, vm: VmId, disk_ref: &str) -> DispatchResult<()> {
        self.dispatch_once("snapshot-revert", self.hypervisor.snapshot_revert(vm, disk_ref))
            .await
    }

    pub async fn snapshot_delete(&self, vm: VmId, disk_ref: &str) -> DispatchResult<()> {
        self.dispatch_once("snapshot-delete", self.hypervisor.snapshot_delete(vm, disk_ref))
            .await
    }

    pub async fn set_resources(&self, vm: VmId, spec: &VmSpec) -> DispatchResult<()> {
        self.dispatch_once("set-resources", self.hypervisor.set_resources(vm, spec))
            .await
    }

    pub async fn attach_network(&self, vm: VmId, port: u32, switch: &str) -> DispatchResult<()> {
        self.dispatch_once("attach-network", self.hypervisor.attach_network(vm, port, switch))
            .await
    }

    pub async fn detach_network(&self, vm: VmId, port: u32) -> DispatchResult<()> {
        self.dispatch_once("detach-network", self.hypervisor.detach_network(vm, port))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypervisor::MockHypervisor;

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            retry: RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
                jitter: false,
            },
            breaker: CircuitBreakerConfig {
                failure_threshold: 4,
                cooldown: Duration::from_millis(20),
            },
            call_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    async fn registered_vm(hv: &MockHypervisor) -> VmId {
        let vm = VmId::new();
        hv.create(vm, "vm", &VmSpec::default()).await.unwrap();
        vm
    }

    #[tokio::test]
    async fn query_retries_transient_failures() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        hv.inject_transient_failures(2);
        let result = dispatcher.query_state(vm).await.unwrap();
        assert_eq!(result.value, HypervisorVmState::Stopped);
        assert_eq!(result.retries, 2);
    }

    #[tokio::test]
    async fn query_exhaustion_surfaces_hypervisor_unavailable() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        hv.inject_transient_failures(10);
        let failure = dispatcher.query_state(vm).await.unwrap_err();
        assert!(matches!(
            failure.error,
            LariatError::HypervisorUnavailable { attempts: 3, .. }
        ));
        assert_eq!(failure.retries, 2);
    }

    #[tokio::test]
    async fn lost_ack_is_treated_as_success() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        // The start lands but its ack is lost; the probe sees Running and
        // the dispatch reports success without re-issuing.
        hv.set_apply_before_fault(true);
        hv.inject_transient_failures(1);
        let result = dispatcher.start(vm).await.unwrap();
        assert_eq!(result.retries, 0);
        assert_eq!(hv.state_of(vm), HypervisorVmState::Running);
    }

    #[tokio::test]
    async fn unapplied_command_is_reissued() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        // Fault consumed by start, probe observes Stopped, start re-issued.
        hv.inject_transient_failures(1);
        let result = dispatcher.start(vm).await.unwrap();
        assert_eq!(result.retries, 1);
        assert_eq!(hv.state_of(vm), HypervisorVmState::Running);
    }

    #[tokio::test]
    async fn rejection_is_surfaced_immediately() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        hv.reject_operation("start");
        let failure = dispatcher.start(vm).await.unwrap_err();
        assert!(matches!(
            failure.error,
            LariatError::HypervisorRejected { .. }
        ));
        assert_eq!(failure.retries, 0);
    }

    #[tokio::test]
    async fn snapshot_create_is_never_reissued() {
        let hv = Arc::new(MockHypervisor::new());
        let dispatcher = CommandDispatcher::new(hv.clone(), &config());
        let vm = registered_vm(&hv).await;

        hv.inject_transient_failures(1);
        let failure = dispatcher.snapshot_create(vm).await.unwrap_err();
        assert!(matches!(
            failure.error,
            LariatError::HypervisorUnavailable { attempts: 1, .. }
        ));
        // The single injected fault was consumed, nothing was retried.
        let result = dispatcher.snapshot_create(vm).await.unwrap();
        assert!(result.value.starts_with("disk-"));
    }

    #[tokio::test]
    async fn breaker_trips_and_recovers_after_cooldown() {
        let hv = Arc::new(MockHypervisor::new());
        let cfg = config();
        let dispatcher = CommandDispatcher::new(hv.clone(), &cfg);
        let vm = registered_vm(&hv).await;

        // An exhausted query (3 attempts) plus one more transient failure
        // reach the threshold of 4 consecutive failures.
        hv.inject_transient_failures(4);
        let _ = dispatcher.query_state(vm).await;
        let _ = dispatcher.query_state(vm).await;
        assert!(dispatcher.breaker().is_open());

        // While open, dispatch fails fast without touching the hypervisor.
        let failure = dispatcher.query_state(vm).await.unwrap_err();
        assert!(matches!(
            failure.error,
            LariatError::HypervisorUnavailable { attempts: 0, .. }
        ));

        // After the cool-down a probe is allowed through and closes it.
        tokio::time::sleep(cfg.breaker.cooldown + Duration::from_millis(5)).await;
        let result = dispatcher.query_state(vm).await.unwrap();
        assert_eq!(result.value, HypervisorVmState::Stopped);
        assert!(!dispatcher.breaker().is_open());
    }
}

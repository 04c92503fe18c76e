//! Typed configuration for the orchestration engine.
//!
//! All knobs have working defaults; deployments can override them from a
//! TOML document via [`OrchestratorConfig::from_toml_str`]. Durations are
//! written in human form ("500ms", "30s").

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{LariatError, LariatResult};

/// Total capacity of the resource pool, per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCapacity {
    pub cpu: u32,
    pub memory_mb: u64,
    pub disk_gb: u64,
}

impl Default for ResourceCapacity {
    fn default() -> Self {
        Self {
            cpu: 8,
            memory_mb: 16384,
            disk_gb: 500,
        }
    }
}

/// Retry behavior for hypervisor-bound calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the initial one.
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Randomize delays to avoid hammering in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Circuit breaker protecting a degraded hypervisor from further dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures (across all VMs) before the circuit opens.
    pub failure_threshold: u32,
    /// Cool-down before a probe call is allowed through again.
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Snapshot capability flags. Whether a revert is permitted while the VM is
/// running depends on the hypervisor, so it is a caller decision, not a
/// hard-coded policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotPolicy {
    /// Permit snapshot revert while the VM is `Running` or `Paused`.
    pub live_revert: bool,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { live_revert: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub capacity: ResourceCapacity,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub snapshot: SnapshotPolicy,
    /// Timeout for a single hypervisor call; expiry counts as a transient
    /// failure for retry accounting.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Buffer size of the state-change event channel.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            capacity: ResourceCapacity::default(),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            snapshot: SnapshotPolicy::default(),
            call_timeout: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(raw: &str) -> LariatResult<Self> {
        toml::from_str(raw).map_err(|e| LariatError::Validation {
            field: "config".to_string(),
            message: e.to_string(),
        })
    }
}

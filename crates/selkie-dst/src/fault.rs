//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, probabilistic injection.
//!
//! Components ask `should_inject(operation)` before each operation. The
//! operation names used by this crate are `stable_write`, `stable_grow`,
//! `transport_send` and `transport_reply`.

use crate::rng::DeterministicRng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Types of faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    // Stable store faults
    /// A stable batch write fails as a whole
    StableWriteFail,
    /// Growing stable capacity fails
    StableGrowFail,

    // Transport faults
    /// The transport refuses to send a committed call
    TransportSendFail,
    /// The destination answers with a reject
    TransportReject,
    /// The call is lost; the transport answers with a timeout reject
    TransportDrop,
}

impl FaultType {
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::StableWriteFail => "stable_write_fail",
            FaultType::StableGrowFail => "stable_grow_fail",
            FaultType::TransportSendFail => "transport_send_fail",
            FaultType::TransportReject => "transport_reject",
            FaultType::TransportDrop => "transport_drop",
        }
    }

    /// Operation this fault applies to by default
    pub fn operation(&self) -> &'static str {
        match self {
            FaultType::StableWriteFail => "stable_write",
            FaultType::StableGrowFail => "stable_grow",
            FaultType::TransportSendFail => "transport_send",
            FaultType::TransportReject | FaultType::TransportDrop => "transport_reply",
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Substring an operation name must contain
    pub operation_filter: Option<String>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    pub max_triggers: Option<u64>,
    pub enabled: bool,
}

impl FaultConfig {
    /// Rule for `fault_type`, filtered to the operation it applies to
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );

        Self {
            operation_filter: Some(fault_type.operation().to_string()),
            fault_type,
            probability,
            after_operations: 0,
            max_triggers: None,
            enabled: true,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Fault injector shared by every simulated component
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultState>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

impl FaultInjector {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: Vec::new(),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// Fault to inject for `operation`, if any
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for fault_state in &self.faults {
            let config = &fault_state.config;
            if !config.enabled {
                continue;
            }
            if let Some(filter) = &config.operation_filter {
                if !operation.contains(filter.as_str()) {
                    continue;
                }
            }
            if op_count < config.after_operations {
                continue;
            }

            let trigger_count = fault_state.trigger_count.load(Ordering::SeqCst);
            if let Some(max) = config.max_triggers {
                if trigger_count >= max {
                    continue;
                }
            }

            if self.rng.next_bool(config.probability) {
                fault_state.trigger_count.fetch_add(1, Ordering::SeqCst);

                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation = operation,
                    trigger_count = trigger_count + 1,
                    "Injecting fault"
                );

                return Some(config.fault_type.clone());
            }
        }

        None
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Total triggers across all rules
    pub fn triggered_total(&self) -> u64 {
        self.faults
            .iter()
            .map(|state| state.trigger_count.load(Ordering::SeqCst))
            .sum()
    }

    pub fn stats(&self) -> Vec<FaultStats> {
        self.faults
            .iter()
            .map(|state| FaultStats {
                fault_type: state.config.fault_type.name().to_string(),
                probability: state.config.probability,
                trigger_count: state.trigger_count.load(Ordering::SeqCst),
                enabled: state.config.enabled,
            })
            .collect()
    }

    /// Reset all counts
    pub fn reset(&self) {
        self.operation_count.store(0, Ordering::SeqCst);
        for fault_state in &self.faults {
            fault_state.trigger_count.store(0, Ordering::SeqCst);
        }
    }
}

/// Statistics for a fault rule
#[derive(Debug, Clone)]
pub struct FaultStats {
    pub fault_type: String,
    pub probability: f64,
    pub trigger_count: u64,
    pub enabled: bool,
}

/// Builder for a `FaultInjector` with several rules
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Stable write and grow failures
    pub fn with_stable_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::StableWriteFail, probability))
            .with_fault(FaultConfig::new(FaultType::StableGrowFail, probability))
    }

    /// Refused sends, rejects and lost calls
    pub fn with_transport_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::TransportSendFail, probability))
            .with_fault(FaultConfig::new(FaultType::TransportReject, probability))
            .with_fault(FaultConfig::new(FaultType::TransportDrop, probability / 2.0))
    }

    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.faults {
            injector.register(config);
        }
        injector
    }
}

//! Global atomic counters for run observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    generator_calls: AtomicU64,
    toolchain_checks: AtomicU64,
    repair_attempts: AtomicU64,
    units_succeeded: AtomicU64,
    units_failed: AtomicU64,
    checkpoints_saved: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            generator_calls: AtomicU64::new(0),
            toolchain_checks: AtomicU64::new(0),
            repair_attempts: AtomicU64::new(0),
            units_succeeded: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            checkpoints_saved: AtomicU64::new(0),
        }
    }

    pub fn inc_generator_calls(&self) {
        self.generator_calls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "generator_calls", "counter incremented");
    }

    pub fn inc_toolchain_checks(&self) {
        self.toolchain_checks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "toolchain_checks", "counter incremented");
    }

    pub fn inc_repair_attempts(&self) {
        self.repair_attempts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "repair_attempts", "counter incremented");
    }

    /// Count one unit reaching a terminal state for a stage.
    pub fn inc_unit_outcome(&self, succeeded: bool) {
        if succeeded {
            self.units_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.units_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_checkpoints_saved(&self) {
        self.checkpoints_saved.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "checkpoints_saved", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            generator_calls = self.generator_calls(),
            toolchain_checks = self.toolchain_checks(),
            repair_attempts = self.repair_attempts(),
            units_succeeded = self.units_succeeded(),
            units_failed = self.units_failed(),
            checkpoints_saved = self.checkpoints_saved(),
        );
    }

    pub fn generator_calls(&self) -> u64 {
        self.generator_calls.load(Ordering::Relaxed)
    }

    pub fn toolchain_checks(&self) -> u64 {
        self.toolchain_checks.load(Ordering::Relaxed)
    }

    pub fn repair_attempts(&self) -> u64 {
        self.repair_attempts.load(Ordering::Relaxed)
    }

    pub fn units_succeeded(&self) -> u64 {
        self.units_succeeded.load(Ordering::Relaxed)
    }

    pub fn units_failed(&self) -> u64 {
        self.units_failed.load(Ordering::Relaxed)
    }

    pub fn checkpoints_saved(&self) -> u64 {
        self.checkpoints_saved.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.generator_calls.store(0, Ordering::Relaxed);
        self.toolchain_checks.store(0, Ordering::Relaxed);
        self.repair_attempts.store(0, Ordering::Relaxed);
        self.units_succeeded.store(0, Ordering::Relaxed);
        self.units_failed.store(0, Ordering::Relaxed);
        self.checkpoints_saved.store(0, Ordering::Relaxed);
    }
}

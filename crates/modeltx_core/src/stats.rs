//! Domain statistics.
//!
//! Counters for monitoring how an editing domain is used.
//!
//! # Usage
//!
//! ```rust,ignore
//! use modeltx_core::EditingDomain;
//!
//! let domain = EditingDomain::default();
//! domain.transaction(|d| d.set(book, "title", "Dune"))?;
//!
//! let stats = domain.stats();
//! println!("Committed: {}", stats.transactions_committed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Domain statistics.
///
/// All counters are atomic and monotonically increasing; they can be read
/// while transactions are in progress.
#[derive(Debug, Default)]
pub struct DomainStats {
    // Transaction counters
    /// Transactions that became active.
    transactions_started: AtomicU64,
    /// Transactions that committed.
    transactions_committed: AtomicU64,
    /// Transactions that rolled back.
    transactions_rolled_back: AtomicU64,

    // Notification counters
    /// Change events produced by the graph.
    notifications: AtomicU64,
    /// Trigger commands executed.
    triggers_executed: AtomicU64,
    /// Precommit dispatch passes (own and aggregate).
    precommit_dispatches: AtomicU64,
    /// Aggregate precommit rounds.
    aggregate_rounds: AtomicU64,
    /// Postcommit dispatches.
    postcommit_dispatches: AtomicU64,
    /// Read notifications broadcast outside any transaction.
    unbatched_broadcasts: AtomicU64,

    // Error counters
    /// Write transactions aborted by a write from another thread.
    concurrent_write_aborts: AtomicU64,
    /// Writes refused or activations rejected by the protocol.
    protocol_violations: AtomicU64,
    /// Observer callbacks that failed or panicked.
    observer_failures: AtomicU64,
}

impl DomainStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_triggers(&self, count: u64) {
        self.triggers_executed.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_precommit_dispatch(&self) {
        self.precommit_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aggregate_round(&self) {
        self.aggregate_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_postcommit_dispatch(&self) {
        self.postcommit_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unbatched_broadcast(&self) {
        self.unbatched_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_concurrent_write_abort(&self) {
        self.concurrent_write_aborts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_observer_failure(&self) {
        self.observer_failures.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions rolled back.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of change events produced.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Returns the number of trigger commands executed.
    pub fn triggers_executed(&self) -> u64 {
        self.triggers_executed.load(Ordering::Relaxed)
    }

    /// Returns the number of precommit dispatch passes.
    pub fn precommit_dispatches(&self) -> u64 {
        self.precommit_dispatches.load(Ordering::Relaxed)
    }

    /// Returns the number of aggregate precommit rounds.
    pub fn aggregate_rounds(&self) -> u64 {
        self.aggregate_rounds.load(Ordering::Relaxed)
    }

    /// Returns the number of postcommit dispatches.
    pub fn postcommit_dispatches(&self) -> u64 {
        self.postcommit_dispatches.load(Ordering::Relaxed)
    }

    /// Returns the number of unbatched broadcasts.
    pub fn unbatched_broadcasts(&self) -> u64 {
        self.unbatched_broadcasts.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions aborted by concurrent writes.
    ///
    /// Any non-zero value points at a thread writing without holding a
    /// write transaction.
    pub fn concurrent_write_aborts(&self) -> u64 {
        self.concurrent_write_aborts.load(Ordering::Relaxed)
    }

    /// Returns the number of protocol violations.
    pub fn protocol_violations(&self) -> u64 {
        self.protocol_violations.load(Ordering::Relaxed)
    }

    /// Returns the number of failed observer callbacks.
    pub fn observer_failures(&self) -> u64 {
        self.observer_failures.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_rolled_back: self.transactions_rolled_back(),
            notifications: self.notifications(),
            triggers_executed: self.triggers_executed(),
            precommit_dispatches: self.precommit_dispatches(),
            aggregate_rounds: self.aggregate_rounds(),
            postcommit_dispatches: self.postcommit_dispatches(),
            unbatched_broadcasts: self.unbatched_broadcasts(),
            concurrent_write_aborts: self.concurrent_write_aborts(),
            protocol_violations: self.protocol_violations(),
            observer_failures: self.observer_failures(),
        }
    }
}

/// A point-in-time snapshot of domain statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Transactions that became active.
    pub transactions_started: u64,
    /// Transactions that committed.
    pub transactions_committed: u64,
    /// Transactions that rolled back.
    pub transactions_rolled_back: u64,
    /// Change events produced by the graph.
    pub notifications: u64,
    /// Trigger commands executed.
    pub triggers_executed: u64,
    /// Precommit dispatch passes.
    pub precommit_dispatches: u64,
    /// Aggregate precommit rounds.
    pub aggregate_rounds: u64,
    /// Postcommit dispatches.
    pub postcommit_dispatches: u64,
    /// Read notifications broadcast outside any transaction.
    pub unbatched_broadcasts: u64,
    /// Write transactions aborted by concurrent writes.
    pub concurrent_write_aborts: u64,
    /// Protocol violations.
    pub protocol_violations: u64,
    /// Failed observer callbacks.
    pub observer_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = DomainStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_transactions() {
        let stats = DomainStats::new();

        stats.record_start();
        stats.record_start();
        stats.record_commit();
        stats.record_rollback();
        stats.record_triggers(3);

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_started, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.triggers_executed, 3);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DomainStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_notification();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.notifications(), 1000);
    }
}

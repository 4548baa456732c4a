//! Stress tests for modeltx.
//!
//! These tests verify behavior under heavy load and concurrent access.

use modeltx_core::{
    CoreError, EditingDomain, EntityId, ResourceId, StatsSnapshot, TransactionOptions, Value,
};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Outcome of a stress run, with what the domain counted meanwhile.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Operations that behaved as expected.
    pub passed: usize,
    /// Operations that did not.
    pub failed: usize,
    /// Transactions the domain rolled back during the run.
    pub rolled_back: u64,
    /// Writers aborted because another thread wrote.
    pub concurrent_write_aborts: u64,
    /// Change events produced during the run.
    pub notifications: u64,
    /// Wall time of the run.
    #[serde(serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl StressTestResult {
    /// Builds a result from the operation counts and the domain counters
    /// gained since `baseline`.
    pub fn measure(
        domain: &EditingDomain,
        baseline: &StatsSnapshot,
        passed: usize,
        failed: usize,
        duration: Duration,
    ) -> Self {
        let now = domain.stats();
        let secs = duration.as_secs_f64();
        Self {
            passed,
            failed,
            rolled_back: now
                .transactions_rolled_back
                .saturating_sub(baseline.transactions_rolled_back),
            concurrent_write_aborts: now
                .concurrent_write_aborts
                .saturating_sub(baseline.concurrent_write_aborts),
            notifications: now.notifications.saturating_sub(baseline.notifications),
            duration,
            ops_per_second: if secs > 0.0 {
                (passed + failed) as f64 / secs
            } else {
                0.0
            },
        }
    }

    /// A run that never got going: every operation failed.
    fn aborted(operations: usize) -> Self {
        Self {
            passed: 0,
            failed: operations,
            rolled_back: 0,
            concurrent_write_aborts: 0,
            notifications: 0,
            duration: Duration::ZERO,
            ops_per_second: 0.0,
        }
    }

    /// Operations attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.passed + self.failed
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("=== {name} ===");
        println!(
            "operations: {} ({} passed, {} failed) in {:.3}s, {:.0} ops/s",
            self.total(),
            self.passed,
            self.failed,
            self.duration.as_secs_f64(),
            self.ops_per_second
        );
        println!(
            "rollbacks: {}  concurrent-write aborts: {}  change events: {}",
            self.rolled_back, self.concurrent_write_aborts, self.notifications
        );
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of reader threads (for concurrent tests).
    pub readers: usize,
    /// Number of writer threads (for concurrent tests).
    pub writers: usize,
    /// Number of distinct entities.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            readers: 4,
            writers: 2,
            entity_count: 100,
        }
    }
}

/// Creates a resource holding `count` entities with a zeroed `counter` slot.
pub fn populate(
    domain: &EditingDomain,
    count: usize,
) -> Result<(ResourceId, Vec<EntityId>), CoreError> {
    domain.transaction(|d| {
        let resource = d.create_resource("mem://stress")?;
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = d.create_entity("Counter")?;
            d.set(entity, "counter", 0i64)?;
            d.add_root(resource, entity)?;
            entities.push(entity);
        }
        Ok((resource, entities))
    })
}

fn increment(domain: &EditingDomain, entity: EntityId) -> Result<(), CoreError> {
    let current = domain
        .get(entity, "counter")?
        .and_then(|v| v.as_int())
        .unwrap_or(0);
    domain.set(entity, "counter", current + 1)
}

/// Sums the `counter` slot over the given entities.
pub fn counter_total(domain: &EditingDomain, entities: &[EntityId]) -> i64 {
    domain.read(|graph| {
        entities
            .iter()
            .filter_map(|e| graph.get(*e, "counter").ok().flatten())
            .filter_map(|v| v.as_int())
            .sum()
    })
}

/// Run a sequential write stress test: one increment per transaction.
pub fn stress_sequential_writes(domain: &EditingDomain, config: &StressConfig) -> StressTestResult {
    let Ok((_, entities)) = populate(domain, config.entity_count.max(1)) else {
        return StressTestResult::aborted(config.operations);
    };

    let baseline = domain.stats();
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let entity = entities[i % entities.len()];
        match domain.transaction(|d| increment(d, entity)) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::measure(domain, &baseline, successful, failed, start.elapsed())
}

/// Run concurrent readers and writers against one domain.
///
/// Writers increment counters in their own write transactions; readers
/// take read-only transactions and check that the total never decreases.
/// A reader that sees the total go backwards counts as a failure.
pub fn stress_concurrent_access(domain: &EditingDomain, config: &StressConfig) -> StressTestResult {
    let Ok((_, entities)) = populate(domain, config.entity_count.max(1)) else {
        return StressTestResult::aborted(config.operations);
    };

    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let threads = (config.readers + config.writers).max(1);
    let ops_per_thread = config.operations / threads;

    let baseline = domain.stats();
    let start = Instant::now();

    thread::scope(|scope| {
        for w in 0..config.writers {
            let (entities, successful, failed) = (&entities, &successful, &failed);
            scope.spawn(move || {
                for i in 0..ops_per_thread {
                    let entity = entities[(w * ops_per_thread + i) % entities.len()];
                    let counter = match domain.transaction(|d| increment(d, entity)) {
                        Ok(()) => successful,
                        Err(_) => failed,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
        for _ in 0..config.readers {
            let (entities, successful, failed) = (&entities, &successful, &failed);
            scope.spawn(move || {
                let mut last = 0i64;
                for _ in 0..ops_per_thread {
                    let seen = domain.run_exclusive(|d| counter_total(d, entities));
                    match seen {
                        Ok(total) if total >= last => {
                            last = total;
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        _ => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    StressTestResult::measure(
        domain,
        &baseline,
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a rollback stress test: every other transaction fails on purpose.
pub fn stress_transaction_rollbacks(
    domain: &EditingDomain,
    config: &StressConfig,
) -> StressTestResult {
    let Ok((_, entities)) = populate(domain, config.entity_count.max(1)) else {
        return StressTestResult::aborted(config.operations);
    };

    let baseline = domain.stats();
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let entity = entities[i % entities.len()];
        let should_fail = i % 2 == 0;

        let result = domain.transaction(|d| {
            increment(d, entity)?;
            if should_fail {
                Err(CoreError::command_failed("intentional"))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::measure(domain, &baseline, successful, failed, start.elapsed())
}

/// Run a nesting stress test: each root transaction opens `depth` nested
/// write transactions, committing all but the innermost.
pub fn stress_nested_transactions(
    domain: &EditingDomain,
    config: &StressConfig,
    depth: usize,
) -> StressTestResult {
    let Ok((_, entities)) = populate(domain, config.entity_count.max(1)) else {
        return StressTestResult::aborted(config.operations);
    };

    let baseline = domain.stats();
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let entity = entities[i % entities.len()];
        let result = domain.transaction(|d| {
            let mut open = Vec::with_capacity(depth);
            for _ in 0..depth {
                open.push(d.start_transaction(false, TransactionOptions::new())?);
                increment(d, entity)?;
            }
            while let Some(tx) = open.pop() {
                if open.len() + 1 == depth {
                    tx.rollback()?;
                } else {
                    tx.commit()?;
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::measure(domain, &baseline, successful, failed, start.elapsed())
}

/// Reads a counter back as an integer; test helper.
pub fn counter_of(domain: &EditingDomain, entity: EntityId) -> Option<i64> {
    domain.get(entity, "counter").ok().flatten().and_then(|v| match v {
        Value::Int(n) => Some(n),
        _ => None,
    })
}

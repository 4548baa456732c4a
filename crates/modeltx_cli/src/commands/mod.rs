//! CLI command implementations.

pub mod demo;
pub mod stress;

use modeltx_core::StatsSnapshot;
use serde::Serialize;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// A domain operation failed.
    #[error("domain error: {0}")]
    Domain(#[from] modeltx_core::CoreError),

    /// Output could not be encoded.
    #[error("output error: {0}")]
    Output(#[from] serde_json::Error),

    /// One or more demo scenarios did not behave as expected.
    #[error("{0} scenario(s) failed")]
    ScenariosFailed(usize),
}

/// Output format of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Domain counters in serializable form.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Transactions that became active.
    pub transactions_started: u64,
    /// Transactions that committed.
    pub transactions_committed: u64,
    /// Transactions that rolled back.
    pub transactions_rolled_back: u64,
    /// Change events produced.
    pub notifications: u64,
    /// Trigger commands executed.
    pub triggers_executed: u64,
    /// Precommit dispatch passes.
    pub precommit_dispatches: u64,
    /// Aggregate precommit rounds.
    pub aggregate_rounds: u64,
    /// Postcommit dispatches.
    pub postcommit_dispatches: u64,
    /// Write transactions aborted by concurrent writes.
    pub concurrent_write_aborts: u64,
    /// Protocol violations.
    pub protocol_violations: u64,
    /// Failed observer callbacks.
    pub observer_failures: u64,
}

impl From<StatsSnapshot> for StatsReport {
    fn from(s: StatsSnapshot) -> Self {
        Self {
            transactions_started: s.transactions_started,
            transactions_committed: s.transactions_committed,
            transactions_rolled_back: s.transactions_rolled_back,
            notifications: s.notifications,
            triggers_executed: s.triggers_executed,
            precommit_dispatches: s.precommit_dispatches,
            aggregate_rounds: s.aggregate_rounds,
            postcommit_dispatches: s.postcommit_dispatches,
            concurrent_write_aborts: s.concurrent_write_aborts,
            protocol_violations: s.protocol_violations,
            observer_failures: s.observer_failures,
        }
    }
}

impl StatsReport {
    fn print_text(&self) {
        println!("Statistics:");
        println!(
            "  Transactions: {} started, {} committed, {} rolled back",
            self.transactions_started, self.transactions_committed, self.transactions_rolled_back
        );
        println!("  Notifications: {}", self.notifications);
        println!(
            "  Precommit: {} dispatches, {} aggregate rounds, {} triggers",
            self.precommit_dispatches, self.aggregate_rounds, self.triggers_executed
        );
        println!("  Postcommit dispatches: {}", self.postcommit_dispatches);
        if self.concurrent_write_aborts + self.protocol_violations + self.observer_failures > 0 {
            println!(
                "  Errors: {} concurrent writes, {} protocol violations, {} observer failures",
                self.concurrent_write_aborts, self.protocol_violations, self.observer_failures
            );
        }
    }
}

//! Stress command implementation.

use super::{CliError, Format, StatsReport};
use modeltx_core::{DomainConfig, EditingDomain};
use modeltx_testkit::{stress_concurrent_access, StressConfig, StressTestResult};
use serde::Serialize;

/// Stress run result.
#[derive(Debug, Serialize)]
pub struct StressReport {
    /// Reader threads.
    pub readers: usize,
    /// Writer threads.
    pub writers: usize,
    /// Throughput, failures and domain counters gained during the run.
    pub result: StressTestResult,
    /// Domain counters after the run.
    pub stats: StatsReport,
}

/// Runs the stress command.
pub fn run(
    operations: usize,
    readers: usize,
    writers: usize,
    entities: usize,
    format: Format,
) -> Result<(), CliError> {
    let domain = EditingDomain::new(DomainConfig::new().name("stress"));
    let config = StressConfig {
        operations,
        readers,
        writers,
        entity_count: entities,
    };
    tracing::info!(operations, readers, writers, entities, "starting stress run");

    let result = stress_concurrent_access(&domain, &config);
    tracing::info!(
        ops_per_second = result.ops_per_second,
        failed = result.failed,
        rolled_back = result.rolled_back,
        "stress run finished"
    );

    let report = StressReport {
        readers,
        writers,
        result,
        stats: domain.stats().into(),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            report
                .result
                .print_summary(&format!("{readers} readers / {writers} writers"));
            println!();
            report.stats.print_text();
        }
    }

    Ok(())
}

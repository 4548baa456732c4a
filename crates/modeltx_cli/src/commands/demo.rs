//! Demo command implementation.
//!
//! Runs a fixed set of end-to-end scenarios against a fresh domain and
//! reports whether each behaved as expected.

use super::{CliError, Format, StatsReport};
use modeltx_core::{
    ChangeObserver, ChangeSetEvent, CommandStack, CoreError, EditingDomain, EntityId, FnCommand,
    NotificationFilter, ObserverError, ObserverInterest, ResourceId, TransactionOptions, Value,
};
use modeltx_testkit::{CascadeObserver, RecordingObserver, VetoObserver};
use serde::Serialize;
use std::sync::Arc;
use std::thread;

/// Outcome of one scenario.
#[derive(Debug, Serialize)]
pub struct ScenarioOutcome {
    /// Scenario name.
    pub name: &'static str,
    /// Whether the scenario behaved as expected.
    pub passed: bool,
    /// What happened, or what went wrong.
    pub detail: String,
}

/// Demo result.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Scenario outcomes, in run order.
    pub scenarios: Vec<ScenarioOutcome>,
    /// Domain counters after all scenarios ran.
    pub stats: StatsReport,
}

type Scenario = fn(&EditingDomain, ResourceId) -> Result<String, String>;

const SCENARIOS: &[(&str, Scenario)] = &[
    ("commit", commit),
    ("aggregate-veto", aggregate_veto),
    ("nested-rollback", nested_rollback),
    ("trigger-cascade", trigger_cascade),
    ("undo-redo", undo_redo),
    ("concurrent-write", concurrent_write),
];

/// Logs every committed batch.
struct LoggingObserver;

impl ChangeObserver for LoggingObserver {
    fn committed(&self, event: &ChangeSetEvent<'_>) -> Result<(), ObserverError> {
        for n in event.notifications() {
            tracing::debug!(
                transaction = ?event.transaction(),
                notifier = ?n.notifier(),
                slot = n.slot(),
                "committed change"
            );
        }
        Ok(())
    }
}

/// Runs the demo command.
pub fn run(format: Format) -> Result<(), CliError> {
    let domain = EditingDomain::default();
    domain.add_observer(Arc::new(LoggingObserver));
    let library = domain.transaction(|d| {
        let library = d.create_resource("mem://demo")?;
        d.load_resource(library)?;
        Ok(library)
    })?;

    let scenarios: Vec<_> = SCENARIOS
        .iter()
        .map(|&(name, scenario)| {
            tracing::info!(scenario = name, "running scenario");
            let (passed, detail) = match scenario(&domain, library) {
                Ok(detail) => (true, detail),
                Err(detail) => (false, detail),
            };
            ScenarioOutcome {
                name,
                passed,
                detail,
            }
        })
        .collect();

    let report = DemoReport {
        scenarios,
        stats: domain.stats().into(),
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print_text_output(&report),
    }

    match report.scenarios.iter().filter(|s| !s.passed).count() {
        0 => Ok(()),
        failed => Err(CliError::ScenariosFailed(failed)),
    }
}

fn print_text_output(report: &DemoReport) {
    println!("=== modeltx demo ===");
    println!();
    for s in &report.scenarios {
        let mark = if s.passed { "✓" } else { "✗" };
        println!("{} {:<18} {}", mark, s.name, s.detail);
    }
    println!();
    report.stats.print_text();
}

fn check(condition: bool, message: impl Into<String>) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

fn fail(err: CoreError) -> String {
    format!("unexpected error: {err}")
}

fn new_book(domain: &EditingDomain, library: ResourceId, title: &str) -> Result<EntityId, String> {
    domain
        .transaction(|d| {
            let book = d.create_entity("Book")?;
            d.set(book, "title", title)?;
            d.add_root(library, book)?;
            Ok(book)
        })
        .map_err(fail)
}

fn title(domain: &EditingDomain, book: EntityId) -> Result<Option<Value>, String> {
    domain.get(book, "title").map_err(fail)
}

fn commit(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;
    let recorder = RecordingObserver::filtered(
        ObserverInterest::postcommit(),
        NotificationFilter::notifier(book),
    );
    let id = domain.add_observer(recorder.clone());

    let result = domain.transaction(|d| d.set(book, "title", "B"));
    domain.remove_observer(id);
    result.map_err(fail)?;

    let notifications = recorder.notifications();
    check(
        notifications.len() == 1,
        format!("expected one notification, got {}", notifications.len()),
    )?;
    let n = &notifications[0];
    check(
        n.old_value() == Some(&Value::from("A")) && n.new_value() == Some(&Value::from("B")),
        "notification carries wrong values",
    )?;
    Ok("title A -> B published once after commit".into())
}

fn aggregate_veto(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;
    let veto = VetoObserver::new(
        ObserverInterest::aggregate(),
        NotificationFilter::notifier(book),
    );
    let recorder = RecordingObserver::filtered(
        ObserverInterest::postcommit(),
        NotificationFilter::notifier(book),
    );
    let veto_id = domain.add_observer(veto.clone());
    let recorder_id = domain.add_observer(recorder.clone());

    let result = domain.transaction(|d| d.set(book, "title", "B"));
    domain.remove_observer(veto_id);
    domain.remove_observer(recorder_id);

    check(
        matches!(result, Err(ref e) if e.is_rollback()),
        "vetoed transaction was not rolled back",
    )?;
    check(title(domain, book)? == Some(Value::from("A")), "title changed")?;
    check(recorder.batch_count() == 0, "vetoed change was published")?;
    Ok(format!("{} veto(es), title kept, nothing published", veto.vetoes()))
}

fn nested_rollback(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;

    let outer = domain
        .start_transaction(false, TransactionOptions::new())
        .map_err(fail)?;
    let inner = domain
        .start_transaction(false, TransactionOptions::new())
        .map_err(fail)?;
    domain.set(book, "title", "X").map_err(fail)?;
    inner.commit().map_err(fail)?;
    domain.set(book, "title", "Y").map_err(fail)?;
    outer.rollback().map_err(fail)?;

    check(
        title(domain, book)? == Some(Value::from("A")),
        "committed child survived parent rollback",
    )?;
    Ok("committed child undone with its parent".into())
}

fn trigger_cascade(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;
    let cascade = CascadeObserver::new(ObserverInterest::aggregate(), book, "revision", 3);
    let id = domain.add_observer(cascade.clone());

    let result = domain
        .start_transaction(false, TransactionOptions::new())
        .and_then(|tx| {
            domain.set(book, "title", "B")?;
            tx.commit()
        });
    domain.remove_observer(id);
    let receipt = result.map_err(fail)?;

    let revision = domain.get(book, "revision").map_err(fail)?;
    check(revision == Some(Value::Int(3)), "cascade did not settle at 3")?;
    check(
        cascade.dispatches() == 4,
        format!("expected 4 dispatches, got {}", cascade.dispatches()),
    )?;
    Ok(format!(
        "{} triggers over {} dispatches",
        receipt.triggers.len(),
        cascade.dispatches()
    ))
}

fn undo_redo(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;
    let mut stack = CommandStack::new(domain.clone(), 8);

    stack
        .execute(FnCommand::boxed("retitle", move |d: &EditingDomain| {
            d.set(book, "title", "B")
        }))
        .map_err(fail)?;
    stack.undo().map_err(fail)?;
    check(title(domain, book)? == Some(Value::from("A")), "undo failed")?;
    stack.redo().map_err(fail)?;
    check(title(domain, book)? == Some(Value::from("B")), "redo failed")?;
    Ok("retitle undone and redone".into())
}

fn concurrent_write(domain: &EditingDomain, library: ResourceId) -> Result<String, String> {
    let book = new_book(domain, library, "A")?;

    let tx = domain
        .start_transaction(false, TransactionOptions::new())
        .map_err(fail)?;
    domain.set(book, "title", "B").map_err(fail)?;

    let intruder = thread::scope(|s| {
        s.spawn(|| domain.set(book, "title", "intruder"))
            .join()
            .map_err(|_| "intruding thread panicked".to_string())
    })?;
    check(
        matches!(intruder, Err(CoreError::ConcurrentWrite { .. })),
        "foreign write was not refused",
    )?;
    check(tx.is_aborted(), "writer was not aborted")?;
    check(tx.commit().is_err(), "aborted writer committed")?;
    check(title(domain, book)? == Some(Value::from("A")), "title changed")?;
    Ok("foreign write refused, writer rolled back".into())
}

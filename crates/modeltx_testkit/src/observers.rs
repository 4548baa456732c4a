//! Observers for tests.
//!
//! Each observer records what it was shown so tests can assert on the
//! exact batches delivered by the domain.

use modeltx_core::{
    ChangeObserver, ChangeSetEvent, Command, EditingDomain, EntityId, FnCommand, Notification,
    NotificationFilter, ObserverError, ObserverInterest, Status, StatusCode, TransactionId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One delivered batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Transaction that produced the batch, if any.
    pub transaction: Option<TransactionId>,
    /// The notifications, in delivery order.
    pub notifications: Vec<Notification>,
}

/// Records every batch it receives.
pub struct RecordingObserver {
    interest: ObserverInterest,
    filter: NotificationFilter,
    batches: Mutex<Vec<Batch>>,
}

impl RecordingObserver {
    /// Creates a recorder with the given interest and the default filter.
    pub fn new(interest: ObserverInterest) -> Arc<Self> {
        Self::filtered(interest, NotificationFilter::default())
    }

    /// Creates a postcommit recorder.
    pub fn postcommit() -> Arc<Self> {
        Self::new(ObserverInterest::postcommit())
    }

    /// Creates a recorder with a custom filter.
    pub fn filtered(interest: ObserverInterest, filter: NotificationFilter) -> Arc<Self> {
        Arc::new(Self {
            interest,
            filter,
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Returns a copy of the received batches.
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Returns the number of batches received.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Returns every received notification, batches concatenated.
    pub fn notifications(&self) -> Vec<Notification> {
        self.batches
            .lock()
            .iter()
            .flat_map(|b| b.notifications.iter().cloned())
            .collect()
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        self.batches.lock().clear();
    }

    fn record(&self, event: &ChangeSetEvent<'_>) {
        self.batches.lock().push(Batch {
            transaction: event.transaction(),
            notifications: event.notifications().to_vec(),
        });
    }
}

impl ChangeObserver for RecordingObserver {
    fn interest(&self) -> ObserverInterest {
        self.interest
    }

    fn filter(&self) -> NotificationFilter {
        self.filter.clone()
    }

    fn about_to_commit(
        &self,
        event: &ChangeSetEvent<'_>,
    ) -> Result<Option<Box<dyn Command>>, ObserverError> {
        self.record(event);
        Ok(None)
    }

    fn committed(&self, event: &ChangeSetEvent<'_>) -> Result<(), ObserverError> {
        self.record(event);
        Ok(())
    }
}

/// Requests a rollback whenever it sees a matching notification.
pub struct VetoObserver {
    interest: ObserverInterest,
    filter: NotificationFilter,
    vetoes: AtomicUsize,
}

impl VetoObserver {
    /// Creates a veto observer.
    pub fn new(interest: ObserverInterest, filter: NotificationFilter) -> Arc<Self> {
        Arc::new(Self {
            interest,
            filter,
            vetoes: AtomicUsize::new(0),
        })
    }

    /// Returns how many rollbacks were requested.
    pub fn vetoes(&self) -> usize {
        self.vetoes.load(Ordering::SeqCst)
    }
}

impl ChangeObserver for VetoObserver {
    fn interest(&self) -> ObserverInterest {
        self.interest
    }

    fn filter(&self) -> NotificationFilter {
        self.filter.clone()
    }

    fn about_to_commit(
        &self,
        _event: &ChangeSetEvent<'_>,
    ) -> Result<Option<Box<dyn Command>>, ObserverError> {
        self.vetoes.fetch_add(1, Ordering::SeqCst);
        Err(ObserverError::Rollback(Status::cancel(
            StatusCode::Rollback,
            "change vetoed",
        )))
    }
}

/// Answers every dispatch with a trigger that increments an integer slot,
/// until the slot reaches `rounds`.
pub struct CascadeObserver {
    interest: ObserverInterest,
    target: EntityId,
    slot: String,
    rounds: i64,
    dispatches: AtomicUsize,
}

impl CascadeObserver {
    /// Creates a cascade observer over `target.slot`.
    pub fn new(
        interest: ObserverInterest,
        target: EntityId,
        slot: impl Into<String>,
        rounds: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            interest,
            target,
            slot: slot.into(),
            rounds,
            dispatches: AtomicUsize::new(0),
        })
    }

    /// Returns how many times the observer was dispatched.
    pub fn dispatches(&self) -> usize {
        self.dispatches.load(Ordering::SeqCst)
    }
}

impl ChangeObserver for CascadeObserver {
    fn interest(&self) -> ObserverInterest {
        self.interest
    }

    fn about_to_commit(
        &self,
        event: &ChangeSetEvent<'_>,
    ) -> Result<Option<Box<dyn Command>>, ObserverError> {
        self.dispatches.fetch_add(1, Ordering::SeqCst);
        let current = event
            .domain()
            .get(self.target, &self.slot)
            .map_err(|e| ObserverError::Failed(e.to_string()))?
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        if current >= self.rounds {
            return Ok(None);
        }
        let target = self.target;
        let slot = self.slot.clone();
        Ok(Some(FnCommand::boxed(
            format!("{slot} -> {}", current + 1),
            move |d: &EditingDomain| d.set(target, &slot, current + 1),
        )))
    }
}

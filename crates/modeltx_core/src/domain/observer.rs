//! Change observers.

use crate::command::Command;
use crate::domain::EditingDomain;
use crate::model::{Notification, NotificationFilter};
use crate::status::Status;
use crate::types::TransactionId;
use thiserror::Error;

/// When an observer wants to be called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverInterest {
    /// Before commit, with each transaction's own notifications.
    pub precommit: bool,
    /// Before root commit, with the notifications of the whole trigger
    /// scope, once per cascade round.
    pub aggregate: bool,
    /// After root commit.
    pub postcommit: bool,
}

impl ObserverInterest {
    /// Postcommit only.
    #[must_use]
    pub const fn postcommit() -> Self {
        Self {
            precommit: false,
            aggregate: false,
            postcommit: true,
        }
    }

    /// Ordinary precommit only.
    #[must_use]
    pub const fn precommit() -> Self {
        Self {
            precommit: true,
            aggregate: false,
            postcommit: false,
        }
    }

    /// Aggregate precommit only.
    #[must_use]
    pub const fn aggregate() -> Self {
        Self {
            precommit: false,
            aggregate: true,
            postcommit: false,
        }
    }

    /// Adds postcommit interest.
    #[must_use]
    pub const fn and_postcommit(mut self) -> Self {
        self.postcommit = true;
        self
    }
}

/// Failure reported by an observer before commit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    /// The observer asks for the transaction to be rolled back.
    #[error("rollback requested: {0}")]
    Rollback(Status),

    /// The observer failed.
    #[error("observer failed: {0}")]
    Failed(String),
}

/// A batch of notifications delivered to an observer.
#[derive(Debug)]
pub struct ChangeSetEvent<'a> {
    domain: &'a EditingDomain,
    transaction: Option<TransactionId>,
    notifications: &'a [Notification],
}

impl<'a> ChangeSetEvent<'a> {
    pub(crate) fn new(
        domain: &'a EditingDomain,
        transaction: Option<TransactionId>,
        notifications: &'a [Notification],
    ) -> Self {
        Self {
            domain,
            transaction,
            notifications,
        }
    }

    /// Returns the domain.
    #[must_use]
    pub fn domain(&self) -> &'a EditingDomain {
        self.domain
    }

    /// Returns the transaction that produced the notifications.
    ///
    /// `None` for notifications broadcast outside any transaction.
    #[must_use]
    pub fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    /// Returns the notifications, in the order they were produced.
    #[must_use]
    pub fn notifications(&self) -> &'a [Notification] {
        self.notifications
    }

    /// Returns true if there are no notifications.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }
}

/// Observes changes to a domain.
///
/// Observers run inside a read-only transaction: they may read the model
/// but must not modify it. Precommit observers modify the model by
/// returning a trigger [`Command`], which runs in a write transaction
/// nested in the one being committed.
pub trait ChangeObserver: Send + Sync {
    /// Which dispatches the observer takes part in.
    fn interest(&self) -> ObserverInterest {
        ObserverInterest::postcommit()
    }

    /// Which notifications the observer receives.
    fn filter(&self) -> NotificationFilter {
        NotificationFilter::default()
    }

    /// Called before commit. May return a trigger command, or ask for a
    /// rollback.
    fn about_to_commit(
        &self,
        event: &ChangeSetEvent<'_>,
    ) -> Result<Option<Box<dyn Command>>, ObserverError> {
        let _ = event;
        Ok(None)
    }

    /// Called after a root transaction committed. Errors are logged.
    fn committed(&self, event: &ChangeSetEvent<'_>) -> Result<(), ObserverError> {
        let _ = event;
        Ok(())
    }
}

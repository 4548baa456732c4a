//! Transactions over the model graph.
//!
//! A transaction is a unit of work on one thread. Transactions nest: a
//! transaction started while another is active on the same thread becomes
//! its child, shares its hold on the domain lock and folds its changes into
//! the parent when it commits. Only the outermost (root) transaction makes
//! changes visible to postcommit observers.
//!
//! ## Lifecycle
//!
//! `Created → Active → (Committing | RollingBack) → Closed`
//!
//! Commit and rollback happen exactly once. A transaction that is dropped
//! while still active on its owner thread is rolled back.

mod options;
mod state;

pub use options::{OptionValue, ResolvedOptions, TransactionOptions};
pub use state::Phase;

pub(crate) use state::{Handoff, TxRecord};

use crate::change::ChangeDescription;
use crate::domain::EditingDomain;
use crate::error::CoreResult;
use crate::status::Status;
use crate::types::TransactionId;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// The committed transaction.
    pub transaction: TransactionId,
    /// Final status (OK, or a warning that did not prevent the commit).
    pub status: Status,
    /// Changes made by a root transaction, including nested transactions and
    /// triggers. Empty for nested transactions, whose changes belong to
    /// their parent.
    pub change: ChangeDescription,
    /// Labels of the trigger commands executed before the commit.
    pub triggers: Vec<String>,
}

/// Handle to a transaction.
///
/// Created by [`EditingDomain::create_transaction`] or started directly with
/// [`EditingDomain::start_transaction`].
pub struct Transaction {
    record: Arc<TxRecord>,
    domain: EditingDomain,
}

impl Transaction {
    pub(crate) fn new(record: Arc<TxRecord>, domain: EditingDomain) -> Self {
        Self { record, domain }
    }

    pub(crate) fn record(&self) -> &Arc<TxRecord> {
        &self.record
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.record.id
    }

    /// Returns the domain the transaction belongs to.
    #[must_use]
    pub fn domain(&self) -> &EditingDomain {
        &self.domain
    }

    /// Checks if this is a read-only transaction.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.record.read_only
    }

    /// Returns the thread that owns the transaction.
    #[must_use]
    pub fn owner(&self) -> ThreadId {
        self.record.owner()
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.record.phase()
    }

    /// Checks if the transaction is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.record.status()
    }

    /// Returns the options as requested at creation.
    #[must_use]
    pub fn requested_options(&self) -> &TransactionOptions {
        &self.record.requested
    }

    /// Returns the options in effect. Resolved when the transaction starts.
    #[must_use]
    pub fn options(&self) -> ResolvedOptions {
        self.record.options()
    }

    /// Returns the parent's ID, if this transaction is nested.
    #[must_use]
    pub fn parent_id(&self) -> Option<TransactionId> {
        self.record.parent().map(|p| p.id)
    }

    /// Checks if this is a root transaction.
    ///
    /// Only meaningful once started.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.record.parent().is_none()
    }

    /// Checks if the transaction has been aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.record.abort_status().is_some()
    }

    /// Starts the transaction, blocking until the domain lock is available.
    ///
    /// If a transaction is already active on the calling thread, this one
    /// nests inside it.
    pub fn start(&self) -> CoreResult<()> {
        self.domain.activate(&self.record)
    }

    /// Commits the transaction.
    ///
    /// Runs precommit observers and triggers and, for a root transaction,
    /// validation. If any of them fails, or the transaction was aborted, the
    /// transaction is rolled back instead and
    /// [`CoreError::RolledBack`](crate::CoreError::RolledBack) is returned.
    pub fn commit(&self) -> CoreResult<CommitReceipt> {
        self.domain.commit_record(&self.record)
    }

    /// Rolls the transaction back and returns the resulting status.
    pub fn rollback(&self) -> CoreResult<Status> {
        self.domain.rollback_record(&self.record, None)
    }

    /// Aborts the transaction. May be called from any thread.
    ///
    /// The next commit becomes a rollback carrying `status`.
    pub fn abort(&self, status: Status) {
        tracing::debug!(transaction = %self.id(), %status, "transaction aborted");
        self.record.abort(status);
    }

    /// Lets other threads waiting for the domain lock run.
    ///
    /// Only read-only transactions whose whole chain is read-only may
    /// yield. Returns `false` if nobody was waiting.
    pub fn yield_now(&self) -> CoreResult<bool> {
        self.domain.yield_record(&self.record)
    }

    /// Runs `f` on a helper thread that temporarily owns this transaction
    /// and the domain lock.
    ///
    /// Blocks until `f` returns. Ownership comes back to the calling thread
    /// afterwards, even if `f` panics; the panic is then resumed here.
    pub fn run_privileged<R, F>(&self, f: F) -> CoreResult<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.domain.run_privileged(&self.record, f)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.record.id)
            .field("read_only", &self.record.read_only)
            .field("phase", &self.record.phase())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let (phase, owner) = {
            let inner = self.record.inner.lock();
            (inner.phase, inner.owner)
        };
        if matches!(phase, Phase::Active | Phase::Committing) && owner == thread::current().id() {
            tracing::warn!(transaction = %self.record.id, "active transaction dropped, rolling back");
            if let Err(err) = self.domain.rollback_record(&self.record, None) {
                tracing::warn!(transaction = %self.record.id, error = %err, "rollback of dropped transaction failed");
            }
        }
    }
}

//! Transaction state.

use crate::change::ChangeDescription;
use crate::status::Status;
use crate::transaction::{ResolvedOptions, TransactionOptions};
use crate::types::TransactionId;
use crate::validator::NotificationBuffer;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

/// Lifecycle phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Created but not started.
    Created,
    /// Started; the model may be read (and written, if writable).
    Active,
    /// Running precommit and validation.
    Committing,
    /// Reverting its changes.
    RollingBack,
    /// Finished; no further operation is allowed.
    Closed,
}

impl Phase {
    /// Returns true while the transaction is open (active or finishing).
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Phase::Active | Phase::Committing | Phase::RollingBack)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Created => "created",
            Phase::Active => "active",
            Phase::Committing => "committing",
            Phase::RollingBack => "rolling back",
            Phase::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// What happened to the parent's recording when a child started.
#[derive(Debug, Default)]
pub(crate) enum Handoff {
    /// The parent was not recording.
    #[default]
    Idle,
    /// The parent's segment was folded into its change; recording restarts
    /// when the child closes.
    Ended,
    /// The parent's segment was paused.
    Paused,
    /// An ancestor's paused segment was set aside for a recording child.
    Stashed(ChangeDescription),
}

#[derive(Debug)]
pub(crate) struct TxInner {
    pub(crate) owner: ThreadId,
    pub(crate) phase: Phase,
    pub(crate) options: ResolvedOptions,
    pub(crate) parent: Option<Arc<TxRecord>>,
    pub(crate) status: Status,
    pub(crate) abort: Option<Status>,
    pub(crate) rolling_back: bool,
    pub(crate) records: bool,
    pub(crate) handoff: Handoff,
    pub(crate) change: ChangeDescription,
    pub(crate) triggers: Vec<String>,
    pub(crate) trigger_depth: usize,
}

/// Shared state of one transaction.
///
/// The record is referenced by the public handle, by the per-thread context
/// while active, and by its children.
#[derive(Debug)]
pub(crate) struct TxRecord {
    pub(crate) id: TransactionId,
    pub(crate) read_only: bool,
    pub(crate) requested: TransactionOptions,
    pub(crate) buffer: NotificationBuffer,
    pub(crate) inner: Mutex<TxInner>,
}

impl TxRecord {
    pub(crate) fn new(
        id: TransactionId,
        owner: ThreadId,
        read_only: bool,
        requested: TransactionOptions,
        trigger_depth: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            read_only,
            requested,
            buffer: NotificationBuffer::default(),
            inner: Mutex::new(TxInner {
                owner,
                phase: Phase::Created,
                options: ResolvedOptions::default(),
                parent: None,
                status: Status::ok(),
                abort: None,
                rolling_back: false,
                records: false,
                handoff: Handoff::Idle,
                change: ChangeDescription::new(),
                triggers: Vec::new(),
                trigger_depth,
            }),
        })
    }

    pub(crate) fn phase(&self) -> Phase {
        self.inner.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.inner.lock().phase = phase;
    }

    pub(crate) fn owner(&self) -> ThreadId {
        self.inner.lock().owner
    }

    pub(crate) fn parent(&self) -> Option<Arc<TxRecord>> {
        self.inner.lock().parent.clone()
    }

    pub(crate) fn options(&self) -> ResolvedOptions {
        self.inner.lock().options.clone()
    }

    pub(crate) fn records(&self) -> bool {
        self.inner.lock().records
    }

    pub(crate) fn trigger_depth(&self) -> usize {
        self.inner.lock().trigger_depth
    }

    pub(crate) fn status(&self) -> Status {
        self.inner.lock().status.clone()
    }

    pub(crate) fn abort_status(&self) -> Option<Status> {
        self.inner.lock().abort.clone()
    }

    /// Marks the transaction aborted. The first abort wins.
    pub(crate) fn abort(&self, status: Status) {
        let mut inner = self.inner.lock();
        if inner.abort.is_none() && inner.phase != Phase::Closed {
            inner.abort = Some(status);
        }
    }

    /// Returns this record followed by its ancestors, innermost first.
    pub(crate) fn chain(self: &Arc<Self>) -> Vec<Arc<TxRecord>> {
        let mut chain = vec![Arc::clone(self)];
        let mut next = self.parent();
        while let Some(tx) = next {
            next = tx.parent();
            chain.push(tx);
        }
        chain
    }

    /// Returns true if this transaction or an ancestor is rolling back.
    pub(crate) fn is_rolling_back(self: &Arc<Self>) -> bool {
        self.chain().iter().any(|tx| tx.inner.lock().rolling_back)
    }

    /// Returns true if the transaction may write to the model now.
    pub(crate) fn can_write(&self) -> bool {
        !self.read_only && self.phase() == Phase::Active
    }

    /// Returns the innermost writable transaction of the chain.
    pub(crate) fn writer_in_chain(self: &Arc<Self>) -> Option<Arc<TxRecord>> {
        self.chain().into_iter().find(|tx| !tx.read_only)
    }

    /// Returns true if precommit of this transaction runs the aggregate
    /// loop: it has triggers enabled and no ancestor will run it later.
    pub(crate) fn is_trigger_scope_root(&self) -> bool {
        match self.parent() {
            None => true,
            Some(parent) => parent.read_only || !parent.options().triggers_enabled(),
        }
    }

    pub(crate) fn take_change(&self) -> ChangeDescription {
        std::mem::take(&mut self.inner.lock().change)
    }
}

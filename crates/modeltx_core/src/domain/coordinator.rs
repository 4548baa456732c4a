//! Transaction coordination.
//!
//! Everything that moves a transaction between phases lives here. Lock
//! order is: domain state, then a transaction's inner state, then a
//! notification buffer, then the graph. Observers, validators and commands
//! are always called with none of these held.

use super::observer::{ChangeObserver, ChangeSetEvent, ObserverError};
use super::EditingDomain;
use crate::change::{ChangeDescription, ChangeRecorder};
use crate::command::Command;
use crate::error::{CoreError, CoreResult};
use crate::lock::LockMode;
use crate::model::{Mutation, Notification, Notifier};
use crate::status::{Status, StatusCode};
use crate::transaction::{
    CommitReceipt, Handoff, Phase, ResolvedOptions, Transaction, TransactionOptions, TxRecord,
};
use crate::types::{ObserverId, ResourceId, TransactionId};
use crate::validator::{NotificationKinds, RemoveReason, Validation, Validator};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread::{self, ThreadId};

/// Transaction contexts, one per thread with an active transaction.
#[derive(Debug, Default)]
pub(crate) struct DomainState {
    pub(crate) contexts: HashMap<ThreadId, ThreadContext>,
}

/// What a thread needs while it has transactions open.
#[derive(Debug)]
pub(crate) struct ThreadContext {
    /// Innermost open transaction.
    pub(crate) active: Arc<TxRecord>,
    pub(crate) validator: Validator,
    pub(crate) recorder: ChangeRecorder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    Own,
    Aggregate,
}

type Observers = Vec<(ObserverId, Arc<dyn ChangeObserver>)>;

impl EditingDomain {
    pub(crate) fn create_record(
        &self,
        read_only: bool,
        options: TransactionOptions,
        trigger_depth: usize,
    ) -> Arc<TxRecord> {
        TxRecord::new(
            self.next_transaction_id(),
            thread::current().id(),
            read_only,
            options,
            trigger_depth,
        )
    }

    pub(crate) fn active_record(&self, thread: ThreadId) -> Option<Arc<TxRecord>> {
        self.inner
            .state
            .lock()
            .contexts
            .get(&thread)
            .map(|ctx| Arc::clone(&ctx.active))
    }

    fn with_context<T>(&self, f: impl FnOnce(&mut ThreadContext) -> T) -> CoreResult<T> {
        let mut state = self.inner.state.lock();
        let ctx = state
            .contexts
            .get_mut(&thread::current().id())
            .ok_or_else(|| CoreError::illegal_state("no transaction context on this thread"))?;
        Ok(f(ctx))
    }

    fn begin_internal(
        &self,
        read_only: bool,
        options: TransactionOptions,
        trigger_depth: usize,
    ) -> CoreResult<Transaction> {
        let record = self.create_record(read_only, options, trigger_depth);
        let tx = Transaction::new(record, self.clone());
        tx.start()?;
        Ok(tx)
    }

    // === Activation ===

    pub(crate) fn activate(&self, tx: &Arc<TxRecord>) -> CoreResult<()> {
        let thread = thread::current().id();
        {
            let inner = tx.inner.lock();
            if inner.owner != thread {
                return Err(CoreError::WrongThread { transaction: tx.id });
            }
            if inner.phase != Phase::Created {
                return Err(CoreError::illegal_state(format!(
                    "{} cannot start: it is {}",
                    tx.id, inner.phase
                )));
            }
        }

        let parent = self.active_record(thread);
        if let Some(parent) = &parent {
            if !parent.phase().is_open() {
                return Err(CoreError::illegal_state(format!(
                    "{} cannot nest in {}: it is {}",
                    tx.id,
                    parent.id,
                    parent.phase()
                )));
            }
        }
        let inherited = match &parent {
            Some(parent) => parent.options(),
            None => self.inner.defaults.clone(),
        };
        let options = tx.requested.resolve(&inherited);
        if let Some(parent) = &parent {
            if parent.read_only && !tx.read_only && !options.unprotected {
                self.inner.stats.record_protocol_violation();
                return Err(CoreError::protocol_violation(format!(
                    "{} cannot write inside read-only {}",
                    tx.id, parent.id
                )));
            }
        }

        let mode = match (&parent, tx.read_only) {
            (Some(_), _) => self.inner.lock.held_mode(thread).ok_or_else(|| {
                CoreError::illegal_state("nested transaction without a hold on the domain lock")
            })?,
            (None, true) => LockMode::Shared,
            (None, false) => LockMode::Exclusive,
        };
        self.inner.lock.acquire(mode, self.inner.config.lock_timeout)?;

        let records = !tx.read_only && !options.no_undo;
        let kinds = NotificationKinds::for_transaction(tx.read_only, &options);
        {
            let mut inner = tx.inner.lock();
            inner.phase = Phase::Active;
            inner.options = options.clone();
            inner.parent = parent.clone();
            inner.records = records;
        }

        let mut state = self.inner.state.lock();
        let begun = match state.contexts.get_mut(&thread) {
            Some(ctx) => {
                let parent = Arc::clone(&ctx.active);
                let handoff = if records {
                    if ctx.recorder.is_recording() {
                        let segment = ctx.recorder.end_recording();
                        parent.inner.lock().change.extend(segment);
                        Handoff::Ended
                    } else if ctx.recorder.has_segment() {
                        Handoff::Stashed(ctx.recorder.end_recording())
                    } else {
                        Handoff::Idle
                    }
                } else if ctx.recorder.is_recording() {
                    ctx.recorder.pause();
                    Handoff::Paused
                } else {
                    Handoff::Idle
                };
                parent.inner.lock().handoff = handoff;
                ctx.validator
                    .add(tx.id, Some(parent.id), kinds, Arc::clone(&tx.buffer));
                ctx.active = Arc::clone(tx);
                if records {
                    ctx.recorder.begin_recording()
                } else {
                    Ok(())
                }
            }
            None => {
                let mut validator = Validator::for_root(tx.read_only, &options);
                validator.add(tx.id, None, kinds, Arc::clone(&tx.buffer));
                let mut recorder = ChangeRecorder::new();
                let begun = if records {
                    recorder.begin_recording()
                } else {
                    Ok(())
                };
                state.contexts.insert(
                    thread,
                    ThreadContext {
                        active: Arc::clone(tx),
                        validator,
                        recorder,
                    },
                );
                begun
            }
        };
        drop(state);
        begun?;

        self.inner.stats.record_start();
        tracing::debug!(
            transaction = %tx.id,
            read_only = tx.read_only,
            parent = ?parent.as_ref().map(|p| p.id),
            "transaction started"
        );
        Ok(())
    }

    /// Checks that `tx` is owned by the calling thread, is the innermost
    /// open transaction there and is in an accepted phase.
    fn check_closable(&self, tx: &Arc<TxRecord>, accepted: &[Phase]) -> CoreResult<()> {
        let thread = thread::current().id();
        let (owner, phase) = {
            let inner = tx.inner.lock();
            (inner.owner, inner.phase)
        };
        if owner != thread {
            return Err(CoreError::WrongThread { transaction: tx.id });
        }
        if !accepted.contains(&phase) {
            return Err(CoreError::illegal_state(format!("{} is {}", tx.id, phase)));
        }
        match self.active_record(thread) {
            Some(active) if Arc::ptr_eq(&active, tx) => Ok(()),
            Some(active) => Err(CoreError::illegal_state(format!(
                "{} still has {} open inside it",
                tx.id, active.id
            ))),
            None => Err(CoreError::illegal_state(format!(
                "{} is not active on this thread",
                tx.id
            ))),
        }
    }

    // === Commit ===

    pub(crate) fn commit_record(&self, tx: &Arc<TxRecord>) -> CoreResult<CommitReceipt> {
        self.check_closable(tx, &[Phase::Active])?;
        if let Some(status) = tx.abort_status() {
            return self.fail(tx, status);
        }
        tx.set_phase(Phase::Committing);

        let options = tx.options();
        if !tx.read_only && options.triggers_enabled() {
            if let Err(err) = self.precommit(tx) {
                return self.fail(tx, err.rollback_status());
            }
        }
        if let Some(status) = tx.abort_status() {
            return self.fail(tx, status);
        }

        let mut status = tx.status();
        if !tx.read_only && tx.parent().is_none() {
            let verdict = self.validate_root(tx, &options)?;
            if verdict.is_failure() {
                return self.fail(tx, verdict);
            }
            status = status.merge(verdict);
        }

        if tx.records() {
            let segment = self.with_context(|ctx| ctx.recorder.end_recording())?;
            tx.inner.lock().change.extend(segment);
        }
        tx.inner.lock().status = status.clone();

        let (change, triggers) = self.deactivate(tx, false)?;
        self.inner.stats.record_commit();
        tracing::debug!(
            transaction = %tx.id,
            edits = change.edit_count(),
            triggers = triggers.len(),
            "transaction committed"
        );
        Ok(CommitReceipt {
            transaction: tx.id,
            status,
            change,
            triggers,
        })
    }

    fn fail(&self, tx: &Arc<TxRecord>, status: Status) -> CoreResult<CommitReceipt> {
        let status = self.roll_back(tx, Some(status))?;
        Err(CoreError::RolledBack { status })
    }

    // === Rollback ===

    pub(crate) fn rollback_record(
        &self,
        tx: &Arc<TxRecord>,
        reason: Option<Status>,
    ) -> CoreResult<Status> {
        self.check_closable(tx, &[Phase::Active, Phase::Committing])?;
        self.roll_back(tx, reason)
    }

    fn roll_back(&self, tx: &Arc<TxRecord>, reason: Option<Status>) -> CoreResult<Status> {
        {
            let mut inner = tx.inner.lock();
            inner.phase = Phase::RollingBack;
            inner.rolling_back = true;
        }
        if tx.records() {
            let segment = self.with_context(|ctx| ctx.recorder.end_recording())?;
            tx.inner.lock().change.extend(segment);
        }

        let change = tx.take_change();
        let mut revert = Status::ok();
        if !change.is_empty() {
            let edits = change.edit_count();
            let failures = change.revert_all(&mut *self.inner.graph.write());
            if failures.is_empty() {
                tracing::trace!(transaction = %tx.id, edits, "changes reverted");
            } else {
                for err in &failures {
                    tracing::error!(transaction = %tx.id, error = %err, "failed to revert edit");
                }
                let message = failures
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                revert = Status::error(
                    StatusCode::RevertFailed,
                    format!("{} of {edits} edits not reverted: {message}", failures.len()),
                );
            }
        }

        let status = {
            let mut inner = tx.inner.lock();
            let status = match reason.or_else(|| inner.abort.clone()) {
                Some(status) => status,
                None if inner.status.is_failure() => Status::rollback(),
                None => inner.status.clone().merge(Status::rollback()),
            };
            let status = status.merge(revert);
            inner.status = status.clone();
            status
        };

        self.deactivate(tx, true)?;
        self.inner.stats.record_rollback();
        tracing::debug!(transaction = %tx.id, %status, "transaction rolled back");
        Ok(status)
    }

    /// Closes `tx` and hands the thread back to its parent.
    ///
    /// Returns the change and trigger labels of a root transaction. A nested
    /// transaction's change and triggers go to its parent instead.
    fn deactivate(
        &self,
        tx: &Arc<TxRecord>,
        rolled_back: bool,
    ) -> CoreResult<(ChangeDescription, Vec<String>)> {
        let thread = thread::current().id();
        let reason = if rolled_back {
            RemoveReason::RolledBack
        } else {
            RemoveReason::Closed
        };

        let closed = match tx.parent() {
            None => {
                let postcommit = self.with_context(|ctx| {
                    ctx.validator.remove(tx.id, reason);
                    let list = ctx.validator.postcommit_notifications(tx.id);
                    ctx.validator.dispose();
                    list
                })?;
                if !postcommit.is_empty() {
                    self.dispatch_postcommit(tx.id, &postcommit);
                }
                self.inner.state.lock().contexts.remove(&thread);
                let mut inner = tx.inner.lock();
                inner.phase = Phase::Closed;
                (
                    std::mem::take(&mut inner.change),
                    std::mem::take(&mut inner.triggers),
                )
            }
            Some(parent) => {
                let (change, triggers) = {
                    let mut inner = tx.inner.lock();
                    inner.phase = Phase::Closed;
                    (
                        std::mem::take(&mut inner.change),
                        std::mem::take(&mut inner.triggers),
                    )
                };
                let mut state = self.inner.state.lock();
                let ctx = state
                    .contexts
                    .get_mut(&thread)
                    .ok_or_else(|| CoreError::illegal_state("no transaction context on this thread"))?;
                ctx.validator.remove(tx.id, reason);
                ctx.active = Arc::clone(&parent);
                let handoff = std::mem::take(&mut parent.inner.lock().handoff);
                match handoff {
                    Handoff::Ended => {
                        if !rolled_back {
                            parent.inner.lock().change.push_nested(change);
                        }
                        ctx.recorder.begin_recording()?;
                    }
                    Handoff::Paused => ctx.recorder.resume(),
                    Handoff::Stashed(mut segment) => {
                        if !rolled_back {
                            segment.push_nested(change);
                        }
                        ctx.recorder.restore(segment);
                    }
                    Handoff::Idle => {
                        if !rolled_back {
                            parent.inner.lock().change.push_nested(change);
                        }
                    }
                }
                if !rolled_back {
                    parent.inner.lock().triggers.extend(triggers);
                }
                (ChangeDescription::new(), Vec::new())
            }
        };

        self.inner.lock.release()?;
        Ok(closed)
    }

    // === Precommit ===

    fn precommit(&self, tx: &Arc<TxRecord>) -> CoreResult<()> {
        let own = self.with_context(|ctx| ctx.validator.precommit_notifications(tx.id))?;
        if !own.is_empty() {
            let commands = self.dispatch_precommit(tx, &own, Dispatch::Own)?;
            self.execute_triggers(tx, commands)?;
        }
        if !tx.is_trigger_scope_root() {
            return Ok(());
        }

        let limit = self.inner.config.max_trigger_cascade;
        let mut rounds = 0usize;
        loop {
            let batch =
                self.with_context(|ctx| ctx.validator.aggregate_precommit_notifications(tx.id))?;
            if batch.is_empty() {
                return Ok(());
            }
            rounds += 1;
            if rounds > limit {
                return Err(CoreError::RolledBack {
                    status: Status::error(
                        StatusCode::CascadeLimit,
                        format!("trigger cascade did not settle after {limit} rounds"),
                    ),
                });
            }
            self.inner.stats.record_aggregate_round();
            let commands = self.dispatch_precommit(tx, &batch, Dispatch::Aggregate)?;
            self.execute_triggers(tx, commands)?;
        }
    }

    fn observers_with(&self, wanted: impl Fn(&dyn ChangeObserver) -> bool) -> Observers {
        self.inner
            .observers
            .read()
            .iter()
            .filter(|(_, observer)| wanted(observer.as_ref()))
            .cloned()
            .collect()
    }

    /// Delivers `notifications` to precommit observers inside a read-only
    /// transaction and collects the triggers they return.
    fn dispatch_precommit(
        &self,
        tx: &Arc<TxRecord>,
        notifications: &[Notification],
        dispatch: Dispatch,
    ) -> CoreResult<Vec<Box<dyn Command>>> {
        let observers = self.observers_with(|observer| {
            let interest = observer.interest();
            match dispatch {
                Dispatch::Own => interest.precommit,
                Dispatch::Aggregate => interest.aggregate,
            }
        });
        if observers.is_empty() {
            return Ok(Vec::new());
        }
        self.inner.stats.record_precommit_dispatch();

        let reader = self.begin_internal(true, TransactionOptions::new(), 0)?;
        let mut commands = Vec::new();
        let mut failure = None;
        for (id, observer) in &observers {
            let filtered = observer.filter().apply(notifications);
            if filtered.is_empty() {
                continue;
            }
            let event = ChangeSetEvent::new(self, Some(tx.id), &filtered);
            match panic::catch_unwind(AssertUnwindSafe(|| observer.about_to_commit(&event))) {
                Ok(Ok(Some(command))) => commands.push(command),
                Ok(Ok(None)) => {}
                Ok(Err(ObserverError::Rollback(status))) => {
                    tracing::debug!(observer = %id, transaction = %tx.id, %status, "observer requested rollback");
                    failure = Some(status);
                    break;
                }
                Ok(Err(err)) => {
                    tracing::error!(observer = %id, transaction = %tx.id, error = %err, "precommit observer failed");
                    self.inner.stats.record_observer_failure();
                    failure = Some(Status::error(StatusCode::ObserverFailed, err.to_string()));
                    break;
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    tracing::error!(observer = %id, transaction = %tx.id, panic = %message, "precommit observer panicked");
                    self.inner.stats.record_observer_failure();
                    failure = Some(Status::error(
                        StatusCode::ObserverFailed,
                        format!("observer {id} panicked: {message}"),
                    ));
                    break;
                }
            }
        }
        reader.commit()?;

        match failure {
            Some(status) => Err(CoreError::RolledBack { status }),
            None => Ok(commands),
        }
    }

    /// Runs trigger commands in one write transaction nested in `tx`.
    fn execute_triggers(
        &self,
        tx: &Arc<TxRecord>,
        commands: Vec<Box<dyn Command>>,
    ) -> CoreResult<()> {
        if commands.is_empty() {
            return Ok(());
        }
        let limit = self.inner.config.max_trigger_cascade;
        let depth = tx.trigger_depth() + 1;
        if depth > limit {
            return Err(CoreError::RolledBack {
                status: Status::error(
                    StatusCode::CascadeLimit,
                    format!("triggers nested deeper than {limit} levels"),
                ),
            });
        }

        let labels: Vec<String> = commands.iter().map(|c| c.label().to_string()).collect();
        tracing::debug!(transaction = %tx.id, depth, count = labels.len(), "executing triggers");
        let trigger = self.begin_internal(false, TransactionOptions::new(), depth)?;
        for mut command in commands {
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| command.execute(self))) {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(payload) => Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            };
            if let Some(message) = failure {
                let label = command.label().to_string();
                tracing::warn!(transaction = %tx.id, trigger = %label, error = %message, "trigger failed");
                if trigger.phase() == Phase::Active {
                    trigger.rollback()?;
                }
                return Err(CoreError::RolledBack {
                    status: Status::error(
                        StatusCode::TriggerFailed,
                        format!("trigger '{label}' failed: {message}"),
                    ),
                });
            }
        }
        self.inner.stats.record_triggers(labels.len() as u64);
        tx.inner.lock().triggers.extend(labels);
        trigger.commit()?;
        Ok(())
    }

    // === Validation ===

    fn validate_root(&self, tx: &Arc<TxRecord>, options: &ResolvedOptions) -> CoreResult<Status> {
        let (validation, changed) = self.with_context(|ctx| {
            let validation = if options.no_validation {
                Validation::Skip
            } else {
                ctx.validator.validation(tx.id)
            };
            let changed = if options.validate_edit {
                ctx.validator.postcommit_notifications(tx.id)
            } else {
                Vec::new()
            };
            (validation, changed)
        })?;

        let resources: BTreeSet<ResourceId> = {
            let graph = self.inner.graph.read();
            changed
                .iter()
                .filter(|n| !n.is_read())
                .filter_map(|n| match n.notifier() {
                    Notifier::Resource(id) => Some(id),
                    Notifier::Entity(id) => graph.resource_of(id),
                })
                .collect()
        };

        let rules = self.inner.rule_validator.read().clone();
        let edits = self
            .inner
            .edit_validator
            .read()
            .clone()
            .filter(|_| !resources.is_empty());
        let run_rules = rules.is_some() && !validation.notifications().is_empty();
        if !run_rules && edits.is_none() {
            return Ok(Status::ok());
        }

        let reader = self.begin_internal(true, TransactionOptions::new().silent(true), 0)?;
        let mut status = match rules {
            Some(rules) => validation.run(|list| {
                panic::catch_unwind(AssertUnwindSafe(|| rules.validate(self, list))).unwrap_or_else(
                    |payload| {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(transaction = %tx.id, panic = %message, "rule validator panicked");
                        Status::error(StatusCode::ValidationFailed, format!("rule validator panicked: {message}"))
                    },
                )
            }),
            None => Status::ok(),
        };
        if let Some(edits) = edits {
            let list: Vec<ResourceId> = resources.into_iter().collect();
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| edits.validate_edit(self, &list)))
                .unwrap_or_else(|payload| {
                    Status::error(
                        StatusCode::EditRefused,
                        format!("edit validator panicked: {}", panic_message(payload.as_ref())),
                    )
                });
            status = if verdict.is_failure() {
                status.merge(Status::error(StatusCode::EditRefused, "edit refused").merge(verdict))
            } else {
                status.merge(verdict)
            };
        }
        reader.commit()?;

        if status.is_failure() {
            tracing::debug!(transaction = %tx.id, %status, "validation failed");
        }
        Ok(status)
    }

    // === Postcommit ===

    fn dispatch_postcommit(&self, tx: TransactionId, notifications: &[Notification]) {
        let observers = self.observers_with(|observer| observer.interest().postcommit);
        if observers.is_empty() {
            return;
        }
        self.inner.stats.record_postcommit_dispatch();
        let reader = match self.begin_internal(true, TransactionOptions::new().silent(true), 0) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::error!(transaction = %tx, error = %err, "cannot start postcommit dispatch");
                return;
            }
        };
        self.notify_committed(&observers, Some(tx), notifications);
        if let Err(err) = reader.commit() {
            tracing::error!(transaction = %tx, error = %err, "postcommit dispatch did not close cleanly");
        }
    }

    fn broadcast_unbatched(&self, notification: &Notification) {
        let observers = self.observers_with(|observer| observer.interest().postcommit);
        if observers.is_empty() {
            return;
        }
        self.inner.stats.record_unbatched_broadcast();
        self.notify_committed(&observers, None, std::slice::from_ref(notification));
    }

    fn notify_committed(
        &self,
        observers: &Observers,
        tx: Option<TransactionId>,
        notifications: &[Notification],
    ) {
        for (id, observer) in observers {
            let filtered = observer.filter().apply(notifications);
            if filtered.is_empty() {
                continue;
            }
            let event = ChangeSetEvent::new(self, tx, &filtered);
            match panic::catch_unwind(AssertUnwindSafe(|| observer.committed(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(observer = %id, error = %err, "postcommit observer failed");
                    self.inner.stats.record_observer_failure();
                }
                Err(payload) => {
                    tracing::error!(
                        observer = %id,
                        panic = %panic_message(payload.as_ref()),
                        "postcommit observer panicked"
                    );
                    self.inner.stats.record_observer_failure();
                }
            }
        }
    }

    // === Model access ===

    pub(crate) fn check_writable(&self) -> CoreResult<()> {
        let state = self.inner.state.lock();
        self.check_write(&state, thread::current().id())
    }

    /// Fails unless `thread` has an active write transaction. A write from
    /// any other thread while a writer is open aborts that writer.
    fn check_write(&self, state: &DomainState, thread: ThreadId) -> CoreResult<()> {
        if let Some(ctx) = state.contexts.get(&thread) {
            if ctx.active.can_write() {
                return Ok(());
            }
        }
        for (other, ctx) in &state.contexts {
            if *other == thread {
                continue;
            }
            if let Some(writer) = ctx.active.writer_in_chain() {
                let status = Status::error(
                    StatusCode::ConcurrentWrite,
                    format!("{} was written to concurrently from another thread", writer.id),
                );
                for record in writer.chain() {
                    record.abort(status.clone());
                }
                tracing::warn!(transaction = %writer.id, "concurrent write detected, transaction aborted");
                self.inner.stats.record_concurrent_write_abort();
                return Err(CoreError::ConcurrentWrite {
                    transaction: writer.id,
                });
            }
        }
        self.inner.stats.record_protocol_violation();
        Err(CoreError::IllegalWrite)
    }

    /// Applies a mutation and routes the resulting notification.
    pub(crate) fn mutate(
        &self,
        notifier: Notifier,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<Notification> {
        let thread = thread::current().id();
        let mut state = self.inner.state.lock();
        if !mutation.is_read() {
            self.check_write(&state, thread)?;
        }
        let event = Arc::new(self.inner.graph.write().apply(notifier, slot, mutation)?);
        self.inner.stats.record_notification();
        tracing::trace!(%event, "model changed");

        let batched = match state.contexts.get_mut(&thread) {
            Some(ctx) => {
                if !ctx.active.is_rolling_back() {
                    ctx.recorder.record(&event);
                    ctx.active.buffer.lock().push(Arc::clone(&event));
                }
                true
            }
            None => false,
        };
        drop(state);
        if !batched {
            self.broadcast_unbatched(&event);
        }
        Ok(event)
    }

    // === Yield and privileged execution ===

    pub(crate) fn yield_record(&self, tx: &Arc<TxRecord>) -> CoreResult<bool> {
        self.check_closable(tx, &[Phase::Active])?;
        if let Some(writer) = tx.writer_in_chain() {
            return Err(CoreError::illegal_state(format!(
                "{} cannot yield: {} is writable",
                tx.id, writer.id
            )));
        }
        Ok(self.inner.lock.yield_now()?)
    }

    /// Moves the calling thread's context, and its hold on the domain lock,
    /// to `to`.
    fn transfer_context(&self, to: ThreadId) -> CoreResult<()> {
        let from = thread::current().id();
        let mut state = self.inner.state.lock();
        let ctx = state
            .contexts
            .remove(&from)
            .ok_or_else(|| CoreError::illegal_state("no transaction context to transfer"))?;
        let chain = ctx.active.chain();
        for record in &chain {
            record.inner.lock().owner = to;
        }
        if let Err(err) = self.inner.lock.transfer(to) {
            for record in &chain {
                record.inner.lock().owner = from;
            }
            state.contexts.insert(from, ctx);
            return Err(err.into());
        }
        state.contexts.insert(to, ctx);
        tracing::trace!(?from, ?to, transaction = %chain[0].id, "transaction context transferred");
        Ok(())
    }

    pub(crate) fn run_privileged<R, F>(&self, tx: &Arc<TxRecord>, f: F) -> CoreResult<R>
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.check_closable(tx, &[Phase::Active])?;
        let owner = thread::current().id();

        let (handed, joined) = thread::scope(|scope| {
            let (go, wait) = mpsc::channel::<bool>();
            let worker = scope.spawn(move || {
                if !wait.recv().unwrap_or(false) {
                    return None;
                }
                let outcome = panic::catch_unwind(AssertUnwindSafe(f));
                if let Err(err) = self.transfer_context(owner) {
                    tracing::error!(error = %err, "failed to hand transaction back to its owner");
                }
                Some(outcome)
            });
            let handed = self.transfer_context(worker.thread().id());
            // The worker exits without running `f` if the send fails.
            let _ = go.send(handed.is_ok());
            (handed, worker.join())
        });

        handed?;
        match joined {
            Ok(Some(Ok(value))) => Ok(value),
            Ok(Some(Err(payload))) | Err(payload) => panic::resume_unwind(payload),
            Ok(None) => Err(CoreError::illegal_state("privileged work did not run")),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

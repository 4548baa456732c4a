//! Editing domain.
//!
//! The [`EditingDomain`] owns a model graph and coordinates every
//! transaction over it:
//! - **Locking**: one [`DomainLock`] per domain; read-only root transactions
//!   hold it shared, writable ones exclusive, nested ones reenter it
//! - **Recording**: every undoable change made in a recording transaction is
//!   captured so rollback and undo can revert it
//! - **Notification**: precommit observers see changes before commit and may
//!   add trigger commands; postcommit observers see committed changes only
//!
//! # Example
//!
//! ```rust,ignore
//! use modeltx_core::{EditingDomain, DomainConfig};
//!
//! let domain = EditingDomain::new(DomainConfig::new().name("library"));
//! let book = domain.transaction(|d| {
//!     let book = d.create_entity("Book")?;
//!     d.set(book, "title", "Dune")?;
//!     Ok(book)
//! })?;
//! ```

mod coordinator;
mod observer;

pub use observer::{ChangeObserver, ChangeSetEvent, ObserverError, ObserverInterest};

pub(crate) use coordinator::DomainState;

use crate::config::DomainConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::{DomainLock, LockMode};
use crate::model::{
    EntityId, ModelGraph, Mutation, Notifier, Value, CONTENTS, LOADED,
};
use crate::stats::{DomainStats, StatsSnapshot};
use crate::transaction::{ResolvedOptions, Transaction, TransactionOptions};
use crate::types::{ObserverId, ResourceId, TransactionId};
use crate::validator::{EditValidator, RuleValidator};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

type ObserverList = Vec<(ObserverId, Arc<dyn ChangeObserver>)>;

pub(crate) struct DomainInner {
    /// Domain configuration.
    pub(crate) config: DomainConfig,
    /// Default options resolved once.
    pub(crate) defaults: ResolvedOptions,
    /// Lock serializing transactions.
    pub(crate) lock: DomainLock,
    /// Per-thread transaction contexts.
    pub(crate) state: Mutex<DomainState>,
    /// The model.
    pub(crate) graph: RwLock<ModelGraph>,
    /// Registered observers, in registration order.
    pub(crate) observers: RwLock<ObserverList>,
    pub(crate) rule_validator: RwLock<Option<Arc<dyn RuleValidator>>>,
    pub(crate) edit_validator: RwLock<Option<Arc<dyn EditValidator>>>,
    /// Next transaction ID.
    next_transaction: AtomicU64,
    /// Next observer ID.
    next_observer: AtomicU64,
    pub(crate) stats: DomainStats,
}

/// A shared, observable model under transactional control.
///
/// Cloning is cheap; clones refer to the same domain.
#[derive(Clone)]
pub struct EditingDomain {
    pub(crate) inner: Arc<DomainInner>,
}

impl Default for EditingDomain {
    fn default() -> Self {
        Self::new(DomainConfig::default())
    }
}

impl fmt::Debug for EditingDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditingDomain")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}

impl EditingDomain {
    /// Creates a domain with an empty model.
    pub fn new(config: DomainConfig) -> Self {
        let defaults = config
            .default_options
            .resolve(&ResolvedOptions::default());
        tracing::debug!(domain = %config.name, "editing domain created");
        Self {
            inner: Arc::new(DomainInner {
                config,
                defaults,
                lock: DomainLock::new(),
                state: Mutex::new(DomainState::default()),
                graph: RwLock::new(ModelGraph::new()),
                observers: RwLock::new(Vec::new()),
                rule_validator: RwLock::new(None),
                edit_validator: RwLock::new(None),
                next_transaction: AtomicU64::new(1),
                next_observer: AtomicU64::new(1),
                stats: DomainStats::new(),
            }),
        }
    }

    /// Returns the domain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DomainConfig {
        &self.inner.config
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Returns the calling thread's reentrancy depth on the domain lock.
    #[must_use]
    pub fn lock_depth(&self) -> usize {
        self.inner.lock.depth(thread::current().id())
    }

    /// Returns the mode in which the calling thread holds the domain lock.
    #[must_use]
    pub fn lock_mode(&self) -> Option<LockMode> {
        self.inner.lock.held_mode(thread::current().id())
    }

    /// Returns the number of threads waiting for the domain lock.
    #[must_use]
    pub fn lock_waiters(&self) -> usize {
        self.inner.lock.waiting()
    }

    /// Interrupts `thread` if it is waiting to start a transaction.
    pub fn interrupt(&self, thread: ThreadId) {
        self.inner.lock.interrupt(thread);
    }

    // === Validators and observers ===

    /// Installs the rule validator consulted at root commit.
    pub fn set_rule_validator(&self, validator: impl RuleValidator + 'static) {
        *self.inner.rule_validator.write() = Some(Arc::new(validator));
    }

    /// Installs the edit validator consulted for `validate_edit`
    /// transactions.
    pub fn set_edit_validator(&self, validator: impl EditValidator + 'static) {
        *self.inner.edit_validator.write() = Some(Arc::new(validator));
    }

    /// Registers an observer.
    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) -> ObserverId {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.write().push((id, observer));
        tracing::debug!(observer = %id, "observer added");
        id
    }

    /// Unregisters an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    // === Transactions ===

    /// Creates a transaction without starting it.
    pub fn create_transaction(&self, read_only: bool, options: TransactionOptions) -> Transaction {
        let record = self.create_record(read_only, options, 0);
        Transaction::new(record, self.clone())
    }

    /// Creates and starts a transaction.
    pub fn start_transaction(
        &self,
        read_only: bool,
        options: TransactionOptions,
    ) -> CoreResult<Transaction> {
        let tx = self.create_transaction(read_only, options);
        tx.start()?;
        Ok(tx)
    }

    /// Returns the transaction active on the calling thread.
    #[must_use]
    pub fn active_transaction(&self) -> Option<TransactionId> {
        self.active_record(thread::current().id()).map(|tx| tx.id)
    }

    /// Runs `f` in a write transaction.
    ///
    /// The transaction commits if `f` succeeds and rolls back if it fails.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// domain.transaction(|d| d.set(book, "title", "Dune"))?;
    /// ```
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&EditingDomain) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.transaction_with(TransactionOptions::new(), f)
    }

    /// Runs `f` in a write transaction with the given options.
    pub fn transaction_with<T>(
        &self,
        options: TransactionOptions,
        f: impl FnOnce(&EditingDomain) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let tx = self.start_transaction(false, options)?;
        match f(self) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if tx.is_active() {
                    tx.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// Runs `f` in a read-only transaction.
    pub fn run_exclusive<T>(&self, f: impl FnOnce(&EditingDomain) -> T) -> CoreResult<T> {
        let tx = self.start_transaction(true, TransactionOptions::new())?;
        let value = f(self);
        tx.commit()?;
        Ok(value)
    }

    /// Lets threads waiting for the domain lock run, if the calling thread's
    /// active transaction is read-only.
    pub fn yield_now(&self) -> CoreResult<bool> {
        match self.active_record(thread::current().id()) {
            Some(tx) => self.yield_record(&tx),
            None => Err(CoreError::illegal_state("no active transaction to yield")),
        }
    }

    pub(crate) fn next_transaction_id(&self) -> TransactionId {
        TransactionId::new(self.inner.next_transaction.fetch_add(1, Ordering::Relaxed))
    }

    // === Model: structure ===

    /// Creates a resource. Requires a write transaction.
    pub fn create_resource(&self, uri: impl Into<String>) -> CoreResult<ResourceId> {
        self.check_writable()?;
        Ok(self.inner.graph.write().create_resource(uri))
    }

    /// Creates an entity. Requires a write transaction.
    ///
    /// The new entity is not observable until it is added to a resource or
    /// referenced from another entity.
    pub fn create_entity(&self, class: impl Into<String>) -> CoreResult<EntityId> {
        self.check_writable()?;
        Ok(self.inner.graph.write().create_entity(class))
    }

    // === Model: writes ===

    /// Assigns a single-valued slot.
    pub fn set(&self, entity: EntityId, slot: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.mutate(entity.into(), slot, Mutation::Set(value.into()))
            .map(|_| ())
    }

    /// Clears a single-valued slot.
    pub fn unset(&self, entity: EntityId, slot: &str) -> CoreResult<()> {
        self.mutate(entity.into(), slot, Mutation::Unset).map(|_| ())
    }

    /// Appends to a many-valued slot.
    pub fn add(&self, entity: EntityId, slot: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.mutate(
            entity.into(),
            slot,
            Mutation::Insert {
                index: None,
                values: vec![value.into()],
            },
        )
        .map(|_| ())
    }

    /// Inserts into a many-valued slot at `index`.
    pub fn insert(
        &self,
        entity: EntityId,
        slot: &str,
        index: usize,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        self.mutate(
            entity.into(),
            slot,
            Mutation::Insert {
                index: Some(index),
                values: vec![value.into()],
            },
        )
        .map(|_| ())
    }

    /// Appends several values to a many-valued slot in one change.
    pub fn add_many(&self, entity: EntityId, slot: &str, values: Vec<Value>) -> CoreResult<()> {
        self.mutate(
            entity.into(),
            slot,
            Mutation::Insert {
                index: None,
                values,
            },
        )
        .map(|_| ())
    }

    /// Removes the value at `index` from a many-valued slot.
    pub fn remove(&self, entity: EntityId, slot: &str, index: usize) -> CoreResult<Value> {
        let event = self.mutate(entity.into(), slot, Mutation::Remove { index, count: 1 })?;
        event
            .old_value()
            .cloned()
            .ok_or_else(|| CoreError::invalid_slot(slot, "nothing was removed"))
    }

    /// Removes `count` contiguous values from a many-valued slot in one
    /// change.
    pub fn remove_many(
        &self,
        entity: EntityId,
        slot: &str,
        index: usize,
        count: usize,
    ) -> CoreResult<()> {
        self.mutate(entity.into(), slot, Mutation::Remove { index, count })
            .map(|_| ())
    }

    /// Re-asserts a slot without changing it. Allowed outside transactions.
    pub fn touch(&self, notifier: impl Into<Notifier>, slot: &str) -> CoreResult<()> {
        self.mutate(notifier.into(), slot, Mutation::Touch)
            .map(|_| ())
    }

    /// Adds a root entity to a resource.
    pub fn add_root(&self, resource: ResourceId, entity: EntityId) -> CoreResult<()> {
        self.mutate(
            resource.into(),
            CONTENTS,
            Mutation::Insert {
                index: None,
                values: vec![Value::Ref(entity)],
            },
        )
        .map(|_| ())
    }

    /// Removes a root entity from a resource. Returns false if it was not a
    /// root of that resource.
    pub fn remove_root(&self, resource: ResourceId, entity: EntityId) -> CoreResult<bool> {
        let contents = self.inner.graph.read().contents(resource)?;
        let Some(index) = contents.iter().position(|e| *e == entity) else {
            return Ok(false);
        };
        self.mutate(resource.into(), CONTENTS, Mutation::Remove { index, count: 1 })?;
        Ok(true)
    }

    /// Marks a resource loaded. Allowed outside write transactions.
    pub fn load_resource(&self, resource: ResourceId) -> CoreResult<()> {
        self.mutate(resource.into(), LOADED, Mutation::Load)
            .map(|_| ())
    }

    /// Marks a resource unloaded. Allowed outside write transactions.
    pub fn unload_resource(&self, resource: ResourceId) -> CoreResult<()> {
        self.mutate(resource.into(), LOADED, Mutation::Unload)
            .map(|_| ())
    }

    // === Model: reads ===

    /// Reads a single-valued slot.
    pub fn get(&self, entity: EntityId, slot: &str) -> CoreResult<Option<Value>> {
        self.inner.graph.read().get(entity, slot)
    }

    /// Reads a many-valued slot.
    pub fn get_many(&self, entity: EntityId, slot: &str) -> CoreResult<Vec<Value>> {
        self.inner.graph.read().get_many(entity, slot)
    }

    /// Returns the class of an entity.
    pub fn class_of(&self, entity: EntityId) -> CoreResult<String> {
        self.inner
            .graph
            .read()
            .class_of(entity)
            .map(str::to_string)
    }

    /// Returns the root entities of a resource.
    pub fn resource_contents(&self, resource: ResourceId) -> CoreResult<Vec<EntityId>> {
        self.inner.graph.read().contents(resource)
    }

    /// Checks if a resource is loaded.
    pub fn is_loaded(&self, resource: ResourceId) -> CoreResult<bool> {
        self.inner.graph.read().is_loaded(resource)
    }

    /// Returns the resource an entity is a root of.
    #[must_use]
    pub fn resource_of(&self, entity: EntityId) -> Option<ResourceId> {
        self.inner.graph.read().resource_of(entity)
    }

    /// Runs `f` with shared access to the model graph.
    pub fn read<T>(&self, f: impl FnOnce(&ModelGraph) -> T) -> T {
        f(&self.inner.graph.read())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, FnCommand};
    use crate::model::Notification;
    use crate::status::{Status, StatusCode};
    use crate::transaction::Phase;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        interest: ObserverInterest,
        batches: Mutex<Vec<Vec<Notification>>>,
    }

    impl Recorder {
        fn new(interest: ObserverInterest) -> Arc<Self> {
            Arc::new(Self {
                interest,
                batches: Mutex::new(Vec::new()),
            })
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().iter().map(Vec::len).collect()
        }
    }

    impl ChangeObserver for Recorder {
        fn interest(&self) -> ObserverInterest {
            self.interest
        }

        fn about_to_commit(
            &self,
            event: &ChangeSetEvent<'_>,
        ) -> Result<Option<Box<dyn Command>>, ObserverError> {
            self.batches.lock().push(event.notifications().to_vec());
            Ok(None)
        }

        fn committed(&self, event: &ChangeSetEvent<'_>) -> Result<(), ObserverError> {
            self.batches.lock().push(event.notifications().to_vec());
            Ok(())
        }
    }

    /// Bumps `count` whenever `title` changes, until it reaches `rounds`.
    struct Counter {
        rounds: i64,
        interest: ObserverInterest,
        dispatches: AtomicUsize,
    }

    impl ChangeObserver for Counter {
        fn interest(&self) -> ObserverInterest {
            self.interest
        }

        fn about_to_commit(
            &self,
            event: &ChangeSetEvent<'_>,
        ) -> Result<Option<Box<dyn Command>>, ObserverError> {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
            let Some(entity) = event.notifications().iter().find_map(|n| match n.notifier() {
                Notifier::Entity(id) => Some(id),
                Notifier::Resource(_) => None,
            }) else {
                return Ok(None);
            };
            let count = event
                .domain()
                .get(entity, "count")
                .ok()
                .flatten()
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            if count >= self.rounds {
                return Ok(None);
            }
            Ok(Some(FnCommand::boxed("bump", move |d: &EditingDomain| {
                d.set(entity, "count", count + 1)
            })))
        }
    }

    fn library(domain: &EditingDomain) -> (ResourceId, EntityId) {
        domain
            .transaction(|d| {
                let res = d.create_resource("mem://library")?;
                let book = d.create_entity("Book")?;
                d.add_root(res, book)?;
                Ok((res, book))
            })
            .unwrap()
    }

    #[test]
    fn commit_publishes_changes() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        assert_eq!(domain.active_transaction(), Some(tx.id()));
        assert_eq!(domain.lock_mode(), Some(LockMode::Exclusive));
        domain.set(book, "title", "Dune").unwrap();
        let receipt = tx.commit().unwrap();

        assert!(receipt.status.is_ok());
        assert_eq!(receipt.change.edit_count(), 1);
        assert_eq!(tx.phase(), Phase::Closed);
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
        assert_eq!(domain.active_transaction(), None);
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn rollback_restores_state() {
        let domain = EditingDomain::default();
        let (res, book) = library(&domain);
        let before = domain.read(ModelGraph::clone);

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        domain.add(book, "tags", "scifi").unwrap();
        let other = domain.create_entity("Book").unwrap();
        domain.add_root(res, other).unwrap();
        {
            let nested = domain
                .start_transaction(false, TransactionOptions::new())
                .unwrap();
            domain.set(other, "title", "Emma").unwrap();
            nested.commit().unwrap();
        }
        let status = tx.rollback().unwrap();

        assert!(status.has_code(StatusCode::Rollback));
        assert!(domain.read(|g| g.same_state(&before)));
        assert_eq!(domain.stats().transactions_rolled_back, 1);
    }

    #[test]
    fn nested_rollback_keeps_parent_changes() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let receipt = {
            let tx = domain
                .start_transaction(false, TransactionOptions::new())
                .unwrap();
            domain.set(book, "title", "Dune").unwrap();
            let nested = domain
                .start_transaction(false, TransactionOptions::new())
                .unwrap();
            assert_eq!(nested.parent_id(), Some(tx.id()));
            assert_eq!(domain.lock_depth(), 2);
            domain.set(book, "author", "Herbert").unwrap();
            nested.rollback().unwrap();
            domain.set(book, "year", 1965i64).unwrap();
            tx.commit().unwrap()
        };

        assert_eq!(receipt.change.edit_count(), 2);
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
        assert_eq!(domain.get(book, "author").unwrap(), None);
        assert_eq!(domain.get(book, "year").unwrap(), Some(Value::Int(1965)));
    }

    #[test]
    fn write_without_transaction_is_refused() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        assert!(matches!(
            domain.set(book, "title", "Dune"),
            Err(CoreError::IllegalWrite)
        ));
        assert!(matches!(
            domain.create_entity("Book"),
            Err(CoreError::IllegalWrite)
        ));

        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        assert!(matches!(
            domain.set(book, "title", "Dune"),
            Err(CoreError::IllegalWrite)
        ));
        reader.commit().unwrap();
        assert_eq!(domain.stats().protocol_violations, 3);
    }

    #[test]
    fn writable_child_of_read_only_needs_unprotected() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        assert_eq!(domain.lock_mode(), Some(LockMode::Shared));
        let err = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::ProtocolViolation { .. }));

        let writer = domain
            .start_transaction(false, TransactionOptions::new().unprotected(true))
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        writer.commit().unwrap();
        reader.commit().unwrap();
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
    }

    #[test]
    fn postcommit_sees_root_commit_once() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let observer = Recorder::new(ObserverInterest::postcommit());
        domain.add_observer(observer.clone());

        domain
            .transaction(|d| {
                d.set(book, "title", "Dune")?;
                d.transaction(|d| d.set(book, "author", "Herbert"))?;
                d.touch(book, "title")
            })
            .unwrap();

        assert_eq!(observer.batch_sizes(), vec![2]);
        let batches = observer.batches.lock();
        assert_eq!(batches[0][0].slot(), "title");
        assert_eq!(batches[0][1].slot(), "author");
    }

    #[test]
    fn rolled_back_changes_are_not_published_but_loads_are() {
        let domain = EditingDomain::default();
        let (res, book) = library(&domain);
        let observer = Recorder::new(ObserverInterest::postcommit());
        domain.add_observer(observer.clone());

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        domain.load_resource(res).unwrap();
        tx.rollback().unwrap();

        let batches = observer.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert!(batches[0][0].is_resource_load());
        drop(batches);
        assert!(domain.is_loaded(res).unwrap());
    }

    #[test]
    fn loads_outside_transactions_are_broadcast() {
        let domain = EditingDomain::default();
        let (res, _) = library(&domain);
        let observer = Recorder::new(ObserverInterest::postcommit());
        domain.add_observer(observer.clone());

        domain.load_resource(res).unwrap();
        domain.unload_resource(res).unwrap();

        assert_eq!(observer.batch_sizes(), vec![1, 1]);
        assert_eq!(domain.stats().unbatched_broadcasts, 2);
    }

    #[test]
    fn silent_transactions_notify_nobody() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let observer = Recorder::new(ObserverInterest::precommit().and_postcommit());
        domain.add_observer(observer.clone());

        domain
            .transaction_with(TransactionOptions::new().silent(true), |d| {
                d.set(book, "title", "Dune")
            })
            .unwrap();

        assert!(observer.batch_sizes().is_empty());
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
    }

    #[test]
    fn removed_observer_is_not_called() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let observer = Recorder::new(ObserverInterest::postcommit());
        let id = domain.add_observer(observer.clone());
        assert!(domain.remove_observer(id));
        assert!(!domain.remove_observer(id));

        domain.transaction(|d| d.set(book, "title", "Dune")).unwrap();
        assert!(observer.batch_sizes().is_empty());
    }

    #[test]
    fn triggers_run_before_commit() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Counter {
            rounds: 1,
            interest: ObserverInterest::precommit(),
            dispatches: AtomicUsize::new(0),
        }));
        let post = Recorder::new(ObserverInterest::postcommit());
        domain.add_observer(post.clone());

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        let receipt = tx.commit().unwrap();

        assert_eq!(receipt.triggers, vec!["bump".to_string()]);
        assert_eq!(receipt.change.edit_count(), 2);
        assert_eq!(domain.get(book, "count").unwrap(), Some(Value::Int(1)));
        assert_eq!(post.batch_sizes(), vec![2]);
        assert_eq!(domain.stats().triggers_executed, 1);
    }

    #[test]
    fn no_triggers_skips_precommit() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Counter {
            rounds: 1,
            interest: ObserverInterest::precommit(),
            dispatches: AtomicUsize::new(0),
        }));

        domain
            .transaction_with(TransactionOptions::new().no_triggers(true), |d| {
                d.set(book, "title", "Dune")
            })
            .unwrap();
        assert_eq!(domain.get(book, "count").unwrap(), None);
    }

    #[test]
    fn aggregate_rounds_until_quiet() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let counter = Arc::new(Counter {
            rounds: 3,
            interest: ObserverInterest::aggregate(),
            dispatches: AtomicUsize::new(0),
        });
        domain.add_observer(counter.clone());

        domain.transaction(|d| d.set(book, "title", "Dune")).unwrap();

        assert_eq!(domain.get(book, "count").unwrap(), Some(Value::Int(3)));
        assert_eq!(counter.dispatches.load(Ordering::SeqCst), 4);
        assert_eq!(domain.stats().aggregate_rounds, 4);
    }

    #[test]
    fn runaway_cascade_is_rolled_back() {
        let domain = EditingDomain::new(DomainConfig::new().max_trigger_cascade(5));
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Counter {
            rounds: i64::MAX,
            interest: ObserverInterest::precommit(),
            dispatches: AtomicUsize::new(0),
        }));

        let err = domain
            .transaction(|d| d.set(book, "title", "Dune"))
            .unwrap_err();
        match err {
            CoreError::RolledBack { status } => {
                assert!(status.has_code(StatusCode::CascadeLimit));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert_eq!(domain.get(book, "count").unwrap(), None);
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn failing_trigger_rolls_back_everything() {
        struct Breaker;
        impl ChangeObserver for Breaker {
            fn interest(&self) -> ObserverInterest {
                ObserverInterest::precommit()
            }
            fn about_to_commit(
                &self,
                _event: &ChangeSetEvent<'_>,
            ) -> Result<Option<Box<dyn Command>>, ObserverError> {
                Ok(Some(FnCommand::boxed("break", |_d: &EditingDomain| {
                    Err(CoreError::command_failed("no"))
                })))
            }
        }

        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Breaker));

        let err = domain
            .transaction(|d| d.set(book, "title", "Dune"))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.has_code(StatusCode::TriggerFailed)
        ));
        assert_eq!(domain.get(book, "title").unwrap(), None);
    }

    #[test]
    fn observer_may_request_rollback() {
        struct Veto;
        impl ChangeObserver for Veto {
            fn interest(&self) -> ObserverInterest {
                ObserverInterest::precommit()
            }
            fn about_to_commit(
                &self,
                _event: &ChangeSetEvent<'_>,
            ) -> Result<Option<Box<dyn Command>>, ObserverError> {
                Err(ObserverError::Rollback(Status::cancel(
                    StatusCode::Rollback,
                    "vetoed",
                )))
            }
        }

        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Veto));

        let err = domain
            .transaction(|d| d.set(book, "title", "Dune"))
            .unwrap_err();
        match err {
            CoreError::RolledBack { status } => assert_eq!(status.message(), "vetoed"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(domain.get(book, "title").unwrap(), None);
    }

    #[test]
    fn panicking_observer_becomes_failure_status() {
        struct Boom;
        impl ChangeObserver for Boom {
            fn interest(&self) -> ObserverInterest {
                ObserverInterest::precommit()
            }
            fn about_to_commit(
                &self,
                _event: &ChangeSetEvent<'_>,
            ) -> Result<Option<Box<dyn Command>>, ObserverError> {
                panic!("observer bug");
            }
        }

        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.add_observer(Arc::new(Boom));

        let err = domain
            .transaction(|d| d.set(book, "title", "Dune"))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.has_code(StatusCode::ObserverFailed)
        ));
        assert_eq!(domain.stats().observer_failures, 1);
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn validation_failure_rolls_back() {
        let domain = EditingDomain::default();
        let (res, book) = library(&domain);
        domain.set_rule_validator(move |d: &EditingDomain, _n: &[Notification]| {
            let titled = d
                .resource_contents(res)
                .unwrap_or_default()
                .into_iter()
                .all(|e| !matches!(d.get(e, "title"), Ok(Some(Value::Str(ref s))) if s.is_empty()));
            if titled {
                Status::ok()
            } else {
                Status::error(StatusCode::ValidationFailed, "empty title")
            }
        });

        let err = domain
            .transaction(|d| d.set(book, "title", ""))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.has_code(StatusCode::ValidationFailed)
        ));
        assert_eq!(domain.get(book, "title").unwrap(), None);

        domain.transaction(|d| d.set(book, "title", "Dune")).unwrap();
        domain
            .transaction_with(TransactionOptions::new().no_validation(true), |d| {
                d.set(book, "title", "")
            })
            .unwrap();
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("")));
    }

    #[test]
    fn warnings_survive_commit() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        domain.set_rule_validator(|_d: &EditingDomain, _n: &[Notification]| {
            Status::warning(StatusCode::ValidationFailed, "suspicious")
        });

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        let receipt = tx.commit().unwrap();
        assert_eq!(receipt.status.message(), "suspicious");
        assert!(!receipt.status.is_failure());
    }

    #[test]
    fn edit_validator_sees_changed_resources() {
        let domain = EditingDomain::default();
        let (res, book) = library(&domain);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        domain.set_edit_validator(move |_d: &EditingDomain, resources: &[ResourceId]| {
            sink.lock().extend_from_slice(resources);
            Status::error(StatusCode::EditRefused, "read-only file")
        });

        // Not consulted unless requested.
        domain.transaction(|d| d.set(book, "title", "Dune")).unwrap();
        assert!(seen.lock().is_empty());

        let err = domain
            .transaction_with(TransactionOptions::new().validate_edit(true), |d| {
                d.set(book, "title", "Emma")
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.has_code(StatusCode::EditRefused)
        ));
        assert_eq!(*seen.lock(), vec![res]);
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
    }

    #[test]
    fn no_undo_changes_survive_rollback() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let tx = domain
            .start_transaction(false, TransactionOptions::new().no_undo(true))
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        tx.rollback().unwrap();
        assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
    }

    #[test]
    fn recording_child_of_read_only_parent_is_undone_by_root() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let root = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        let writer = domain
            .start_transaction(false, TransactionOptions::new().unprotected(true))
            .unwrap();
        domain.set(book, "author", "Herbert").unwrap();
        writer.commit().unwrap();
        reader.commit().unwrap();
        root.rollback().unwrap();

        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert_eq!(domain.get(book, "author").unwrap(), None);
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn recording_child_of_no_undo_parent_is_undone_by_root() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let root = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        let unrecorded = domain
            .start_transaction(false, TransactionOptions::new().no_undo(true))
            .unwrap();
        domain.set(book, "author", "Herbert").unwrap();
        let recorded = domain
            .start_transaction(false, TransactionOptions::new().no_undo(false))
            .unwrap();
        domain.set(book, "year", 1965i64).unwrap();
        recorded.commit().unwrap();
        unrecorded.commit().unwrap();
        root.rollback().unwrap();

        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert_eq!(domain.get(book, "year").unwrap(), None);
        assert_eq!(
            domain.get(book, "author").unwrap(),
            Some(Value::from("Herbert"))
        );
    }

    #[test]
    fn recording_child_of_read_only_parent_reaches_root_receipt() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let root = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        let writer = domain
            .start_transaction(false, TransactionOptions::new().unprotected(true))
            .unwrap();
        domain.set(book, "author", "Herbert").unwrap();
        writer.commit().unwrap();
        reader.commit().unwrap();
        domain.set(book, "year", 1965i64).unwrap();
        let mut receipt = root.commit().unwrap();

        let slots: Vec<_> = receipt.change.edits().iter().map(|e| e.slot().to_string()).collect();
        assert_eq!(slots, vec!["title", "author", "year"]);

        let mut graph = domain.read(ModelGraph::clone);
        receipt.change.apply_and_reverse(&mut graph).unwrap();
        assert_eq!(graph.get(book, "author").unwrap(), None);
        assert_eq!(graph.get(book, "title").unwrap(), None);
    }

    #[test]
    fn rollback_reports_edits_it_cannot_revert() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        domain.add(book, "tags", "scifi").unwrap();
        let unrecorded = domain
            .start_transaction(false, TransactionOptions::new().no_undo(true))
            .unwrap();
        domain.remove(book, "tags", 0).unwrap();
        unrecorded.commit().unwrap();
        let status = tx.rollback().unwrap();

        assert!(status.is_failure());
        assert!(status.has_code(StatusCode::Rollback));
        assert!(status.has_code(StatusCode::RevertFailed));
        assert_eq!(tx.status(), status);
        // Edits before the failing one are still reverted.
        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert!(domain.get_many(book, "tags").unwrap().is_empty());
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        {
            let _tx = domain
                .start_transaction(false, TransactionOptions::new())
                .unwrap();
            domain.set(book, "title", "Dune").unwrap();
        }
        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert_eq!(domain.active_transaction(), None);
        assert_eq!(domain.lock_depth(), 0);
    }

    #[test]
    fn commit_and_rollback_happen_once() {
        let domain = EditingDomain::default();
        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        tx.commit().unwrap();
        assert!(matches!(tx.commit(), Err(CoreError::IllegalState { .. })));
        assert!(matches!(tx.rollback(), Err(CoreError::IllegalState { .. })));
        assert!(matches!(tx.start(), Err(CoreError::IllegalState { .. })));
    }

    #[test]
    fn parent_cannot_close_over_open_child() {
        let domain = EditingDomain::default();
        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        let child = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        assert!(matches!(tx.commit(), Err(CoreError::IllegalState { .. })));
        child.commit().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn aborted_transaction_rolls_back_on_commit() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        tx.abort(Status::error(StatusCode::Aborted, "stop"));
        assert!(tx.is_aborted());

        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.message() == "stop"
        ));
        assert_eq!(domain.get(book, "title").unwrap(), None);
    }

    #[test]
    fn transaction_from_other_thread_is_rejected() {
        let domain = EditingDomain::default();
        let tx = domain.create_transaction(false, TransactionOptions::new());
        std::thread::scope(|s| {
            s.spawn(|| {
                assert!(matches!(tx.start(), Err(CoreError::WrongThread { .. })));
            });
        });
        tx.start().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn concurrent_write_aborts_writer() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        domain.set(book, "title", "Dune").unwrap();
        std::thread::scope(|s| {
            s.spawn(|| {
                let err = domain.set(book, "author", "Herbert").unwrap_err();
                assert!(matches!(err, CoreError::ConcurrentWrite { .. }));
            });
        });
        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            CoreError::RolledBack { ref status } if status.has_code(StatusCode::ConcurrentWrite)
        ));
        assert_eq!(domain.get(book, "title").unwrap(), None);
        assert_eq!(domain.get(book, "author").unwrap(), None);
        assert_eq!(domain.stats().concurrent_write_aborts, 1);
    }

    #[test]
    fn privileged_work_runs_on_helper_thread() {
        let domain = EditingDomain::default();
        let (_, book) = library(&domain);
        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        let caller = std::thread::current().id();

        let helper = tx
            .run_privileged(|| {
                domain.set(book, "title", "Dune").unwrap();
                std::thread::current().id()
            })
            .unwrap();

        assert_ne!(helper, caller);
        assert_eq!(tx.owner(), caller);
        assert_eq!(domain.lock_depth(), 1);
        let receipt = tx.commit().unwrap();
        assert_eq!(receipt.change.edit_count(), 1);
    }

    #[test]
    fn privileged_panic_returns_ownership() {
        let domain = EditingDomain::default();
        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        let caller = std::thread::current().id();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tx.run_privileged(|| panic!("helper failed")).unwrap();
        }));
        assert!(outcome.is_err());
        assert_eq!(tx.owner(), caller);
        tx.commit().unwrap();
    }

    #[test]
    fn only_read_only_chains_yield() {
        let domain = EditingDomain::default();
        let writer = domain
            .start_transaction(false, TransactionOptions::new())
            .unwrap();
        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        assert!(matches!(reader.yield_now(), Err(CoreError::IllegalState { .. })));
        reader.commit().unwrap();
        writer.commit().unwrap();

        let reader = domain
            .start_transaction(true, TransactionOptions::new())
            .unwrap();
        assert!(!reader.yield_now().unwrap());
        reader.commit().unwrap();
    }

    #[test]
    fn run_exclusive_reads_consistently() {
        let domain = EditingDomain::default();
        let (res, book) = library(&domain);
        let roots = domain
            .run_exclusive(|d| {
                assert_eq!(d.lock_mode(), Some(LockMode::Shared));
                d.resource_contents(res).unwrap()
            })
            .unwrap();
        assert_eq!(roots, vec![book]);
    }
}

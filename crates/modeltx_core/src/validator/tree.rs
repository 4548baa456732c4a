//! Notification tree.
//!
//! The tree mirrors the nesting of the transactions active on one thread.
//! Every node references the notification list of its transaction and
//! remembers, for every child, how many notifications the parent had
//! collected when the child started. Flattening a subtree therefore
//! reproduces the order in which the notifications were produced, without
//! any transaction having to copy its notifications into its parent.

use crate::model::Notification;
use crate::status::{Status, StatusCode};
use crate::transaction::ResolvedOptions;
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Notification list shared between a transaction and its tree node.
pub type NotificationBuffer = Arc<Mutex<Vec<Notification>>>;

/// Purpose a notification is collected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Rule validation at root commit.
    Validation,
    /// Precommit observers and triggers.
    Precommit,
    /// Postcommit observers.
    Postcommit,
}

/// The set of kinds a transaction contributes notifications to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationKinds {
    /// Contributes to validation.
    pub validation: bool,
    /// Contributes to precommit.
    pub precommit: bool,
    /// Contributes to postcommit.
    pub postcommit: bool,
}

impl NotificationKinds {
    /// Computes the kinds for a transaction from its resolved options.
    #[must_use]
    pub fn for_transaction(read_only: bool, options: &ResolvedOptions) -> Self {
        let silent = options.silent;
        Self {
            validation: !read_only && !options.no_validation && !silent,
            precommit: !read_only && options.triggers_enabled() && !silent,
            postcommit: !silent,
        }
    }

    /// Returns true if no kind is collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.validation && !self.precommit && !self.postcommit
    }

    /// Returns true if `kind` is collected.
    #[must_use]
    pub fn includes(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Validation => self.validation,
            NotificationKind::Precommit => self.precommit,
            NotificationKind::Postcommit => self.postcommit,
        }
    }
}

/// Why a transaction leaves the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// Committed normally.
    Closed,
    /// Rolled back; only non-undoable notifications survive.
    RolledBack,
}

/// Behavior of a validator, fixed by its root transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    /// Writable root: validation and precommit are supported.
    ReadWrite,
    /// Read-only root: only postcommit notifications are produced.
    ReadOnly,
    /// Silent root, or a disposed validator: nothing is produced.
    NoOp,
}

#[derive(Debug)]
enum NodeList {
    Live(NotificationBuffer),
    Detached(Vec<Notification>),
}

impl NodeList {
    fn snapshot(&self) -> Vec<Notification> {
        match self {
            NodeList::Live(buffer) => buffer.lock().clone(),
            NodeList::Detached(list) => list.clone(),
        }
    }

    fn len(&self) -> usize {
        match self {
            NodeList::Live(buffer) => buffer.lock().len(),
            NodeList::Detached(list) => list.len(),
        }
    }
}

#[derive(Debug)]
struct ChildLink {
    tx: TransactionId,
    /// Parent's own notification count when the child started.
    offset: usize,
}

#[derive(Debug)]
struct Node {
    kinds: NotificationKinds,
    list: NodeList,
    children: Vec<ChildLink>,
    consumed_own: usize,
    consumed_aggregate: usize,
}

/// Validation work prepared under the domain mutex and run outside it.
#[derive(Debug)]
pub enum Validation {
    /// Nothing to validate.
    Skip,
    /// Validate these notifications.
    Run(Vec<Notification>),
}

impl Validation {
    /// Returns the notifications to validate.
    #[must_use]
    pub fn notifications(&self) -> &[Notification] {
        match self {
            Validation::Skip => &[],
            Validation::Run(list) => list,
        }
    }

    /// Runs `rules` over the notifications.
    ///
    /// A result of error severity or worse becomes a `ValidationFailed`
    /// status carrying the rule result.
    pub fn run(self, rules: impl FnOnce(&[Notification]) -> Status) -> Status {
        match self {
            Validation::Skip => Status::ok(),
            Validation::Run(list) if list.is_empty() => Status::ok(),
            Validation::Run(list) => {
                let result = rules(&list);
                if result.is_failure() {
                    Status::error(StatusCode::ValidationFailed, "validation failed").merge(result)
                } else {
                    result
                }
            }
        }
    }
}

/// Per-context notification tree.
#[derive(Debug)]
pub struct Validator {
    kind: ValidatorKind,
    nodes: HashMap<TransactionId, Node>,
    disposed: bool,
}

impl Validator {
    /// Creates an empty validator.
    pub fn new(kind: ValidatorKind) -> Self {
        Self {
            kind,
            nodes: HashMap::new(),
            disposed: false,
        }
    }

    /// Creates the validator for a root transaction.
    pub fn for_root(read_only: bool, options: &ResolvedOptions) -> Self {
        let kind = if options.silent {
            ValidatorKind::NoOp
        } else if read_only {
            ValidatorKind::ReadOnly
        } else {
            ValidatorKind::ReadWrite
        };
        Self::new(kind)
    }

    /// Returns the current behavior.
    #[must_use]
    pub fn kind(&self) -> ValidatorKind {
        if self.disposed {
            ValidatorKind::NoOp
        } else {
            self.kind
        }
    }

    /// Returns true if `tx` has a node.
    #[must_use]
    pub fn contains(&self, tx: TransactionId) -> bool {
        self.nodes.contains_key(&tx)
    }

    /// Registers an activating transaction.
    ///
    /// Returns true if a node was allocated. No node is allocated for an
    /// empty kind set, or under a parent that has no node itself.
    pub fn add(
        &mut self,
        tx: TransactionId,
        parent: Option<TransactionId>,
        kinds: NotificationKinds,
        buffer: NotificationBuffer,
    ) -> bool {
        if self.disposed || kinds.is_empty() {
            return false;
        }
        match parent {
            Some(parent) => {
                let Some(parent_node) = self.nodes.get_mut(&parent) else {
                    return false;
                };
                let offset = parent_node.list.len();
                parent_node.children.push(ChildLink { tx, offset });
            }
            None => {
                if !self.nodes.is_empty() {
                    return false;
                }
            }
        }
        self.nodes.insert(
            tx,
            Node {
                kinds,
                list: NodeList::Live(buffer),
                children: Vec::new(),
                consumed_own: 0,
                consumed_aggregate: 0,
            },
        );
        true
    }

    /// Detaches a closing transaction.
    ///
    /// The node stays in the tree so its notifications keep appearing in
    /// its ancestors' lists.
    pub fn remove(&mut self, tx: TransactionId, reason: RemoveReason) {
        if reason == RemoveReason::RolledBack {
            self.retain_non_undoable(tx);
        }
        if let Some(node) = self.nodes.get_mut(&tx) {
            if let NodeList::Live(buffer) = &node.list {
                let list = buffer.lock().clone();
                node.list = NodeList::Detached(list);
            }
        }
    }

    fn retain_non_undoable(&mut self, tx: TransactionId) {
        let children: Vec<TransactionId> = {
            let Some(node) = self.nodes.get_mut(&tx) else {
                return;
            };
            let old = node.list.snapshot();
            let kept_before = |n: usize| old[..n.min(old.len())]
                .iter()
                .filter(|e| !e.is_undoable())
                .count();
            for link in &mut node.children {
                link.offset = kept_before(link.offset);
            }
            node.consumed_own = kept_before(node.consumed_own);
            let kept = old.iter().filter(|e| !e.is_undoable()).cloned().collect();
            node.list = NodeList::Detached(kept);
            node.children.iter().map(|c| c.tx).collect()
        };
        for child in children {
            self.retain_non_undoable(child);
        }
    }

    fn flatten(&self, tx: TransactionId, kind: NotificationKind, out: &mut Vec<Notification>) {
        let Some(node) = self.nodes.get(&tx) else {
            return;
        };
        let own = node.list.snapshot();
        let include = node.kinds.includes(kind);
        let mut pos = 0;
        for link in &node.children {
            let upto = link.offset.min(own.len());
            if upto > pos {
                if include {
                    out.extend(own[pos..upto].iter().cloned());
                }
                pos = upto;
            }
            self.flatten(link.tx, kind, out);
        }
        if include && pos < own.len() {
            out.extend(own[pos..].iter().cloned());
        }
    }

    fn flattened(&self, tx: TransactionId, kind: NotificationKind) -> Vec<Notification> {
        let mut out = Vec::new();
        self.flatten(tx, kind, &mut out);
        out
    }

    /// Prepares validation of the subtree rooted at `tx`.
    #[must_use]
    pub fn validation(&self, tx: TransactionId) -> Validation {
        match self.kind() {
            ValidatorKind::ReadWrite => {
                Validation::Run(self.flattened(tx, NotificationKind::Validation))
            }
            ValidatorKind::ReadOnly | ValidatorKind::NoOp => Validation::Skip,
        }
    }

    /// Returns the subtree's postcommit notifications in temporal order.
    #[must_use]
    pub fn postcommit_notifications(&self, tx: TransactionId) -> Vec<Notification> {
        match self.kind() {
            ValidatorKind::NoOp => Vec::new(),
            _ => self.flattened(tx, NotificationKind::Postcommit),
        }
    }

    /// Returns and consumes the transaction's own precommit notifications.
    pub fn precommit_notifications(&mut self, tx: TransactionId) -> Vec<Notification> {
        if self.kind() != ValidatorKind::ReadWrite {
            return Vec::new();
        }
        let Some(node) = self.nodes.get_mut(&tx) else {
            return Vec::new();
        };
        let own = node.list.snapshot();
        let start = node.consumed_own.min(own.len());
        node.consumed_own = own.len();
        if node.kinds.precommit {
            own[start..].to_vec()
        } else {
            Vec::new()
        }
    }

    /// Returns and consumes the not yet consumed part of the subtree's
    /// precommit notifications.
    pub fn aggregate_precommit_notifications(&mut self, tx: TransactionId) -> Vec<Notification> {
        if self.kind() != ValidatorKind::ReadWrite || !self.contains(tx) {
            return Vec::new();
        }
        let all = self.flattened(tx, NotificationKind::Precommit);
        let Some(node) = self.nodes.get_mut(&tx) else {
            return Vec::new();
        };
        let start = node.consumed_aggregate.min(all.len());
        node.consumed_aggregate = all.len();
        all[start..].to_vec()
    }

    /// Drops every node; afterwards the validator behaves as a no-op.
    pub fn dispose(&mut self) {
        self.nodes.clear();
        self.disposed = true;
    }
}

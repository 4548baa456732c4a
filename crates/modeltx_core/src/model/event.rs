//! Change events emitted by the model graph.

use crate::model::{EntityId, Value};
use crate::types::{ResourceId, SequenceNumber};
use std::fmt;
use std::sync::Arc;

/// Slot of a resource holding its root entities.
pub const CONTENTS: &str = "contents";

/// Slot of a resource holding its load state.
pub const LOADED: &str = "loaded";

/// The object whose slot changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notifier {
    /// An entity.
    Entity(EntityId),
    /// A resource.
    Resource(ResourceId),
}

impl fmt::Display for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notifier::Entity(id) => write!(f, "{id}"),
            Notifier::Resource(id) => write!(f, "{id}"),
        }
    }
}

impl From<EntityId> for Notifier {
    fn from(id: EntityId) -> Self {
        Notifier::Entity(id)
    }
}

impl From<ResourceId> for Notifier {
    fn from(id: ResourceId) -> Self {
        Notifier::Resource(id)
    }
}

/// What happened to the slot, with the kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A single-valued slot was assigned.
    Set {
        /// Previous value (`None` if it was unset).
        old: Option<Value>,
        /// New value.
        new: Option<Value>,
    },
    /// A single-valued slot was cleared.
    Unset {
        /// Previous value.
        old: Option<Value>,
    },
    /// One value was inserted into a many-valued slot.
    Add {
        /// Position of the new value.
        index: usize,
        /// Inserted value.
        value: Value,
    },
    /// Several contiguous values were inserted into a many-valued slot.
    AddMany {
        /// Position of the first new value.
        index: usize,
        /// Inserted values, in order.
        values: Vec<Value>,
    },
    /// One value was removed from a many-valued slot.
    Remove {
        /// Former position of the value.
        index: usize,
        /// Removed value.
        value: Value,
    },
    /// Several contiguous values were removed from a many-valued slot.
    RemoveMany {
        /// Former position of the first removed value.
        index: usize,
        /// Removed values, in order.
        values: Vec<Value>,
    },
    /// Nothing changed; the slot was only resolved or re-asserted.
    Touch,
}

/// One observed mutation of the model graph.
///
/// Events are immutable once created and are shared between the recorder,
/// the notification buffers and observers as [`Notification`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    sequence: SequenceNumber,
    notifier: Notifier,
    slot: String,
    kind: ChangeKind,
}

/// Shared handle to a change event.
pub type Notification = Arc<ChangeEvent>;

impl ChangeEvent {
    /// Creates a change event.
    pub fn new(
        sequence: SequenceNumber,
        notifier: Notifier,
        slot: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            sequence,
            notifier,
            slot: slot.into(),
            kind,
        }
    }

    /// Returns the sequence number assigned when the event was created.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the object that changed.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        self.notifier
    }

    /// Returns the changed slot.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Returns the change kind and payload.
    #[must_use]
    pub fn kind(&self) -> &ChangeKind {
        &self.kind
    }

    /// Returns the value the slot held before, for kinds that replace or
    /// remove a single value.
    #[must_use]
    pub fn old_value(&self) -> Option<&Value> {
        match &self.kind {
            ChangeKind::Set { old, .. } | ChangeKind::Unset { old } => old.as_ref(),
            ChangeKind::Remove { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns the value the slot holds now, for kinds that assign or add a
    /// single value.
    #[must_use]
    pub fn new_value(&self) -> Option<&Value> {
        match &self.kind {
            ChangeKind::Set { new, .. } => new.as_ref(),
            ChangeKind::Add { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns true for notifications that did not change anything.
    #[must_use]
    pub fn is_touch(&self) -> bool {
        match &self.kind {
            ChangeKind::Touch => true,
            ChangeKind::Set { old, new } => old == new,
            _ => false,
        }
    }

    /// Returns true if this is a resource load or unload.
    #[must_use]
    pub fn is_resource_load(&self) -> bool {
        matches!(self.notifier, Notifier::Resource(_)) && self.slot == LOADED
    }

    /// Returns true for notifications a pure read may produce.
    ///
    /// Reads are allowed outside write transactions.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self.kind, ChangeKind::Touch) || self.is_resource_load()
    }

    /// Returns true if rollback reverts this change.
    #[must_use]
    pub fn is_undoable(&self) -> bool {
        !self.is_resource_load()
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{} ", self.sequence, self.notifier, self.slot)?;
        match &self.kind {
            ChangeKind::Set { old, new } => {
                write!(f, "set {} -> {}", display_opt(old), display_opt(new))
            }
            ChangeKind::Unset { old } => write!(f, "unset {}", display_opt(old)),
            ChangeKind::Add { index, value } => write!(f, "add [{index}] {value}"),
            ChangeKind::AddMany { index, values } => {
                write!(f, "add-many [{index}] x{}", values.len())
            }
            ChangeKind::Remove { index, value } => write!(f, "remove [{index}] {value}"),
            ChangeKind::RemoveMany { index, values } => {
                write!(f, "remove-many [{index}] x{}", values.len())
            }
            ChangeKind::Touch => write!(f, "touch"),
        }
    }
}

fn display_opt(value: &Option<Value>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<unset>".to_string())
}

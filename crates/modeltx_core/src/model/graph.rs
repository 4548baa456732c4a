//! In-memory model graph.
//!
//! The graph is the observed object structure under transactional control.
//! It knows nothing about transactions: every successful mutation simply
//! returns the [`ChangeEvent`] describing it, and the editing domain decides
//! who gets to see that event.

use crate::error::{CoreError, CoreResult};
use crate::model::{ChangeEvent, ChangeKind, EntityId, Notifier, SlotValue, Value, CONTENTS, LOADED};
use crate::types::{ResourceId, SequenceNumber};
use std::collections::{BTreeMap, HashMap};

/// A mutation request against one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Assign a single-valued slot.
    Set(Value),
    /// Clear a single-valued slot.
    Unset,
    /// Insert values into a many-valued slot, at `index` or at the end.
    Insert {
        /// Insert position; `None` appends.
        index: Option<usize>,
        /// Values to insert, in order.
        values: Vec<Value>,
    },
    /// Remove `count` contiguous values starting at `index`.
    Remove {
        /// First position to remove.
        index: usize,
        /// Number of values to remove.
        count: usize,
    },
    /// Re-assert a slot without changing it.
    Touch,
    /// Mark a resource loaded.
    Load,
    /// Mark a resource unloaded.
    Unload,
}

impl Mutation {
    /// Returns true for mutations a pure read may perform.
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, Mutation::Touch | Mutation::Load | Mutation::Unload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntityData {
    class: String,
    slots: BTreeMap<String, SlotValue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResourceData {
    uri: String,
    loaded: bool,
    contents: Vec<Value>,
}

/// The shared object graph.
#[derive(Debug, Clone, Default)]
pub struct ModelGraph {
    entities: HashMap<EntityId, EntityData>,
    resources: BTreeMap<ResourceId, ResourceData>,
    next_resource: u32,
    next_sequence: SequenceNumber,
}

impl ModelGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new entity of the given class.
    ///
    /// Allocation is not a change: the entity becomes observable once it is
    /// referenced from a resource or another entity.
    pub fn create_entity(&mut self, class: impl Into<String>) -> EntityId {
        let id = EntityId::new();
        self.entities.insert(
            id,
            EntityData {
                class: class.into(),
                slots: BTreeMap::new(),
            },
        );
        id
    }

    /// Allocates a new, unloaded resource.
    pub fn create_resource(&mut self, uri: impl Into<String>) -> ResourceId {
        self.next_resource += 1;
        let id = ResourceId::new(self.next_resource);
        self.resources.insert(
            id,
            ResourceData {
                uri: uri.into(),
                loaded: false,
                contents: Vec::new(),
            },
        );
        id
    }

    /// Returns true if the entity exists.
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Returns the number of allocated entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the class name of an entity.
    pub fn class_of(&self, id: EntityId) -> CoreResult<&str> {
        self.entity(id).map(|e| e.class.as_str())
    }

    /// Reads a single-valued slot. Missing slots read as `None`.
    pub fn get(&self, id: EntityId, slot: &str) -> CoreResult<Option<Value>> {
        match self.entity(id)?.slots.get(slot) {
            None => Ok(None),
            Some(SlotValue::Single(value)) => Ok(value.clone()),
            Some(SlotValue::Many(_)) => Err(CoreError::invalid_slot(slot, "slot is many-valued")),
        }
    }

    /// Reads a many-valued slot. Missing slots read as empty.
    pub fn get_many(&self, id: EntityId, slot: &str) -> CoreResult<Vec<Value>> {
        match self.entity(id)?.slots.get(slot) {
            None => Ok(Vec::new()),
            Some(SlotValue::Many(values)) => Ok(values.clone()),
            Some(SlotValue::Single(_)) => {
                Err(CoreError::invalid_slot(slot, "slot is single-valued"))
            }
        }
    }

    /// Returns the names of the slots an entity has used so far.
    pub fn slot_names(&self, id: EntityId) -> CoreResult<Vec<String>> {
        Ok(self.entity(id)?.slots.keys().cloned().collect())
    }

    /// Returns the URI of a resource.
    pub fn resource_uri(&self, id: ResourceId) -> CoreResult<&str> {
        self.resource(id).map(|r| r.uri.as_str())
    }

    /// Returns true if the resource is loaded.
    pub fn is_loaded(&self, id: ResourceId) -> CoreResult<bool> {
        self.resource(id).map(|r| r.loaded)
    }

    /// Returns the root entities of a resource.
    pub fn contents(&self, id: ResourceId) -> CoreResult<Vec<EntityId>> {
        Ok(self
            .resource(id)?
            .contents
            .iter()
            .filter_map(Value::as_entity)
            .collect())
    }

    /// Returns the resource an entity is a root of, if any.
    #[must_use]
    pub fn resource_of(&self, id: EntityId) -> Option<ResourceId> {
        self.resources
            .iter()
            .find(|(_, r)| r.contents.contains(&Value::Ref(id)))
            .map(|(rid, _)| *rid)
    }

    /// Returns all resource IDs in creation order.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceId> {
        self.resources.keys().copied().collect()
    }

    /// Compares the observable state of two graphs.
    ///
    /// Empty slots count as absent and entities without values as never
    /// allocated. Sequence counters are ignored.
    #[must_use]
    pub fn same_state(&self, other: &ModelGraph) -> bool {
        self.resources == other.resources
            && observable(&self.entities) == observable(&other.entities)
    }

    /// Returns the sequence number of the most recent event.
    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    /// Applies a mutation and returns the event describing it.
    pub fn apply(
        &mut self,
        notifier: Notifier,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<ChangeEvent> {
        let kind = match notifier {
            Notifier::Entity(id) => self.apply_to_entity(id, slot, mutation)?,
            Notifier::Resource(id) => self.apply_to_resource(id, slot, mutation)?,
        };
        self.next_sequence = self.next_sequence.next();
        Ok(ChangeEvent::new(self.next_sequence, notifier, slot, kind))
    }

    fn apply_to_entity(
        &mut self,
        id: EntityId,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<ChangeKind> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(CoreError::EntityNotFound(id))?;

        match mutation {
            Mutation::Set(value) => {
                let current = entity
                    .slots
                    .entry(slot.to_string())
                    .or_insert(SlotValue::Single(None));
                match current {
                    SlotValue::Single(old) => {
                        let old = old.replace(value.clone());
                        Ok(ChangeKind::Set {
                            old,
                            new: Some(value),
                        })
                    }
                    SlotValue::Many(_) => {
                        Err(CoreError::invalid_slot(slot, "cannot set a many-valued slot"))
                    }
                }
            }
            Mutation::Unset => match entity.slots.get_mut(slot) {
                None => Ok(ChangeKind::Unset { old: None }),
                Some(SlotValue::Single(old)) => Ok(ChangeKind::Unset { old: old.take() }),
                Some(SlotValue::Many(_)) => {
                    Err(CoreError::invalid_slot(slot, "cannot unset a many-valued slot"))
                }
            },
            Mutation::Insert { index, values } => {
                let current = entity
                    .slots
                    .entry(slot.to_string())
                    .or_insert(SlotValue::Many(Vec::new()));
                match current {
                    SlotValue::Many(list) => insert_values(list, slot, index, values),
                    SlotValue::Single(_) => Err(CoreError::invalid_slot(
                        slot,
                        "cannot add to a single-valued slot",
                    )),
                }
            }
            Mutation::Remove { index, count } => match entity.slots.get_mut(slot) {
                Some(SlotValue::Many(list)) => remove_values(list, slot, index, count),
                Some(SlotValue::Single(_)) => Err(CoreError::invalid_slot(
                    slot,
                    "cannot remove from a single-valued slot",
                )),
                None => Err(CoreError::IndexOutOfBounds {
                    slot: slot.to_string(),
                    index,
                    len: 0,
                }),
            },
            Mutation::Touch => Ok(ChangeKind::Touch),
            Mutation::Load | Mutation::Unload => Err(CoreError::invalid_slot(
                slot,
                "only resources can be loaded or unloaded",
            )),
        }
    }

    fn apply_to_resource(
        &mut self,
        id: ResourceId,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<ChangeKind> {
        let resource = self
            .resources
            .get_mut(&id)
            .ok_or(CoreError::ResourceNotFound(id))?;

        match (slot, mutation) {
            (_, Mutation::Touch) if slot == CONTENTS || slot == LOADED => Ok(ChangeKind::Touch),
            (CONTENTS, Mutation::Insert { index, values }) => {
                if values.iter().any(|v| v.as_entity().is_none()) {
                    return Err(CoreError::invalid_slot(
                        slot,
                        "resource contents hold entity references only",
                    ));
                }
                insert_values(&mut resource.contents, slot, index, values)
            }
            (CONTENTS, Mutation::Remove { index, count }) => {
                remove_values(&mut resource.contents, slot, index, count)
            }
            (LOADED, Mutation::Load) => {
                let old = std::mem::replace(&mut resource.loaded, true);
                Ok(ChangeKind::Set {
                    old: Some(Value::Bool(old)),
                    new: Some(Value::Bool(true)),
                })
            }
            (LOADED, Mutation::Unload) => {
                let old = std::mem::replace(&mut resource.loaded, false);
                Ok(ChangeKind::Set {
                    old: Some(Value::Bool(old)),
                    new: Some(Value::Bool(false)),
                })
            }
            (LOADED, Mutation::Set(Value::Bool(loaded))) => {
                // Reached when a recorded load state is replayed.
                let old = std::mem::replace(&mut resource.loaded, loaded);
                Ok(ChangeKind::Set {
                    old: Some(Value::Bool(old)),
                    new: Some(Value::Bool(loaded)),
                })
            }
            (_, other) => Err(CoreError::invalid_slot(
                slot,
                format!("unsupported resource mutation {other:?}"),
            )),
        }
    }

    fn entity(&self, id: EntityId) -> CoreResult<&EntityData> {
        self.entities.get(&id).ok_or(CoreError::EntityNotFound(id))
    }

    fn resource(&self, id: ResourceId) -> CoreResult<&ResourceData> {
        self.resources
            .get(&id)
            .ok_or(CoreError::ResourceNotFound(id))
    }
}

fn insert_values(
    list: &mut Vec<Value>,
    slot: &str,
    index: Option<usize>,
    values: Vec<Value>,
) -> CoreResult<ChangeKind> {
    if values.is_empty() {
        return Err(CoreError::invalid_slot(slot, "nothing to add"));
    }
    let index = index.unwrap_or(list.len());
    if index > list.len() {
        return Err(CoreError::IndexOutOfBounds {
            slot: slot.to_string(),
            index,
            len: list.len(),
        });
    }
    list.splice(index..index, values.iter().cloned());
    let mut values = values;
    if values.len() == 1 {
        let value = values.remove(0);
        Ok(ChangeKind::Add { index, value })
    } else {
        Ok(ChangeKind::AddMany { index, values })
    }
}

fn remove_values(
    list: &mut Vec<Value>,
    slot: &str,
    index: usize,
    count: usize,
) -> CoreResult<ChangeKind> {
    if count == 0 {
        return Err(CoreError::invalid_slot(slot, "nothing to remove"));
    }
    let end = index.checked_add(count).unwrap_or(usize::MAX);
    if end > list.len() {
        return Err(CoreError::IndexOutOfBounds {
            slot: slot.to_string(),
            index: end - 1,
            len: list.len(),
        });
    }
    let mut removed: Vec<Value> = list.drain(index..end).collect();
    if removed.len() == 1 {
        let value = removed.remove(0);
        Ok(ChangeKind::Remove { index, value })
    } else {
        Ok(ChangeKind::RemoveMany {
            index,
            values: removed,
        })
    }
}

type ObservableEntity<'a> = (&'a str, BTreeMap<&'a str, &'a SlotValue>);

fn observable(entities: &HashMap<EntityId, EntityData>) -> HashMap<EntityId, ObservableEntity<'_>> {
    entities
        .iter()
        .filter_map(|(id, data)| {
            let slots: BTreeMap<&str, &SlotValue> = data
                .slots
                .iter()
                .filter(|(_, value)| match value {
                    SlotValue::Single(value) => value.is_some(),
                    SlotValue::Many(values) => !values.is_empty(),
                })
                .map(|(name, value)| (name.as_str(), value))
                .collect();
            (!slots.is_empty()).then(|| (*id, (data.class.as_str(), slots)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_entity() -> (ModelGraph, EntityId) {
        let mut graph = ModelGraph::new();
        let id = graph.create_entity("Book");
        (graph, id)
    }

    #[test]
    fn set_reports_old_and_new() {
        let (mut graph, id) = graph_with_entity();
        let first = graph
            .apply(id.into(), "title", Mutation::Set("A".into()))
            .unwrap();
        assert_eq!(
            first.kind(),
            &ChangeKind::Set {
                old: None,
                new: Some("A".into())
            }
        );

        let second = graph
            .apply(id.into(), "title", Mutation::Set("B".into()))
            .unwrap();
        assert_eq!(second.old_value(), Some(&Value::from("A")));
        assert!(second.sequence() > first.sequence());
        assert_eq!(graph.last_sequence(), second.sequence());
        assert_eq!(graph.get(id, "title").unwrap(), Some("B".into()));
    }

    #[test]
    fn unset_clears_value() {
        let (mut graph, id) = graph_with_entity();
        graph
            .apply(id.into(), "title", Mutation::Set("A".into()))
            .unwrap();
        let event = graph.apply(id.into(), "title", Mutation::Unset).unwrap();
        assert_eq!(event.kind(), &ChangeKind::Unset { old: Some("A".into()) });
        assert_eq!(graph.get(id, "title").unwrap(), None);
    }

    #[test]
    fn insert_and_remove_many() {
        let (mut graph, id) = graph_with_entity();
        let add = graph
            .apply(
                id.into(),
                "tags",
                Mutation::Insert {
                    index: None,
                    values: vec!["a".into(), "b".into(), "c".into()],
                },
            )
            .unwrap();
        assert!(matches!(add.kind(), ChangeKind::AddMany { index: 0, .. }));

        let one = graph
            .apply(
                id.into(),
                "tags",
                Mutation::Insert {
                    index: Some(1),
                    values: vec!["x".into()],
                },
            )
            .unwrap();
        assert_eq!(
            one.kind(),
            &ChangeKind::Add {
                index: 1,
                value: "x".into()
            }
        );

        let removed = graph
            .apply(id.into(), "tags", Mutation::Remove { index: 1, count: 2 })
            .unwrap();
        assert_eq!(
            removed.kind(),
            &ChangeKind::RemoveMany {
                index: 1,
                values: vec!["x".into(), "b".into()]
            }
        );
        assert_eq!(
            graph.get_many(id, "tags").unwrap(),
            vec![Value::from("a"), Value::from("c")]
        );
    }

    #[test]
    fn slot_shape_is_fixed() {
        let (mut graph, id) = graph_with_entity();
        graph
            .apply(id.into(), "title", Mutation::Set("A".into()))
            .unwrap();
        let err = graph
            .apply(
                id.into(),
                "title",
                Mutation::Insert {
                    index: None,
                    values: vec!["x".into()],
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSlot { .. }));
        assert!(graph.get_many(id, "title").is_err());
    }

    #[test]
    fn out_of_bounds() {
        let (mut graph, id) = graph_with_entity();
        let err = graph
            .apply(id.into(), "tags", Mutation::Remove { index: 0, count: 1 })
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexOutOfBounds { .. }));

        let err = graph
            .apply(
                id.into(),
                "tags",
                Mutation::Insert {
                    index: Some(3),
                    values: vec!["x".into()],
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::IndexOutOfBounds { index: 3, .. }));
    }

    #[test]
    fn missing_entity() {
        let mut graph = ModelGraph::new();
        let ghost = EntityId::new();
        let err = graph
            .apply(ghost.into(), "title", Mutation::Touch)
            .unwrap_err();
        assert!(matches!(err, CoreError::EntityNotFound(id) if id == ghost));
    }

    #[test]
    fn resource_lifecycle() {
        let (mut graph, id) = graph_with_entity();
        let res = graph.create_resource("mem:/library");
        assert!(!graph.is_loaded(res).unwrap());

        let load = graph.apply(res.into(), LOADED, Mutation::Load).unwrap();
        assert!(load.is_resource_load());
        assert!(graph.is_loaded(res).unwrap());

        graph
            .apply(
                res.into(),
                CONTENTS,
                Mutation::Insert {
                    index: None,
                    values: vec![Value::Ref(id)],
                },
            )
            .unwrap();
        assert_eq!(graph.contents(res).unwrap(), vec![id]);
        assert_eq!(graph.resource_of(id), Some(res));
        assert_eq!(graph.resource_uri(res).unwrap(), "mem:/library");

        let err = graph
            .apply(
                res.into(),
                CONTENTS,
                Mutation::Insert {
                    index: None,
                    values: vec!["not a ref".into()],
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSlot { .. }));
    }

    #[test]
    fn same_state_ignores_sequence() {
        let (mut graph, id) = graph_with_entity();
        let before = graph.clone();
        graph.apply(id.into(), "title", Mutation::Touch).unwrap();
        assert!(graph.same_state(&before));

        graph
            .apply(id.into(), "title", Mutation::Set("A".into()))
            .unwrap();
        assert!(!graph.same_state(&before));
    }
}

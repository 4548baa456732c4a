//! Reversible change descriptions.

use crate::error::{CoreError, CoreResult};
use crate::model::{ChangeEvent, ChangeKind, ModelGraph, Mutation, Notifier, Value};

/// Something edits can be replayed against.
///
/// The model graph replays silently; the editing domain replays through its
/// normal mutation path so observers see the replay.
pub trait EditTarget {
    /// Applies one mutation.
    fn apply_edit(&mut self, notifier: Notifier, slot: &str, mutation: Mutation)
        -> CoreResult<()>;
}

impl EditTarget for ModelGraph {
    fn apply_edit(
        &mut self,
        notifier: Notifier,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<()> {
        self.apply(notifier, slot, mutation).map(|_| ())
    }
}

/// How one slot changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// A single-valued slot went from `before` to `after`.
    Set {
        /// Value before the edit.
        before: Option<Value>,
        /// Value after the edit.
        after: Option<Value>,
    },
    /// Values were inserted at `index`.
    Insert {
        /// Position of the first inserted value.
        index: usize,
        /// Inserted values.
        values: Vec<Value>,
    },
    /// Values were removed from `index`.
    Remove {
        /// Former position of the first removed value.
        index: usize,
        /// Removed values.
        values: Vec<Value>,
    },
}

/// One recorded, reversible edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    notifier: Notifier,
    slot: String,
    delta: Delta,
}

impl Edit {
    /// Builds the edit a change event describes.
    ///
    /// Returns `None` for events that rollback does not revert: touches and
    /// resource load-state changes.
    pub fn from_event(event: &ChangeEvent) -> Option<Edit> {
        if event.is_touch() || !event.is_undoable() {
            return None;
        }
        let delta = match event.kind() {
            ChangeKind::Set { old, new } => Delta::Set {
                before: old.clone(),
                after: new.clone(),
            },
            ChangeKind::Unset { old } => Delta::Set {
                before: old.clone(),
                after: None,
            },
            ChangeKind::Add { index, value } => Delta::Insert {
                index: *index,
                values: vec![value.clone()],
            },
            ChangeKind::AddMany { index, values } => Delta::Insert {
                index: *index,
                values: values.clone(),
            },
            ChangeKind::Remove { index, value } => Delta::Remove {
                index: *index,
                values: vec![value.clone()],
            },
            ChangeKind::RemoveMany { index, values } => Delta::Remove {
                index: *index,
                values: values.clone(),
            },
            ChangeKind::Touch => return None,
        };
        Some(Edit {
            notifier: event.notifier(),
            slot: event.slot().to_string(),
            delta,
        })
    }

    /// Returns the changed object.
    #[must_use]
    pub fn notifier(&self) -> Notifier {
        self.notifier
    }

    /// Returns the changed slot.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Returns the recorded delta.
    #[must_use]
    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    /// Returns the edit that undoes this one.
    #[must_use]
    pub fn inverse(&self) -> Edit {
        let delta = match &self.delta {
            Delta::Set { before, after } => Delta::Set {
                before: after.clone(),
                after: before.clone(),
            },
            Delta::Insert { index, values } => Delta::Remove {
                index: *index,
                values: values.clone(),
            },
            Delta::Remove { index, values } => Delta::Insert {
                index: *index,
                values: values.clone(),
            },
        };
        Edit {
            notifier: self.notifier,
            slot: self.slot.clone(),
            delta,
        }
    }

    fn revert(&self, target: &mut dyn EditTarget) -> CoreResult<()> {
        let mutation = match &self.delta {
            Delta::Set { before: Some(v), .. } => Mutation::Set(v.clone()),
            Delta::Set { before: None, .. } => Mutation::Unset,
            Delta::Insert { index, values } => Mutation::Remove {
                index: *index,
                count: values.len(),
            },
            Delta::Remove { index, values } => Mutation::Insert {
                index: Some(*index),
                values: values.clone(),
            },
        };
        target.apply_edit(self.notifier, &self.slot, mutation)
    }
}

/// Entry of a change description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEntry {
    /// A single edit.
    Edit(Edit),
    /// The change of a nested transaction or trigger.
    Nested(ChangeDescription),
}

/// An ordered, composable record of reversible edits.
///
/// Applying a description reverts the edits it holds, last one first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeDescription {
    entries: Vec<ChangeEntry>,
}

impl ChangeDescription {
    /// Creates an empty description.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the description holds no edit at any depth.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| match e {
            ChangeEntry::Edit(_) => false,
            ChangeEntry::Nested(nested) => nested.is_empty(),
        })
    }

    /// Returns the number of edits at any depth.
    #[must_use]
    pub fn edit_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| match e {
                ChangeEntry::Edit(_) => 1,
                ChangeEntry::Nested(nested) => nested.edit_count(),
            })
            .sum()
    }

    /// Returns the top-level entries.
    #[must_use]
    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    /// Returns all edits in recording order, flattening nested descriptions.
    #[must_use]
    pub fn edits(&self) -> Vec<&Edit> {
        let mut out = Vec::new();
        self.collect_edits(&mut out);
        out
    }

    fn collect_edits<'a>(&'a self, out: &mut Vec<&'a Edit>) {
        for entry in &self.entries {
            match entry {
                ChangeEntry::Edit(edit) => out.push(edit),
                ChangeEntry::Nested(nested) => nested.collect_edits(out),
            }
        }
    }

    /// Appends an edit.
    pub fn push(&mut self, edit: Edit) {
        self.entries.push(ChangeEntry::Edit(edit));
    }

    /// Appends a nested description. Empty descriptions are dropped.
    pub fn push_nested(&mut self, nested: ChangeDescription) {
        if !nested.is_empty() {
            self.entries.push(ChangeEntry::Nested(nested));
        }
    }

    /// Appends the entries of another description at this level.
    pub fn extend(&mut self, other: ChangeDescription) {
        self.entries.extend(other.entries);
    }

    /// Reverts the recorded edits once and consumes the description.
    pub fn apply(self, target: &mut dyn EditTarget) -> CoreResult<()> {
        for entry in self.entries.into_iter().rev() {
            match entry {
                ChangeEntry::Edit(edit) => edit.revert(target)?,
                ChangeEntry::Nested(nested) => nested.apply(target)?,
            }
        }
        Ok(())
    }

    /// Reverts as many recorded edits as possible, last one first.
    ///
    /// Unlike [`apply`](Self::apply) a failing edit does not stop the pass.
    /// Returns the errors of the edits that could not be reverted.
    pub fn revert_all(self, target: &mut dyn EditTarget) -> Vec<CoreError> {
        let mut failures = Vec::new();
        self.revert_into(target, &mut failures);
        failures
    }

    fn revert_into(self, target: &mut dyn EditTarget, failures: &mut Vec<CoreError>) {
        for entry in self.entries.into_iter().rev() {
            match entry {
                ChangeEntry::Edit(edit) => {
                    if let Err(err) = edit.revert(target) {
                        failures.push(err);
                    }
                }
                ChangeEntry::Nested(nested) => nested.revert_into(target, failures),
            }
        }
    }

    /// Reverts the recorded edits and turns this description into its
    /// inverse, so that calling it again restores the reverted state.
    pub fn apply_and_reverse(&mut self, target: &mut dyn EditTarget) -> CoreResult<()> {
        for entry in self.entries.iter_mut().rev() {
            match entry {
                ChangeEntry::Edit(edit) => {
                    edit.revert(target)?;
                    *edit = edit.inverse();
                }
                ChangeEntry::Nested(nested) => nested.apply_and_reverse(target)?,
            }
        }
        self.entries.reverse();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityId;
    use proptest::prelude::*;

    fn record(
        graph: &mut ModelGraph,
        desc: &mut ChangeDescription,
        n: Notifier,
        slot: &str,
        m: Mutation,
    ) {
        let event = graph.apply(n, slot, m).unwrap();
        if let Some(edit) = Edit::from_event(&event) {
            desc.push(edit);
        }
    }

    fn setup() -> (ModelGraph, EntityId) {
        let mut graph = ModelGraph::new();
        let id = graph.create_entity("Book");
        graph
            .apply(id.into(), "title", Mutation::Set("A".into()))
            .unwrap();
        graph
            .apply(
                id.into(),
                "tags",
                Mutation::Insert {
                    index: None,
                    values: vec!["x".into(), "y".into()],
                },
            )
            .unwrap();
        (graph, id)
    }

    #[test]
    fn apply_reverts_once() {
        let (mut graph, id) = setup();
        let before = graph.clone();

        let mut desc = ChangeDescription::new();
        let title_b = Mutation::Set("B".into());
        record(&mut graph, &mut desc, id.into(), "title", title_b);
        record(
            &mut graph,
            &mut desc,
            id.into(),
            "tags",
            Mutation::Remove { index: 0, count: 1 },
        );
        record(
            &mut graph,
            &mut desc,
            id.into(),
            "tags",
            Mutation::Insert {
                index: Some(1),
                values: vec!["z".into()],
            },
        );
        record(&mut graph, &mut desc, id.into(), "title", Mutation::Unset);
        assert_eq!(desc.edit_count(), 4);

        desc.apply(&mut graph).unwrap();
        assert!(graph.same_state(&before));
    }

    #[test]
    fn revert_all_continues_past_failures() {
        let (mut graph, id) = setup();

        let mut desc = ChangeDescription::new();
        record(&mut graph, &mut desc, id.into(), "title", Mutation::Set("B".into()));
        record(
            &mut graph,
            &mut desc,
            id.into(),
            "tags",
            Mutation::Insert {
                index: None,
                values: vec!["z".into()],
            },
        );
        // Emptied behind the description's back.
        graph
            .apply(id.into(), "tags", Mutation::Remove { index: 0, count: 3 })
            .unwrap();

        let failures = desc.revert_all(&mut graph);
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], CoreError::IndexOutOfBounds { .. }));
        assert_eq!(graph.get(id, "title").unwrap(), Some(Value::from("A")));
    }

    #[test]
    fn touch_is_not_recorded() {
        let (mut graph, id) = setup();
        let mut desc = ChangeDescription::new();
        record(&mut graph, &mut desc, id.into(), "title", Mutation::Touch);
        record(&mut graph, &mut desc, id.into(), "title", Mutation::Set("A".into()));
        assert!(desc.is_empty());
    }

    #[test]
    fn apply_and_reverse_toggles() {
        let (mut graph, id) = setup();
        let before = graph.clone();

        let mut desc = ChangeDescription::new();
        let title_b = Mutation::Set("B".into());
        record(&mut graph, &mut desc, id.into(), "title", title_b);
        let mut nested = ChangeDescription::new();
        record(
            &mut graph,
            &mut nested,
            id.into(),
            "tags",
            Mutation::Insert {
                index: Some(0),
                values: vec!["a".into(), "b".into()],
            },
        );
        desc.push_nested(nested);
        record(
            &mut graph,
            &mut desc,
            id.into(),
            "tags",
            Mutation::Remove { index: 3, count: 1 },
        );
        let after = graph.clone();

        for _ in 0..3 {
            desc.apply_and_reverse(&mut graph).unwrap();
            assert!(graph.same_state(&before));
            desc.apply_and_reverse(&mut graph).unwrap();
            assert!(graph.same_state(&after));
        }
    }

    #[test]
    fn empty_nested_is_dropped() {
        let mut desc = ChangeDescription::new();
        desc.push_nested(ChangeDescription::new());
        assert!(desc.entries().is_empty());
        assert!(desc.is_empty());
    }

    #[test]
    fn inverse_swaps_insert_and_remove() {
        let edit = Edit {
            notifier: EntityId::new().into(),
            slot: "tags".into(),
            delta: Delta::Insert {
                index: 2,
                values: vec!["q".into()],
            },
        };
        let inv = edit.inverse();
        assert!(matches!(inv.delta(), Delta::Remove { index: 2, .. }));
        assert_eq!(inv.inverse(), edit);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Title(i64),
        Append(i64),
        Remove(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<i64>().prop_map(Op::Title),
            any::<i64>().prop_map(Op::Append),
            any::<usize>().prop_map(Op::Remove),
        ]
    }

    fn mutation_for(graph: &ModelGraph, id: EntityId, op: &Op) -> (&'static str, Mutation) {
        match *op {
            Op::Title(v) => ("title", Mutation::Set(v.into())),
            Op::Append(v) => (
                "tags",
                Mutation::Insert {
                    index: None,
                    values: vec![v.into()],
                },
            ),
            Op::Remove(pick) => {
                let len = graph.get_many(id, "tags").unwrap().len();
                ("tags", Mutation::Remove { index: pick % len, count: 1 })
            }
        }
    }

    proptest! {
        #[test]
        fn nested_descriptions_toggle(
            ops in prop::collection::vec(op_strategy(), 1..24),
            split in any::<usize>(),
        ) {
            let (mut graph, id) = setup();
            let before = graph.clone();

            let split = split % ops.len();
            let mut desc = ChangeDescription::new();
            let mut nested = ChangeDescription::new();
            for (i, op) in ops.iter().enumerate() {
                if matches!(op, Op::Remove(_)) && graph.get_many(id, "tags").unwrap().is_empty() {
                    continue;
                }
                let (slot, m) = mutation_for(&graph, id, op);
                let target = if i < split { &mut desc } else { &mut nested };
                record(&mut graph, target, id.into(), slot, m);
            }
            desc.push_nested(nested);
            let after = graph.clone();

            desc.apply_and_reverse(&mut graph).unwrap();
            prop_assert!(graph.same_state(&before));
            desc.apply_and_reverse(&mut graph).unwrap();
            prop_assert!(graph.same_state(&after));
        }
    }
}

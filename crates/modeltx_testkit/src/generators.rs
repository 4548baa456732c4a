//! Property-based test generators using proptest.
//!
//! Provides strategies for edit scripts and nesting plans, plus the helpers
//! that replay them against a domain. Targets are indices into a list of
//! entities supplied at replay time, so every generated script is valid for
//! any non-empty list.

use modeltx_core::{
    CoreResult, EditingDomain, EntityId, ModelGraph, ResourceId, SequenceNumber,
    TransactionOptions,
};
use proptest::prelude::*;

/// Single-valued slots scripts write to.
pub const SCALAR_SLOTS: [&str; 3] = ["title", "year", "rating"];

/// Many-valued slot scripts write to.
pub const LIST_SLOT: &str = "tags";

/// One edit against the model.
#[derive(Debug, Clone)]
pub enum EditOp {
    /// Assign a scalar slot.
    Set {
        /// Entity index.
        target: usize,
        /// Index into [`SCALAR_SLOTS`].
        slot: usize,
        /// New value.
        value: i64,
    },
    /// Clear a scalar slot.
    Unset {
        /// Entity index.
        target: usize,
        /// Index into [`SCALAR_SLOTS`].
        slot: usize,
    },
    /// Append to the list slot.
    Add {
        /// Entity index.
        target: usize,
        /// Appended value.
        value: i64,
    },
    /// Remove from the list slot; no-op when it is empty.
    Remove {
        /// Entity index.
        target: usize,
        /// Position, taken modulo the list length.
        pick: usize,
    },
    /// Touch a scalar slot.
    Touch {
        /// Entity index.
        target: usize,
    },
    /// Add the entity to the resource, or remove it if already there.
    ToggleRoot {
        /// Entity index.
        target: usize,
    },
}

/// A step of a nesting plan.
#[derive(Debug, Clone)]
pub enum Step {
    /// Perform an edit in the current transaction.
    Edit(EditOp),
    /// Run steps in a nested write transaction, then commit or roll it back.
    Nested {
        /// Steps of the nested transaction.
        steps: Vec<Step>,
        /// Whether the nested transaction commits.
        commit: bool,
    },
}

/// Strategy for generating edits.
pub fn edit_op_strategy() -> impl Strategy<Value = EditOp> {
    let target = 0usize..8;
    prop_oneof![
        4 => (target.clone(), 0..SCALAR_SLOTS.len(), -3i64..3)
            .prop_map(|(target, slot, value)| EditOp::Set { target, slot, value }),
        1 => (target.clone(), 0..SCALAR_SLOTS.len())
            .prop_map(|(target, slot)| EditOp::Unset { target, slot }),
        2 => (target.clone(), any::<i64>()).prop_map(|(target, value)| EditOp::Add { target, value }),
        2 => (target.clone(), any::<usize>()).prop_map(|(target, pick)| EditOp::Remove { target, pick }),
        1 => target.clone().prop_map(|target| EditOp::Touch { target }),
        1 => target.prop_map(|target| EditOp::ToggleRoot { target }),
    ]
}

/// Strategy for generating a flat edit script.
pub fn edit_script_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<EditOp>> {
    prop::collection::vec(edit_op_strategy(), min_ops..max_ops)
}

/// Strategy for generating nesting plans up to a few levels deep.
pub fn nesting_plan_strategy() -> impl Strategy<Value = Vec<Step>> {
    let leaf = edit_op_strategy().prop_map(Step::Edit);
    let step = leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            3 => edit_op_strategy().prop_map(Step::Edit),
            1 => (prop::collection::vec(inner, 0..6), any::<bool>())
                .prop_map(|(steps, commit)| Step::Nested { steps, commit }),
        ]
    });
    prop::collection::vec(step, 1..12)
}

/// Applies one edit. Must run inside a write transaction.
pub fn apply_edit(
    domain: &EditingDomain,
    resource: ResourceId,
    entities: &[EntityId],
    op: &EditOp,
) -> CoreResult<()> {
    let pick = |target: usize| entities[target % entities.len()];
    match *op {
        EditOp::Set {
            target,
            slot,
            value,
        } => domain.set(pick(target), SCALAR_SLOTS[slot], value),
        EditOp::Unset { target, slot } => domain.unset(pick(target), SCALAR_SLOTS[slot]),
        EditOp::Add { target, value } => domain.add(pick(target), LIST_SLOT, value),
        EditOp::Remove { target, pick: at } => {
            let entity = pick(target);
            let len = domain.get_many(entity, LIST_SLOT)?.len();
            if len > 0 {
                domain.remove(entity, LIST_SLOT, at % len)?;
            }
            Ok(())
        }
        EditOp::Touch { target } => domain.touch(pick(target), SCALAR_SLOTS[0]),
        EditOp::ToggleRoot { target } => {
            let entity = pick(target);
            if !domain.remove_root(resource, entity)? {
                domain.add_root(resource, entity)?;
            }
            Ok(())
        }
    }
}

/// Replays a nesting plan in the current write transaction.
///
/// Returns the sequence numbers of the non-touch events the plan left in
/// place, in the order they happened. Events of nested transactions that
/// were rolled back are excluded.
pub fn run_plan(
    domain: &EditingDomain,
    resource: ResourceId,
    entities: &[EntityId],
    steps: &[Step],
) -> CoreResult<Vec<SequenceNumber>> {
    let mut kept = Vec::new();
    for step in steps {
        match step {
            Step::Edit(op) => {
                let before = domain.read(ModelGraph::last_sequence);
                apply_edit(domain, resource, entities, op)?;
                let after = domain.read(ModelGraph::last_sequence);
                if !matches!(op, EditOp::Touch { .. }) {
                    kept.extend(
                        (before.as_u64() + 1..=after.as_u64()).map(SequenceNumber::new),
                    );
                }
            }
            Step::Nested { steps, commit } => {
                let tx = domain.start_transaction(false, TransactionOptions::new())?;
                let nested = run_plan(domain, resource, entities, steps)?;
                if *commit {
                    tx.commit()?;
                    kept.extend(nested);
                } else {
                    tx.rollback()?;
                }
            }
        }
    }
    Ok(kept)
}

/// Counts the edits of a plan, nested steps included.
pub fn plan_len(steps: &[Step]) -> usize {
    steps
        .iter()
        .map(|s| match s {
            Step::Edit(_) => 1,
            Step::Nested { steps, .. } => plan_len(steps),
        })
        .sum()
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

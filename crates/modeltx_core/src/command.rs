//! Commands and the undo stack.
//!
//! A [`Command`] is a labelled piece of work against a domain. Observers
//! return commands as triggers; applications execute them through a
//! [`CommandStack`] to get undo and redo.

use crate::change::{ChangeDescription, EditTarget};
use crate::domain::EditingDomain;
use crate::error::CoreResult;
use crate::model::{Mutation, Notifier};
use crate::status::Status;
use crate::transaction::TransactionOptions;
use std::collections::VecDeque;
use std::fmt;

/// A unit of work against a domain.
pub trait Command: Send {
    /// Human-readable label.
    fn label(&self) -> &str;

    /// Performs the work. Runs inside a write transaction.
    fn execute(&mut self, domain: &EditingDomain) -> CoreResult<()>;
}

impl fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Command").field(&self.label()).finish()
    }
}

/// A command built from a closure.
pub struct FnCommand<F> {
    label: String,
    f: F,
}

impl<F> FnCommand<F>
where
    F: FnMut(&EditingDomain) -> CoreResult<()> + Send,
{
    /// Creates a command.
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }

    /// Creates a boxed command.
    pub fn boxed(label: impl Into<String>, f: F) -> Box<dyn Command>
    where
        F: 'static,
    {
        Box::new(Self::new(label, f))
    }
}

impl<F> Command for FnCommand<F>
where
    F: FnMut(&EditingDomain) -> CoreResult<()> + Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, domain: &EditingDomain) -> CoreResult<()> {
        (self.f)(domain)
    }
}

/// Replays edits through the domain, so observers see them.
pub(crate) struct DomainEditor<'a>(pub(crate) &'a EditingDomain);

impl EditTarget for DomainEditor<'_> {
    fn apply_edit(
        &mut self,
        notifier: Notifier,
        slot: &str,
        mutation: Mutation,
    ) -> CoreResult<()> {
        self.0.mutate(notifier, slot, mutation).map(|_| ())
    }
}

#[derive(Debug)]
struct StackEntry {
    label: String,
    change: ChangeDescription,
}

/// Undo/redo history of executed commands.
///
/// Every executed command becomes one entry holding the change description
/// of its transaction, triggers included. Undo and redo replay the entry
/// inside a transaction flagged `undo_redo`, so triggers do not run again.
#[derive(Debug)]
pub struct CommandStack {
    domain: EditingDomain,
    undo: VecDeque<StackEntry>,
    redo: Vec<StackEntry>,
    limit: usize,
}

impl CommandStack {
    /// Creates a stack holding at most `limit` undoable entries.
    pub fn new(domain: EditingDomain, limit: usize) -> Self {
        Self {
            domain,
            undo: VecDeque::new(),
            redo: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Executes a command in a write transaction and records it.
    ///
    /// Commands that change nothing are not recorded. Executing a command
    /// clears the redo history.
    pub fn execute(&mut self, mut command: Box<dyn Command>) -> CoreResult<Status> {
        let tx = self
            .domain
            .start_transaction(false, TransactionOptions::new())?;
        if let Err(err) = command.execute(&self.domain) {
            tx.rollback()?;
            return Err(err);
        }
        let receipt = tx.commit()?;
        if !receipt.change.is_empty() {
            self.undo.push_back(StackEntry {
                label: command.label().to_string(),
                change: receipt.change,
            });
            if self.undo.len() > self.limit {
                self.undo.pop_front();
            }
            self.redo.clear();
        }
        tracing::debug!(label = command.label(), triggers = receipt.triggers.len(), "command executed");
        Ok(receipt.status)
    }

    /// Undoes the most recent entry. Returns `false` if there is none.
    pub fn undo(&mut self) -> CoreResult<bool> {
        let Some(mut entry) = self.undo.pop_back() else {
            return Ok(false);
        };
        match self.replay(&mut entry) {
            Ok(()) => {
                self.redo.push(entry);
                Ok(true)
            }
            Err(err) => {
                self.undo.push_back(entry);
                Err(err)
            }
        }
    }

    /// Redoes the most recently undone entry. Returns `false` if there is
    /// none.
    pub fn redo(&mut self) -> CoreResult<bool> {
        let Some(mut entry) = self.redo.pop() else {
            return Ok(false);
        };
        match self.replay(&mut entry) {
            Ok(()) => {
                self.undo.push_back(entry);
                Ok(true)
            }
            Err(err) => {
                self.redo.push(entry);
                Err(err)
            }
        }
    }

    fn replay(&self, entry: &mut StackEntry) -> CoreResult<()> {
        let tx = self
            .domain
            .start_transaction(false, TransactionOptions::new().undo_redo(true))?;
        let mut replayed = entry.change.clone();
        if let Err(err) = replayed.apply_and_reverse(&mut DomainEditor(&self.domain)) {
            tx.rollback()?;
            return Err(err);
        }
        tx.commit()?;
        entry.change = replayed;
        tracing::debug!(label = %entry.label, "command replayed");
        Ok(())
    }

    /// Checks if there is something to undo.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    /// Checks if there is something to redo.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    /// Returns the label of the entry [`undo`](Self::undo) would revert.
    #[must_use]
    pub fn undo_label(&self) -> Option<&str> {
        self.undo.back().map(|e| e.label.as_str())
    }

    /// Returns the label of the entry [`redo`](Self::redo) would reapply.
    #[must_use]
    pub fn redo_label(&self) -> Option<&str> {
        self.redo.last().map(|e| e.label.as_str())
    }

    /// Forgets all history.
    pub fn flush(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

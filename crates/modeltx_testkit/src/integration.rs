//! Cross-module integration test helpers.
//!
//! Provides utilities for testing how transactions, recording, observers
//! and the command stack interact.

use crate::fixtures::TestDomain;
use modeltx_core::{CoreError, EditingDomain, EntityId};
use std::collections::HashMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The domain fixture.
    pub fixture: TestDomain,
    /// Expected titles, by book.
    titles: HashMap<EntityId, String>,
}

impl IntegrationHarness {
    /// Creates a new integration harness over a fresh domain.
    pub fn new() -> Self {
        Self {
            fixture: TestDomain::new(),
            titles: HashMap::new(),
        }
    }

    /// Creates a book and tracks its title.
    pub fn add_book(&mut self, title: &str) -> EntityId {
        let book = self.fixture.book(title);
        self.titles.insert(book, title.to_string());
        book
    }

    /// Retitles a book in its own transaction and updates tracking.
    pub fn retitle(&mut self, book: EntityId, title: &str) {
        self.fixture
            .transaction(|d| d.set(book, "title", title))
            .expect("Failed to retitle book");
        self.titles.insert(book, title.to_string());
    }

    /// Retitles a book in a transaction that then fails; tracking is kept.
    pub fn retitle_and_fail(&mut self, book: EntityId, title: &str) -> CoreError {
        let result: Result<(), CoreError> = self.fixture.transaction(|d| {
            d.set(book, "title", title)?;
            Err(CoreError::command_failed("simulated failure"))
        });
        result.expect_err("Transaction should have failed")
    }

    /// Reads a book's title and verifies it matches the tracked value.
    pub fn title_and_verify(&self, book: EntityId) -> Option<String> {
        let actual = self.fixture.title(book);
        if let Some(expected) = self.titles.get(&book) {
            assert_eq!(
                actual.as_ref(),
                Some(expected),
                "Title mismatch for {}",
                book
            );
        }
        actual
    }

    /// Verifies every tracked book.
    pub fn verify_all(&self) {
        for (book, expected) in &self.titles {
            assert_eq!(
                self.fixture.title(*book).as_ref(),
                Some(expected),
                "Title mismatch for {}",
                book
            );
        }
        assert_eq!(self.fixture.lock_depth(), 0, "Lock still held");
        assert!(
            self.fixture.active_transaction().is_none(),
            "Transaction left open"
        );
    }

    /// Returns the count of tracked books.
    pub fn tracked_count(&self) -> usize {
        self.titles.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Test transaction integration.
pub mod transaction {
    use super::*;
    use modeltx_core::{Status, StatusCode, TransactionOptions};

    /// A committed child's changes are undone when its parent rolls back.
    pub fn test_nested_rollback(domain: &EditingDomain, book: EntityId) {
        let original = domain.get(book, "title").expect("Failed to read title");

        let parent = domain
            .start_transaction(false, TransactionOptions::new())
            .expect("Failed to start parent");
        let child = domain
            .start_transaction(false, TransactionOptions::new())
            .expect("Failed to start child");
        domain.set(book, "title", "X").expect("Failed to set in child");
        child.commit().expect("Failed to commit child");
        domain.set(book, "title", "Y").expect("Failed to set in parent");
        parent.rollback().expect("Failed to roll back parent");

        let restored = domain.get(book, "title").expect("Failed to read title");
        assert_eq!(restored, original, "Nested changes survived rollback");
    }

    /// An aborted transaction rolls back when it tries to commit.
    pub fn test_abort(domain: &EditingDomain, book: EntityId) {
        let original = domain.get(book, "title").expect("Failed to read title");

        let tx = domain
            .start_transaction(false, TransactionOptions::new())
            .expect("Failed to start");
        domain.set(book, "title", "aborted").expect("Failed to set");
        tx.abort(Status::error(StatusCode::Rollback, "simulated abort"));
        let err = tx.commit().expect_err("Aborted commit should fail");
        assert!(err.is_rollback(), "Unexpected error: {err}");

        let data = domain.get(book, "title").expect("Failed to read title");
        assert_eq!(data, original, "Aborted changes survived");
    }
}

/// Test command stack integration.
pub mod commands {
    use super::*;
    use modeltx_core::{CommandStack, FnCommand, Value};

    /// Executes a retitle command, then undoes and redoes it.
    pub fn test_undo_redo(domain: &EditingDomain, book: EntityId, title: &str) {
        let original = domain.get(book, "title").expect("Failed to read title");
        let mut stack = CommandStack::new(domain.clone(), 10);

        let new_title = title.to_string();
        stack
            .execute(FnCommand::boxed("retitle", move |d: &EditingDomain| {
                d.set(book, "title", new_title.as_str())
            }))
            .expect("Failed to execute");
        assert_eq!(stack.undo_label(), Some("retitle"));

        assert!(stack.undo().expect("Failed to undo"));
        let undone = domain.get(book, "title").expect("Failed to read title");
        assert_eq!(undone, original, "Undo did not restore the title");

        assert!(stack.redo().expect("Failed to redo"));
        let redone = domain.get(book, "title").expect("Failed to read title");
        assert_eq!(redone, Some(Value::from(title)), "Redo did not reapply");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_harness() {
        let mut harness = IntegrationHarness::new();
        let book = harness.add_book("Dune");
        assert_eq!(harness.tracked_count(), 1);

        harness.retitle(book, "Children of Dune");
        assert_eq!(
            harness.title_and_verify(book).as_deref(),
            Some("Children of Dune")
        );

        let err = harness.retitle_and_fail(book, "Heretics");
        assert!(!err.is_rollback());
        harness.verify_all();
    }

    #[test]
    fn test_nested_rollback() {
        let mut harness = IntegrationHarness::new();
        let book = harness.add_book("A");
        transaction::test_nested_rollback(&harness.fixture, book);
        harness.verify_all();
    }

    #[test]
    fn test_abort() {
        let mut harness = IntegrationHarness::new();
        let book = harness.add_book("A");
        transaction::test_abort(&harness.fixture, book);
        harness.verify_all();
    }

    #[test]
    fn test_undo_redo() {
        let mut harness = IntegrationHarness::new();
        let book = harness.add_book("A");
        commands::test_undo_redo(&harness.fixture, book, "B");
        harness.titles.insert(book, "B".to_string());
        harness.verify_all();
    }
}

//! Test fixtures and domain helpers.
//!
//! Provides convenience functions for setting up test domains
//! and common test scenarios.

use modeltx_core::{DomainConfig, EditingDomain, EntityId, ResourceId, Value};

/// A test domain with one library resource.
pub struct TestDomain {
    /// The domain instance.
    pub domain: EditingDomain,
    /// Resource that books created through the fixture belong to.
    pub library: ResourceId,
}

impl TestDomain {
    /// Creates a test domain with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DomainConfig::new().name("test"))
    }

    /// Creates a test domain with the given configuration.
    pub fn with_config(config: DomainConfig) -> Self {
        let domain = EditingDomain::new(config);
        let library = domain
            .transaction(|d| d.create_resource("mem://library"))
            .expect("Failed to create library resource");
        Self { domain, library }
    }

    /// Creates a book with a title and adds it to the library.
    pub fn book(&self, title: &str) -> EntityId {
        let library = self.library;
        self.domain
            .transaction(|d| {
                let book = d.create_entity("Book")?;
                d.set(book, "title", title)?;
                d.add_root(library, book)?;
                Ok(book)
            })
            .expect("Failed to create book")
    }

    /// Reads the title of a book.
    pub fn title(&self, book: EntityId) -> Option<String> {
        self.domain
            .get(book, "title")
            .expect("Failed to read title")
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Returns the books in the library, in order.
    pub fn books(&self) -> Vec<EntityId> {
        self.domain
            .resource_contents(self.library)
            .expect("Failed to read library")
    }
}

impl Default for TestDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDomain {
    type Target = EditingDomain;

    fn deref(&self) -> &Self::Target {
        &self.domain
    }
}

/// Runs a test with a fresh test domain.
///
/// # Example
///
/// ```rust,ignore
/// use modeltx_testkit::with_domain;
///
/// #[test]
/// fn my_test() {
///     with_domain(|fx| {
///         let book = fx.book("Dune");
///         // ... test operations
///     });
/// }
/// ```
pub fn with_domain<F, R>(f: F) -> R
where
    F: FnOnce(&TestDomain) -> R,
{
    let fixture = TestDomain::new();
    f(&fixture)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a domain whose library holds `count` books titled
    /// `"Book 0"`, `"Book 1"`, ...
    pub fn populated_library(count: usize) -> (TestDomain, Vec<EntityId>) {
        let fixture = TestDomain::new();
        let books = (0..count)
            .map(|i| fixture.book(&format!("Book {i}")))
            .collect();
        (fixture, books)
    }

    /// Creates a domain with one book whose title is `"A"`.
    pub fn single_book() -> (TestDomain, EntityId) {
        let fixture = TestDomain::new();
        let book = fixture.book("A");
        (fixture, book)
    }

    /// Creates a book with an author entity referenced from it.
    pub fn book_with_author(fixture: &TestDomain, title: &str, author: &str) -> EntityId {
        let library = fixture.library;
        fixture
            .transaction(|d| {
                let book = d.create_entity("Book")?;
                let person = d.create_entity("Author")?;
                d.set(person, "name", author)?;
                d.set(book, "title", title)?;
                d.set(book, "author", Value::Ref(person))?;
                d.add_root(library, book)?;
                Ok(book)
            })
            .expect("Failed to create book with author")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_has_library() {
        let fixture = TestDomain::new();
        assert!(fixture.books().is_empty());
        assert_eq!(fixture.name(), "test");
    }

    #[test]
    fn test_with_domain() {
        with_domain(|fx| {
            let book = fx.book("Dune");
            assert_eq!(fx.title(book).as_deref(), Some("Dune"));
            assert_eq!(fx.books(), vec![book]);
        });
    }

    #[test]
    fn test_populated_scenario() {
        let (fixture, books) = scenarios::populated_library(5);
        assert_eq!(fixture.books(), books);
        assert_eq!(fixture.title(books[4]).as_deref(), Some("Book 4"));
    }

    #[test]
    fn test_book_with_author() {
        let fixture = TestDomain::new();
        let book = scenarios::book_with_author(&fixture, "Dune", "Herbert");
        let author = fixture
            .get(book, "author")
            .unwrap()
            .and_then(|v| v.as_entity())
            .unwrap();
        assert_eq!(fixture.class_of(author).unwrap(), "Author");
    }
}

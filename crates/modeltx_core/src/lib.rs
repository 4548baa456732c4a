//! # modeltx Core
//!
//! Transaction engine for shared, observable in-memory model graphs.
//!
//! This crate provides:
//! - A reentrant shared/exclusive domain lock with yield and transfer
//! - Nested transactions with commit, rollback and abort
//! - Change recording for rollback, undo and redo
//! - A per-thread notification tree feeding validation and observers
//! - Precommit triggers with cascade control, and postcommit observers
//!
//! ## Design Principles
//!
//! - One writer at a time; readers share the lock
//! - Only root commits become visible to postcommit observers
//! - Rolled back changes are never observed, except resource loads
//! - Observer, validator and command code never runs under internal locks
//!
//! ## Example
//!
//! ```rust
//! use modeltx_core::{EditingDomain, Value};
//!
//! let domain = EditingDomain::default();
//! let book = domain
//!     .transaction(|d| {
//!         let library = d.create_resource("mem://library")?;
//!         let book = d.create_entity("Book")?;
//!         d.add_root(library, book)?;
//!         d.set(book, "title", "Dune")?;
//!         Ok(book)
//!     })
//!     .unwrap();
//! assert_eq!(domain.get(book, "title").unwrap(), Some(Value::from("Dune")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change;
pub mod command;
mod config;
mod domain;
mod error;
pub mod lock;
pub mod model;
mod stats;
mod status;
pub mod transaction;
mod types;
pub mod validator;

pub use change::{ChangeDescription, ChangeRecorder};
pub use command::{Command, CommandStack, FnCommand};
pub use config::DomainConfig;
pub use domain::{ChangeObserver, ChangeSetEvent, EditingDomain, ObserverError, ObserverInterest};
pub use error::{CoreError, CoreResult};
pub use lock::{DomainLock, LockError, LockMode};
pub use model::{
    ChangeEvent, ChangeKind, EntityId, ModelGraph, Mutation, Notification, NotificationFilter,
    Notifier, SlotValue, Value, CONTENTS, LOADED,
};
pub use stats::{DomainStats, StatsSnapshot};
pub use status::{Severity, Status, StatusCode};
pub use transaction::{CommitReceipt, Phase, Transaction, TransactionOptions};
pub use types::{ObserverId, ResourceId, SequenceNumber, TransactionId};
pub use validator::{EditValidator, RuleValidator};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! # modeltx Testkit
//!
//! Test utilities for modeltx.
//!
//! This crate provides:
//! - Test fixtures and domain helpers
//! - Recording, vetoing and trigger-producing observers
//! - Property-based test generators using proptest
//! - Cross-module integration test helpers
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use modeltx_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_domain() {
//!     with_domain(|fx| {
//!         let book = fx.book("Dune");
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod observers;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::observers::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use observers::*;
pub use stress::*;

//! Validation.
//!
//! The [`Validator`] tracks the notifications of a chain of nested
//! transactions and hands out the ordered lists needed for validation,
//! precommit and postcommit. The rules themselves are external and plug in
//! through [`RuleValidator`] and [`EditValidator`].

mod tree;

pub use tree::{
    NotificationBuffer, NotificationKind, NotificationKinds, RemoveReason, Validation, Validator,
    ValidatorKind,
};

use crate::domain::EditingDomain;
use crate::model::Notification;
use crate::status::Status;
use crate::types::ResourceId;

/// Checks the changes of a root transaction before it commits.
///
/// Runs inside a read-only transaction; the domain may be read but not
/// modified. A result of error severity or worse rolls the transaction
/// back.
pub trait RuleValidator: Send + Sync {
    /// Validates the notifications, in the order they were produced.
    fn validate(&self, domain: &EditingDomain, notifications: &[Notification]) -> Status;
}

impl<F> RuleValidator for F
where
    F: Fn(&EditingDomain, &[Notification]) -> Status + Send + Sync,
{
    fn validate(&self, domain: &EditingDomain, notifications: &[Notification]) -> Status {
        self(domain, notifications)
    }
}

/// Decides whether the resources a transaction changed may be edited.
pub trait EditValidator: Send + Sync {
    /// Validates the changed resources.
    fn validate_edit(&self, domain: &EditingDomain, resources: &[ResourceId]) -> Status;
}

impl<F> EditValidator for F
where
    F: Fn(&EditingDomain, &[ResourceId]) -> Status + Send + Sync,
{
    fn validate_edit(&self, domain: &EditingDomain, resources: &[ResourceId]) -> Status {
        self(domain, resources)
    }
}

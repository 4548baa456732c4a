//! The observed object graph.
//!
//! Entities carry a class name and named slots; resources group root
//! entities and carry a load state. Every mutation of the graph produces an
//! immutable [`ChangeEvent`], shared with interested parties as a
//! [`Notification`].

mod event;
mod filter;
mod graph;
mod id;
mod value;

pub use event::{ChangeEvent, ChangeKind, Notification, Notifier, CONTENTS, LOADED};
pub use filter::NotificationFilter;
pub use graph::{ModelGraph, Mutation};
pub use id::EntityId;
pub use value::{SlotValue, Value};

//! Change recording.
//!
//! Every undoable mutation made inside a recording transaction is captured
//! as an [`Edit`]. A transaction's edits, together with the changes of the
//! transactions nested in it, form its [`ChangeDescription`], which rollback
//! and undo replay in reverse.

mod description;
mod recorder;

pub use description::{ChangeDescription, ChangeEntry, Delta, Edit, EditTarget};
pub use recorder::ChangeRecorder;

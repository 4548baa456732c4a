//! Transaction options.

use std::collections::BTreeMap;
use std::fmt;

/// Value of a custom option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// String value.
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_string())
    }
}

/// Options requested for a transaction.
///
/// Unset fields are inherited from the parent transaction, or from the
/// domain defaults for a root transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Produce no notifications for validation, precommit or postcommit.
    pub silent: Option<bool>,
    /// Skip precommit observers and triggers.
    pub no_triggers: Option<bool>,
    /// Skip rule validation at commit.
    pub no_validation: Option<bool>,
    /// Do not record changes; rollback cannot revert them.
    pub no_undo: Option<bool>,
    /// Allow a write transaction nested in a read-only one.
    pub unprotected: Option<bool>,
    /// Consult the edit validator at root commit.
    pub validate_edit: Option<bool>,
    /// The transaction replays undo or redo; triggers do not run.
    pub undo_redo: Option<bool>,
    /// Application-defined options.
    pub custom: BTreeMap<String, OptionValue>,
}

impl TransactionOptions {
    /// Creates options that inherit everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the silent flag.
    #[must_use]
    pub fn silent(mut self, value: bool) -> Self {
        self.silent = Some(value);
        self
    }

    /// Sets the no-triggers flag.
    #[must_use]
    pub fn no_triggers(mut self, value: bool) -> Self {
        self.no_triggers = Some(value);
        self
    }

    /// Sets the no-validation flag.
    #[must_use]
    pub fn no_validation(mut self, value: bool) -> Self {
        self.no_validation = Some(value);
        self
    }

    /// Sets the no-undo flag.
    #[must_use]
    pub fn no_undo(mut self, value: bool) -> Self {
        self.no_undo = Some(value);
        self
    }

    /// Sets the unprotected flag.
    #[must_use]
    pub fn unprotected(mut self, value: bool) -> Self {
        self.unprotected = Some(value);
        self
    }

    /// Sets the validate-edit flag.
    #[must_use]
    pub fn validate_edit(mut self, value: bool) -> Self {
        self.validate_edit = Some(value);
        self
    }

    /// Sets the undo-redo flag.
    #[must_use]
    pub fn undo_redo(mut self, value: bool) -> Self {
        self.undo_redo = Some(value);
        self
    }

    /// Sets a custom option.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Resolves these options against the inherited ones.
    #[must_use]
    pub fn resolve(&self, inherited: &ResolvedOptions) -> ResolvedOptions {
        let mut custom = inherited.custom.clone();
        custom.extend(self.custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        ResolvedOptions {
            silent: self.silent.unwrap_or(inherited.silent),
            no_triggers: self.no_triggers.unwrap_or(inherited.no_triggers),
            no_validation: self.no_validation.unwrap_or(inherited.no_validation),
            no_undo: self.no_undo.unwrap_or(inherited.no_undo),
            unprotected: self.unprotected.unwrap_or(inherited.unprotected),
            validate_edit: self.validate_edit.unwrap_or(inherited.validate_edit),
            undo_redo: self.undo_redo.unwrap_or(inherited.undo_redo),
            custom,
        }
    }
}

/// Options in effect for an active transaction.
///
/// Resolved and copied when the transaction starts; later changes to the
/// parent or the domain defaults do not affect it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedOptions {
    /// Produce no notifications.
    pub silent: bool,
    /// Skip precommit observers and triggers.
    pub no_triggers: bool,
    /// Skip rule validation.
    pub no_validation: bool,
    /// Do not record changes.
    pub no_undo: bool,
    /// Allowed to write inside a read-only parent.
    pub unprotected: bool,
    /// Consult the edit validator.
    pub validate_edit: bool,
    /// Replaying undo or redo.
    pub undo_redo: bool,
    /// Application-defined options.
    pub custom: BTreeMap<String, OptionValue>,
}

impl ResolvedOptions {
    /// Returns true if precommit observers and triggers run.
    #[must_use]
    pub fn triggers_enabled(&self) -> bool {
        !self.no_triggers && !self.undo_redo
    }

    /// Returns a custom option.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.custom.get(key)
    }
}

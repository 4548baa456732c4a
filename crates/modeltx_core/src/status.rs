//! Transaction status values.
//!
//! A [`Status`] summarizes the outcome of a transaction, a validation pass
//! or an observer callback. Statuses nest: merging two statuses produces a
//! multi-status whose severity is the worst of its children.

use std::fmt;

/// Severity of a status, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Everything went fine.
    Ok,
    /// Informational only.
    Info,
    /// Something is suspicious but the commit may proceed.
    Warning,
    /// The commit must not proceed.
    Error,
    /// The work was cancelled (rolled back).
    Cancel,
}

impl Severity {
    /// Returns true for severities that force a rollback.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Error | Self::Cancel)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Machine-readable reason attached to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// No particular reason.
    None,
    /// Transaction was rolled back on request.
    Rollback,
    /// Rule validation rejected the changes.
    ValidationFailed,
    /// The edit validator refused the touched resources.
    EditRefused,
    /// Another thread wrote while this transaction was active.
    ConcurrentWrite,
    /// A precommit observer failed or panicked.
    ObserverFailed,
    /// A trigger command failed to execute.
    TriggerFailed,
    /// The trigger cascade did not settle within the configured limit.
    CascadeLimit,
    /// The transaction was aborted for another reason.
    Aborted,
    /// Some recorded edits could not be reverted during rollback.
    RevertFailed,
}

/// Outcome of a transaction, validation pass or observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    severity: Severity,
    code: StatusCode,
    message: String,
    children: Vec<Status>,
}

impl Status {
    /// The plain OK status.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(Severity::Ok, StatusCode::None, "ok")
    }

    /// Creates a status with the given severity, code and message.
    pub fn new(severity: Severity, code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
            children: Vec::new(),
        }
    }

    /// Creates a warning status.
    pub fn warning(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, code, message)
    }

    /// Creates an error status.
    pub fn error(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, code, message)
    }

    /// Creates a cancel status.
    pub fn cancel(code: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Severity::Cancel, code, message)
    }

    /// The generic status of a rollback nobody asked a reason for.
    #[must_use]
    pub fn rollback() -> Self {
        Self::cancel(StatusCode::Rollback, "transaction rolled back")
    }

    /// Returns the severity (the worst of this status and its children).
    #[must_use]
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// Returns the status code.
    #[must_use]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the nested statuses of a multi-status.
    #[must_use]
    pub fn children(&self) -> &[Status] {
        &self.children
    }

    /// Returns true if the severity is `Ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Returns true if this status forces a rollback.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.severity.is_failure()
    }

    /// Returns true if this status or any nested status carries `code`.
    #[must_use]
    pub fn has_code(&self, code: StatusCode) -> bool {
        self.code == code || self.children.iter().any(|c| c.has_code(code))
    }

    /// Merges `other` into this status.
    ///
    /// OK statuses are absorbed. Merging into an OK status yields `other`.
    /// Otherwise both become children of a multi-status whose code and
    /// message come from the worse of the two.
    #[must_use]
    pub fn merge(self, other: Status) -> Status {
        if other.is_ok() {
            return self;
        }
        if self.is_ok() {
            return other;
        }
        let (lead_code, lead_message) = if other.severity > self.severity {
            (other.code, other.message.clone())
        } else {
            (self.code, self.message.clone())
        };
        let severity = self.severity.max(other.severity);
        let mut children = Vec::new();
        for status in [self, other] {
            if status.children.is_empty() {
                children.push(status);
            } else {
                children.extend(status.children);
            }
        }
        Status {
            severity,
            code: lead_code,
            message: lead_message,
            children,
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)?;
        if !self.children.is_empty() {
            let nested: Vec<String> = self.children.iter().map(|c| c.to_string()).collect();
            write!(f, " ({})", nested.join("; "))?;
        }
        Ok(())
    }
}

//! Domain configuration.

use crate::transaction::TransactionOptions;
use std::time::Duration;

/// Configuration for creating an editing domain.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Name used in log output.
    pub name: String,

    /// Options root transactions inherit when they leave a field unset.
    pub default_options: TransactionOptions,

    /// How long a transaction waits for the domain lock (`None` = forever).
    pub lock_timeout: Option<Duration>,

    /// Maximum number of aggregate precommit rounds, and maximum nesting
    /// depth of trigger transactions, before the commit is rolled back.
    pub max_trigger_cascade: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            default_options: TransactionOptions::default(),
            lock_timeout: None,
            max_trigger_cascade: 100,
        }
    }
}

impl DomainConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the domain name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the default transaction options.
    #[must_use]
    pub fn default_options(mut self, options: TransactionOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    /// Sets the trigger cascade limit.
    #[must_use]
    pub fn max_trigger_cascade(mut self, limit: usize) -> Self {
        self.max_trigger_cascade = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DomainConfig::default();
        assert_eq!(config.name, "default");
        assert!(config.lock_timeout.is_none());
        assert_eq!(config.max_trigger_cascade, 100);
        assert_eq!(config.default_options, TransactionOptions::default());
    }

    #[test]
    fn builder_pattern() {
        let config = DomainConfig::new()
            .name("library")
            .lock_timeout(Duration::from_millis(250))
            .max_trigger_cascade(5)
            .default_options(TransactionOptions::new().no_validation(true));

        assert_eq!(config.name, "library");
        assert_eq!(config.lock_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.max_trigger_cascade, 5);
        assert_eq!(config.default_options.no_validation, Some(true));
    }
}

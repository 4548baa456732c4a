//! Notification filters used by observers.

use crate::model::{ChangeEvent, Notification, Notifier};

/// Selects which notifications an observer receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationFilter {
    /// Every notification.
    Any,
    /// Everything except touch notifications.
    NotTouch,
    /// Notifications about the named slot.
    Slot(String),
    /// Notifications about one object.
    Notifier(Notifier),
    /// Resource load and unload notifications.
    ResourceLoad,
    /// Notifications that rollback would revert.
    Undoable,
    /// Both filters match.
    And(Box<NotificationFilter>, Box<NotificationFilter>),
    /// Either filter matches.
    Or(Box<NotificationFilter>, Box<NotificationFilter>),
    /// The filter does not match.
    Not(Box<NotificationFilter>),
}

impl NotificationFilter {
    /// Filter on a slot name.
    pub fn slot(name: impl Into<String>) -> Self {
        Self::Slot(name.into())
    }

    /// Filter on a notifier.
    pub fn notifier(notifier: impl Into<Notifier>) -> Self {
        Self::Notifier(notifier.into())
    }

    /// Combines with another filter; both must match.
    #[must_use]
    pub fn and(self, other: NotificationFilter) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Combines with another filter; either may match.
    #[must_use]
    pub fn or(self, other: NotificationFilter) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Inverts the filter.
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Tests one event.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            Self::Any => true,
            Self::NotTouch => !event.is_touch(),
            Self::Slot(name) => event.slot() == name,
            Self::Notifier(notifier) => event.notifier() == *notifier,
            Self::ResourceLoad => event.is_resource_load(),
            Self::Undoable => event.is_undoable(),
            Self::And(a, b) => a.matches(event) && b.matches(event),
            Self::Or(a, b) => a.matches(event) || b.matches(event),
            Self::Not(inner) => !inner.matches(event),
        }
    }

    /// Returns the matching notifications, preserving order.
    #[must_use]
    pub fn apply(&self, notifications: &[Notification]) -> Vec<Notification> {
        notifications
            .iter()
            .filter(|n| self.matches(n))
            .cloned()
            .collect()
    }
}

impl Default for NotificationFilter {
    fn default() -> Self {
        Self::NotTouch
    }
}

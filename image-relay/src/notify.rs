//! User-facing notifications.
//!
//! Notifications are best effort: a failure to display one is logged and
//! never interrupts the pipeline.

use crate::config::Settings;
use crate::error::NotifyError;
use std::sync::Mutex;
use tracing::{info, warn};

pub const TITLE_SUBMITTED: &str = "Image sent";
pub const TITLE_FAILED: &str = "Send failed";
pub const TITLE_COMPLETED: &str = "Processing complete";
pub const TITLE_TASK_FAILED: &str = "Processing failed";

/// Display surface for short messages
pub trait Notifier: Send + Sync {
    fn show(&self, title: &str, message: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        info!("🔔 {}: {}", title, message);
        Ok(())
    }
}

/// Keeps every notification in memory, in order
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of (title, message) pairs shown so far
    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown
            .lock()
            .map(|shown| shown.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, title: &str, message: &str) -> Result<(), NotifyError> {
        let mut shown = self
            .shown
            .lock()
            .map_err(|_| NotifyError("notification log poisoned".to_string()))?;
        shown.push((title.to_string(), message.to_string()));
        Ok(())
    }
}

/// Show a notification if enabled, otherwise log it. Failures are swallowed.
pub fn notify_best_effort(
    notifier: &dyn Notifier,
    settings: &Settings,
    title: &str,
    message: &str,
) {
    if !settings.notifications_enabled {
        info!("{}: {}", title, message);
        return;
    }

    if let Err(e) = notifier.show(title, message) {
        warn!("Failed to show notification {:?}: {}", title, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenNotifier;

    impl Notifier for BrokenNotifier {
        fn show(&self, _title: &str, _message: &str) -> Result<(), NotifyError> {
            Err(NotifyError("no display".to_string()))
        }
    }

    #[test]
    fn test_disabled_notifications_are_not_shown() {
        let notifier = RecordingNotifier::new();
        let settings = Settings {
            notifications_enabled: false,
            ..Settings::default()
        };
        notify_best_effort(&notifier, &settings, TITLE_SUBMITTED, "task t1");
        assert!(notifier.shown().is_empty());
    }

    #[test]
    fn test_enabled_notifications_are_recorded() {
        let notifier = RecordingNotifier::new();
        notify_best_effort(&notifier, &Settings::default(), TITLE_SUBMITTED, "task t1");
        assert_eq!(
            notifier.shown(),
            vec![(TITLE_SUBMITTED.to_string(), "task t1".to_string())]
        );
    }

    #[test]
    fn test_failure_is_swallowed() {
        notify_best_effort(&BrokenNotifier, &Settings::default(), TITLE_FAILED, "boom");
    }
}

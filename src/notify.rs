use notify_rust::Notification;
use tracing::warn;

/// Transient, user-facing messages shown outside the window.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        DesktopNotifier {
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, message: &str) {
        let shown = Notification::new()
            .appname(&self.app_name)
            .summary(&self.app_name)
            .body(message)
            .show();
        if let Err(e) = shown {
            warn!("Could not show notification: {}", e);
        }
    }
}

/// Used when notifications are turned off in the config.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _message: &str) {}
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::Notifier;

    #[derive(Clone, Default)]
    pub struct RecordingNotifier {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl RecordingNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }
}

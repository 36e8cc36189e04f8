//! Desktop notification sender

use std::time::Duration;

use notify_rust::Notification;
use tokio::time::timeout;
use tracing::warn;

/// The notification daemon gets this long before we give up on it.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Notifier {
    title: String,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            title: "Process Killer".to_string(),
        }
    }

    /// Fire-and-forget: the notification daemon call runs off the loop
    /// thread, is bounded to [`NOTIFY_TIMEOUT`], and failures are
    /// swallowed with a warning.
    pub fn send(&self, body: String) {
        let title = self.title.clone();
        tokio::spawn(async move {
            let call = tokio::task::spawn_blocking(move || {
                Notification::new()
                    .summary(&title)
                    .body(&body)
                    .appname("leakguard")
                    .show()
            });
            match timeout(NOTIFY_TIMEOUT, call).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(e))) => warn!("failed to send notification: {e}"),
                Ok(Err(e)) => warn!("notification task failed: {e}"),
                Err(_) => warn!("notification timed out"),
            }
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

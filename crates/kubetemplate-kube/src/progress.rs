//! Live progress feed for deploy operations
//!
//! Producers (the event stream, the spawner once a start has settled) push
//! [`ProgressEvent`]s into a bounded channel. One consumer drains them in
//! arrival order until [`ProgressEvent::Finished`] arrives.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Default channel capacity
pub const DEFAULT_CAPACITY: usize = 256;

/// One entry of the progress feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProgressEvent {
    /// Human-readable status line
    Message { message: String },
    /// No more events for this session
    Finished,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        ProgressEvent::Message {
            message: message.into(),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ProgressEvent::Finished)
    }
}

/// Producer half of a progress feed
pub type ProgressSender = mpsc::Sender<ProgressEvent>;

/// Consumer half of a progress feed
#[derive(Debug)]
pub struct ProgressFeed {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressFeed {
    /// Next message, or `None` once the feed is finished or every sender is gone
    pub async fn next(&mut self) -> Option<String> {
        match self.rx.recv().await? {
            ProgressEvent::Message { message } => Some(message),
            ProgressEvent::Finished => {
                self.rx.close();
                None
            }
        }
    }

    /// Drain everything already queued without waiting
    pub fn drain(&mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Create a bounded progress feed
pub fn channel(capacity: usize) -> (ProgressSender, ProgressFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, ProgressFeed { rx })
}

/// Push an event without waiting; a full or closed feed drops it
pub fn publish(sender: Option<&ProgressSender>, event: ProgressEvent) {
    let Some(sender) = sender else {
        return;
    };
    if let Err(e) = sender.try_send(event) {
        warn!(error = %e, "dropping progress event");
    }
}

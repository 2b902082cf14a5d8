use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::NotificationEvent;

/// Fan-out point for notifications; every subscriber sees every event
/// published after it subscribed.
#[derive(Clone, Debug)]
pub struct NotificationHub {
    tx: broadcast::Sender<NotificationEvent>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Drains the scheduler's conduit: logs each notification and forwards it to
/// the hub. Ends once the scheduler has stopped and the conduit is empty.
pub fn spawn_notification_sink(
    mut events: mpsc::Receiver<NotificationEvent>,
    hub: NotificationHub,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(reminder_id = %event.reminder_id, "Notification: {}", event);
            hub.publish(event);
        }
        tracing::debug!("Notification sink closed");
    })
}

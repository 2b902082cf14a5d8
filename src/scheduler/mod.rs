//! In-memory reminder scheduler.
//!
//! A single background worker owns the reminder registry. Registrations reach
//! it through a bounded queue; once per tick it scans the registry and emits a
//! [`NotificationEvent`] for every due reminder into a bounded conduit that the
//! notification sink drains.
//!
//! The lifecycle is encoded in the types: [`ReminderScheduler`] is the idle
//! scheduler and is consumed by [`ReminderScheduler::start`];
//! [`RunningScheduler`] is consumed by [`RunningScheduler::stop`]. Stopping
//! twice, or before starting, cannot be expressed.

mod reminder;
mod sink;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use reminder::{NotificationEvent, ParseReminderModeError, Reminder, ReminderMode};
pub use sink::{NotificationHub, spawn_notification_sink};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub queue_capacity: usize,
    pub notification_buffer: usize,
    pub mode: ReminderMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            queue_capacity: 64,
            notification_buffer: 128,
            mode: ReminderMode::Once,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("reminder scheduler is not running")]
    NotRunning,
    #[error("reminder queue is full (capacity {0})")]
    QueueFull(usize),
    #[error("reminder scheduler did not stop within {0:?}")]
    ShutdownTimedOut(Duration),
}

pub struct ReminderScheduler {
    config: SchedulerConfig,
    reminders_tx: mpsc::Sender<Reminder>,
    reminders_rx: mpsc::Receiver<Reminder>,
    events_tx: mpsc::Sender<NotificationEvent>,
    state: watch::Sender<SchedulerState>,
}

impl ReminderScheduler {
    /// Creates an idle scheduler together with the receiving end of its
    /// notification conduit.
    pub fn new(config: &SchedulerConfig) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (reminders_tx, reminders_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (events_tx, events_rx) = mpsc::channel(config.notification_buffer.max(1));
        let (state, _) = watch::channel(SchedulerState::Idle);

        let scheduler = Self {
            config: config.clone(),
            reminders_tx,
            reminders_rx,
            events_tx,
            state,
        };
        (scheduler, events_rx)
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn start(self) -> RunningScheduler {
        let cancel = CancellationToken::new();
        self.state.send_replace(SchedulerState::Running);
        let state = Arc::new(self.state);

        let worker = Worker {
            registry: Vec::new(),
            tick: self.config.tick,
            mode: self.config.mode,
            reminders: self.reminders_rx,
            events: self.events_tx,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        RunningScheduler {
            handle: ReminderHandle {
                tx: self.reminders_tx,
                capacity: self.config.queue_capacity.max(1),
            },
            cancel,
            task,
            state,
        }
    }
}

pub struct RunningScheduler {
    handle: ReminderHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl RunningScheduler {
    pub fn handle(&self) -> ReminderHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Signals the worker and waits for it to finish its current tick. If that
    /// takes longer than `deadline` the worker is aborted. Either way no event
    /// is emitted once this returns.
    pub async fn stop(mut self, deadline: Duration) -> Result<(), SchedulerError> {
        self.state.send_replace(SchedulerState::Stopping);
        self.cancel.cancel();

        let result = match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!("Reminder worker terminated abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                tracing::warn!(?deadline, "Reminder worker did not stop in time, aborting");
                self.task.abort();
                let _ = (&mut self.task).await;
                Err(SchedulerError::ShutdownTimedOut(deadline))
            }
        };

        self.state.send_replace(SchedulerState::Stopped);
        result
    }
}

/// Cloneable registration handle, handed to the business layer.
#[derive(Clone, Debug)]
pub struct ReminderHandle {
    tx: mpsc::Sender<Reminder>,
    capacity: usize,
}

impl ReminderHandle {
    /// Queues a reminder without waiting. Fails when the queue is full or the
    /// scheduler has stopped.
    pub fn add_reminder(&self, reminder: Reminder) -> Result<(), SchedulerError> {
        tracing::info!(
            id = %reminder.id,
            label = %reminder.label,
            "Adding reminder due in {:?}",
            reminder.fire_at.saturating_duration_since(Instant::now())
        );
        self.tx.try_send(reminder).map_err(|e| match e {
            TrySendError::Full(_) => SchedulerError::QueueFull(self.capacity),
            TrySendError::Closed(_) => SchedulerError::NotRunning,
        })
    }
}

struct Worker {
    registry: Vec<Reminder>,
    tick: Duration,
    mode: ReminderMode,
    reminders: mpsc::Receiver<Reminder>,
    events: mpsc::Sender<NotificationEvent>,
    state: Arc<watch::Sender<SchedulerState>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!(tick = ?self.tick, mode = ?self.mode, "Reminder worker started");
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(reminder) = self.reminders.recv() => self.accept(reminder),
                _ = ticker.tick() => {
                    self.drain_queue();
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if !self.emit_due().await {
                        break;
                    }
                }
            }
        }

        self.reminders.close();
        self.state.send_replace(SchedulerState::Stopped);
        tracing::info!(pending = self.registry.len(), "Reminder worker stopped");
    }

    fn accept(&mut self, reminder: Reminder) {
        tracing::debug!(id = %reminder.id, label = %reminder.label, "Reminder received");
        self.registry.push(reminder);
    }

    fn drain_queue(&mut self) {
        while let Ok(reminder) = self.reminders.try_recv() {
            self.accept(reminder);
        }
    }

    /// Emits every due reminder. Returns false once nobody drains the conduit.
    async fn emit_due(&mut self) -> bool {
        let now = Instant::now();
        let due: Vec<Reminder> = match self.mode {
            ReminderMode::Once => {
                let (due, pending) = std::mem::take(&mut self.registry)
                    .into_iter()
                    .partition(|r| r.is_due(now));
                self.registry = pending;
                due
            }
            ReminderMode::Repeat => self
                .registry
                .iter()
                .filter(|r| r.is_due(now))
                .cloned()
                .collect(),
        };

        for reminder in &due {
            if self
                .events
                .send(NotificationEvent::for_reminder(reminder))
                .await
                .is_err()
            {
                tracing::warn!("Notification conduit closed, stopping reminder worker");
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lifecycle_moves_through_states() {
        let (scheduler, _events) = ReminderScheduler::new(&SchedulerConfig::default());
        assert_eq!(scheduler.state(), SchedulerState::Idle);

        let running = scheduler.start();
        assert_eq!(running.state(), SchedulerState::Running);

        let state = Arc::clone(&running.state);
        running.stop(Duration::from_secs(1)).await.unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn full_queue_is_reported_instead_of_blocking() {
        let config = SchedulerConfig {
            queue_capacity: 2,
            ..SchedulerConfig::default()
        };
        let (scheduler, _events) = ReminderScheduler::new(&config);
        let running = scheduler.start();
        let handle = running.handle();

        // The worker has not been polled yet on this single-threaded runtime.
        let far = Duration::from_secs(3600);
        handle.add_reminder(Reminder::after("1", far, "a")).unwrap();
        handle.add_reminder(Reminder::after("2", far, "b")).unwrap();
        assert!(matches!(
            handle.add_reminder(Reminder::after("3", far, "c")),
            Err(SchedulerError::QueueFull(2))
        ));

        running.stop(Duration::from_secs(1)).await.unwrap();
    }
}

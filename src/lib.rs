use std::sync::Arc;

use scheduler::{NotificationHub, ReminderHandle};
use storage::{ImageStore, TodoStore};

pub mod config;
pub mod dispatch;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod scheduler;
pub mod storage;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TodoStore>,
    pub reminders: ReminderHandle,
    pub notifications: NotificationHub,
    pub images: ImageStore,
}

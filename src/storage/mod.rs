mod images;
mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::routes::todo::Todo;

pub use images::{ImageStore, content_type};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("todo {0} not found")]
    NotFound(String),
    #[error("todo {0} already exists")]
    Conflict(String),
    #[error("stored todo {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence used by the to-do handlers.
#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Todo>, StorageError>;

    async fn get_by_id(&self, id: &str) -> Result<Todo, StorageError>;

    /// Stores a new todo and returns its id.
    async fn create(&self, todo: Todo) -> Result<String, StorageError>;

    /// Replaces title, status and reminder time. An attached image is kept.
    async fn update(&self, id: &str, todo: Todo) -> Result<(), StorageError>;

    async fn update_image(&self, id: &str, image_path: &str) -> Result<(), StorageError>;

    async fn delete(&self, id: &str) -> Result<(), StorageError>;
}

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{StorageError, TodoStore};
use crate::routes::todo::Todo;

/// Process-local store, kept in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    todos: RwLock<Vec<Todo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TodoStore for MemoryStore {
    async fn get_all(&self) -> Result<Vec<Todo>, StorageError> {
        Ok(self.todos.read().await.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Todo, StorageError> {
        self.todos
            .read()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    async fn create(&self, todo: Todo) -> Result<String, StorageError> {
        let mut todos = self.todos.write().await;
        if todos.iter().any(|t| t.id == todo.id) {
            return Err(StorageError::Conflict(todo.id));
        }
        let id = todo.id.clone();
        todos.push(todo);
        Ok(id)
    }

    async fn update(&self, id: &str, mut todo: Todo) -> Result<(), StorageError> {
        let mut todos = self.todos.write().await;
        let slot = todos
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        todo.id = id.to_string();
        todo.image_path = slot.image_path.take();
        *slot = todo;
        Ok(())
    }

    async fn update_image(&self, id: &str, image_path: &str) -> Result<(), StorageError> {
        let mut todos = self.todos.write().await;
        let slot = todos
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        slot.image_path = Some(image_path.to_string());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let mut todos = self.todos.write().await;
        let before = todos.len();
        todos.retain(|t| t.id != id);
        if todos.len() == before {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

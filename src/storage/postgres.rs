use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::{StorageError, TodoStore};
use crate::routes::todo::{Todo, TodoStatus};

const MAX_RETRIES: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, sqlx::FromRow)]
struct TodoRow {
    id: String,
    title: String,
    status: String,
    reminder_time: Option<String>,
    image_path: Option<String>,
}

impl TryFrom<TodoRow> for Todo {
    type Error = StorageError;

    fn try_from(row: TodoRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TodoStatus>()
            .map_err(|e| StorageError::Malformed {
                id: row.id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Todo {
            id: row.id,
            title: row.title,
            status,
            reminder_time: row.reminder_time,
            image_path: row.image_path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects with exponential backoff and makes sure the table exists.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let mut delay = RETRY_DELAY;
        let mut attempt = 1;
        let pool = loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
            {
                Ok(pool) => break pool,
                Err(e) if attempt < MAX_RETRIES => {
                    tracing::warn!(
                        attempt,
                        retry_in = ?delay,
                        "Failed to connect to Postgres: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS todos (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                reminder_time TEXT,
                image_path TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("ALTER TABLE todos ADD COLUMN IF NOT EXISTS image_path TEXT")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl TodoStore for PostgresStore {
    async fn get_all(&self) -> Result<Vec<Todo>, StorageError> {
        sqlx::query_as::<_, TodoRow>("SELECT id, title, status, reminder_time, image_path FROM todos")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Todo::try_from)
            .collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Todo, StorageError> {
        sqlx::query_as::<_, TodoRow>(
            "SELECT id, title, status, reminder_time, image_path FROM todos WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StorageError::NotFound(id.to_string()))?
        .try_into()
    }

    async fn create(&self, todo: Todo) -> Result<String, StorageError> {
        let result = sqlx::query(
            "INSERT INTO todos (id, title, status, reminder_time, image_path) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&todo.id)
        .bind(&todo.title)
        .bind(todo.status.as_str())
        .bind(&todo.reminder_time)
        .bind(&todo.image_path)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(todo.id),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::Conflict(todo.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update(&self, id: &str, todo: Todo) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE todos SET title = $2, status = $3, reminder_time = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&todo.title)
        .bind(todo.status.as_str())
        .bind(&todo.reminder_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_image(&self, id: &str, image_path: &str) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE todos SET image_path = $2 WHERE id = $1")
            .bind(id)
            .bind(image_path)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM todos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

use std::path::Path as FsPath;

use axum::{
    extract::{Json, Multipart, Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use tokio::time::Instant;
use uuid::Uuid;

use super::model::{CreateTodoResponse, ImageUploadResponse, TodoPayload};
use crate::AppState;
use crate::error::AppError;
use crate::scheduler::Reminder;
use crate::storage::content_type;
use crate::utils::success_to_api_response;

pub async fn home() -> &'static str {
    "Welcome To To-Do Server"
}

#[axum::debug_handler]
pub async fn list_todos(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let todos = state.store.get_all().await?;
    Ok(success_to_api_response(todos))
}

#[axum::debug_handler]
pub async fn get_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let todo = state.store.get_by_id(&id).await?;
    Ok(success_to_api_response(todo))
}

#[axum::debug_handler]
pub async fn create_todo(
    State(state): State<AppState>,
    Json(req): Json<TodoPayload>,
) -> Result<impl IntoResponse, AppError> {
    let fire_at = req.reminder_at(Instant::now())?;
    let id = req
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let todo = req.into_todo(id)?;
    let title = todo.title.clone();

    let id = state.store.create(todo).await?;

    // 有提醒时间时登记提醒；登记失败不影响创建结果
    let reminder_scheduled = fire_at.map(|fire_at| {
        match state.reminders.add_reminder(Reminder::new(&id, fire_at, title)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(todo_id = %id, "Failed to schedule reminder: {}", e);
                false
            }
        }
    });

    Ok((
        StatusCode::CREATED,
        success_to_api_response(CreateTodoResponse {
            id,
            reminder_scheduled,
        }),
    ))
}

#[axum::debug_handler]
pub async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TodoPayload>,
) -> Result<impl IntoResponse, AppError> {
    let todo = req.into_todo(id.clone())?;
    state.store.update(&id, todo.clone()).await?;
    Ok(success_to_api_response(todo))
}

#[axum::debug_handler]
pub async fn delete_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete(&id).await?;
    Ok(success_to_api_response(serde_json::json!({ "id": id })))
}

/// Accepts a multipart form with an `image` file field and attaches it to the
/// todo.
#[axum::debug_handler]
pub async fn upload_todo_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    state.store.get_by_id(&id).await?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.to_string()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.to_string()))?;
        upload = Some((file_name, bytes));
        break;
    }
    let Some((file_name, bytes)) = upload.filter(|(_, bytes)| !bytes.is_empty()) else {
        return Err(AppError::Validation("No image uploaded".to_string()));
    };

    let path = state.images.save(&file_name, &bytes).await?;
    let image_path = path.to_string_lossy().into_owned();
    state.store.update_image(&id, &image_path).await?;
    tracing::info!(todo_id = %id, image_path = %image_path, "Image attached");

    Ok(success_to_api_response(ImageUploadResponse { id, image_path }))
}

#[axum::debug_handler]
pub async fn get_todo_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let todo = state.store.get_by_id(&id).await?;
    let Some(image_path) = todo.image_path else {
        return Err(AppError::NoImage(id));
    };

    let path = FsPath::new(&image_path);
    let bytes = match state.images.load(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(todo_id = %id, image_path = %image_path, "Attached image is gone");
            return Err(AppError::ImageMissing(id));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(([(header::CONTENT_TYPE, content_type(path))], bytes))
}

mod handler;
mod model;

pub use handler::{
    create_todo, delete_todo, get_todo, get_todo_image, home, list_todos, update_todo,
    upload_todo_image,
};
pub use model::{
    CreateTodoResponse, ImageUploadResponse, InvalidStatus, Todo, TodoPayload, TodoStatus,
};

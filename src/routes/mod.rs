pub mod notification;
pub mod todo;

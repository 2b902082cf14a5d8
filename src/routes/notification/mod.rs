mod handler;

pub use handler::stream_notifications;

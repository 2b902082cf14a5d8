mod connection_limit;
mod error_handler;
mod rate_limit;

pub use connection_limit::{ConnectionLimiter, ConnectionSlot, connection_limit};
pub use error_handler::log_errors;
pub use rate_limit::{RateLimiter, client_ip, rate_limit, spawn_eviction_task};

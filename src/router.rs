use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};
use tower::ServiceBuilder;

use crate::AppState;
use crate::middleware::{ConnectionLimiter, RateLimiter, connection_limit, log_errors, rate_limit};
use crate::routes::{notification, todo};

/// Shared admission gates, built once at startup.
#[derive(Clone)]
pub struct Admission {
    pub connections: ConnectionLimiter,
    pub rate: Arc<RateLimiter>,
}

impl Admission {
    pub fn new(max_connections: usize, per_second: u32, burst: u32) -> Self {
        Self {
            connections: ConnectionLimiter::new(max_connections),
            rate: Arc::new(RateLimiter::new(per_second, burst)),
        }
    }
}

// 创建主路由
pub fn create_router(state: AppState, admission: Admission) -> Router {
    let api = Router::new()
        .route("/", get(todo::home))
        .route("/todos", get(todo::list_todos).post(todo::create_todo))
        .route(
            "/todos/{id}",
            get(todo::get_todo)
                .put(todo::update_todo)
                .delete(todo::delete_todo),
        )
        .route(
            "/todos/{id}/image",
            get(todo::get_todo_image).post(todo::upload_todo_image),
        )
        .route("/notifications", get(notification::stream_notifications))
        .layer(from_fn(log_errors));

    // 连接数限制在外层，请求频率限制在内层
    let router = api.layer(
        ServiceBuilder::new()
            .layer(from_fn_with_state(admission.connections, connection_limit))
            .layer(from_fn_with_state(admission.rate, rate_limit)),
    );

    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    router.with_state(state)
}

use std::future::IntoFuture;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use todo_backend::{
    AppState,
    config::Config,
    dispatch::{Dispatcher, dispatch_router},
    middleware::spawn_eviction_task,
    router::{Admission, create_router},
    scheduler::{NotificationHub, ReminderScheduler, spawn_notification_sink},
    storage::{ImageStore, MemoryStore, PostgresStore, TodoStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    // 选择存储
    let store: Arc<dyn TodoStore> = match &config.database_url {
        Some(url) => Arc::new(
            PostgresStore::connect(url)
                .await
                .expect("Failed to connect to Postgres"),
        ),
        None => {
            tracing::info!("DATABASE_URL not set, using in-memory storage");
            Arc::new(MemoryStore::new())
        }
    };

    let shutdown = CancellationToken::new();

    // 启动提醒服务和通知消费者
    let (scheduler, events) = ReminderScheduler::new(&config.scheduler());
    let scheduler = scheduler.start();
    let notifications = NotificationHub::new(config.notification_buffer);
    let sink = spawn_notification_sink(events, notifications.clone());

    // 设置准入控制
    let admission = Admission::new(
        config.max_connections,
        config.rate_limit_per_second,
        config.rate_limit_burst,
    );
    let sweeper = spawn_eviction_task(
        Arc::clone(&admission.rate),
        config.rate_limit_evict_interval(),
        shutdown.clone(),
    );

    let host = config.server_host.parse().unwrap_or_else(|_| {
        tracing::warn!("Invalid server_host, falling back to dual-stack default");
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    });

    if let Some(dispatcher) = Dispatcher::from_config(&config).expect("Invalid backend pool") {
        start_dispatcher(
            Arc::new(dispatcher),
            SocketAddr::new(host, config.dispatch_port),
            shutdown.clone(),
        )
        .await;
    }

    let state = AppState {
        store,
        reminders: scheduler.handle(),
        notifications,
        images: ImageStore::new(config.upload_dir.clone()),
    };
    let app = create_router(state, admission);

    let addr = SocketAddr::new(host, config.server_port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    tracing::info!("API server listening on {}", addr);

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
        signal_token.cancel();
    });

    let server_token = shutdown.clone();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { server_token.cancelled().await });

    let deadline = config.shutdown_timeout();
    tokio::select! {
        result = server.into_future() => {
            if let Err(e) = result {
                tracing::error!("Server failed: {}", e);
            }
        }
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(deadline).await;
        } => {
            tracing::warn!(?deadline, "Open connections did not finish in time");
        }
    }

    shutdown.cancel();
    if let Err(e) = scheduler.stop(deadline).await {
        tracing::warn!("{}", e);
    }
    if tokio::time::timeout(deadline, sink).await.is_err() {
        tracing::warn!("Notification sink did not drain in time");
    }
    if let Err(e) = sweeper.await {
        tracing::error!("Rate limit sweeper terminated abnormally: {}", e);
    }

    tracing::info!("Server gracefully stopped.");
}

/// Binds the dispatch front-end. A busy port is logged and skipped so the API
/// keeps running without it.
async fn start_dispatcher(dispatcher: Arc<Dispatcher>, addr: SocketAddr, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!("Port {} is unavailable ({}), dispatcher will not start", addr.port(), e);
            return;
        }
    };

    tracing::info!(
        backends = ?dispatcher.backends(),
        "Dispatcher listening on {}",
        addr
    );
    tokio::spawn(async move {
        let served = axum::serve(listener, dispatch_router(dispatcher))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::error!("Dispatcher failed: {}", e);
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

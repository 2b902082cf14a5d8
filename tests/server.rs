//! End-to-end checks over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use todo_backend::AppState;
use todo_backend::dispatch::{Dispatcher, dispatch_router};
use todo_backend::router::{Admission, create_router};
use todo_backend::scheduler::{NotificationHub, ReminderScheduler, SchedulerConfig};
use todo_backend::storage::{ImageStore, MemoryStore};
use tokio::net::TcpListener;

async fn serve(app: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

#[tokio::test]
async fn peer_address_is_the_rate_limit_identity() {
    let (scheduler, _events) = ReminderScheduler::new(&SchedulerConfig::default());
    let scheduler = scheduler.start();
    let state = AppState {
        store: Arc::new(MemoryStore::new()),
        reminders: scheduler.handle(),
        notifications: NotificationHub::new(16),
        images: ImageStore::new(std::env::temp_dir().join("todo-backend-server")),
    };
    let admission = Admission::new(150, 1, 5);
    let addr = serve(create_router(state, admission.clone())).await;

    let client = reqwest::Client::new();
    let url = format!("http://{addr}/todos");
    for _ in 0..5 {
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Too many requests. Please try again later.");

    // A proxy-supplied address is a separate client.
    let response = client
        .get(&url)
        .header("x-forwarded-for", "203.0.113.5, 10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(admission.rate.tracked_clients(), 2);

    scheduler.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn dispatcher_redirects_round_robin() {
    let backends = vec![
        "localhost:8080".to_string(),
        "localhost:8081".to_string(),
        "localhost:8082".to_string(),
    ];
    let dispatcher = Arc::new(Dispatcher::new(backends).unwrap());
    let addr = serve(dispatch_router(dispatcher)).await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let mut locations = Vec::new();
    for _ in 0..4 {
        let response = client
            .get(format!("http://{addr}/todos/1?verbose=true"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = response.headers()["location"].to_str().unwrap().to_string();
        locations.push(location);
    }

    assert_eq!(
        locations,
        vec![
            "http://localhost:8080/todos/1",
            "http://localhost:8081/todos/1",
            "http://localhost:8082/todos/1",
            "http://localhost:8080/todos/1",
        ]
    );
}

//! Round-robin dispatch front-end.
//!
//! The dispatcher owns a fixed pool of backend addresses and a shared cursor.
//! Every inbound request is answered with a temporary redirect to the next
//! backend in turn; no payload bytes are proxied.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{Router, extract::State, http::Uri, response::Redirect};
use thiserror::Error;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("backend pool is empty; at least one backend address is required")]
    EmptyPool,
}

#[derive(Debug)]
pub struct Dispatcher {
    backends: Vec<String>,
    cursor: AtomicU64,
}

impl Dispatcher {
    pub fn new(backends: Vec<String>) -> Result<Self, DispatchError> {
        if backends.is_empty() {
            return Err(DispatchError::EmptyPool);
        }
        Ok(Self {
            backends,
            cursor: AtomicU64::new(0),
        })
    }

    /// Picks the next backend. Each call observes a unique cursor value, so any
    /// N calls hit every backend either floor(N/M) or ceil(N/M) times.
    pub fn next_backend(&self) -> &str {
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        let index = (ticket % self.backends.len() as u64) as usize;
        &self.backends[index]
    }

    pub fn redirect_target(&self, path: &str) -> String {
        format!("http://{}{}", self.next_backend(), path)
    }

    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// The configured dispatcher, or `None` when dispatch is switched off. The
    /// backend pool is only validated when it will be used.
    pub fn from_config(config: &Config) -> Result<Option<Self>, DispatchError> {
        if !config.dispatch_enabled {
            return Ok(None);
        }
        Self::new(config.backend_servers.clone()).map(Some)
    }
}

pub fn dispatch_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(dispatch).with_state(dispatcher)
}

async fn dispatch(State(dispatcher): State<Arc<Dispatcher>>, uri: Uri) -> Redirect {
    let target = dispatcher.redirect_target(uri.path());
    tracing::info!("Routing request to {}", target);
    Redirect::temporary(&target)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::thread;

    use super::*;

    fn pool(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn disabled_dispatch_ignores_an_empty_pool() {
        let config = Config {
            dispatch_enabled: false,
            backend_servers: Vec::new(),
            ..Config::default()
        };
        assert!(Dispatcher::from_config(&config).unwrap().is_none());

        let config = Config {
            dispatch_enabled: true,
            ..config
        };
        assert!(matches!(
            Dispatcher::from_config(&config),
            Err(DispatchError::EmptyPool)
        ));
        assert_eq!(
            Dispatcher::from_config(&Config::default())
                .unwrap()
                .unwrap()
                .backends()
                .len(),
            3
        );
    }

    #[test]
    fn empty_pool_is_a_configuration_error() {
        assert!(matches!(
            Dispatcher::new(Vec::new()),
            Err(DispatchError::EmptyPool)
        ));
    }

    #[test]
    fn ten_calls_over_three_backends_split_four_three_three() {
        let dispatcher = Dispatcher::new(pool(&["a", "b", "c"])).unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..10 {
            *counts.entry(dispatcher.next_backend().to_string()).or_default() += 1;
        }
        let mut values: Vec<usize> = counts.into_values().collect();
        values.sort_unstable();
        assert_eq!(values, vec![3, 3, 4]);
    }

    #[test]
    fn visits_backends_in_pool_order() {
        let dispatcher = Dispatcher::new(pool(&["a", "b"])).unwrap();
        let picks: Vec<&str> = (0..4).map(|_| dispatcher.next_backend()).collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn concurrent_callers_keep_within_one_fairness() {
        let dispatcher = Arc::new(Dispatcher::new(pool(&["a", "b", "c", "d"])).unwrap());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    (0..250)
                        .map(|_| dispatcher.next_backend().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for worker in workers {
            for backend in worker.join().unwrap() {
                *counts.entry(backend).or_default() += 1;
            }
        }
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c == 500));
    }

    #[test]
    fn redirect_target_keeps_original_path() {
        let dispatcher = Dispatcher::new(pool(&["localhost:8081"])).unwrap();
        assert_eq!(
            dispatcher.redirect_target("/todos/42"),
            "http://localhost:8081/todos/42"
        );
    }
}

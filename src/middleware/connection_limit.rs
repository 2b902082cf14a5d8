use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AdmissionRejected;

/// Global cap on requests being handled at the same time.
#[derive(Clone, Debug)]
pub struct ConnectionLimiter {
    slots: Arc<Semaphore>,
    capacity: usize,
    rejected: Arc<AtomicU64>,
}

/// A held connection slot. The slot goes back to the pool when this is
/// dropped, whichever way the request scope ends.
#[derive(Debug)]
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConnectionLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            rejected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never waits: returns `None` straight away when every slot is taken.
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Some(ConnectionSlot { _permit: permit }),
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available()
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub async fn connection_limit(
    State(limiter): State<ConnectionLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(slot) = limiter.try_acquire() else {
        tracing::warn!(
            limit = limiter.capacity(),
            path = %req.uri().path(),
            "Connection limit reached, rejecting request"
        );
        return AdmissionRejected::ConnectionLimit {
            limit: limiter.capacity(),
        }
        .into_response();
    };

    let response = next.run(req).await;
    response.map(|body| slot.hold_until_end_of(body))
}

impl ConnectionSlot {
    /// Ties the slot to `body`: it is released once the body has been fully
    /// sent or dropped, so streaming responses stay counted while open.
    pub fn hold_until_end_of(self, body: Body) -> Body {
        Body::from_stream(body.into_data_stream().map(move |chunk| {
            let _held = &self;
            chunk
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_returned_on_drop() {
        let limiter = ConnectionLimiter::new(2);
        for _ in 0..100 {
            let slot = limiter.try_acquire();
            assert!(slot.is_some());
            assert_eq!(limiter.in_flight(), 1);
        }
        assert_eq!(limiter.available(), 2);
    }

    #[test]
    fn exhausted_pool_rejects_without_waiting() {
        let limiter = ConnectionLimiter::new(2);
        let first = limiter.try_acquire();
        let second = limiter.try_acquire();
        assert!(first.is_some() && second.is_some());
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.rejected_total(), 1);

        drop(first);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn slot_is_released_when_holder_panics() {
        let limiter = ConnectionLimiter::new(1);
        let inner = limiter.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _slot = inner.try_acquire().unwrap();
            panic!("handler failed");
        }));
        assert!(outcome.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn slot_follows_the_response_body() {
        let limiter = ConnectionLimiter::new(1);
        let slot = limiter.try_acquire().unwrap();
        let body = slot.hold_until_end_of(Body::from("payload"));
        assert_eq!(limiter.available(), 0);

        let bytes = axum::body::to_bytes(body, 1024).await.unwrap();
        assert_eq!(&bytes[..], b"payload");
        assert_eq!(limiter.available(), 1);
    }

    #[test]
    fn dropping_an_unread_body_releases_the_slot() {
        let limiter = ConnectionLimiter::new(1);
        let body = limiter
            .try_acquire()
            .unwrap()
            .hold_until_end_of(Body::empty());
        assert!(limiter.try_acquire().is_none());
        drop(body);
        assert_eq!(limiter.available(), 1);
    }
}

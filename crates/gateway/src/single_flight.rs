//! In-process request coalescing.
//!
//! The first caller for a key starts the work on its own task; later callers
//! for the same key await the same shared handle. The task deregisters the key
//! when the work completes, success or failure, whether or not anyone is still
//! waiting, so nothing stays coalesced forever.

use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

/// The task running a flight ended without producing a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlightAborted {
    #[error("in-flight computation panicked")]
    Panicked,
    #[error("in-flight computation was cancelled")]
    Cancelled,
}

type FlightFuture<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

struct Flight<T: Clone> {
    id: u64,
    result: FlightFuture<T>,
}

/// Value of a flight and whether this caller joined someone else's.
#[derive(Debug)]
pub struct FlightResult<T> {
    pub value: T,
    pub coalesced: bool,
}

/// Per-key single-flight registry.
///
/// Work runs on a spawned task, so cancelling any caller, including every
/// caller, neither stops it nor leaves its registration behind.
pub struct SingleFlight<T: Clone> {
    flights: Arc<DashMap<String, Flight<T>>>,
    next_id: AtomicU64,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run `start()` for `key` unless a flight for `key` is already underway,
    /// in which case its result is awaited instead.
    ///
    /// Must be called within a Tokio runtime.
    pub async fn run<F>(&self, key: &str, start: F) -> FlightResult<Result<T, FlightAborted>>
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let (result, coalesced) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(flight) => (flight.get().result.clone(), true),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let result = self.launch(key, id, start());
                slot.insert(Flight {
                    id,
                    result: result.clone(),
                });
                (result, false)
            }
        };

        FlightResult {
            value: result.await,
            coalesced,
        }
    }

    fn launch(&self, key: &str, id: u64, work: BoxFuture<'static, T>) -> FlightFuture<T> {
        let flights = self.flights.clone();
        let key = key.to_string();
        let task = tokio::spawn(
            async move {
                let value = work.await;
                // A newer flight registered under the same key must survive.
                flights.remove_if(&key, |_, flight| flight.id == id);
                value
            }
            .in_current_span(),
        );

        async move {
            task.await.map_err(|e| {
                if e.is_panic() {
                    FlightAborted::Panicked
                } else {
                    FlightAborted::Cancelled
                }
            })
        }
        .boxed()
        .shared()
    }

    /// Number of keys with a registered flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

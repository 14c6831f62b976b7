use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{Instrument, debug, debug_span, warn};

use crate::{CacheError, CacheKey};

/// Shared handle to the eventual result of one producer run.
///
/// Every caller attached to the same flight awaits a clone of this handle
/// and receives a clone of the same result.
pub type SharedFlight<T, E> = Shared<BoxFuture<'static, Result<T, CacheError<E>>>>;

/// Whether a caller started a flight or attached to one already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// The caller started the producer.
    Leader,
    /// The caller attached to a producer started by someone else.
    Follower,
}

impl FlightRole {
    /// Returns the role as a string slice, used for metric labels.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FlightRole::Leader => "leader",
            FlightRole::Follower => "follower",
        }
    }
}

/// Who is waiting on a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiter {
    /// A request that needs the result. Once one is attached the producer
    /// always runs to completion.
    Foreground,
    /// A background refresh. A flight with only background waiters can be
    /// cancelled with [`FlightGroup::cancel_background`].
    Background,
}

/// Result of [`FlightGroup::join_or_lead`].
pub struct Joined<T, E> {
    /// How the caller got attached.
    pub role: FlightRole,
    /// Identifies the flight within its group.
    pub id: u64,
    /// The flight to await.
    pub flight: SharedFlight<T, E>,
}

struct Flight {
    id: u64,
    handle: Box<dyn Any + Send + Sync>,
    pinned: bool,
    task: Option<AbortHandle>,
}

/// Deduplicates concurrent producer runs per cache key.
///
/// At most one flight exists per key. The first caller for a key spawns the
/// producer on the tokio runtime; callers arriving while it runs attach to
/// it. The flight is removed from the group before its result is delivered,
/// so a caller arriving after settlement starts fresh.
///
/// Dropping a caller's future never cancels the producer: it runs in its own
/// task and settles for the remaining waiters.
#[derive(Clone, Default)]
pub struct FlightGroup {
    flights: Arc<DashMap<CacheKey, Flight>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for FlightGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightGroup")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl FlightGroup {
    /// Creates an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to the flight for `key`, or starts one by calling `start`.
    ///
    /// `start` is only called when no flight exists for `key`. Must be called
    /// from within a tokio runtime.
    pub fn join_or_lead<T, E, F, Fut>(&self, key: &CacheKey, start: F) -> Joined<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.join_or_lead_as(key, Waiter::Foreground, start)
    }

    /// [`join_or_lead`](Self::join_or_lead) on behalf of `waiter`.
    ///
    /// A foreground waiter pins the flight, so a later
    /// [`cancel_background`](Self::cancel_background) leaves it running.
    pub fn join_or_lead_as<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        waiter: Waiter,
        start: F,
    ) -> Joined<T, E>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let running = entry.get_mut();
                if let Some(flight) = running.handle.downcast_ref::<SharedFlight<T, E>>() {
                    debug!(%key, ?waiter, "joining in-flight request");
                    let flight = flight.clone();
                    running.pinned |= waiter == Waiter::Foreground;
                    return Joined {
                        role: FlightRole::Follower,
                        id: running.id,
                        flight,
                    };
                }
                drop(entry);
                // Same key requested with another value type: run unshared.
                warn!(%key, "in-flight request has a different value type, running without deduplication");
                let (tx, flight) = Self::channel();
                tokio::spawn(async move {
                    let _ = tx.send(start().await.map_err(CacheError::Producer));
                });
                Joined {
                    role: FlightRole::Leader,
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    flight,
                }
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, flight) = Self::channel::<T, E>();
                let mut slot = entry.insert(Flight {
                    id,
                    handle: Box::new(flight.clone()),
                    pinned: waiter == Waiter::Foreground,
                    task: None,
                });

                let lease = FlightLease {
                    flights: Arc::clone(&self.flights),
                    key: key.clone(),
                    id,
                    tx: Some(tx),
                };
                let span = debug_span!("flight", key = %key, id);
                let task = tokio::spawn(
                    async move {
                        let result = start().await;
                        lease.settle(result.map_err(CacheError::Producer));
                    }
                    .instrument(span),
                );
                slot.task = Some(task.abort_handle());

                Joined {
                    role: FlightRole::Leader,
                    id,
                    flight,
                }
            }
        }
    }

    /// Stops flight `id` for `key` if no foreground waiter ever joined it.
    ///
    /// The key is freed at once and the producer is aborted; anyone still
    /// awaiting the flight gets [`CacheError::Aborted`]. Returns whether the
    /// flight was stopped. A settled flight, or a newer one for the same key,
    /// is left alone.
    pub fn cancel_background(&self, key: &CacheKey, id: u64) -> bool {
        let Some((_, flight)) = self
            .flights
            .remove_if(key, |_, flight| flight.id == id && !flight.pinned)
        else {
            return false;
        };
        if let Some(task) = flight.task {
            task.abort();
        }
        debug!(%key, id, "background flight cancelled");
        true
    }

    /// Number of flights currently in progress.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    /// Whether no flight is in progress.
    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Whether a flight for `key` is in progress.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.flights.contains_key(key)
    }

    #[allow(clippy::type_complexity)]
    fn channel<T, E>() -> (oneshot::Sender<Result<T, CacheError<E>>>, SharedFlight<T, E>)
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let flight = async move {
            rx.await.unwrap_or_else(|_| {
                Err(CacheError::Aborted(
                    "producer task ended without a result".to_string(),
                ))
            })
        }
        .boxed()
        .shared();
        (tx, flight)
    }
}

/// Ownership of one registered flight.
///
/// Removes the flight from the group before the result is sent, and on drop
/// (producer panic or task cancellation) removes it before the sender is
/// dropped, so waiters only ever wake after the key is free.
struct FlightLease<T, E> {
    flights: Arc<DashMap<CacheKey, Flight>>,
    key: CacheKey,
    id: u64,
    tx: Option<oneshot::Sender<Result<T, CacheError<E>>>>,
}

impl<T, E> FlightLease<T, E> {
    fn settle(mut self, result: Result<T, CacheError<E>>) {
        self.release();
        if let Some(tx) = self.tx.take() {
            // All waiters may have gone away; the result is simply dropped.
            let _ = tx.send(result);
        }
    }

    fn release(&self) {
        let id = self.id;
        self.flights.remove_if(&self.key, |_, flight| flight.id == id);
    }
}

impl<T, E> Drop for FlightLease<T, E> {
    fn drop(&mut self) {
        self.release();
    }
}

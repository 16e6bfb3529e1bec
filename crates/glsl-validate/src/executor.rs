//! Memoizing executor keyed by a version token.
//!
//! A [`VersionedExecutor`] remembers the most recent completed result and
//! at most one in-flight computation, each tagged with the version it was
//! started for. A request is answered from whichever of the two covers the
//! requested version; otherwise a new computation is started and becomes
//! the in-flight one.
//!
//! # Example
//!
//! ```
//! use glsl_validate::VersionedExecutor;
//!
//! # futures::executor::block_on(async {
//! let executor: VersionedExecutor<String, u32, ()> = VersionedExecutor::new();
//! let text = executor
//!     .get_result(1, || async { Ok("content".to_string()) })
//!     .await;
//! assert_eq!(text, Ok("content".to_string()));
//!
//! // Version 1 is covered by the completed result, the closure never runs.
//! let cached = executor
//!     .get_result(1, || async { Ok("recomputed".to_string()) })
//!     .await;
//! assert_eq!(cached, Ok("content".to_string()));
//! # });
//! ```

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Coverage predicate: `covers(a, b)` is true when a result for `a` may be
/// served for a request at `b`.
pub type CoverageFn<V> = fn(&V, &V) -> bool;

type SharedComputation<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Completed<T, V> {
    version: V,
    data: T,
}

struct InFlight<T, V, E> {
    id: u64,
    version: V,
    computation: SharedComputation<T, E>,
}

struct Slots<T, V, E> {
    completed: Option<Completed<T, V>>,
    in_flight: Option<InFlight<T, V, E>>,
    next_id: u64,
}

/// Coalescing, version-aware memoizer for asynchronous computations.
///
/// Cloning the executor is cheap and yields a handle to the same slots.
pub struct VersionedExecutor<T, V, E> {
    slots: Arc<Mutex<Slots<T, V, E>>>,
    covers: CoverageFn<V>,
}

impl<T, V, E> Clone for VersionedExecutor<T, V, E> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            covers: self.covers,
        }
    }
}

impl<T, V, E> fmt::Debug for VersionedExecutor<T, V, E>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("VersionedExecutor")
            .field("completed", &slots.completed.as_ref().map(|c| &c.version))
            .field("in_flight", &slots.in_flight.as_ref().map(|i| &i.version))
            .finish()
    }
}

impl<T, V, E> VersionedExecutor<T, V, E>
where
    V: PartialOrd,
{
    /// Create an executor using plain `>=` as the coverage relation.
    pub fn new() -> Self {
        Self::with_coverage(|a, b| a >= b)
    }
}

impl<T, V, E> Default for VersionedExecutor<T, V, E>
where
    V: PartialOrd,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, V, E> VersionedExecutor<T, V, E> {
    /// Create an executor with a custom coverage relation.
    pub fn with_coverage(covers: CoverageFn<V>) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                completed: None,
                in_flight: None,
                next_id: 0,
            })),
            covers,
        }
    }
}

impl<T, V, E> VersionedExecutor<T, V, E>
where
    T: Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Return a result whose version covers `version`.
    ///
    /// `produce` is only called when neither the completed result nor the
    /// in-flight computation covers the request. Its future is shared by
    /// every caller that asks for a covered version before it finishes; an
    /// error is delivered to all of them and nothing is cached.
    ///
    /// `produce` is invoked while the slots are locked and must not call
    /// back into this executor; the future it returns may.
    pub async fn get_result<F, Fut>(&self, version: V, produce: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let computation = {
            let mut slots = self.slots.lock();
            if let Some(completed) = &slots.completed {
                if (self.covers)(&completed.version, &version) {
                    return Ok(completed.data.clone());
                }
            }
            match &slots.in_flight {
                Some(in_flight) if (self.covers)(&in_flight.version, &version) => {
                    in_flight.computation.clone()
                }
                _ => {
                    let id = slots.next_id;
                    slots.next_id = slots.next_id.wrapping_add(1);
                    let computation = self.start(id, version.clone(), produce());
                    slots.in_flight = Some(InFlight {
                        id,
                        version,
                        computation: computation.clone(),
                    });
                    computation
                }
            }
        };
        computation.await
    }

    /// Version of the most recent completed result, if any.
    pub fn completed_version(&self) -> Option<V> {
        self.slots.lock().completed.as_ref().map(|c| c.version.clone())
    }

    /// The most recent completed result, if any.
    pub fn completed_result(&self) -> Option<T> {
        self.slots.lock().completed.as_ref().map(|c| c.data.clone())
    }

    /// Version of the in-flight computation, if any.
    pub fn in_flight_version(&self) -> Option<V> {
        self.slots.lock().in_flight.as_ref().map(|i| i.version.clone())
    }

    fn start<Fut>(&self, id: u64, version: V, future: Fut) -> SharedComputation<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let covers = self.covers;
        async move {
            let result = future.await;
            match &result {
                Ok(data) => record(&slots, covers, version, data.clone()),
                Err(_) => forget(&slots, id),
            }
            result
        }
        .boxed()
        .shared()
    }
}

/// Store a finished result unless the completed slot already covers it.
fn record<T, V, E>(slots: &Mutex<Slots<T, V, E>>, covers: CoverageFn<V>, version: V, data: T) {
    let mut slots = slots.lock();
    let stale = slots
        .completed
        .as_ref()
        .is_some_and(|completed| covers(&completed.version, &version));
    if !stale {
        slots.completed = Some(Completed { version, data });
    }
    // The in-flight computation is fully described by the completed slot now.
    if slots
        .completed
        .as_ref()
        .zip(slots.in_flight.as_ref())
        .is_some_and(|(completed, in_flight)| covers(&completed.version, &in_flight.version))
    {
        slots.in_flight = None;
    }
}

/// Drop a failed computation so the next request starts over. A newer
/// in-flight computation is left alone.
fn forget<T, V, E>(slots: &Mutex<Slots<T, V, E>>, id: u64) {
    let mut slots = slots.lock();
    if slots.in_flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
        slots.in_flight = None;
    }
}

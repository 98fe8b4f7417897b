use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::codegen::Implementation;
use crate::error::CallError;
use crate::spec::PoolBounds;
use crate::supervisor::RestartWindow;
use crate::worker::{self, WorkerHandle};

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Workers currently existing, busy or idle.
    pub total: usize,
    /// Workers parked in the idle set.
    pub idle: usize,
}

struct IdleWorker<A, R> {
    handle: WorkerHandle<A, R>,
    idle_since: Instant,
}

struct PoolInner<A, R> {
    idle: VecDeque<IdleWorker<A, R>>,
    total: usize,
}

/// A bounded collection of workers with checkout/checkin routing.
///
/// The pool is the sole router of calls to its workers: membership is mutated
/// only under the pool's own lock, capacity is enforced by a semaphore sized
/// at `max`, and implementation functions never see pool membership. The pool
/// starts with `min` workers, grows lazily under load up to `max`, and
/// shrinks back toward `min` by retiring workers left idle beyond the grace
/// period.
pub(crate) struct WorkerPool<S, A, R> {
    implementation: Arc<Implementation<S, A, R>>,
    initial_state: S,
    bounds: PoolBounds,
    mailbox_capacity: usize,
    checkout_timeout: Duration,
    idle_grace: Duration,
    capacity: Arc<Semaphore>,
    inner: Arc<Mutex<PoolInner<A, R>>>,
    restarts: RestartWindow,
}

/// A worker on loan from the pool. Returned with
/// [`checkin`](WorkerPool::checkin); dropping it instead discards the worker
/// (its capacity is released either way).
pub(crate) struct PooledWorker<A, R> {
    handle: Option<WorkerHandle<A, R>>,
    inner: Arc<Mutex<PoolInner<A, R>>>,
    _permit: OwnedSemaphorePermit,
}

impl<A, R> std::fmt::Debug for PooledWorker<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledWorker")
            .field("checked_out", &self.handle.is_some())
            .finish()
    }
}

impl<A, R> PooledWorker<A, R> {
    pub(crate) fn handle(&self) -> &WorkerHandle<A, R> {
        self.handle.as_ref().expect("pooled worker already returned")
    }
}

impl<A, R> Drop for PooledWorker<A, R> {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            inner.total -= 1;
        }
    }
}

impl<S, A, R> WorkerPool<S, A, R>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    /// Start a pool with `min` workers parked idle.
    pub(crate) fn start(
        implementation: Arc<Implementation<S, A, R>>,
        initial_state: S,
        bounds: PoolBounds,
        mailbox_capacity: usize,
        checkout_timeout: Duration,
        idle_grace: Duration,
        restarts: RestartWindow,
    ) -> Self {
        let mut idle = VecDeque::with_capacity(bounds.min);
        for _ in 0..bounds.min {
            idle.push_back(IdleWorker {
                handle: worker::spawn(
                    Arc::clone(&implementation),
                    initial_state.clone(),
                    mailbox_capacity,
                    None,
                ),
                idle_since: Instant::now(),
            });
        }
        debug!(min = bounds.min, max = bounds.max, "worker pool started");
        Self {
            implementation,
            initial_state,
            bounds,
            mailbox_capacity,
            checkout_timeout,
            idle_grace,
            capacity: Arc::new(Semaphore::new(bounds.max)),
            inner: Arc::new(Mutex::new(PoolInner {
                idle,
                total: bounds.min,
            })),
            restarts,
        }
    }

    /// Borrow a worker: an idle one if available, a freshly created one while
    /// the pool is below `max`, otherwise wait up to the checkout timeout for
    /// a checkin.
    pub(crate) async fn checkout(&self) -> Result<PooledWorker<A, R>, CallError> {
        let acquire = Arc::clone(&self.capacity).acquire_owned();
        let permit = match timeout(self.checkout_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(CallError::ServiceUnavailable),
            Err(_elapsed) => return Err(CallError::PoolExhausted),
        };

        let parked = {
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            match inner.idle.pop_back() {
                Some(idle) => Some(idle.handle),
                None => {
                    // holding a capacity permit guarantees total < max here
                    inner.total += 1;
                    None
                }
            }
        };
        let handle = parked.unwrap_or_else(|| {
            debug!("pool growing by one worker");
            worker::spawn(
                Arc::clone(&self.implementation),
                self.initial_state.clone(),
                self.mailbox_capacity,
                None,
            )
        });

        Ok(PooledWorker {
            handle: Some(handle),
            inner: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Return a worker after a call. A worker that died during the call is
    /// replaced with a fresh one from the initial state, charged against the
    /// restart budget; a spent budget fails the whole pool. Surplus idle
    /// workers past the grace period are retired on the way.
    pub(crate) fn checkin(&self, mut loaned: PooledWorker<A, R>) {
        let handle = loaned
            .handle
            .take()
            .expect("pooled worker already returned");

        if handle.is_terminated() {
            if !self.restarts.charge() {
                error!("pool restart budget exceeded, failing pool");
                self.fail();
                return;
            }
            warn!(worker_id = %handle.id(), "pooled worker failed, starting replacement");
            let replacement = worker::spawn(
                Arc::clone(&self.implementation),
                self.initial_state.clone(),
                self.mailbox_capacity,
                None,
            );
            let mut inner = self.inner.lock().expect("pool lock poisoned");
            inner.idle.push_back(IdleWorker {
                handle: replacement,
                idle_since: Instant::now(),
            });
            return;
        }

        let mut inner = self.inner.lock().expect("pool lock poisoned");
        if self.capacity.is_closed() {
            // pool is stopping or failed; do not re-park
            handle.stop_now();
            inner.total -= 1;
            return;
        }
        self.retire_surplus(&mut inner);
        inner.idle.push_back(IdleWorker {
            handle,
            idle_since: Instant::now(),
        });
    }

    /// Retire idle workers beyond `min` that have sat past the grace period.
    /// Oldest first; retired workers are stopped in place (their mailboxes
    /// are empty).
    fn retire_surplus(&self, inner: &mut PoolInner<A, R>) {
        while inner.total > self.bounds.min
            && inner
                .idle
                .front()
                .is_some_and(|idle| idle.idle_since.elapsed() > self.idle_grace)
        {
            let retired = inner.idle.pop_front().expect("front checked above");
            debug!(worker_id = %retired.handle.id(), "retiring surplus idle worker");
            retired.handle.stop_now();
            inner.total -= 1;
        }
    }

    fn fail(&self) {
        self.capacity.close();
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        // the dead worker being checked in
        inner.total -= 1;
        let drained = inner.idle.drain(..).collect::<Vec<_>>();
        inner.total -= drained.len();
        for idle in drained {
            idle.handle.stop_now();
        }
    }

    /// Stop the pool: no further checkouts; idle workers stop now, busy
    /// workers stop as they come back.
    pub(crate) fn stop(&self) {
        self.capacity.close();
        let mut inner = self.inner.lock().expect("pool lock poisoned");
        let drained = inner.idle.drain(..).collect::<Vec<_>>();
        inner.total -= drained.len();
        for idle in drained {
            idle.handle.stop_now();
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let inner = self.inner.lock().expect("pool lock poisoned");
        PoolStatus {
            total: inner.total,
            idle: inner.idle.len(),
        }
    }
}

impl<S, A, R> fmt::Debug for WorkerPool<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.lock().map(|inner| PoolStatus {
            total: inner.total,
            idle: inner.idle.len(),
        });
        f.debug_struct("WorkerPool")
            .field("bounds", &self.bounds)
            .field("status", &status.ok())
            .finish_non_exhaustive()
    }
}

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::codegen::Implementation;
use crate::decl::{OpName, ServiceName};
use crate::error::{CallError, LogicFault};
use crate::pool::{PoolStatus, WorkerPool};
use crate::registry::Registry;
use crate::reply::Reply;
use crate::supervisor::{SlotStatus, WorkerSlot};
use crate::worker::{Envelope, WorkerHandle};

enum Route<S, A, R> {
    /// One anonymous worker slot, reached directly.
    Direct(Arc<WorkerSlot<A, R>>),
    /// Looked up by name in the registry on every call.
    Named {
        registry: Arc<Registry<A, R>>,
        name: ServiceName,
    },
    /// Checked out of the pool per call, checked back in after the reply.
    Pooled(Arc<WorkerPool<S, A, R>>),
}

impl<S, A, R> Clone for Route<S, A, R> {
    fn clone(&self) -> Self {
        match self {
            Self::Direct(slot) => Self::Direct(Arc::clone(slot)),
            Self::Named { registry, name } => Self::Named {
                registry: Arc::clone(registry),
                name: name.clone(),
            },
            Self::Pooled(pool) => Self::Pooled(Arc::clone(pool)),
        }
    }
}

/// The caller-facing API of a worker-backed service.
///
/// A call is a synchronous rendezvous: send the request, suspend until the
/// reply or the call timeout. State plumbing is fully hidden — callers pass
/// arguments and receive plain values, never state. Clients are cheap to
/// clone and share.
pub struct ServiceClient<S, A, R> {
    implementation: Arc<Implementation<S, A, R>>,
    route: Route<S, A, R>,
    call_timeout: Duration,
}

impl<S, A, R> Clone for ServiceClient<S, A, R> {
    fn clone(&self) -> Self {
        Self {
            implementation: Arc::clone(&self.implementation),
            route: self.route.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

impl<S, A, R> fmt::Debug for ServiceClient<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let route = match &self.route {
            Route::Direct(_) => "direct",
            Route::Named { .. } => "named",
            Route::Pooled(_) => "pooled",
        };
        f.debug_struct("ServiceClient")
            .field("route", &route)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl<S, A, R> ServiceClient<S, A, R>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn direct(
        implementation: Arc<Implementation<S, A, R>>,
        slot: Arc<WorkerSlot<A, R>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            implementation,
            route: Route::Direct(slot),
            call_timeout,
        }
    }

    pub(crate) fn named(
        implementation: Arc<Implementation<S, A, R>>,
        registry: Arc<Registry<A, R>>,
        name: ServiceName,
        call_timeout: Duration,
    ) -> Self {
        Self {
            implementation,
            route: Route::Named { registry, name },
            call_timeout,
        }
    }

    pub(crate) fn pooled(
        implementation: Arc<Implementation<S, A, R>>,
        pool: Arc<WorkerPool<S, A, R>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            implementation,
            route: Route::Pooled(pool),
            call_timeout,
        }
    }

    /// Call a declared public operation and await its plain-value reply.
    pub async fn call(&self, op: impl Into<OpName>, args: A) -> Result<R, CallError> {
        let op = op.into();
        if !self.implementation.declares(&op) {
            return Err(CallError::UnknownOperation(op));
        }
        match &self.route {
            Route::Direct(slot) => self.call_slot(slot, op, args).await,
            Route::Named { registry, name } => {
                let slot = registry
                    .lookup(name)
                    .map_err(|_| CallError::ServiceUnavailable)?;
                self.call_slot(&slot, op, args).await
            }
            Route::Pooled(pool) => {
                let loaned = pool.checkout().await?;
                let result = self.call_worker(loaned.handle(), op, args).await;
                pool.checkin(loaned);
                result
            }
        }
    }

    /// Stop the service behind this client. For a pooled service the pool
    /// drains; for named/anonymous the worker stops and is not restarted.
    pub async fn stop(&self) {
        match &self.route {
            Route::Direct(slot) => slot.stop().await,
            Route::Named { registry, name } => {
                if let Ok(slot) = registry.lookup(name) {
                    slot.stop().await;
                }
            }
            Route::Pooled(pool) => pool.stop(),
        }
    }

    /// Occupancy of the backing pool, when this client is pooled.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        match &self.route {
            Route::Pooled(pool) => Some(pool.status()),
            _ => None,
        }
    }

    async fn call_slot(
        &self,
        slot: &Arc<WorkerSlot<A, R>>,
        op: OpName,
        args: A,
    ) -> Result<R, CallError> {
        let deadline = Instant::now() + self.call_timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut envelope = Envelope::Call {
            op,
            args,
            reply: reply_tx,
        };
        // one retry: the supervisor may have swapped in a replacement since
        // the handle was read
        for _ in 0..2 {
            let handle = slot.handle();
            match timeout_at(deadline, handle.sender().send(envelope)).await {
                Ok(Ok(())) => return self.await_reply(deadline, reply_rx).await,
                Ok(Err(rejected)) => envelope = rejected.0,
                Err(_elapsed) => return Err(CallError::CallTimeout),
            }
        }
        match slot.status() {
            SlotStatus::Active => {
                debug!("worker mid-restart, reporting a timeout-class miss");
                Err(CallError::CallTimeout)
            }
            SlotStatus::Stopped | SlotStatus::Failed => Err(CallError::ServiceUnavailable),
        }
    }

    async fn call_worker(
        &self,
        handle: &WorkerHandle<A, R>,
        op: OpName,
        args: A,
    ) -> Result<R, CallError> {
        let deadline = Instant::now() + self.call_timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = Envelope::Call {
            op,
            args,
            reply: reply_tx,
        };
        match timeout_at(deadline, handle.sender().send(envelope)).await {
            Ok(Ok(())) => self.await_reply(deadline, reply_rx).await,
            Ok(Err(_rejected)) => Err(CallError::ServiceUnavailable),
            Err(_elapsed) => Err(CallError::CallTimeout),
        }
    }

    async fn await_reply(
        &self,
        deadline: Instant,
        reply_rx: oneshot::Receiver<R>,
    ) -> Result<R, CallError> {
        match timeout_at(deadline, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            // the worker dropped the reply: it terminated mid-call; the
            // supervisor restarts behind the scenes, the caller sees a miss
            Ok(Err(_closed)) => Err(CallError::CallTimeout),
            Err(_elapsed) => Err(CallError::CallTimeout),
        }
    }
}

/// The no-process deployment shape: the implementation invoked directly
/// against a state value threaded explicitly by the caller. No worker, no
/// mailbox, no concurrency — the escape hatch for code that must not pay
/// actor overhead.
pub struct InlineService<S, A, R> {
    implementation: Arc<Implementation<S, A, R>>,
}

impl<S, A, R> InlineService<S, A, R> {
    pub(crate) fn new(implementation: Arc<Implementation<S, A, R>>) -> Self {
        Self { implementation }
    }

    /// Call a declared public operation against `state`, committing any
    /// state update into the caller's binding.
    pub fn call(&self, state: &mut S, op: impl Into<OpName>, args: A) -> Result<R, LogicFault> {
        match self.implementation.invoke(state, &op.into(), args)? {
            Reply::Plain(value) => Ok(value),
            Reply::WithState(value, next) => {
                *state = next;
                Ok(value)
            }
        }
    }
}

impl<S, A, R> Clone for InlineService<S, A, R> {
    fn clone(&self) -> Self {
        Self {
            implementation: Arc::clone(&self.implementation),
        }
    }
}

impl<S, A, R> fmt::Debug for InlineService<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InlineService").finish_non_exhaustive()
    }
}

/// A started service in its declared deployment shape.
#[derive(Debug, Clone)]
pub enum ServiceHandle<S, A, R> {
    /// No process: call against caller-held state.
    Inline(InlineService<S, A, R>),
    /// Worker-backed (anonymous, named, or pooled): call through the client.
    Server(ServiceClient<S, A, R>),
}

impl<S, A, R> ServiceHandle<S, A, R>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    /// The client, for worker-backed shapes.
    pub fn client(&self) -> Option<&ServiceClient<S, A, R>> {
        match self {
            Self::Server(client) => Some(client),
            Self::Inline(_) => None,
        }
    }

    /// The inline service, for the no-process shape.
    pub fn inline(&self) -> Option<&InlineService<S, A, R>> {
        match self {
            Self::Inline(service) => Some(service),
            Self::Server(_) => None,
        }
    }

    /// Stop the service. A no-op for the inline shape.
    pub async fn stop(&self) {
        if let Self::Server(client) = self {
            client.stop().await;
        }
    }
}

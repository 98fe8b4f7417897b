use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::codegen::Implementation;
use crate::decl::ServiceName;
use crate::registry::Registry;
use crate::spec::RestartPolicy;
use crate::worker::{self, ExitReason, WorkerHandle};

/// Sliding-window restart accounting, shared between the single-worker
/// supervisor and the pool manager.
#[derive(Debug)]
pub(crate) struct RestartWindow {
    policy: RestartPolicy,
    restarts: Mutex<VecDeque<Instant>>,
}

impl RestartWindow {
    pub(crate) fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            restarts: Mutex::new(VecDeque::new()),
        }
    }

    /// Charge one restart against the window. Returns `false` when the
    /// budget is spent and the failure must be treated as fatal.
    pub(crate) fn charge(&self) -> bool {
        let now = Instant::now();
        let mut restarts = self.restarts.lock().expect("restart window lock poisoned");
        while restarts
            .front()
            .is_some_and(|at| now.duration_since(*at) > self.policy.window)
        {
            restarts.pop_front();
        }
        if restarts.len() as u32 >= self.policy.max_restarts {
            return false;
        }
        restarts.push_back(now);
        true
    }
}

/// Where a supervised slot stands from a caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotStatus {
    /// Serving, or between a crash and its replacement.
    Active,
    /// Explicitly stopped; never restarted.
    Stopped,
    /// Restart budget spent; permanently unavailable.
    Failed,
}

/// One supervised worker position. The supervisor swaps a replacement handle
/// in on restart; callers always read the latest handle through the slot.
pub(crate) struct WorkerSlot<A, R> {
    current: RwLock<WorkerHandle<A, R>>,
    status: AtomicU8,
}

impl<A, R> WorkerSlot<A, R> {
    fn new(handle: WorkerHandle<A, R>) -> Self {
        Self {
            current: RwLock::new(handle),
            status: AtomicU8::new(SlotStatus::Active as u8),
        }
    }

    pub(crate) fn handle(&self) -> WorkerHandle<A, R> {
        self.current.read().expect("worker slot lock poisoned").clone()
    }

    pub(crate) fn status(&self) -> SlotStatus {
        match self.status.load(Ordering::Acquire) {
            0 => SlotStatus::Active,
            1 => SlotStatus::Stopped,
            _ => SlotStatus::Failed,
        }
    }

    fn swap(&self, handle: WorkerHandle<A, R>) {
        *self.current.write().expect("worker slot lock poisoned") = handle;
    }

    fn mark(&self, status: SlotStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Ask the current worker to stop. The supervisor observes the normal
    /// exit and leaves the slot stopped.
    pub(crate) async fn stop(&self) {
        self.handle().stop().await;
    }
}

impl<A, R> fmt::Debug for WorkerSlot<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSlot")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Spawn a worker and the supervision task watching it.
///
/// On abnormal termination the supervisor starts a replacement from
/// `initial_state` — state accumulated before the crash is discarded — and
/// swaps it into the slot, keeping any registry entry pointing at the same
/// slot valid. Exceeding the restart budget fails the slot permanently and
/// drops its registry entry.
pub(crate) fn spawn_supervised<S, A, R>(
    implementation: Arc<Implementation<S, A, R>>,
    initial_state: S,
    mailbox_capacity: usize,
    policy: RestartPolicy,
    registration: Option<(ServiceName, Arc<Registry<A, R>>)>,
) -> Arc<WorkerSlot<A, R>>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    let first = worker::spawn(
        Arc::clone(&implementation),
        initial_state.clone(),
        mailbox_capacity,
        Some(exit_tx.clone()),
    );
    let slot = Arc::new(WorkerSlot::new(first));

    let supervised = Arc::clone(&slot);
    let window = RestartWindow::new(policy);
    tokio::spawn(async move {
        while let Some(exit) = exit_rx.recv().await {
            match exit.reason {
                ExitReason::Normal => {
                    debug!(worker_id = %exit.id, "worker stopped");
                    supervised.mark(SlotStatus::Stopped);
                    if let Some((name, registry)) = &registration {
                        registry.remove_slot(name, &supervised);
                    }
                    break;
                }
                ExitReason::Failure(fault) => {
                    if !window.charge() {
                        error!(
                            worker_id = %exit.id,
                            error = %fault,
                            "restart budget exceeded, service failed"
                        );
                        supervised.mark(SlotStatus::Failed);
                        if let Some((name, registry)) = &registration {
                            registry.remove_slot(name, &supervised);
                        }
                        break;
                    }
                    warn!(
                        worker_id = %exit.id,
                        error = %fault,
                        "worker failed, restarting from initial state"
                    );
                    let replacement = worker::spawn(
                        Arc::clone(&implementation),
                        initial_state.clone(),
                        mailbox_capacity,
                        Some(exit_tx.clone()),
                    );
                    supervised.swap(replacement);
                }
            }
        }
    });

    slot
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::sleep;

    use super::*;
    use crate::codegen::generate;
    use crate::decl::{OpName, ServiceDecl};
    use crate::reply::BodyResult;
    use crate::spec::{Mode, ServiceSpec};
    use crate::worker::Envelope;

    fn implementation() -> Arc<Implementation<u64, u64, u64>> {
        let spec = ServiceSpec::builder()
            .mode(Mode::Anonymous)
            .initial_state(0u64)
            .build();
        let decl = ServiceDecl::new(spec)
            .clause("read", &[], |state, _| BodyResult::Reply(*state))
            .clause("add", &["n"], |state, n| {
                BodyResult::SetAndReply(state + n, state + n)
            })
            .clause("boom", &[], |_, _| panic!("boom"));
        generate(decl).unwrap().implementation()
    }

    async fn call(slot: &WorkerSlot<u64, u64>, op: &str, args: u64) -> Option<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        slot.handle()
            .sender()
            .send(Envelope::Call {
                op: OpName::from(op),
                args,
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok()
    }

    /// Retry until the supervisor has swapped a live replacement in.
    async fn call_until_served(slot: &WorkerSlot<u64, u64>, op: &str, args: u64) -> u64 {
        for _ in 0..50 {
            if let Some(value) = call(slot, op, args).await {
                return value;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("no replacement worker appeared");
    }

    #[test]
    fn test_restart_window_enforces_budget() {
        let window = RestartWindow::new(RestartPolicy {
            max_restarts: 2,
            window: Duration::from_secs(60),
        });
        assert!(window.charge());
        assert!(window.charge());
        assert!(!window.charge());
    }

    #[tokio::test]
    async fn test_restart_discards_state() {
        let slot = spawn_supervised(
            implementation(),
            0u64,
            8,
            RestartPolicy::default(),
            None,
        );

        assert_eq!(call_until_served(&slot, "add", 41).await, 41);
        assert!(call(&slot, "boom", 0).await.is_none());

        // the replacement starts over from the initial state
        assert_eq!(call_until_served(&slot, "read", 0).await, 0);
        assert_eq!(slot.status(), SlotStatus::Active);
    }

    #[tokio::test]
    async fn test_exceeding_restart_budget_fails_the_slot() {
        let slot = spawn_supervised(
            implementation(),
            0u64,
            8,
            RestartPolicy {
                max_restarts: 1,
                window: Duration::from_secs(60),
            },
            None,
        );

        let _ = call(&slot, "boom", 0).await;
        // one restart is granted; the second crash exhausts the budget
        for _ in 0..50 {
            if call(&slot, "boom", 0).await.is_none()
                && slot.status() == SlotStatus::Failed
            {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(slot.status(), SlotStatus::Failed);
    }

    #[tokio::test]
    async fn test_explicit_stop_is_not_restarted() {
        let slot = spawn_supervised(
            implementation(),
            0u64,
            8,
            RestartPolicy::default(),
            None,
        );

        assert_eq!(call_until_served(&slot, "read", 0).await, 0);
        slot.stop().await;
        for _ in 0..50 {
            if slot.status() == SlotStatus::Stopped {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(slot.status(), SlotStatus::Stopped);
        assert!(call(&slot, "read", 0).await.is_none());
    }
}

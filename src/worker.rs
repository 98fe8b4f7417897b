use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codegen::Implementation;
use crate::decl::OpName;
use crate::error::LogicFault;
use crate::reply::Reply;

/// Identity of a single worker task.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a worker task. A worker accepts requests only while
/// `Running`; there is no way back out of `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Created,
    Running,
    Terminated,
}

#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    fn new(status: WorkerStatus) -> Self {
        Self(AtomicU8::new(encode_status(status)))
    }

    pub(crate) fn load(&self) -> WorkerStatus {
        decode_status(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: WorkerStatus) {
        self.0.store(encode_status(status), Ordering::Release);
    }
}

const fn encode_status(status: WorkerStatus) -> u8 {
    match status {
        WorkerStatus::Created => 0,
        WorkerStatus::Running => 1,
        WorkerStatus::Terminated => 2,
    }
}

const fn decode_status(value: u8) -> WorkerStatus {
    match value {
        0 => WorkerStatus::Created,
        1 => WorkerStatus::Running,
        _ => WorkerStatus::Terminated,
    }
}

/// A request to a worker. The reply channel carries the unwrapped value only;
/// state never crosses the worker boundary.
pub(crate) enum Envelope<A, R> {
    Call {
        op: OpName,
        args: A,
        reply: oneshot::Sender<R>,
    },
    Stop,
}

/// Why a worker's loop ended.
#[derive(Debug, Clone)]
pub(crate) enum ExitReason {
    /// Explicit stop or mailbox disconnection.
    Normal,
    /// A logic fault terminated the worker mid-call.
    Failure(LogicFault),
}

/// Termination report delivered to whoever supervises the worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerExit {
    pub id: WorkerId,
    pub reason: ExitReason,
}

/// Handle to one running worker task: its identity, its mailbox, and its
/// status cell. The worker's state value is owned exclusively by the task
/// behind this handle.
pub(crate) struct WorkerHandle<A, R> {
    id: WorkerId,
    sender: mpsc::Sender<Envelope<A, R>>,
    status: Arc<StatusCell>,
}

impl<A, R> Clone for WorkerHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
            status: Arc::clone(&self.status),
        }
    }
}

impl<A, R> fmt::Debug for WorkerHandle<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl<A, R> WorkerHandle<A, R> {
    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        self.status.load()
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.status.load() == WorkerStatus::Terminated
    }

    pub(crate) fn sender(&self) -> &mpsc::Sender<Envelope<A, R>> {
        &self.sender
    }

    /// Ask the worker to stop once it reaches the stop request in its mailbox.
    pub(crate) async fn stop(&self) {
        let _ = self.sender.send(Envelope::Stop).await;
    }

    /// Non-blocking stop for workers known to have mailbox room (idle pool
    /// workers being retired).
    pub(crate) fn stop_now(&self) {
        let _ = self.sender.try_send(Envelope::Stop);
    }
}

/// Spawn a worker task owning `state`, serving calls against `implementation`
/// one at a time. Exit reports go to `exits` when provided.
pub(crate) fn spawn<S, A, R>(
    implementation: Arc<Implementation<S, A, R>>,
    state: S,
    mailbox_capacity: usize,
    exits: Option<mpsc::UnboundedSender<WorkerExit>>,
) -> WorkerHandle<A, R>
where
    S: Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    let id = WorkerId::generate();
    let (sender, mailbox) = mpsc::channel(mailbox_capacity);
    let status = Arc::new(StatusCell::new(WorkerStatus::Created));
    let cell = Arc::clone(&status);
    tokio::spawn(run_worker_loop(implementation, state, mailbox, id, cell, exits));
    WorkerHandle { id, sender, status }
}

async fn run_worker_loop<S, A, R>(
    implementation: Arc<Implementation<S, A, R>>,
    mut state: S,
    mut mailbox: mpsc::Receiver<Envelope<A, R>>,
    id: WorkerId,
    status: Arc<StatusCell>,
    exits: Option<mpsc::UnboundedSender<WorkerExit>>,
) where
    S: Send + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    status.store(WorkerStatus::Running);
    debug!(worker_id = %id, "worker running");

    let reason = loop {
        match mailbox.recv().await {
            Some(Envelope::Call { op, args, reply }) => {
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| implementation.invoke(&state, &op, args)));
                match outcome {
                    Ok(Ok(Reply::Plain(value))) => {
                        let _ = reply.send(value);
                    }
                    Ok(Ok(Reply::WithState(value, next))) => {
                        // state is committed only after a successful return,
                        // so a faulted call can never leave partial state
                        state = next;
                        let _ = reply.send(value);
                    }
                    Ok(Err(fault)) => {
                        warn!(worker_id = %id, op = %op, error = %fault, "clause failed");
                        break ExitReason::Failure(fault);
                    }
                    Err(payload) => {
                        let fault = LogicFault::Panicked {
                            op: op.clone(),
                            message: panic_message(payload.as_ref()),
                        };
                        warn!(worker_id = %id, op = %op, error = %fault, "clause panicked");
                        break ExitReason::Failure(fault);
                    }
                }
            }
            Some(Envelope::Stop) | None => break ExitReason::Normal,
        }
    };

    status.store(WorkerStatus::Terminated);
    debug!(worker_id = %id, reason = ?reason, "worker terminated");
    if let Some(exits) = exits {
        let _ = exits.send(WorkerExit { id, reason });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::codegen::generate;
    use crate::decl::ServiceDecl;
    use crate::reply::BodyResult;
    use crate::spec::{Mode, ServiceSpec};

    fn counter_implementation() -> Arc<Implementation<u64, u64, u64>> {
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

    async fn call(handle: &WorkerHandle<u64, u64>, op: &str, args: u64) -> Option<u64> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
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

    #[tokio::test]
    async fn test_with_state_commits_and_plain_does_not() {
        let handle = spawn(counter_implementation(), 0u64, 8, None);

        assert_eq!(call(&handle, "add", 5).await, Some(5));
        assert_eq!(call(&handle, "add", 2).await, Some(7));
        assert_eq!(call(&handle, "read", 0).await, Some(7));
        assert_eq!(call(&handle, "read", 0).await, Some(7));
    }

    #[tokio::test]
    async fn test_requests_are_served_in_receipt_order() {
        let handle = spawn(counter_implementation(), 0u64, 32, None);

        let mut replies = Vec::new();
        for _ in 0..10 {
            let (reply_tx, reply_rx) = oneshot::channel();
            handle
                .sender()
                .send(Envelope::Call {
                    op: OpName::from("add"),
                    args: 1,
                    reply: reply_tx,
                })
                .await
                .unwrap();
            replies.push(reply_rx);
        }
        for (i, reply) in replies.into_iter().enumerate() {
            assert_eq!(reply.await.unwrap(), i as u64 + 1);
        }
    }

    #[tokio::test]
    async fn test_stop_terminates_and_rejects_further_requests() {
        let handle = spawn(counter_implementation(), 0u64, 8, None);
        assert_eq!(call(&handle, "add", 1).await, Some(1));

        handle.stop().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status(), WorkerStatus::Terminated);
        assert!(call(&handle, "add", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_panicking_clause_reports_failure_without_replying() {
        let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
        let handle = spawn(counter_implementation(), 0u64, 8, Some(exit_tx));

        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .sender()
            .send(Envelope::Call {
                op: OpName::from("boom"),
                args: 0,
                reply: reply_tx,
            })
            .await
            .unwrap();

        // the reply channel is dropped, never answered
        assert!(reply_rx.await.is_err());

        let exit = exit_rx.recv().await.unwrap();
        assert_eq!(exit.id, handle.id());
        assert!(matches!(
            exit.reason,
            ExitReason::Failure(LogicFault::Panicked { .. })
        ));
        assert!(handle.is_terminated());
    }
}

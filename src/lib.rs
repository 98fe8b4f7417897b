//! # statesman
//!
//! Turn plain state-threading functions into stateful concurrent services.
//!
//! A service starts as a declaration: a state shape, a set of function
//! clauses written against an explicit state value, and a deployment mode.
//! Generation rewrites the clauses into a pure implementation table — each
//! public clause becomes a function of `(state, args)` returning a
//! [`Reply`](reply::Reply) that either carries a plain value or a value plus
//! the updated state — and wires the declared deployment shape around it:
//!
//! - **Inline**: no process; callers thread state explicitly.
//! - **Anonymous**: one worker task owning the state, reached via the handle.
//! - **Named**: one worker task, looked up by name in an explicit
//!   [`Registry`](registry::Registry).
//! - **Pooled**: a supervised, bounded pool of workers with checkout/checkin.
//!
//! Workers serialize calls, so state mutation is race-free without locks;
//! the supervisor restarts crashed workers from the initial state.
//!
//! ```ignore
//! use statesman::{BodyResult, Mode, ServiceDecl, ServiceSpec, generate};
//!
//! let spec = ServiceSpec::builder()
//!     .mode(Mode::Anonymous)
//!     .initial_state(0u64)
//!     .state_name("count")
//!     .build();
//! let decl = ServiceDecl::new(spec)
//!     .clause("read", &[], |count, _| BodyResult::Reply(*count))
//!     .clause("add", &["n"], |count, n| {
//!         BodyResult::SetAndReply(count + n, count + n)
//!     });
//!
//! let service = generate(decl)?;
//! let handle = service.run()?;
//! let client = handle.client().unwrap();
//! assert_eq!(client.call("add", 5).await?, 5);
//! ```

pub mod client;
pub mod codegen;
pub mod decl;
pub mod error;
pub mod pool;
pub mod registry;
pub mod reply;
pub mod spec;
mod supervisor;
pub mod worker;

// Re-export commonly used types at the crate root
pub use client::{InlineService, ServiceClient, ServiceHandle};
pub use codegen::{GeneratedService, Implementation, generate};
pub use decl::{FunctionClause, OpName, ServiceDecl, ServiceName, Visibility};
pub use error::{CallError, GenError, LogicFault, RunError};
pub use pool::PoolStatus;
pub use registry::Registry;
pub use reply::{BodyResult, Reply};
pub use spec::{Mode, PoolBounds, RestartPolicy, ServiceSpec};
pub use worker::{WorkerId, WorkerStatus};

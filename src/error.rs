use thiserror::Error;

use crate::decl::OpName;
use crate::registry::error::NameTaken;
use crate::spec::error::SpecError;

/// Conditions a call can surface to its caller.
///
/// These are the only failures crossing the service boundary; everything else
/// is recovered internally through worker restart.
#[derive(Debug, Error)]
pub enum CallError {
    /// Pool checkout could not be satisfied within the checkout timeout.
    /// Fully recoverable by retrying later.
    #[error("worker pool exhausted")]
    PoolExhausted,

    /// The caller gave up waiting for a reply. The in-flight call still
    /// completes and commits on the worker.
    #[error("call timed out waiting for a reply")]
    CallTimeout,

    /// The worker or service has terminated and its restart budget is spent,
    /// or it was stopped. Only a fresh `run` recovers from this.
    #[error("service unavailable")]
    ServiceUnavailable,

    /// No public clause with this name was declared, so no client function
    /// was generated for it.
    #[error("no declared operation '{0}'")]
    UnknownOperation(OpName),
}

/// Failure of an implementation function, isolated to the worker processing
/// it. A logic fault terminates that worker; state is never committed from a
/// faulted call.
#[derive(Debug, Clone, Error)]
pub enum LogicFault {
    /// No clause with this name exists in the implementation table.
    #[error("no clause named '{op}'")]
    UnknownClause { op: OpName },

    /// A clause used the set-state shorthand but the declaration carries no
    /// state-echo conversion.
    #[error("clause '{op}' set state without a reply and no state-echo conversion is declared")]
    MissingStateEcho { op: OpName },

    /// The clause body panicked.
    #[error("clause '{op}' panicked: {message}")]
    Panicked { op: OpName, message: String },
}

/// Failures while generating a service from its declaration.
#[derive(Debug, Error)]
pub enum GenError {
    /// The configuration violates a mode invariant.
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Two clauses share a name.
    #[error("duplicate clause '{0}'")]
    DuplicateClause(OpName),

    /// A service declares no public clause, leaving nothing to call.
    #[error("declaration has no public clauses")]
    NoPublicClauses,

    /// Named mode declared without wiring a registry into the declaration.
    #[error("named mode requires a registry wired into the declaration")]
    RegistryRequired,
}

/// Failures while starting a generated service.
#[derive(Debug, Error)]
pub enum RunError {
    /// The declared service name is already registered.
    #[error(transparent)]
    NameTaken(#[from] NameTaken),
}

use thiserror::Error;

use super::Mode;

/// Invariant violations in a service configuration, reported when a
/// declaration is generated.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Pooled mode declared without pool bounds.
    #[error("pooled mode requires pool bounds")]
    PoolBoundsRequired,

    /// Pool bounds declared for a mode that has no pool.
    #[error("pool bounds are only valid in pooled mode (declared mode: {mode})")]
    PoolBoundsForbidden { mode: Mode },

    /// A pool must keep at least one worker.
    #[error("pool minimum must be at least 1")]
    ZeroPoolMinimum,

    /// The declared minimum exceeds the declared maximum.
    #[error("pool minimum ({min}) exceeds maximum ({max})")]
    InvertedPoolBounds { min: usize, max: usize },

    /// Named mode declared without a service name.
    #[error("named mode requires a service name")]
    ServiceNameRequired,

    /// A service name declared for a mode that is not looked up by name.
    #[error("a service name is only valid in named mode (declared mode: {mode})")]
    ServiceNameForbidden { mode: Mode },
}

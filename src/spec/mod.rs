use std::fmt;
use std::time::Duration;

use bon::Builder;

use crate::decl::ServiceName;

pub mod error;

use self::error::SpecError;

/// Deployment shape selected for a generated service.
///
/// The mode decides what `run` wires around the pure implementation: nothing
/// at all, a single worker task (anonymous or registered under a name), or a
/// supervised pool of workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// No process. Calls invoke the implementation directly against a state
    /// value threaded by the caller.
    Inline,
    /// One worker task reached through the handle returned by `run`.
    Anonymous,
    /// One worker task registered in a [`Registry`](crate::registry::Registry)
    /// and looked up by name on every call.
    Named,
    /// A bounded pool of worker tasks with checkout/checkin per call.
    Pooled,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => write!(f, "inline"),
            Self::Anonymous => write!(f, "anonymous"),
            Self::Named => write!(f, "named"),
            Self::Pooled => write!(f, "pooled"),
        }
    }
}

/// Worker-count bounds for the pooled deployment shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolBounds {
    /// Workers kept alive even when idle.
    pub min: usize,
    /// Hard ceiling on simultaneously existing workers.
    pub max: usize,
}

/// Restart rate bound applied on abnormal worker termination: at most
/// `max_restarts` within a sliding `window`, after which the failure is fatal
/// to the whole service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 5,
            window: Duration::from_secs(30),
        }
    }
}

/// Configuration for one generated service.
///
/// Fixed at generation time; immutable thereafter. Invariants between the
/// mode and its mode-specific options are checked by [`validate`](Self::validate)
/// when the declaration is generated.
#[derive(Debug, Clone, Builder)]
pub struct ServiceSpec<S> {
    /// Deployment shape to wire at `run`.
    pub mode: Mode,

    /// State value a fresh worker starts from (also the baseline the
    /// supervisor restarts from).
    pub initial_state: S,

    /// Identifier the state value is bound to in diagnostics renderings.
    /// Purely presentational; there is no runtime counterpart.
    #[builder(into, default = "state".to_string())]
    pub state_name: String,

    /// Registry name for the named deployment shape.
    #[builder(into)]
    pub service_name: Option<ServiceName>,

    /// Worker-count bounds for the pooled deployment shape.
    pub pool: Option<PoolBounds>,

    /// Render the generated surface for inspection. No runtime effect.
    #[builder(default = false)]
    pub diagnostics: bool,

    /// How long a caller waits for a reply before giving up with a timeout.
    #[builder(default = Duration::from_secs(5))]
    pub call_timeout: Duration,

    /// How long a pooled call waits for a worker before failing as exhausted.
    #[builder(default = Duration::from_secs(5))]
    pub checkout_timeout: Duration,

    /// Idle time after which a surplus pooled worker may be retired.
    #[builder(default = Duration::from_secs(30))]
    pub idle_grace: Duration,

    /// Bound on each worker's FIFO mailbox.
    #[builder(default = 64)]
    pub mailbox_capacity: usize,

    /// Restart rate bound (see [`RestartPolicy`]).
    #[builder(default)]
    pub restart: RestartPolicy,
}

impl<S> ServiceSpec<S> {
    /// Check the invariants between the mode and its mode-specific options:
    /// pool bounds present iff pooled (with `1 <= min <= max`), service name
    /// present iff named.
    pub fn validate(&self) -> Result<(), SpecError> {
        match (self.mode, self.pool) {
            (Mode::Pooled, None) => return Err(SpecError::PoolBoundsRequired),
            (Mode::Pooled, Some(bounds)) => {
                if bounds.min == 0 {
                    return Err(SpecError::ZeroPoolMinimum);
                }
                if bounds.min > bounds.max {
                    return Err(SpecError::InvertedPoolBounds {
                        min: bounds.min,
                        max: bounds.max,
                    });
                }
            }
            (mode, Some(_)) => return Err(SpecError::PoolBoundsForbidden { mode }),
            (_, None) => {}
        }
        match (self.mode, &self.service_name) {
            (Mode::Named, None) => Err(SpecError::ServiceNameRequired),
            (Mode::Named, Some(_)) | (_, None) => Ok(()),
            (mode, Some(_)) => Err(SpecError::ServiceNameForbidden { mode }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = ServiceSpec::builder()
            .mode(Mode::Anonymous)
            .initial_state(0u64)
            .build();
        assert_eq!(spec.state_name, "state");
        assert_eq!(spec.mailbox_capacity, 64);
        assert_eq!(spec.call_timeout, Duration::from_secs(5));
        assert_eq!(spec.restart, RestartPolicy::default());
        assert!(!spec.diagnostics);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_pooled_requires_bounds() {
        let spec = ServiceSpec::builder()
            .mode(Mode::Pooled)
            .initial_state(0u64)
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::PoolBoundsRequired
        ));
    }

    #[test]
    fn test_pool_bounds_must_be_ordered_and_nonzero() {
        let spec = ServiceSpec::builder()
            .mode(Mode::Pooled)
            .initial_state(0u64)
            .pool(PoolBounds { min: 3, max: 2 })
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::InvertedPoolBounds { min: 3, max: 2 }
        ));

        let spec = ServiceSpec::builder()
            .mode(Mode::Pooled)
            .initial_state(0u64)
            .pool(PoolBounds { min: 0, max: 2 })
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::ZeroPoolMinimum
        ));
    }

    #[test]
    fn test_bounds_forbidden_outside_pooled_mode() {
        let spec = ServiceSpec::builder()
            .mode(Mode::Anonymous)
            .initial_state(0u64)
            .pool(PoolBounds { min: 1, max: 2 })
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::PoolBoundsForbidden { mode: Mode::Anonymous }
        ));
    }

    #[test]
    fn test_named_requires_service_name() {
        let spec = ServiceSpec::builder()
            .mode(Mode::Named)
            .initial_state(0u64)
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::ServiceNameRequired
        ));

        let spec = ServiceSpec::builder()
            .mode(Mode::Anonymous)
            .initial_state(0u64)
            .service_name("kv")
            .build();
        assert!(matches!(
            spec.validate().unwrap_err(),
            SpecError::ServiceNameForbidden { mode: Mode::Anonymous }
        ));
    }
}

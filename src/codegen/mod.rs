use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::client::{InlineService, ServiceClient, ServiceHandle};
use crate::decl::{ClauseBody, HelperFn, OpName, ServiceDecl, ServiceName};
use crate::error::{GenError, LogicFault, RunError};
use crate::pool::WorkerPool;
use crate::registry::Registry;
use crate::reply::{self, Reply};
use crate::spec::{Mode, PoolBounds, ServiceSpec};
use crate::supervisor::{self, RestartWindow};

pub mod diagnostics;

use self::diagnostics::ClauseSketch;

type ImplFn<S, A, R> = Arc<dyn Fn(&S, A) -> Result<Reply<R, S>, LogicFault> + Send + Sync>;

/// The pure core generated from a declaration: one implementation function
/// per public clause, dispatched by operation name, plus the private helper
/// table.
///
/// Implementation functions are referentially transparent — identical
/// `(state, args)` always yield the identical [`Reply`] — and perform no
/// process control. This is the designated seam for deterministic testing:
/// invoke it directly and no worker is involved.
pub struct Implementation<S, A, R> {
    ops: HashMap<OpName, ImplFn<S, A, R>, ahash::RandomState>,
    helpers: HashMap<OpName, HelperFn<A, R>, ahash::RandomState>,
}

impl<S, A, R> Implementation<S, A, R> {
    /// Invoke the implementation function generated for a public clause.
    pub fn invoke(&self, state: &S, op: &OpName, args: A) -> Result<Reply<R, S>, LogicFault> {
        let implementation = self
            .ops
            .get(op)
            .ok_or_else(|| LogicFault::UnknownClause { op: op.clone() })?;
        implementation(state, args)
    }

    /// Invoke a private helper clause. Helpers never touch state and are not
    /// reachable through workers.
    pub fn helper(&self, op: &OpName, args: A) -> Result<R, LogicFault> {
        let helper = self
            .helpers
            .get(op)
            .ok_or_else(|| LogicFault::UnknownClause { op: op.clone() })?;
        Ok(helper(args))
    }

    /// Whether a public clause with this name was declared.
    pub fn declares(&self, op: &OpName) -> bool {
        self.ops.contains_key(op)
    }

    /// Names of the generated public entry points.
    pub fn ops(&self) -> impl Iterator<Item = &OpName> {
        self.ops.keys()
    }
}

impl<S, A, R> fmt::Debug for Implementation<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("ops", &self.ops.len())
            .field("helpers", &self.helpers.len())
            .finish()
    }
}

enum Wiring<A, R> {
    Inline,
    Anonymous,
    Named {
        name: ServiceName,
        registry: Arc<Registry<A, R>>,
    },
    Pooled {
        bounds: PoolBounds,
    },
}

/// A generated service: the pure implementation table plus everything `run`
/// needs to wire the declared deployment shape around it.
pub struct GeneratedService<S, A, R> {
    implementation: Arc<Implementation<S, A, R>>,
    spec: ServiceSpec<S>,
    wiring: Wiring<A, R>,
    listing: Option<String>,
}

/// Generate the runtime artifacts for a declaration.
///
/// This is the second phase of the pipeline: it validates the configuration,
/// wraps every public clause body into a pure implementation function (the
/// declared state name survives only in diagnostics — at runtime the state is
/// simply the first parameter), and fixes the deployment wiring the declared
/// mode calls for. The declaration is consumed; the result is immutable.
pub fn generate<S, A, R>(decl: ServiceDecl<S, A, R>) -> Result<GeneratedService<S, A, R>, GenError>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    decl.spec().validate()?;
    let (spec, clauses, state_echo, registry) = decl.into_parts();

    let mut ops: HashMap<OpName, ImplFn<S, A, R>, ahash::RandomState> = HashMap::default();
    let mut helpers: HashMap<OpName, HelperFn<A, R>, ahash::RandomState> = HashMap::default();
    let mut sketches = Vec::with_capacity(clauses.len());

    for clause in clauses {
        if ops.contains_key(&clause.name) || helpers.contains_key(&clause.name) {
            return Err(GenError::DuplicateClause(clause.name));
        }
        sketches.push(ClauseSketch {
            name: clause.name.clone(),
            visibility: clause.visibility,
            params: clause.params,
        });
        match clause.body {
            ClauseBody::Stateful(body) => {
                let op = clause.name.clone();
                let echo = state_echo.clone();
                let implementation: ImplFn<S, A, R> = Arc::new(move |state, args| {
                    reply::translate(&op, body(state, args), echo.as_ref())
                });
                ops.insert(clause.name, implementation);
            }
            ClauseBody::Helper(body) => {
                helpers.insert(clause.name, body);
            }
        }
    }

    if ops.is_empty() {
        return Err(GenError::NoPublicClauses);
    }

    let wiring = match spec.mode {
        Mode::Inline => Wiring::Inline,
        Mode::Anonymous => Wiring::Anonymous,
        Mode::Named => Wiring::Named {
            name: spec
                .service_name
                .clone()
                .expect("named mode carries a service name"),
            registry: registry.ok_or(GenError::RegistryRequired)?,
        },
        Mode::Pooled => Wiring::Pooled {
            bounds: spec.pool.expect("pooled mode carries pool bounds"),
        },
    };

    let listing = spec.diagnostics.then(|| diagnostics::render(&spec, &sketches));
    if let Some(listing) = &listing {
        debug!(mode = %spec.mode, "generated service surface\n{listing}");
    }

    Ok(GeneratedService {
        implementation: Arc::new(Implementation { ops, helpers }),
        spec,
        wiring,
        listing,
    })
}

impl<S, A, R> GeneratedService<S, A, R>
where
    S: Clone + Send + Sync + 'static,
    A: Send + 'static,
    R: Send + 'static,
{
    /// The pure implementation table — the seam for deterministic tests.
    pub fn implementation(&self) -> Arc<Implementation<S, A, R>> {
        Arc::clone(&self.implementation)
    }

    /// The declared configuration.
    pub fn spec(&self) -> &ServiceSpec<S> {
        &self.spec
    }

    /// The rendered surface listing, when the declaration asked for
    /// diagnostics.
    pub fn diagnostics(&self) -> Option<&str> {
        self.listing.as_deref()
    }

    /// Start the service in its declared mode with the declared initial
    /// state.
    pub fn run(&self) -> Result<ServiceHandle<S, A, R>, RunError> {
        self.run_with(self.spec.initial_state.clone())
    }

    /// Start the service with an explicit initial state. The given state
    /// also becomes the baseline the supervisor restarts from. Inline mode
    /// has no process to seed; its callers thread state per call.
    pub fn run_with(&self, state: S) -> Result<ServiceHandle<S, A, R>, RunError> {
        match &self.wiring {
            Wiring::Inline => Ok(ServiceHandle::Inline(InlineService::new(
                self.implementation(),
            ))),
            Wiring::Anonymous => {
                let slot = supervisor::spawn_supervised(
                    self.implementation(),
                    state,
                    self.spec.mailbox_capacity,
                    self.spec.restart,
                    None,
                );
                info!(mode = %Mode::Anonymous, "service running");
                Ok(ServiceHandle::Server(ServiceClient::direct(
                    self.implementation(),
                    slot,
                    self.spec.call_timeout,
                )))
            }
            Wiring::Named { name, registry } => {
                let slot = supervisor::spawn_supervised(
                    self.implementation(),
                    state,
                    self.spec.mailbox_capacity,
                    self.spec.restart,
                    Some((name.clone(), Arc::clone(registry))),
                );
                if let Err(taken) = registry.register(name.clone(), Arc::clone(&slot)) {
                    slot.handle().stop_now();
                    return Err(RunError::NameTaken(taken));
                }
                info!(mode = %Mode::Named, service = %name, "service running");
                Ok(ServiceHandle::Server(ServiceClient::named(
                    self.implementation(),
                    Arc::clone(registry),
                    name.clone(),
                    self.spec.call_timeout,
                )))
            }
            Wiring::Pooled { bounds } => {
                let pool = WorkerPool::start(
                    self.implementation(),
                    state,
                    *bounds,
                    self.spec.mailbox_capacity,
                    self.spec.checkout_timeout,
                    self.spec.idle_grace,
                    RestartWindow::new(self.spec.restart),
                );
                info!(mode = %Mode::Pooled, min = bounds.min, max = bounds.max, "service running");
                Ok(ServiceHandle::Server(ServiceClient::pooled(
                    self.implementation(),
                    Arc::new(pool),
                    self.spec.call_timeout,
                )))
            }
        }
    }
}

impl<S, A, R> fmt::Debug for GeneratedService<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedService")
            .field("mode", &self.spec.mode)
            .field("implementation", &self.implementation)
            .finish_non_exhaustive()
    }
}

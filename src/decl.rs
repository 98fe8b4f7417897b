use std::fmt;
use std::sync::Arc;

use crate::registry::Registry;
use crate::reply::BodyResult;
use crate::spec::ServiceSpec;

/// Name of a declared operation.
///
/// Operation names key the generated dispatch table and appear in the client
/// call API. Cheap to clone and hashable.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpName(Arc<str>);

impl OpName {
    /// Create a new [`OpName`] from any type that can be converted into an `Arc<str>`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OpName {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for OpName {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Name under which a service is registered for the named deployment shape.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    /// Create a new [`ServiceName`] from any type that can be converted into an `Arc<str>`.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    /// Returns the underlying string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

/// Whether a clause is part of the generated client API or a private helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// A public clause body: a pure function of the current state and the call
/// arguments, ending in a [`BodyResult`].
pub type StatefulFn<S, A, R> = Arc<dyn Fn(&S, A) -> BodyResult<S, R> + Send + Sync>;

/// A private helper clause body. Helpers take only their own arguments and
/// are not state-entry points.
pub type HelperFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// Conversion used when a clause sets state without naming a reply: produces
/// the reply value that stands in for the new state.
pub type StateEchoFn<S, R> = Arc<dyn Fn(&S) -> R + Send + Sync>;

/// The body of a declared function clause.
pub enum ClauseBody<S, A, R> {
    /// Operates on the state value threaded as its first parameter.
    Stateful(StatefulFn<S, A, R>),
    /// A helper with no state parameter.
    Helper(HelperFn<A, R>),
}

/// One declared function clause: a name, its visibility, its parameter names
/// (used only when rendering diagnostics), and its body.
pub struct FunctionClause<S, A, R> {
    pub name: OpName,
    pub visibility: Visibility,
    pub params: Vec<String>,
    pub body: ClauseBody<S, A, R>,
}

impl<S, A, R> fmt::Debug for FunctionClause<S, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionClause")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("params", &self.params)
            .field("body", &"<fn>")
            .finish()
    }
}

/// The raw declaration of a service: its configuration plus the function
/// clauses written against an explicit state value.
///
/// A declaration is consumed by [`generate`](crate::codegen::generate), which
/// produces the pure implementation table and the wiring for the declared
/// deployment shape. Clauses registered here keep their declaration order.
pub struct ServiceDecl<S, A, R> {
    spec: ServiceSpec<S>,
    clauses: Vec<FunctionClause<S, A, R>>,
    state_echo: Option<StateEchoFn<S, R>>,
    registry: Option<Arc<Registry<A, R>>>,
}

impl<S, A, R> ServiceDecl<S, A, R> {
    /// Begin a declaration from its configuration.
    pub fn new(spec: ServiceSpec<S>) -> Self {
        Self {
            spec,
            clauses: Vec::new(),
            state_echo: None,
            registry: None,
        }
    }

    /// Declare a public clause. The body receives the current state as its
    /// first parameter and the call arguments as its second; `params` names
    /// the arguments for diagnostics rendering (the state parameter is
    /// implied and rendered under the declared state name).
    pub fn clause(
        mut self,
        name: impl Into<OpName>,
        params: &[&str],
        body: impl Fn(&S, A) -> BodyResult<S, R> + Send + Sync + 'static,
    ) -> Self {
        self.clauses.push(FunctionClause {
            name: name.into(),
            visibility: Visibility::Public,
            params: params.iter().map(|p| (*p).to_string()).collect(),
            body: ClauseBody::Stateful(Arc::new(body)),
        });
        self
    }

    /// Declare a private helper clause. Helpers are kept out of the client
    /// API and never touch state; they are invocable directly on the
    /// generated implementation.
    pub fn helper(
        mut self,
        name: impl Into<OpName>,
        params: &[&str],
        body: impl Fn(A) -> R + Send + Sync + 'static,
    ) -> Self {
        self.clauses.push(FunctionClause {
            name: name.into(),
            visibility: Visibility::Private,
            params: params.iter().map(|p| (*p).to_string()).collect(),
            body: ClauseBody::Helper(Arc::new(body)),
        });
        self
    }

    /// Declare the state-echo conversion used by the set-state-and-return-it
    /// shorthand ([`BodyResult::Set`]).
    pub fn state_echo(mut self, echo: impl Fn(&S) -> R + Send + Sync + 'static) -> Self {
        self.state_echo = Some(Arc::new(echo));
        self
    }

    /// Wire the registry a named service registers itself in at `run`.
    pub fn registry(mut self, registry: Arc<Registry<A, R>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// The declared configuration.
    pub fn spec(&self) -> &ServiceSpec<S> {
        &self.spec
    }

    /// The declared clauses, in declaration order.
    pub fn clauses(&self) -> &[FunctionClause<S, A, R>] {
        &self.clauses
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        ServiceSpec<S>,
        Vec<FunctionClause<S, A, R>>,
        Option<StateEchoFn<S, R>>,
        Option<Arc<Registry<A, R>>>,
    ) {
        (self.spec, self.clauses, self.state_echo, self.registry)
    }
}

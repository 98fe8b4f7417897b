use super::ServiceName;

/// Indicates that a service could not be registered because the name is
/// already in use.
#[derive(Debug, thiserror::Error)]
#[error("a service is already registered under '{name}'")]
pub struct NameTaken {
    pub name: ServiceName,
}

/// Indicates that no service is registered under the requested name.
#[derive(Debug, thiserror::Error)]
#[error("no service registered under '{name}'")]
pub struct NameNotFound {
    pub name: ServiceName,
}

use proven_registry::{RegistryError, RegistryErrorKind};
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The client was closed.
    #[error("registry client closed")]
    Closed,

    /// None of the client's endpoints is reachable.
    #[error("not connected to any of {0}")]
    NotConnected(String),

    /// A create targeted an existing path.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// A delete targeted a missing path.
    #[error("no node: {0}")]
    NoNode(String),

    /// The connection URL named no endpoints.
    #[error("invalid connection url: {0:?}")]
    InvalidUrl(String),

    /// A failure injected through `MemoryConnector::fail_next_transaction`.
    #[error("injected transaction failure")]
    Injected,
}

impl RegistryError for Error {
    fn kind(&self) -> RegistryErrorKind {
        match self {
            Self::Closed => RegistryErrorKind::Closed,
            Self::NotConnected(_) => RegistryErrorKind::NotConnected,
            Self::NodeExists(_) => RegistryErrorKind::NodeExists,
            Self::NoNode(_) => RegistryErrorKind::NoNode,
            Self::InvalidUrl(_) | Self::Injected => RegistryErrorKind::Other,
        }
    }
}

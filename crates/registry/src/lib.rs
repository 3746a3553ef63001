//! Abstract interface for the hierarchical, transactional registry an ensemble
//! serves to the rest of the fleet.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod path;
mod transaction;

pub use path::child_path;
pub use transaction::{Operation, Transaction};

use std::error::Error;
use std::fmt::{self, Debug, Display};

use async_trait::async_trait;
use bytes::Bytes;

/// The kind of registry error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RegistryErrorKind {
    /// The client has no live session with the ensemble.
    NotConnected,

    /// The client was closed and can no longer be used.
    Closed,

    /// A create operation targeted a path that already exists.
    NodeExists,

    /// An operation targeted a path that does not exist.
    NoNode,

    /// Other/unknown error
    Other,
}

impl Display for RegistryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Marker trait for `RegistryClient` errors
pub trait RegistryError: Debug + Error + Send + Sync + 'static {
    /// Returns the kind of this error
    fn kind(&self) -> RegistryErrorKind;
}

/// A live session against one ensemble's registry.
///
/// Paths are absolute and `/`-separated. Values are opaque bytes; a path may
/// exist without a value when it only has descendants.
#[async_trait]
pub trait RegistryClient
where
    Self: Clone + Send + Sync + 'static,
{
    /// The error type for this client.
    type Error: RegistryError;

    /// Reads the value stored at `path`, if any.
    async fn read(&self, path: &str) -> Result<Option<Bytes>, Self::Error>;

    /// Returns true if `path` holds a value or has descendants.
    async fn exists(&self, path: &str) -> Result<bool, Self::Error>;

    /// Lists the names (not full paths) of the immediate children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error>;

    /// Applies every operation of `transaction` atomically, or none of them.
    async fn transaction(&self, transaction: Transaction) -> Result<(), Self::Error>;

    /// Returns true while the session is established.
    async fn is_connected(&self) -> bool;

    /// Closes the session. Further calls fail with [`RegistryErrorKind::Closed`].
    fn close(&self);
}

/// Opens sessions against ensembles by connection URL.
#[async_trait]
pub trait RegistryConnector
where
    Self: Clone + Send + Sync + 'static,
{
    /// The client type handed out by this connector.
    type Client: RegistryClient;

    /// Opens a session against the ensemble reachable at `url`
    /// (comma-separated `host:port` endpoints) using the ensemble `password`.
    ///
    /// The returned client may not be connected yet; callers wait on
    /// [`RegistryClient::is_connected`].
    async fn connect(
        &self,
        url: &str,
        password: &str,
    ) -> Result<Self::Client, <Self::Client as RegistryClient>::Error>;
}

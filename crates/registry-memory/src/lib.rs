//! In-memory (single process) implementation of the ensemble registry for
//! local development and tests.
//!
//! Each ensemble is a flat map of absolute paths to values. Connecting with a
//! URL resolves to the newest ensemble already serving any of the URL's
//! endpoints, and that ensemble then also answers on the remaining endpoints.
//! A URL sharing no endpoint with an existing ensemble starts a new, empty
//! one. Digest authentication is not enforced.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use proven_registry::{Operation, RegistryClient, RegistryConnector, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

type Tree = Arc<Mutex<BTreeMap<String, Bytes>>>;

#[derive(Debug)]
struct Ensemble {
    endpoints: HashSet<String>,
    tree: Tree,
}

/// Hands out [`MemoryRegistry`] sessions against in-memory ensembles.
#[derive(Clone, Debug, Default)]
pub struct MemoryConnector {
    ensembles: Arc<Mutex<Vec<Ensemble>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    fail_next_transaction: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Creates a connector with no ensembles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `endpoint` (`host:port`) reachable or unreachable.
    pub async fn set_reachable<S: Into<String>>(&self, endpoint: S, reachable: bool) {
        let endpoint = endpoint.into();
        let mut unreachable = self.unreachable.lock().await;
        if reachable {
            unreachable.remove(&endpoint);
        } else {
            unreachable.insert(endpoint);
        }
    }

    /// Makes the next transaction committed through any session fail.
    pub fn fail_next_transaction(&self) {
        self.fail_next_transaction.store(true, Ordering::SeqCst);
    }

    /// The number of distinct ensembles created so far.
    pub async fn ensemble_count(&self) -> usize {
        self.ensembles.lock().await.len()
    }

    /// Sessions against every ensemble, newest first.
    pub async fn registries(&self) -> Vec<MemoryRegistry> {
        let ensembles = self.ensembles.lock().await;
        ensembles
            .iter()
            .rev()
            .map(|ensemble| {
                let mut endpoints: Vec<_> = ensemble.endpoints.iter().cloned().collect();
                endpoints.sort();
                MemoryRegistry::new(self.clone(), Arc::clone(&ensemble.tree), endpoints)
            })
            .collect()
    }
}

#[async_trait]
impl RegistryConnector for MemoryConnector {
    type Client = MemoryRegistry;

    async fn connect(&self, url: &str, _password: &str) -> Result<MemoryRegistry, Error> {
        let endpoints: Vec<String> = url
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(ToString::to_string)
            .collect();

        if endpoints.is_empty() {
            return Err(Error::InvalidUrl(url.to_string()));
        }

        let mut ensembles = self.ensembles.lock().await;
        let existing = ensembles
            .iter()
            .rposition(|ensemble| endpoints.iter().any(|e| ensemble.endpoints.contains(e)));

        let tree = if let Some(index) = existing {
            let ensemble = &mut ensembles[index];
            ensemble.endpoints.extend(endpoints.iter().cloned());
            Arc::clone(&ensemble.tree)
        } else {
            debug!("Starting new in-memory ensemble at {}", url);
            let tree = Tree::default();
            ensembles.push(Ensemble {
                endpoints: endpoints.iter().cloned().collect(),
                tree: Arc::clone(&tree),
            });
            tree
        };

        Ok(MemoryRegistry::new(self.clone(), tree, endpoints))
    }
}

/// A session against one in-memory ensemble.
#[derive(Clone, Debug)]
pub struct MemoryRegistry {
    connector: MemoryConnector,
    tree: Tree,
    endpoints: Vec<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryRegistry {
    fn new(connector: MemoryConnector, tree: Tree, endpoints: Vec<String>) -> Self {
        Self {
            connector,
            tree,
            endpoints,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns true once [`RegistryClient::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The endpoints this session was opened with.
    #[must_use]
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        if self.is_connected().await {
            Ok(())
        } else {
            Err(Error::NotConnected(self.endpoints.join(",")))
        }
    }
}

fn descendant_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path.trim_end_matches('/'))
    }
}

fn apply(tree: &mut BTreeMap<String, Bytes>, operation: Operation) -> Result<(), Error> {
    match operation {
        Operation::Create { path, data } => {
            if tree.contains_key(&path) {
                return Err(Error::NodeExists(path));
            }
            tree.insert(path, data);
        }
        Operation::Write { path, data } => {
            tree.insert(path, data);
        }
        Operation::Delete { path } => {
            if tree.remove(&path).is_none() {
                return Err(Error::NoNode(path));
            }
        }
    }

    Ok(())
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    type Error = Error;

    async fn read(&self, path: &str) -> Result<Option<Bytes>, Self::Error> {
        self.ensure_connected().await?;
        Ok(self.tree.lock().await.get(path).cloned())
    }

    async fn exists(&self, path: &str) -> Result<bool, Self::Error> {
        self.ensure_connected().await?;
        let tree = self.tree.lock().await;
        let prefix = descendant_prefix(path);
        Ok(tree.contains_key(path) || tree.keys().any(|key| key.starts_with(&prefix)))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, Self::Error> {
        self.ensure_connected().await?;
        let tree = self.tree.lock().await;
        let prefix = descendant_prefix(path);

        let children: BTreeSet<String> = tree
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(children.into_iter().collect())
    }

    async fn transaction(&self, transaction: Transaction) -> Result<(), Self::Error> {
        self.ensure_connected().await?;

        if self
            .connector
            .fail_next_transaction
            .swap(false, Ordering::SeqCst)
        {
            return Err(Error::Injected);
        }

        let mut tree = self.tree.lock().await;
        let mut scratch = tree.clone();
        for operation in transaction {
            apply(&mut scratch, operation)?;
        }
        *tree = scratch;

        Ok(())
    }

    async fn is_connected(&self) -> bool {
        if self.is_closed() {
            return false;
        }

        let unreachable = self.connector.unreachable.lock().await;
        self.endpoints
            .iter()
            .any(|endpoint| !unreachable.contains(endpoint))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

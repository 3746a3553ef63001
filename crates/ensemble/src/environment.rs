//! The collaborators a reconfiguration runs against

use proven_fleet::{HealthChannel, NodeInventory, ProfileRegistry};
use proven_registry::RegistryConnector;

/// Registry session type of an [`Environment`]
pub type ClientOf<E> = <<E as Environment>::Connector as RegistryConnector>::Client;

/// Bundles the four collaborator interfaces the engine is injected with
pub trait Environment
where
    Self: Clone + Send + Sync + 'static,
{
    /// Opens registry sessions
    type Connector: RegistryConnector;

    /// Lists fleet nodes and their liveness
    type Inventory: NodeInventory;

    /// Reports which ensemble each node follows
    type Health: HealthChannel;

    /// Stores cluster and member profiles
    type Profiles: ProfileRegistry;

    /// The registry connector
    fn connector(&self) -> &Self::Connector;

    /// The node inventory
    fn inventory(&self) -> &Self::Inventory;

    /// The health channel
    fn health(&self) -> &Self::Health;

    /// The profile registry
    fn profiles(&self) -> &Self::Profiles;
}

/// The default [`Environment`]: one value per collaborator
#[derive(Clone, Debug)]
pub struct Collaborators<R, I, H, P> {
    connector: R,
    inventory: I,
    health: H,
    profiles: P,
}

impl<R, I, H, P> Collaborators<R, I, H, P>
where
    R: RegistryConnector,
    I: NodeInventory,
    H: HealthChannel,
    P: ProfileRegistry,
{
    /// Bundle the collaborators
    pub const fn new(connector: R, inventory: I, health: H, profiles: P) -> Self {
        Self {
            connector,
            inventory,
            health,
            profiles,
        }
    }
}

impl<R, I, H, P> Environment for Collaborators<R, I, H, P>
where
    R: RegistryConnector,
    I: NodeInventory,
    H: HealthChannel,
    P: ProfileRegistry,
{
    type Connector = R;
    type Inventory = I;
    type Health = H;
    type Profiles = P;

    fn connector(&self) -> &R {
        &self.connector
    }

    fn inventory(&self) -> &I {
        &self.inventory
    }

    fn health(&self) -> &H {
        &self.health
    }

    fn profiles(&self) -> &P {
        &self.profiles
    }
}

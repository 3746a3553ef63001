use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use proven_fleet::{Profile, ProfileRegistry};
use tokio::sync::RwLock;

use crate::Error;

/// In-memory profile registry.
#[derive(Clone, Debug, Default)]
pub struct MockProfiles {
    profiles: Arc<RwLock<HashMap<(String, String), Profile>>>,
}

impl MockProfiles {
    /// Create an empty profile registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// IDs of every profile in `version`, sorted.
    pub async fn profile_ids(&self, version: &str) -> Vec<String> {
        let mut ids: Vec<_> = self
            .profiles
            .read()
            .await
            .keys()
            .filter(|(v, _)| v == version)
            .map(|(_, id)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ProfileRegistry for MockProfiles {
    type Error = Error;

    async fn create_profile(&self, version: &str, profile: Profile) -> Result<(), Self::Error> {
        let mut profiles = self.profiles.write().await;
        let key = (version.to_string(), profile.id.clone());

        if profiles.contains_key(&key) {
            return Err(Error::ProfileExists {
                version: key.0,
                id: key.1,
            });
        }

        profiles.insert(key, profile);
        Ok(())
    }

    async fn has_profile(&self, version: &str, id: &str) -> Result<bool, Self::Error> {
        Ok(self
            .profiles
            .read()
            .await
            .contains_key(&(version.to_string(), id.to_string())))
    }

    async fn get_required_profile(&self, version: &str, id: &str) -> Result<Profile, Self::Error> {
        self.profiles
            .read()
            .await
            .get(&(version.to_string(), id.to_string()))
            .cloned()
            .ok_or_else(|| Error::ProfileNotFound {
                version: version.to_string(),
                id: id.to_string(),
            })
    }
}

//! Profile definitions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A versioned configuration bundle assignable to nodes.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The profile ID, unique within a version.
    pub id: String,

    /// IDs of the profiles this one inherits from.
    pub parents: Vec<String>,

    /// Descriptive attributes of the profile.
    pub attributes: BTreeMap<String, String>,

    /// The configuration the profile applies to a node.
    pub configuration: BTreeMap<String, String>,
}

impl Profile {
    /// Create an empty profile
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Add a parent profile
    #[must_use]
    pub fn with_parent<S: Into<String>>(mut self, parent: S) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Replace the attributes
    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_configuration(mut self, configuration: BTreeMap<String, String>) -> Self {
        self.configuration = configuration;
        self
    }

    /// Get an attribute value
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

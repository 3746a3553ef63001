use serde::Deserialize;

/// Node definition in the fleet file
#[derive(Debug, Deserialize)]
pub struct ConfigNode {
    pub id: String,
    pub address: String,
    #[serde(default = "default_alive")]
    pub alive: bool,
}

const fn default_alive() -> bool {
    true
}

/// Fleet file
#[derive(Debug, Deserialize)]
pub struct Config {
    pub nodes: Vec<ConfigNode>,
}

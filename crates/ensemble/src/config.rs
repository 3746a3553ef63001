//! Ensemble-wide options
//!
//! These tune the ensemble servers themselves (tick time, limits, storage
//! directories), carry the shared secret clients authenticate with, and
//! bound every wait a reconfiguration performs.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleResult, Error};

/// Default tick time in milliseconds
pub const DEFAULT_TICK_TIME: u32 = 2000;

/// Default number of ticks a follower may take to connect and sync
pub const DEFAULT_INIT_LIMIT: u32 = 10;

/// Default number of ticks a follower may lag behind the leader
pub const DEFAULT_SYNC_LIMIT: u32 = 5;

/// Default bound on every reconfiguration wait
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default interval between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default delay between node switches during a rolling remove
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

const GENERATED_PASSWORD_LENGTH: usize = 24;

/// Options for an ensemble and for the reconfigurations applied to it
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleOptions {
    /// Basic time unit of the ensemble servers, in milliseconds
    pub tick_time: u32,
    /// Ticks allowed for followers to connect and sync to the leader
    pub init_limit: u32,
    /// Ticks allowed for followers to lag behind the leader
    pub sync_limit: u32,
    /// Root of the snapshot directories; each cluster identity gets its own
    pub data_dir: String,
    /// Separate transaction log directory, if any
    pub data_log_dir: Option<String>,
    /// Shared secret clients authenticate to the ensemble with
    pub password: Option<String>,
    /// Bound on every wait loop of a reconfiguration
    pub migration_timeout: Duration,
    /// Interval between polls within a wait loop
    pub poll_interval: Duration,
    /// Pause between consecutive node switches of a rolling remove
    pub settle_delay: Duration,
    /// Profile version under which node profile sets are kept
    pub version: String,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            tick_time: DEFAULT_TICK_TIME,
            init_limit: DEFAULT_INIT_LIMIT,
            sync_limit: DEFAULT_SYNC_LIMIT,
            data_dir: "data/ensemble".to_string(),
            data_log_dir: None,
            password: None,
            migration_timeout: DEFAULT_MIGRATION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_delay: DEFAULT_SETTLE_DELAY,
            version: "1.0".to_string(),
        }
    }
}

impl fmt::Debug for EnsembleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleOptions")
            .field("tick_time", &self.tick_time)
            .field("init_limit", &self.init_limit)
            .field("sync_limit", &self.sync_limit)
            .field("data_dir", &self.data_dir)
            .field("data_log_dir", &self.data_log_dir)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("migration_timeout", &self.migration_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("settle_delay", &self.settle_delay)
            .field("version", &self.version)
            .finish()
    }
}

impl EnsembleOptions {
    /// Check the options are usable
    ///
    /// # Errors
    ///
    /// Returns `InvalidArguments` for zero limits, zero durations, an empty
    /// data directory or an empty password.
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.tick_time == 0 || self.init_limit == 0 || self.sync_limit == 0 {
            return Err(Error::InvalidArguments(
                "tick time, init limit and sync limit must be positive".to_string(),
            ));
        }

        if self.migration_timeout.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::InvalidArguments(
                "migration timeout and poll interval must be positive".to_string(),
            ));
        }

        if self.data_dir.trim().is_empty() {
            return Err(Error::InvalidArguments("data dir must be set".to_string()));
        }

        if self.version.trim().is_empty() {
            return Err(Error::InvalidArguments(
                "profile version must be set".to_string(),
            ));
        }

        if self.password.as_deref().is_some_and(str::is_empty) {
            return Err(Error::InvalidArguments(
                "password must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Return a copy carrying `password`
    #[must_use]
    pub fn with_password<S: Into<String>>(mut self, password: S) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Generate a random ensemble password
#[must_use]
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Builder for EnsembleOptions
pub struct EnsembleOptionsBuilder {
    options: EnsembleOptions,
}

impl EnsembleOptionsBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            options: EnsembleOptions::default(),
        }
    }

    /// Set the tick time in milliseconds
    #[must_use]
    pub const fn tick_time(mut self, tick_time: u32) -> Self {
        self.options.tick_time = tick_time;
        self
    }

    /// Set the init limit
    #[must_use]
    pub const fn init_limit(mut self, init_limit: u32) -> Self {
        self.options.init_limit = init_limit;
        self
    }

    /// Set the sync limit
    #[must_use]
    pub const fn sync_limit(mut self, sync_limit: u32) -> Self {
        self.options.sync_limit = sync_limit;
        self
    }

    /// Set the data directory root
    #[must_use]
    pub fn data_dir<S: Into<String>>(mut self, data_dir: S) -> Self {
        self.options.data_dir = data_dir.into();
        self
    }

    /// Set the transaction log directory
    #[must_use]
    pub fn data_log_dir<S: Into<String>>(mut self, data_log_dir: S) -> Self {
        self.options.data_log_dir = Some(data_log_dir.into());
        self
    }

    /// Set the ensemble password
    #[must_use]
    pub fn password<S: Into<String>>(mut self, password: S) -> Self {
        self.options.password = Some(password.into());
        self
    }

    /// Set the migration timeout
    #[must_use]
    pub const fn migration_timeout(mut self, timeout: Duration) -> Self {
        self.options.migration_timeout = timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Set the rolling-remove settle delay
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.options.settle_delay = delay;
        self
    }

    /// Set the profile version
    #[must_use]
    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.options.version = version.into();
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> EnsembleOptions {
        self.options
    }
}

impl Default for EnsembleOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration of the job controller and the maintainer.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use berth_core::{PlatformVersion, SystemName, ZoneId};

/// Configuration of the [`crate::controller::JobController`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// The maximum number of finished runs kept per application and job type.
    pub history_length: usize,
    /// The maximum age of a kept finished run.
    #[serde(with = "humantime_serde")]
    pub max_history_age: Duration,
    /// The wall-clock timeout of lock acquisitions.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            history_length: 256,
            max_history_age: Duration::from_secs(60 * 24 * 60 * 60),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration of the [`crate::runner::JobRunner`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunnerConfig {
    /// How long a run may stay `running` before it is aborted.
    #[serde(with = "humantime_serde")]
    pub job_timeout: Duration,
    /// The size of the worker pool executing step tasks.
    pub workers: usize,
    /// The interval between maintenance ticks.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(24 * 60 * 60),
            workers: 32,
            tick_interval: Duration::from_secs(90),
        }
    }
}

/// What the controller knows about the zones of its system: the system name,
/// the current platform version, and per-zone deployment TTLs.
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    system: SystemName,
    system_version: PlatformVersion,
    deployment_ttls: HashMap<ZoneId, Duration>,
}

impl ZoneRegistry {
    /// Creates a zone registry for the given system and platform version.
    #[must_use]
    pub fn new(system: SystemName, system_version: PlatformVersion) -> Self {
        Self {
            system,
            system_version,
            deployment_ttls: HashMap::new(),
        }
    }

    /// Sets the deployment TTL of a zone. Deployments there expire after the
    /// TTL and are removed by the platform.
    #[must_use]
    pub fn with_deployment_ttl(mut self, zone: ZoneId, ttl: Duration) -> Self {
        self.deployment_ttls.insert(zone, ttl);
        self
    }

    /// Returns the system this controller runs in.
    #[must_use]
    pub const fn system(&self) -> SystemName {
        self.system
    }

    /// Returns the current platform version of the system.
    #[must_use]
    pub const fn system_version(&self) -> &PlatformVersion {
        &self.system_version
    }

    /// Returns the deployment TTL of the given zone, if it has one.
    #[must_use]
    pub fn deployment_ttl(&self, zone: &ZoneId) -> Option<Duration> {
        self.deployment_ttls.get(zone).copied()
    }
}

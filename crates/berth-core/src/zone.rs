//! Zones, environments, and system names.
//!
//! A zone is a named deployment target, `environment × region`. Applications
//! are deployed to zones; the deployment job runner drives one job per zone.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// The platform version an application runs on.
pub type PlatformVersion = semver::Version;

/// The environments applications can be deployed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// System test environment.
    Test,
    /// Staging test environment.
    Staging,
    /// Production.
    Prod,
    /// Manually deployed development environment.
    Dev,
    /// Manually deployed performance test environment.
    Perf,
}

impl Environment {
    /// Returns whether this is the production environment.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Prod)
    }

    /// Returns whether this environment is used for automated testing.
    #[must_use]
    pub const fn is_test(self) -> bool {
        matches!(self, Self::Test | Self::Staging)
    }

    /// Returns whether deployments to this environment are made directly by
    /// users rather than by the deployment pipeline.
    #[must_use]
    pub const fn is_manually_deployed(self) -> bool {
        matches!(self, Self::Dev | Self::Perf)
    }

    /// Returns the lowercase name of this environment.
    #[must_use]
    pub const fn value(self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Staging => "staging",
            Self::Prod => "prod",
            Self::Dev => "dev",
            Self::Perf => "perf",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(Self::Test),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            "dev" => Ok(Self::Dev),
            "perf" => Ok(Self::Perf),
            _ => Err(Error::InvalidId {
                message: format!("unknown environment '{s}'"),
            }),
        }
    }
}

/// A deployment target: `environment × region`.
///
/// The value form is `"<environment>.<region>"`, e.g. `"prod.us-east-3"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ZoneId {
    environment: Environment,
    region: String,
}

impl ZoneId {
    /// Creates a zone id from an environment and a region name.
    #[must_use]
    pub fn new(environment: Environment, region: impl Into<String>) -> Self {
        Self {
            environment,
            region: region.into(),
        }
    }

    /// Returns the environment of this zone.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// Returns the region of this zone.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Returns the value form, `"<environment>.<region>"`.
    #[must_use]
    pub fn value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.environment, self.region)
    }
}

impl FromStr for ZoneId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((environment, region)) if !region.is_empty() => {
                Ok(Self::new(environment.parse()?, region))
            }
            _ => Err(Error::InvalidId {
                message: format!("expected '<environment>.<region>', got '{s}'"),
            }),
        }
    }
}

impl Serialize for ZoneId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ZoneId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The name of the system a controller runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemName {
    /// The main system.
    Main,
    /// The continuous deployment system, where controller changes are staged.
    Cd,
    /// The publicly available system.
    Public,
    /// The continuous deployment environment of the public system.
    PublicCd,
}

impl SystemName {
    /// Returns whether this system serves the public.
    #[must_use]
    pub const fn is_public(self) -> bool {
        matches!(self, Self::Public | Self::PublicCd)
    }

    /// Returns the lowercase name of this system.
    #[must_use]
    pub const fn value(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Cd => "cd",
            Self::Public => "public",
            Self::PublicCd => "publiccd",
        }
    }
}

impl fmt::Display for SystemName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

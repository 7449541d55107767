//! The fixed set of deployment jobs.
//!
//! Each job type binds a deployment-and-test activity to a zone and to a
//! profile of steps (see [`crate::profile::JobProfile`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use berth_core::{Environment, Error, SystemName, ZoneId};

/// A named deployment-and-test activity bound to a zone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    /// Functional tests of a new submission, against its test package.
    SystemTest,
    /// Upgrade tests: stage the current deployment, then move to the target.
    StagingTest,
    /// Production rollout in us-east-3.
    ProductionUsEast3,
    /// Production rollout in us-west-1.
    ProductionUsWest1,
    /// Production rollout in us-central-1.
    ProductionUsCentral1,
    /// Production rollout in ap-northeast-1.
    ProductionApNortheast1,
    /// Manual development deployments in us-east-1.
    DevUsEast1,
    /// Manual performance test deployments in us-east-3.
    PerfUsEast3,
}

impl JobType {
    /// All job types, in presentation order.
    pub const ALL: [Self; 8] = [
        Self::SystemTest,
        Self::StagingTest,
        Self::ProductionUsEast3,
        Self::ProductionUsWest1,
        Self::ProductionUsCentral1,
        Self::ProductionApNortheast1,
        Self::DevUsEast1,
        Self::PerfUsEast3,
    ];

    /// Returns the environment this job deploys to.
    #[must_use]
    pub const fn environment(self) -> Environment {
        match self {
            Self::SystemTest => Environment::Test,
            Self::StagingTest => Environment::Staging,
            Self::ProductionUsEast3
            | Self::ProductionUsWest1
            | Self::ProductionUsCentral1
            | Self::ProductionApNortheast1 => Environment::Prod,
            Self::DevUsEast1 => Environment::Dev,
            Self::PerfUsEast3 => Environment::Perf,
        }
    }

    /// Returns the zone this job deploys to in the given system.
    ///
    /// All systems currently share the same region layout.
    #[must_use]
    pub fn zone(self, _system: SystemName) -> ZoneId {
        let region = match self {
            Self::SystemTest | Self::DevUsEast1 => "us-east-1",
            Self::StagingTest | Self::ProductionUsEast3 | Self::PerfUsEast3 => "us-east-3",
            Self::ProductionUsWest1 => "us-west-1",
            Self::ProductionUsCentral1 => "us-central-1",
            Self::ProductionApNortheast1 => "ap-northeast-1",
        };
        ZoneId::new(self.environment(), region)
    }

    /// Returns whether this job deploys to production.
    #[must_use]
    pub const fn is_production(self) -> bool {
        self.environment().is_production()
    }

    /// Returns whether this job is an automated test job.
    #[must_use]
    pub const fn is_test(self) -> bool {
        self.environment().is_test()
    }

    /// Returns the camelCase name of this job, as used in persisted documents.
    #[must_use]
    pub const fn job_name(self) -> &'static str {
        match self {
            Self::SystemTest => "systemTest",
            Self::StagingTest => "stagingTest",
            Self::ProductionUsEast3 => "productionUsEast3",
            Self::ProductionUsWest1 => "productionUsWest1",
            Self::ProductionUsCentral1 => "productionUsCentral1",
            Self::ProductionApNortheast1 => "productionApNortheast1",
            Self::DevUsEast1 => "devUsEast1",
            Self::PerfUsEast3 => "perfUsEast3",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.job_name() == s)
            .ok_or_else(|| Error::InvalidId {
                message: format!("unknown job type '{s}'"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_roundtrip() {
        for ty in JobType::ALL {
            assert_eq!(ty, ty.job_name().parse().unwrap());
        }
    }

    #[test]
    fn serde_uses_job_names() {
        let json = serde_json::to_string(&JobType::ProductionUsEast3).unwrap();
        assert_eq!(json, "\"productionUsEast3\"");
        let back: JobType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobType::ProductionUsEast3);
    }

    #[test]
    fn zones_match_environments() {
        let zone = JobType::SystemTest.zone(SystemName::Main);
        assert_eq!(zone.value(), "test.us-east-1");
        assert_eq!(
            JobType::ProductionUsEast3.zone(SystemName::Main).value(),
            "prod.us-east-3"
        );
        assert!(JobType::DevUsEast1.environment().is_manually_deployed());
        assert!(JobType::PerfUsEast3.environment().is_manually_deployed());
        assert!(JobType::StagingTest.is_test());
        assert!(!JobType::ProductionUsWest1.is_test());
    }
}

//! The steps of a deployment job, and their prerequisite relation.
//!
//! Steps form a DAG: a step may run only once all of its prerequisites have
//! succeeded. The relation is declared statically here; profiles (see
//! [`crate::profile`]) select the subset of steps a given job runs, and
//! readiness only ever considers prerequisites within that subset.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use berth_core::Error;

/// A unit of work within a run.
///
/// Declaration order is the presentation order of steps, and every step is
/// declared after all of its prerequisites.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    /// Deploys the tester application to the zone of this job.
    DeployTester,
    /// Waits for the tester to come up.
    InstallTester,
    /// Deploys the source versions of platform and application, to stage an
    /// upgrade.
    DeployInitialReal,
    /// Waits for the initial deployment to come up.
    InstallInitialReal,
    /// Deploys the target versions of platform and application.
    DeployReal,
    /// Waits for the real deployment to come up.
    InstallReal,
    /// Starts the tests in the tester container.
    StartTests,
    /// Polls for the tests to terminate, streaming their log.
    EndTests,
    /// Copies the node logs of the real deployment into the run log.
    CopyNodeLogs,
    /// Deactivates the real deployment.
    DeactivateReal,
    /// Deactivates the tester.
    DeactivateTester,
    /// Reports the outcome, and mails on failure.
    Report,
}

impl Step {
    /// All steps, in presentation order.
    pub const ALL: [Self; 12] = [
        Self::DeployTester,
        Self::InstallTester,
        Self::DeployInitialReal,
        Self::InstallInitialReal,
        Self::DeployReal,
        Self::InstallReal,
        Self::StartTests,
        Self::EndTests,
        Self::CopyNodeLogs,
        Self::DeactivateReal,
        Self::DeactivateTester,
        Self::Report,
    ];

    /// Returns the steps which must have succeeded before this one may run.
    ///
    /// Only prerequisites present in the run's profile apply; see
    /// [`crate::run::Run::ready_steps`].
    #[must_use]
    pub const fn prerequisites(self) -> &'static [Self] {
        match self {
            Self::DeployTester | Self::DeployInitialReal => &[],
            Self::InstallTester => &[Self::DeployTester],
            Self::InstallInitialReal => &[Self::DeployInitialReal],
            Self::DeployReal => &[Self::InstallInitialReal],
            Self::InstallReal => &[Self::DeployReal],
            Self::StartTests => &[Self::InstallReal, Self::InstallTester],
            Self::EndTests => &[Self::StartTests],
            Self::CopyNodeLogs => &[Self::InstallReal, Self::EndTests],
            Self::DeactivateReal | Self::DeactivateTester => &[Self::CopyNodeLogs],
            Self::Report => &[Self::InstallReal, Self::DeactivateReal, Self::DeactivateTester],
        }
    }

    /// Returns the camelCase name of this step, as used in persisted documents.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DeployTester => "deployTester",
            Self::InstallTester => "installTester",
            Self::DeployInitialReal => "deployInitialReal",
            Self::InstallInitialReal => "installInitialReal",
            Self::DeployReal => "deployReal",
            Self::InstallReal => "installReal",
            Self::StartTests => "startTests",
            Self::EndTests => "endTests",
            Self::CopyNodeLogs => "copyNodeLogs",
            Self::DeactivateReal => "deactivateReal",
            Self::DeactivateTester => "deactivateTester",
            Self::Report => "report",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::ALL
            .into_iter()
            .find(|step| step.name() == s)
            .ok_or_else(|| Error::InvalidId {
                message: format!("unknown step '{s}'"),
            })
    }
}

/// The state of one step within one run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    /// Not yet run to a conclusion.
    Unfinished,
    /// Ran and concluded successfully.
    Succeeded,
    /// Ran and failed.
    Failed,
}

impl StepStatus {
    /// Returns whether this step has run to a conclusion.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Unfinished)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unfinished => "unfinished",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisites_are_declared_before_their_dependents() {
        // The prerequisite relation is acyclic because every edge points to an
        // earlier declaration.
        for (i, step) in Step::ALL.iter().enumerate() {
            for prerequisite in step.prerequisites() {
                let at = Step::ALL.iter().position(|s| s == prerequisite).unwrap();
                assert!(at < i, "{prerequisite} must precede {step}");
            }
        }
    }

    #[test]
    fn step_names_roundtrip() {
        for step in Step::ALL {
            assert_eq!(step, step.name().parse().unwrap());
        }
    }

    #[test]
    fn serde_uses_step_names() {
        assert_eq!(
            serde_json::to_string(&Step::CopyNodeLogs).unwrap(),
            "\"copyNodeLogs\""
        );
        assert_eq!(
            serde_json::to_string(&StepStatus::Unfinished).unwrap(),
            "\"unfinished\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(!StepStatus::Unfinished.is_terminal());
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
    }
}

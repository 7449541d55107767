//! Job profiles: the selection of steps a given job performs.
//!
//! A profile also marks some steps *always-run*: those execute even after the
//! run has failed or been aborted, so deployments are cleaned up and outcomes
//! reported no matter how a run ends.

use crate::job_type::JobType;
use crate::step::Step;

/// The steps a job runs, and which of them run regardless of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProfile {
    steps: &'static [Step],
    always_run: &'static [Step],
}

/// Functional tests of a new submission.
static SYSTEM_TEST: JobProfile = JobProfile {
    steps: &[
        Step::DeployTester,
        Step::InstallTester,
        Step::DeployReal,
        Step::InstallReal,
        Step::StartTests,
        Step::EndTests,
        Step::CopyNodeLogs,
        Step::DeactivateReal,
        Step::DeactivateTester,
        Step::Report,
    ],
    always_run: &[
        Step::CopyNodeLogs,
        Step::DeactivateReal,
        Step::DeactivateTester,
        Step::Report,
    ],
};

/// Upgrade tests, staging the current deployment before moving to the target.
static STAGING_TEST: JobProfile = JobProfile {
    steps: &[
        Step::DeployTester,
        Step::InstallTester,
        Step::DeployInitialReal,
        Step::InstallInitialReal,
        Step::DeployReal,
        Step::InstallReal,
        Step::StartTests,
        Step::EndTests,
        Step::CopyNodeLogs,
        Step::DeactivateReal,
        Step::DeactivateTester,
        Step::Report,
    ],
    always_run: &[
        Step::CopyNodeLogs,
        Step::DeactivateReal,
        Step::DeactivateTester,
        Step::Report,
    ],
};

/// Production rollout; the deployment stays active.
static PRODUCTION: JobProfile = JobProfile {
    steps: &[Step::DeployReal, Step::InstallReal, Step::Report],
    always_run: &[Step::Report],
};

/// Manual deployments; the deployment stays active until its zone TTL.
static DEVELOPMENT: JobProfile = JobProfile {
    steps: &[Step::DeployReal, Step::InstallReal, Step::CopyNodeLogs],
    always_run: &[Step::CopyNodeLogs],
};

impl JobProfile {
    /// Returns the profile of the given job type.
    #[must_use]
    pub fn of(job_type: JobType) -> &'static Self {
        match job_type {
            JobType::SystemTest => &SYSTEM_TEST,
            JobType::StagingTest => &STAGING_TEST,
            JobType::ProductionUsEast3
            | JobType::ProductionUsWest1
            | JobType::ProductionUsCentral1
            | JobType::ProductionApNortheast1 => &PRODUCTION,
            JobType::DevUsEast1 | JobType::PerfUsEast3 => &DEVELOPMENT,
        }
    }

    /// Returns the steps of this profile, in presentation order.
    #[must_use]
    pub const fn steps(&self) -> &'static [Step] {
        self.steps
    }

    /// Returns the steps which run even after the run has failed or been
    /// aborted.
    #[must_use]
    pub const fn always_run(&self) -> &'static [Step] {
        self.always_run
    }

    /// Returns whether this profile includes the given step.
    #[must_use]
    pub fn contains(&self, step: Step) -> bool {
        self.steps.contains(&step)
    }

    /// Returns whether the given step runs regardless of prior failure.
    #[must_use]
    pub fn is_always_run(&self, step: Step) -> bool {
        self.always_run.contains(&step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_run_steps_are_in_the_profile() {
        for ty in JobType::ALL {
            let profile = JobProfile::of(ty);
            for step in profile.always_run() {
                assert!(profile.contains(*step), "{step} missing from {ty}");
            }
        }
    }

    #[test]
    fn production_omits_test_steps() {
        let profile = JobProfile::of(JobType::ProductionUsEast3);
        assert!(!profile.contains(Step::DeployTester));
        assert!(!profile.contains(Step::StartTests));
        assert!(!profile.contains(Step::DeactivateReal));
        assert!(profile.contains(Step::Report));
        assert!(profile.is_always_run(Step::Report));
    }

    #[test]
    fn staging_includes_the_initial_pair() {
        let profile = JobProfile::of(JobType::StagingTest);
        assert!(profile.contains(Step::DeployInitialReal));
        assert!(profile.contains(Step::InstallInitialReal));
        assert_eq!(profile.steps().len(), 12);
    }

    #[test]
    fn system_test_omits_the_initial_pair() {
        let profile = JobProfile::of(JobType::SystemTest);
        assert!(!profile.contains(Step::DeployInitialReal));
        assert!(!profile.contains(Step::InstallInitialReal));
        assert_eq!(profile.steps().len(), 10);
    }

    #[test]
    fn development_keeps_the_deployment() {
        let profile = JobProfile::of(JobType::DevUsEast1);
        assert!(!profile.contains(Step::DeactivateReal));
        assert!(profile.is_always_run(Step::CopyNodeLogs));
    }
}

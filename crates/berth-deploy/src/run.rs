//! The run model: one execution of a deployment job.
//!
//! A [`Run`] is an immutable value; every mutation is expressed as a pure
//! transformation returning a new value, applied inside a read-modify-write
//! under the run's lock. The persisted JSON document round-trips every field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use berth_core::{ApplicationId, TesterId};

use crate::error::{Error, Result};
use crate::job_type::JobType;
use crate::locking::LockedStep;
use crate::profile::JobProfile;
use crate::step::{Step, StepStatus};
use crate::versions::Versions;

/// The identity of a run: application, job type, and the strictly increasing
/// run number of that combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunId {
    application: ApplicationId,
    job_type: JobType,
    number: u64,
}

impl RunId {
    /// Creates a run id.
    #[must_use]
    pub const fn new(application: ApplicationId, job_type: JobType, number: u64) -> Self {
        Self {
            application,
            job_type,
            number,
        }
    }

    /// Returns the application this run deploys.
    #[must_use]
    pub const fn application(&self) -> &ApplicationId {
        &self.application
    }

    /// Returns the job type of this run.
    #[must_use]
    pub const fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Returns the run number.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Returns the id of the tester application paired with this run.
    #[must_use]
    pub fn tester(&self) -> TesterId {
        TesterId::of(&self.application)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.application, self.job_type, self.number)
    }
}

/// The status of a whole run.
///
/// `Running` is the only non-terminal value; all others label the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Still progressing normally.
    Running,
    /// Deployment was rejected for want of capacity.
    OutOfCapacity,
    /// Deployment of the real application failed.
    DeploymentFailed,
    /// Installation of the real application timed out.
    InstallationFailed,
    /// The tests failed.
    TestFailure,
    /// An unexpected error occurred.
    Error,
    /// The run was aborted.
    Aborted,
    /// Everything completed successfully.
    Success,
}

impl RunStatus {
    /// Returns whether this status marks a failed run.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        !matches!(self, Self::Running | Self::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::OutOfCapacity => "outOfCapacity",
            Self::DeploymentFailed => "deploymentFailed",
            Self::InstallationFailed => "installationFailed",
            Self::TestFailure => "testFailure",
            Self::Error => "error",
            Self::Aborted => "aborted",
            Self::Success => "success",
        })
    }
}

/// One execution of a deployment job for an application.
///
/// Holds the status of each step of the run's profile, the run status, the
/// test-log high-water mark, and, for public systems, the tester certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    id: RunId,
    versions: Versions,
    status: RunStatus,
    start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<DateTime<Utc>>,
    steps: BTreeMap<Step, StepStatus>,
    #[serde(default)]
    last_test_log_entry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tester_certificate: Option<String>,
}

impl Run {
    /// Creates a fresh run in its initial state: every step of the job's
    /// profile unfinished, status `Running`.
    #[must_use]
    pub fn initial(id: RunId, versions: Versions, now: DateTime<Utc>) -> Self {
        let steps = JobProfile::of(id.job_type())
            .steps()
            .iter()
            .map(|step| (*step, StepStatus::Unfinished))
            .collect();
        Self {
            id,
            versions,
            status: RunStatus::Running,
            start: now,
            end: None,
            steps,
            last_test_log_entry: 0,
            tester_certificate: None,
        }
    }

    /// Returns the id of this run.
    #[must_use]
    pub const fn id(&self) -> &RunId {
        &self.id
    }

    /// Returns the versions this run deploys.
    #[must_use]
    pub const fn versions(&self) -> &Versions {
        &self.versions
    }

    /// Returns the status of this run.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns when this run started.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Returns when this run ended, if it has.
    #[must_use]
    pub const fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// Returns the status of every step of this run's profile.
    #[must_use]
    pub const fn steps(&self) -> &BTreeMap<Step, StepStatus> {
        &self.steps
    }

    /// Returns the status of the given step, if it is part of this run.
    #[must_use]
    pub fn step_status(&self, step: Step) -> Option<StepStatus> {
        self.steps.get(&step).copied()
    }

    /// Returns the id of the last test log entry fetched from the tester.
    #[must_use]
    pub const fn last_test_log_entry(&self) -> u64 {
        self.last_test_log_entry
    }

    /// Returns the PEM of the tester certificate, if one was minted.
    #[must_use]
    pub fn tester_certificate(&self) -> Option<&str> {
        self.tester_certificate.as_deref()
    }

    /// Returns whether this run has ended.
    #[must_use]
    pub const fn has_ended(&self) -> bool {
        self.end.is_some()
    }

    /// Returns whether this run has failed.
    #[must_use]
    pub const fn has_failed(&self) -> bool {
        self.status.is_failure()
    }

    /// Records the outcome of a step: `Running` and `Success` mean the step
    /// succeeded, anything else that it failed. The first terminal failure
    /// also fixes the status of the run.
    #[must_use]
    pub fn with_step_status(mut self, status: RunStatus, step: &LockedStep) -> Self {
        let step_status = if status.is_failure() {
            StepStatus::Failed
        } else {
            StepStatus::Succeeded
        };
        self.steps.insert(step.step(), step_status);
        if status.is_failure() && !self.status.is_failure() {
            self.status = status;
        }
        self
    }

    /// Advances the test-log high-water mark. The mark never regresses.
    #[must_use]
    pub fn with_last_test_log_entry(mut self, id: u64) -> Self {
        self.last_test_log_entry = self.last_test_log_entry.max(id);
        self
    }

    /// Sets the tester certificate of this run.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is already set.
    pub fn with_tester_certificate(mut self, pem: impl Into<String>) -> Result<Self> {
        if self.tester_certificate.is_some() {
            return Err(Error::CertificateAlreadySet {
                run_id: self.id.clone(),
            });
        }
        self.tester_certificate = Some(pem.into());
        Ok(self)
    }

    /// Marks this run aborted, unless it has already failed.
    #[must_use]
    pub fn aborted(mut self) -> Self {
        if !self.status.is_failure() {
            self.status = RunStatus::Aborted;
        }
        self
    }

    /// Marks this run as ended. A run which never failed ends as `Success`.
    #[must_use]
    pub fn finished(mut self, now: DateTime<Utc>) -> Self {
        self.end = Some(now);
        if matches!(self.status, RunStatus::Running) {
            self.status = RunStatus::Success;
        }
        self
    }

    /// Returns the steps which may be dispatched now, in presentation order.
    ///
    /// A step is ready when it belongs to the profile, is unfinished, and all
    /// of its prerequisites within the profile have succeeded, with the run
    /// still `Running`, or the step marked always-run. Once a run has failed,
    /// only always-run steps are considered, and only their always-run
    /// prerequisites gate them: the ordinary steps they trail will never run.
    #[must_use]
    pub fn ready_steps(&self) -> Vec<Step> {
        if self.has_ended() {
            return Vec::new();
        }
        if self.has_failed() {
            self.forced_steps()
        } else {
            self.normal_steps()
        }
    }

    fn normal_steps(&self) -> Vec<Step> {
        self.unfinished_steps(|prerequisite| self.steps.contains_key(&prerequisite))
    }

    fn forced_steps(&self) -> Vec<Step> {
        let profile = JobProfile::of(self.id.job_type());
        self.unfinished_steps(|prerequisite| profile.is_always_run(prerequisite))
            .into_iter()
            .filter(|step| profile.is_always_run(*step))
            .collect()
    }

    /// Returns unfinished steps whose prerequisites, filtered by `gates`,
    /// have all succeeded.
    fn unfinished_steps(&self, gates: impl Fn(Step) -> bool) -> Vec<Step> {
        self.steps
            .iter()
            .filter(|(_, status)| **status == StepStatus::Unfinished)
            .map(|(step, _)| *step)
            .filter(|step| {
                step.prerequisites()
                    .iter()
                    .filter(|prerequisite| gates(**prerequisite))
                    .all(|prerequisite| {
                        self.steps.get(prerequisite) == Some(&StepStatus::Succeeded)
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::{ApplicationVersion, SourceRevision};
    use berth_core::{LockKey, LockRegistry};
    use std::time::Duration;

    fn run_id(job_type: JobType) -> RunId {
        RunId::new(
            ApplicationId::from_parts("tenant", "app").unwrap(),
            job_type,
            1,
        )
    }

    fn versions() -> Versions {
        Versions::new(
            "1.2.3".parse().unwrap(),
            ApplicationVersion::from(SourceRevision::new("repo", "branch", "bada55"), 321),
            None,
            None,
        )
    }

    async fn locked(registry: &LockRegistry, step: Step) -> LockedStep {
        let key = LockKey::of(&["steps", "test", step.name()]);
        let lease = registry.lock(&key, Duration::from_secs(1)).await.unwrap();
        LockedStep::new(lease, step)
    }

    #[test]
    fn initial_run_has_every_profile_step_unfinished() {
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());
        assert_eq!(run.steps().len(), 10);
        assert!(run
            .steps()
            .values()
            .all(|status| *status == StepStatus::Unfinished));
        assert_eq!(run.status(), RunStatus::Running);
        assert!(!run.has_ended());
        assert!(!run.has_failed());
    }

    #[tokio::test]
    async fn first_failure_fixes_the_run_status() {
        let registry = LockRegistry::new();
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());

        let step = locked(&registry, Step::DeployTester).await;
        let run = run.with_step_status(RunStatus::Running, &step);
        assert_eq!(run.step_status(Step::DeployTester), Some(StepStatus::Succeeded));
        assert_eq!(run.status(), RunStatus::Running);

        let step = locked(&registry, Step::DeployReal).await;
        let run = run.with_step_status(RunStatus::DeploymentFailed, &step);
        assert_eq!(run.step_status(Step::DeployReal), Some(StepStatus::Failed));
        assert_eq!(run.status(), RunStatus::DeploymentFailed);

        // A later failure does not override the first.
        let step = locked(&registry, Step::InstallTester).await;
        let run = run.with_step_status(RunStatus::Error, &step);
        assert_eq!(run.status(), RunStatus::DeploymentFailed);
    }

    #[test]
    fn abort_is_idempotent_and_yields_to_failures() {
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());
        let run = run.aborted();
        assert_eq!(run.status(), RunStatus::Aborted);
        let run = run.aborted();
        assert_eq!(run.status(), RunStatus::Aborted);
    }

    #[test]
    fn finishing_a_running_run_succeeds_it() {
        let now = Utc::now();
        let run = Run::initial(run_id(JobType::SystemTest), versions(), now).finished(now);
        assert!(run.has_ended());
        assert_eq!(run.status(), RunStatus::Success);

        let aborted = Run::initial(run_id(JobType::SystemTest), versions(), now)
            .aborted()
            .finished(now);
        assert_eq!(aborted.status(), RunStatus::Aborted);
    }

    #[test]
    fn tester_certificate_is_set_at_most_once() {
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());
        let run = run.with_tester_certificate("pem").unwrap();
        assert_eq!(run.tester_certificate(), Some("pem"));
        assert!(matches!(
            run.with_tester_certificate("other"),
            Err(Error::CertificateAlreadySet { .. })
        ));
    }

    #[test]
    fn test_log_mark_is_monotonic() {
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());
        let run = run.with_last_test_log_entry(3);
        let run = run.with_last_test_log_entry(1);
        assert_eq!(run.last_test_log_entry(), 3);
    }

    #[tokio::test]
    async fn ready_steps_follow_the_profile_dag() {
        let registry = LockRegistry::new();
        let run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());

        // Both root steps of the profile are ready; the initial pair is not in
        // the system test profile, so deployReal has no gating prerequisite.
        assert_eq!(run.ready_steps(), vec![Step::DeployTester, Step::DeployReal]);

        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::DeployTester).await,
        );
        assert_eq!(run.ready_steps(), vec![Step::InstallTester, Step::DeployReal]);
    }

    #[tokio::test]
    async fn staging_gates_the_target_deploy_on_the_initial_pair() {
        let registry = LockRegistry::new();
        let run = Run::initial(run_id(JobType::StagingTest), versions(), Utc::now());
        assert_eq!(
            run.ready_steps(),
            vec![Step::DeployTester, Step::DeployInitialReal]
        );

        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::DeployInitialReal).await,
        );
        assert!(run.ready_steps().contains(&Step::InstallInitialReal));
        assert!(!run.ready_steps().contains(&Step::DeployReal));
    }

    #[tokio::test]
    async fn failed_run_considers_only_cleanup_steps() {
        let registry = LockRegistry::new();
        let mut run = Run::initial(run_id(JobType::SystemTest), versions(), Utc::now());
        for step in [
            Step::DeployTester,
            Step::InstallTester,
            Step::DeployReal,
            Step::InstallReal,
        ] {
            run = run.with_step_status(RunStatus::Running, &locked(&registry, step).await);
        }
        let run = run.with_step_status(
            RunStatus::Error,
            &locked(&registry, Step::StartTests).await,
        );

        // Only the head of the cleanup cascade is ready; its ordinary
        // prerequisites no longer gate it.
        assert!(run.has_failed());
        assert_eq!(run.ready_steps(), vec![Step::CopyNodeLogs]);

        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::CopyNodeLogs).await,
        );
        assert_eq!(
            run.ready_steps(),
            vec![Step::DeactivateReal, Step::DeactivateTester]
        );

        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::DeactivateReal).await,
        );
        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::DeactivateTester).await,
        );
        assert_eq!(run.ready_steps(), vec![Step::Report]);

        let run = run.with_step_status(
            RunStatus::Running,
            &locked(&registry, Step::Report).await,
        );
        assert!(run.ready_steps().is_empty());
    }

    #[test]
    fn an_ended_run_has_no_ready_steps() {
        let now = Utc::now();
        let run = Run::initial(run_id(JobType::SystemTest), versions(), now)
            .aborted()
            .finished(now);
        assert!(run.ready_steps().is_empty());
    }

    #[test]
    fn serde_roundtrip() {
        let run = Run::initial(run_id(JobType::StagingTest), versions(), Utc::now())
            .with_last_test_log_entry(7)
            .with_tester_certificate("-----BEGIN CERTIFICATE-----")
            .unwrap();
        let json = serde_json::to_string(&run).unwrap();
        let back: Run = serde_json::from_str(&json).unwrap();
        assert_eq!(run, back);
    }
}

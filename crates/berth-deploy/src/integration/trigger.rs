//! The contract towards higher-level triggering: completion reports.
//!
//! Triggering policy (what to submit, and production rollout ordering) is
//! out of scope; the runner merely reports what happened.

use async_trait::async_trait;

use berth_core::ApplicationId;

use crate::error::Result;
use crate::job_type::JobType;
use crate::versions::ApplicationVersion;

/// The error of a failed job, as reported to triggering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobError {
    /// The job failed for a reason triggering does not distinguish further.
    Unknown,
}

/// A completion report: either of a submission, or of a finished job run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The application the report concerns.
    pub application: ApplicationId,
    /// The job type of a run report.
    pub job_type: Option<JobType>,
    /// The run number of a run report.
    pub run_number: Option<u64>,
    /// The build project of a submission report.
    pub project_id: Option<u64>,
    /// The version of a submission report.
    pub version: Option<ApplicationVersion>,
    /// The error of a failed run, if any.
    pub job_error: Option<JobError>,
}

impl JobReport {
    /// Creates the report of a new submission.
    #[must_use]
    pub const fn of_submission(
        application: ApplicationId,
        project_id: u64,
        version: ApplicationVersion,
    ) -> Self {
        Self {
            application,
            job_type: None,
            run_number: None,
            project_id: Some(project_id),
            version: Some(version),
            job_error: None,
        }
    }

    /// Creates the report of a finished job run.
    #[must_use]
    pub const fn of_job(
        application: ApplicationId,
        job_type: JobType,
        run_number: u64,
        job_error: Option<JobError>,
    ) -> Self {
        Self {
            application,
            job_type: Some(job_type),
            run_number: Some(run_number),
            project_id: None,
            version: None,
            job_error,
        }
    }
}

/// The triggering interface consumed by the job runner.
#[async_trait]
pub trait DeploymentTrigger: Send + Sync {
    /// Notifies triggering that a submission was accepted or a run completed.
    async fn notify_of_completion(&self, report: JobReport) -> Result<()>;
}

//! The tester cloud contract: the external harness that runs test code
//! against a deployed application.

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::job_type::JobType;
use crate::persistence::LogEntry;

/// The status of a test execution, as reported by the tester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TesterStatus {
    /// Tests have not been started.
    NotStarted,
    /// Tests are running.
    Running,
    /// Tests completed successfully.
    Success,
    /// Tests ran and failed.
    Failure,
    /// The tester failed running its tests.
    Error,
}

/// The test suite a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// Functional tests of a new submission.
    System,
    /// Upgrade tests.
    Staging,
    /// Verification tests in production.
    Production,
}

impl Suite {
    /// Returns the suite of the given job type.
    ///
    /// # Panics
    ///
    /// Panics if the job type runs no tests; only test and production jobs
    /// have a suite.
    #[must_use]
    pub fn of(job_type: JobType) -> Self {
        match job_type {
            JobType::SystemTest => Self::System,
            JobType::StagingTest => Self::Staging,
            ty if ty.is_production() => Self::Production,
            ty => panic!("job type {ty} runs no test suite"),
        }
    }

    /// Returns the lowercase name of this suite.
    #[must_use]
    pub const fn value(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

/// The tester cloud interface consumed by the job runner.
#[async_trait]
pub trait TesterCloud: Send + Sync {
    /// Returns whether the tester at the given endpoint is ready to run tests.
    async fn ready(&self, url: &Url) -> bool;

    /// Starts the given suite with the given config.
    async fn start_tests(&self, url: &Url, suite: Suite, config: serde_json::Value) -> Result<()>;

    /// Returns the status of the current test execution.
    async fn status(&self, url: &Url) -> Result<TesterStatus>;

    /// Returns the test log entries with ids after the given threshold.
    async fn log(&self, url: &Url, after: u64) -> Result<Vec<LogEntry>>;
}

//! A triggering double recording completion reports.

use async_trait::async_trait;
use std::sync::Mutex;

use berth_deploy::error::Result;
use berth_deploy::integration::{DeploymentTrigger, JobReport};

/// Records every completion report the runner sends.
#[derive(Default)]
pub struct MockDeploymentTrigger {
    reports: Mutex<Vec<JobReport>>,
}

impl MockDeploymentTrigger {
    /// Creates a triggering double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the reports received so far.
    #[must_use]
    pub fn completions(&self) -> Vec<JobReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeploymentTrigger for MockDeploymentTrigger {
    async fn notify_of_completion(&self, report: JobReport) -> Result<()> {
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}

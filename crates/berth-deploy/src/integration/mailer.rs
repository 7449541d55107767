//! The mailer contract, and the run-failure notification mails.

use async_trait::async_trait;

use crate::error::Result;
use crate::job_type::JobType;
use crate::run::{RunId, RunStatus};

/// A mail to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    /// The recipients of the mail.
    pub recipients: Vec<String>,
    /// The subject line.
    pub subject: String,
    /// The body text.
    pub body: String,
}

impl Mail {
    /// Creates a mail.
    #[must_use]
    pub fn new(recipients: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            recipients,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// The mailer interface consumed by the job runner.
///
/// Delivery is best-effort: send errors are swallowed into the run log and
/// never affect run status.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the given mail.
    async fn send(&self, mail: Mail) -> Result<()>;
}

/// Renders the run-failure notification mails.
///
/// The mail variant is chosen by the run's status; see
/// [`failure_mail`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeploymentFailureMails;

impl DeploymentFailureMails {
    /// Creates the mail renderer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Renders the mail for a run failing with the given status, or `None`
    /// when the status warrants no mail.
    #[must_use]
    pub fn failure_mail(
        &self,
        id: &RunId,
        status: RunStatus,
        recipients: Vec<String>,
    ) -> Option<Mail> {
        let reason = match status {
            RunStatus::OutOfCapacity if id.job_type().is_production() => {
                "insufficient capacity in the zone"
            }
            RunStatus::DeploymentFailed => "an invalid application package",
            RunStatus::InstallationFailed => "installation taking too long",
            RunStatus::TestFailure => "failing tests",
            RunStatus::Error => "a system error",
            _ => return None,
        };
        Some(Mail::new(
            recipients,
            subject(id, reason),
            body(id, reason),
        ))
    }
}

fn job_display(job_type: JobType) -> String {
    match job_type {
        JobType::SystemTest => "System test".to_string(),
        JobType::StagingTest => "Staging test".to_string(),
        ty => {
            let zone = ty.zone(berth_core::SystemName::Main);
            format!(
                "{}{} deployment to {}",
                zone.environment()
                    .value()
                    .chars()
                    .next()
                    .map(|c| c.to_ascii_uppercase())
                    .unwrap_or_default(),
                &zone.environment().value()[1..],
                zone.region()
            )
        }
    }
}

fn subject(id: &RunId, reason: &str) -> String {
    format!(
        "Berth application {}.{}: {} failing due to {}",
        id.application().tenant(),
        id.application().application(),
        job_display(id.job_type()),
        reason
    )
}

fn body(id: &RunId, reason: &str) -> String {
    format!(
        "Run {} of {} for {} ended with {}.\n\
         Details are in the deployment console, under the run log of run {}.",
        id.number(),
        job_display(id.job_type()),
        id.application(),
        reason,
        id.number()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::ApplicationId;

    fn run_id(job_type: JobType) -> RunId {
        RunId::new(
            ApplicationId::from_parts("tenant", "application").unwrap(),
            job_type,
            42,
        )
    }

    #[test]
    fn system_error_mail_subject() {
        let mail = DeploymentFailureMails::new()
            .failure_mail(&run_id(JobType::SystemTest), RunStatus::Error, vec!["a@b".into()])
            .unwrap();
        assert_eq!(
            mail.subject,
            "Berth application tenant.application: System test failing due to a system error"
        );
        assert_eq!(mail.recipients, vec!["a@b".to_string()]);
    }

    #[test]
    fn capacity_mail_only_in_production() {
        let mails = DeploymentFailureMails::new();
        assert!(mails
            .failure_mail(
                &run_id(JobType::ProductionUsEast3),
                RunStatus::OutOfCapacity,
                vec!["a@b".into()]
            )
            .is_some());
        assert!(mails
            .failure_mail(
                &run_id(JobType::SystemTest),
                RunStatus::OutOfCapacity,
                vec!["a@b".into()]
            )
            .is_none());
    }

    #[test]
    fn no_mail_for_success_or_abort() {
        let mails = DeploymentFailureMails::new();
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Aborted] {
            assert!(mails
                .failure_mail(&run_id(JobType::SystemTest), status, vec!["a@b".into()])
                .is_none());
        }
    }

    #[test]
    fn production_jobs_name_their_zone() {
        let mail = DeploymentFailureMails::new()
            .failure_mail(
                &run_id(JobType::ProductionUsEast3),
                RunStatus::TestFailure,
                vec!["a@b".into()],
            )
            .unwrap();
        assert!(mail.subject.contains("Prod deployment to us-east-3"));
    }
}

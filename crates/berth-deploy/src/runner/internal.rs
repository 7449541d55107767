//! Runs the steps of a deployment job against the external collaborators.
//!
//! A dual logger is set up for each step run here: every message goes to the
//! run's buffered log under the step, and through `tracing` as well.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use berth_core::{ApplicationId, PlatformVersion, ZoneId};

use crate::application::{Role, When};
use crate::controller::JobController;
use crate::error::{Error, Result};
use crate::integration::config_server::{
    ConfigServerError, DeployOptions, DeploymentId, DeploymentInfo, ErrorCode, NodeState,
    PrepareResponse,
};
use crate::integration::mailer::DeploymentFailureMails;
use crate::integration::tester_cloud::{Suite, TesterStatus};
use crate::integration::{JobError, JobReport};
use crate::job_type::JobType;
use crate::locking::LockedStep;
use crate::node_log::parse_node_log;
use crate::persistence::LogLevel;
use crate::profile::JobProfile;
use crate::run::{Run, RunId, RunStatus};
use crate::runner::StepRunner;
use crate::step::Step;
use crate::test_config::test_config;
use crate::versions::Versions;

/// How long to wait for endpoints to show up after convergence.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How long to wait for a deployment to install.
pub const INSTALLATION_TIMEOUT: Duration = Duration::from_secs(150 * 60);

/// The validity of a minted tester certificate.
pub const CERTIFICATE_TIMEOUT: Duration = Duration::from_secs(300 * 60);

/// The step runner used in production: executes each step against the config
/// server, tester cloud, routing layer, and artifact store.
pub struct InternalStepRunner {
    jobs: Arc<JobController>,
    mails: DeploymentFailureMails,
}

#[async_trait]
impl StepRunner for InternalStepRunner {
    async fn run(&self, step: &LockedStep, id: &RunId) -> Option<RunStatus> {
        let logger = StepLogger {
            jobs: &self.jobs,
            id: id.clone(),
            step: step.step(),
        };
        let outcome = match step.step() {
            Step::DeployTester => self.deploy_tester(id, &logger).await,
            Step::InstallTester => self.install_tester(id, &logger).await,
            Step::DeployInitialReal => self.deploy_initial_real(id, &logger).await,
            Step::InstallInitialReal => self.install_real(id, true, &logger).await,
            Step::DeployReal => self.deploy_real(id, &logger).await,
            Step::InstallReal => self.install_real(id, false, &logger).await,
            Step::StartTests => self.start_tests(id, &logger).await,
            Step::EndTests => self.end_tests(id, &logger).await,
            Step::CopyNodeLogs => self.copy_node_logs(id, &logger).await,
            Step::DeactivateReal => self.deactivate_real(id, &logger).await,
            Step::DeactivateTester => self.deactivate_tester(id, &logger).await,
            Step::Report => self.report(id, &logger).await,
        };
        match outcome {
            Ok(decision) => decision,
            Err(e) => {
                logger
                    .warn(format!("Unexpected error running {id}: {e}"))
                    .await;
                if JobProfile::of(id.job_type()).is_always_run(step.step()) {
                    logger
                        .log_one("Will keep trying, as this is a cleanup step.")
                        .await;
                    None
                } else {
                    Some(RunStatus::Error)
                }
            }
        }
    }
}

impl InternalStepRunner {
    /// Creates a step runner against the given controller.
    #[must_use]
    pub fn new(jobs: Arc<JobController>) -> Self {
        Self {
            jobs,
            mails: DeploymentFailureMails::new(),
        }
    }

    // --- Deployment steps ---

    async fn deploy_tester(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let platform = self.versions(id).await?.target_platform().clone();
        logger
            .log_one(format!("Deploying the tester container on platform {platform} ..."))
            .await;
        let package = self.tester_package(id).await?;
        let deployment = self.deployment_id(id.tester().id(), id.job_type());
        let attempt = self
            .jobs
            .controller()
            .config_server
            .deploy(
                &deployment,
                Some(package),
                DeployOptions {
                    deploy_directly: true,
                    platform: Some(platform),
                    set_the_stage: false,
                },
            )
            .await;
        self.handle_deploy(id.job_type(), &deployment, attempt, logger)
            .await
    }

    async fn deploy_initial_real(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let versions = self.versions(id).await?;
        logger
            .log_one(format!(
                "Deploying platform version {} and application version {} ...",
                versions
                    .source_platform()
                    .unwrap_or_else(|| versions.target_platform()),
                versions
                    .source_application()
                    .unwrap_or_else(|| versions.target_application())
                    .id()
            ))
            .await;
        self.deploy_real_package(id, true, &versions, logger).await
    }

    async fn deploy_real(&self, id: &RunId, logger: &StepLogger<'_>) -> Result<Option<RunStatus>> {
        let versions = self.versions(id).await?;
        logger
            .log_one(format!(
                "Deploying platform version {} and application version {} ...",
                versions.target_platform(),
                versions.target_application().id()
            ))
            .await;
        self.deploy_real_package(id, false, &versions, logger).await
    }

    async fn deploy_real_package(
        &self,
        id: &RunId,
        set_the_stage: bool,
        versions: &Versions,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let manual = id.job_type().environment().is_manually_deployed();
        let zone = self.zone(id.job_type());
        let package = if manual {
            Some(
                self.jobs
                    .controller()
                    .artifacts
                    .get_dev(id.application(), &zone)
                    .await?,
            )
        } else {
            None
        };
        let platform = if set_the_stage {
            versions
                .source_platform()
                .unwrap_or_else(|| versions.target_platform())
                .clone()
        } else {
            versions.target_platform().clone()
        };
        let deployment = self.deployment_id(id.application(), id.job_type());
        let attempt = self
            .jobs
            .controller()
            .config_server
            .deploy(
                &deployment,
                package,
                DeployOptions {
                    deploy_directly: false,
                    platform: Some(platform),
                    set_the_stage,
                },
            )
            .await;
        self.handle_deploy(id.job_type(), &deployment, attempt, logger)
            .await
    }

    /// Inspects a prepare response, or translates config server error codes
    /// per the shared policy: well-known transient conditions retry, invalid
    /// packages fail the deployment, production capacity shortage is its own
    /// outcome, and unknown errors surface.
    async fn handle_deploy(
        &self,
        job_type: JobType,
        deployment: &DeploymentId,
        attempt: std::result::Result<PrepareResponse, ConfigServerError>,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let response = match attempt {
            Ok(response) => response,
            Err(e) if is_transient(e.code, job_type) => {
                logger
                    .log_one(format!(
                        "Will retry, because of '{:?}' deploying:\n{}",
                        e.code, e.message
                    ))
                    .await;
                return Ok(None);
            }
            Err(e) => {
                return match e.code {
                    ErrorCode::InvalidApplicationPackage | ErrorCode::BadRequest => {
                        logger.log_one(format!("Deployment failed: {}", e.message)).await;
                        Ok(Some(RunStatus::DeploymentFailed))
                    }
                    ErrorCode::OutOfCapacity => {
                        logger.log_one(format!("Deployment failed: {}", e.message)).await;
                        Ok(Some(RunStatus::OutOfCapacity))
                    }
                    _ => Err(e.into()),
                }
            }
        };

        let refused: Vec<_> = response
            .config_change_actions
            .refeed_actions
            .iter()
            .filter(|action| !action.allowed)
            .collect();
        if !refused.is_empty() {
            let mut messages = vec![
                "Deploy failed due to non-compatible changes that require re-feed.".to_string(),
                "Your options are:".to_string(),
                "1. Revert the incompatible changes.".to_string(),
                "2. If you think it is safe in your case, override the validation.".to_string(),
                "3. Deploy as a new application under a different name.".to_string(),
                "Illegal actions:".to_string(),
            ];
            messages.extend(refused.iter().flat_map(|action| action.messages.clone()));
            messages.push("Details:".to_string());
            messages.extend(response.log.iter().map(|entry| entry.message.clone()));
            logger.log(messages).await;
            return Ok(Some(RunStatus::DeploymentFailed));
        }

        if response.config_change_actions.restart_actions.is_empty() {
            logger.log_one("No services requiring restart.").await;
        } else {
            let mut hosts: Vec<String> = response
                .config_change_actions
                .restart_actions
                .iter()
                .flat_map(|action| action.services.iter())
                .map(|service| service.host_name.clone())
                .collect();
            hosts.sort();
            hosts.dedup();
            for host in hosts {
                self.jobs
                    .controller()
                    .config_server
                    .restart(deployment, Some(host.clone()))
                    .await?;
                logger
                    .log_one(format!("Restarting services on host {host}."))
                    .await;
            }
        }
        logger.log_one("Deployment successful.").await;
        if let Some(message) = response.message {
            logger.log_one(message).await;
        }
        Ok(Some(RunStatus::Running))
    }

    // --- Installation steps ---

    async fn install_real(
        &self,
        id: &RunId,
        set_the_stage: bool,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let Some(deployment) = self.deployment(id.application(), id.job_type()).await? else {
            logger
                .info("Deployment expired before installation was successful.")
                .await;
            return Ok(Some(RunStatus::InstallationFailed));
        };

        let versions = self.versions(id).await?;
        let platform = if set_the_stage {
            versions
                .source_platform()
                .unwrap_or_else(|| versions.target_platform())
                .clone()
        } else {
            versions.target_platform().clone()
        };
        let application = if set_the_stage {
            versions
                .source_application()
                .unwrap_or_else(|| versions.target_application())
        } else {
            versions.target_application()
        };
        logger
            .log_one(format!(
                "Checking installation of {platform} and {} ...",
                application.id()
            ))
            .await;

        if self
            .nodes_converged(id.application(), id.job_type(), &platform, logger)
            .await?
            && self
                .services_converged(id.application(), id.job_type(), &platform, logger)
                .await?
        {
            if self
                .endpoints_available(id.application(), id.job_type(), logger)
                .await?
            {
                logger.log_one("Installation succeeded!").await;
                return Ok(Some(RunStatus::Running));
            } else if self.timed_out(id.job_type(), &deployment, ENDPOINT_TIMEOUT) {
                logger
                    .warn("Endpoints failed to show up within 15 minutes!")
                    .await;
                return Ok(Some(RunStatus::Error));
            }
        }

        if self.timed_out(id.job_type(), &deployment, INSTALLATION_TIMEOUT) {
            logger
                .info("Installation failed to complete within 150 minutes!")
                .await;
            return Ok(Some(RunStatus::InstallationFailed));
        }

        logger.log_one("Installation not yet complete.").await;
        Ok(None)
    }

    async fn install_tester(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        // The tester's fate follows the real deployment: time runs out when
        // the real deployment expires.
        let Some(deployment) = self.deployment(id.application(), id.job_type()).await? else {
            logger
                .warn("Deployment expired before installation of tester was successful.")
                .await;
            return Ok(Some(RunStatus::Error));
        };

        let platform = self.versions(id).await?.target_platform().clone();
        logger.log_one("Checking installation of tester container ...").await;
        let tester = id.tester();

        if self
            .nodes_converged(tester.id(), id.job_type(), &platform, logger)
            .await?
            && self
                .services_converged(tester.id(), id.job_type(), &platform, logger)
                .await?
        {
            if self
                .endpoints_available(tester.id(), id.job_type(), logger)
                .await?
            {
                logger.log_one("Tester container successfully installed!").await;
                return Ok(Some(RunStatus::Running));
            } else if self.timed_out(id.job_type(), &deployment, ENDPOINT_TIMEOUT) {
                logger
                    .warn("Tester failed to show up within 15 minutes!")
                    .await;
                return Ok(Some(RunStatus::Error));
            }
        }

        if self.timed_out(id.job_type(), &deployment, INSTALLATION_TIMEOUT) {
            logger
                .warn(
                    "Installation of tester failed to complete within 150 minutes of real deployment!",
                )
                .await;
            return Ok(Some(RunStatus::Error));
        }

        logger.log_one("Installation of tester not yet complete.").await;
        Ok(None)
    }

    async fn nodes_converged(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        target: &PlatformVersion,
        logger: &StepLogger<'_>,
    ) -> Result<bool> {
        let zone = self.zone(job_type);
        let nodes = self
            .jobs
            .controller()
            .config_server
            .nodes(&zone, id, &[NodeState::Active, NodeState::Reserved])
            .await?;
        let statuses: Vec<String> = nodes
            .iter()
            .map(|node| {
                format!(
                    "{:>40}: {}{}{}",
                    node.hostname,
                    if node.current_version == node.wanted_version {
                        node.wanted_version.to_string()
                    } else {
                        format!("{} <-- {}", node.wanted_version, node.current_version)
                    },
                    if node.restart_generation >= node.wanted_restart_generation {
                        String::new()
                    } else {
                        format!(
                            "  restart pending ({} <-- {})",
                            node.wanted_restart_generation, node.restart_generation
                        )
                    },
                    if node.reboot_generation >= node.wanted_reboot_generation {
                        String::new()
                    } else {
                        format!(
                            "  reboot pending ({} <-- {})",
                            node.wanted_reboot_generation, node.reboot_generation
                        )
                    },
                )
            })
            .collect();
        logger.log(statuses).await;

        Ok(nodes.iter().all(|node| {
            node.current_version == *target
                && node.restart_generation >= node.wanted_restart_generation
                && node.reboot_generation >= node.wanted_reboot_generation
        }))
    }

    async fn services_converged(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        platform: &PlatformVersion,
        logger: &StepLogger<'_>,
    ) -> Result<bool> {
        let deployment = self.deployment_id(id, job_type);
        let Some(convergence) = self
            .jobs
            .controller()
            .config_server
            .service_convergence(&deployment, Some(platform.clone()))
            .await?
        else {
            logger
                .log_one("Config status not currently available -- will retry.")
                .await;
            return Ok(false);
        };
        logger
            .log_one(format!(
                "Wanted config generation is {}",
                convergence.wanted_generation
            ))
            .await;
        let pending: Vec<String> = convergence
            .services
            .iter()
            .filter(|service| service.current_generation != convergence.wanted_generation)
            .map(|service| {
                format!(
                    "{:>40}: {} on port {} has {}",
                    service.host,
                    service.service_type,
                    service.port,
                    if service.current_generation == -1 {
                        "not started!".to_string()
                    } else {
                        service.current_generation.to_string()
                    }
                )
            })
            .collect();
        if pending.is_empty() {
            logger.log_one("All services on wanted config generation.").await;
        } else {
            logger.log(pending).await;
        }

        Ok(convergence.converged)
    }

    async fn endpoints_available(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        logger: &StepLogger<'_>,
    ) -> Result<bool> {
        logger.log_one("Attempting to find deployment endpoints ...").await;
        let zone = self.zone(job_type);
        let endpoints = self
            .jobs
            .controller()
            .routing
            .cluster_endpoints(id, std::slice::from_ref(&zone))
            .await?;
        if !endpoints.contains_key(&zone) {
            logger.log_one("Endpoints not yet ready.").await;
            return Ok(false);
        }
        log_endpoints(&endpoints, logger).await;
        Ok(true)
    }

    // --- Test steps ---

    async fn start_tests(&self, id: &RunId, logger: &StepLogger<'_>) -> Result<Option<RunStatus>> {
        let Some(deployment) = self.deployment(id.application(), id.job_type()).await? else {
            logger.info("Deployment expired before tests could start.").await;
            return Ok(Some(RunStatus::Aborted));
        };

        let zones = self
            .jobs
            .tested_zone_and_production_zones(id.application(), id.job_type())
            .await?;
        logger.log_one("Attempting to find endpoints ...").await;
        let endpoints = self
            .jobs
            .controller()
            .routing
            .cluster_endpoints(id.application(), &zones)
            .await?;
        let zone = self.zone(id.job_type());
        if !endpoints.contains_key(&zone) {
            if self.timed_out(id.job_type(), &deployment, ENDPOINT_TIMEOUT) {
                logger
                    .warn("Endpoints for the deployment to test vanished again, while it was still active!")
                    .await;
                return Ok(Some(RunStatus::Error));
            }
            logger.log_one("Endpoints not yet ready.").await;
            return Ok(None);
        }
        log_endpoints(&endpoints, logger).await;

        let Some(tester_endpoint) = self.jobs.tester_endpoint(id).await? else {
            if self.timed_out(id.job_type(), &deployment, ENDPOINT_TIMEOUT) {
                logger
                    .warn("Endpoints for the tester container vanished again, while it was still active!")
                    .await;
                return Ok(Some(RunStatus::Error));
            }
            logger.log_one("Endpoints for the tester not yet ready.").await;
            return Ok(None);
        };

        if !self
            .jobs
            .controller()
            .tester_cloud
            .ready(&tester_endpoint)
            .await
        {
            logger.log_one("Tester container not yet ready.").await;
            return Ok(None);
        }

        logger.log_one("Starting tests ...").await;
        let clusters = self.content_clusters(id.application(), &zones).await?;
        let config = test_config(
            id.application(),
            &zone,
            self.jobs.system(),
            &endpoints,
            &clusters,
        );
        self.jobs
            .controller()
            .tester_cloud
            .start_tests(&tester_endpoint, Suite::of(id.job_type()), config)
            .await?;
        Ok(Some(RunStatus::Running))
    }

    async fn end_tests(&self, id: &RunId, logger: &StepLogger<'_>) -> Result<Option<RunStatus>> {
        if self.deployment(id.application(), id.job_type()).await?.is_none() {
            logger.info("Deployment expired before tests could complete.").await;
            return Ok(Some(RunStatus::Aborted));
        }

        let run = self.run(id).await?;
        if let Some(pem) = run.tester_certificate() {
            let (not_before, not_after) = certificate_validity(pem)?;
            let now = self.now();
            if now < not_before || now > not_after {
                logger
                    .info("Tester certificate expired before tests could complete.")
                    .await;
                return Ok(Some(RunStatus::Aborted));
            }
        }

        let Some(tester_endpoint) = self.jobs.tester_endpoint(id).await? else {
            logger
                .log_one("Endpoints for tester not found -- trying again later.")
                .await;
            return Ok(None);
        };

        self.jobs.update_test_log(id).await?;

        match self
            .jobs
            .controller()
            .tester_cloud
            .status(&tester_endpoint)
            .await?
        {
            TesterStatus::NotStarted => Err(Error::internal(
                "tester reports tests not started, even though they should have been",
            )),
            TesterStatus::Running => Ok(None),
            TesterStatus::Failure => {
                logger.log_one("Tests failed.").await;
                Ok(Some(RunStatus::TestFailure))
            }
            TesterStatus::Error => {
                logger.info("Tester failed running its tests!").await;
                Ok(Some(RunStatus::Error))
            }
            TesterStatus::Success => {
                logger.log_one("Tests completed successfully.").await;
                Ok(Some(RunStatus::Running))
            }
        }
    }

    // --- Cleanup steps ---

    async fn copy_node_logs(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        let zone = self.zone(id.job_type());
        if self.deployment(id.application(), id.job_type()).await?.is_some() {
            logger
                .log_one(format!(
                    "Copying node log from nodes of {} in {zone} ...",
                    id.application()
                ))
                .await;
            let deployment = self.deployment_id(id.application(), id.job_type());
            let copied: Result<()> = async {
                let stream = self.jobs.controller().config_server.logs(&deployment).await?;
                let entries = parse_node_log(&stream);
                self.jobs.log_entries(id, Step::CopyNodeLogs, entries).await
            }
            .await;
            if let Err(e) = copied {
                logger
                    .info(format!("Failure getting node logs for {id}: {e}"))
                    .await;
                return Ok(Some(RunStatus::Error));
            }
        }
        Ok(Some(RunStatus::Running))
    }

    async fn deactivate_real(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        logger
            .log_one(format!(
                "Deactivating deployment of {} in {} ...",
                id.application(),
                self.zone(id.job_type())
            ))
            .await;
        let deployment = self.deployment_id(id.application(), id.job_type());
        match self.jobs.controller().config_server.deactivate(&deployment).await {
            Ok(()) => Ok(Some(RunStatus::Running)),
            Err(e) if e.code == ErrorCode::NotFound => Ok(Some(RunStatus::Running)),
            Err(e) => {
                logger
                    .warn(format!("Failed deactivating {}: {e}", id.application()))
                    .await;
                Ok(Some(RunStatus::Error))
            }
        }
    }

    async fn deactivate_tester(
        &self,
        id: &RunId,
        logger: &StepLogger<'_>,
    ) -> Result<Option<RunStatus>> {
        logger
            .log_one(format!(
                "Deactivating tester of {} in {} ...",
                id.application(),
                self.zone(id.job_type())
            ))
            .await;
        match self.jobs.deactivate_tester(&id.tester(), id.job_type()).await {
            Ok(()) => Ok(Some(RunStatus::Running)),
            Err(e) => {
                logger
                    .warn(format!("Failed deactivating tester of {}: {e}", id.application()))
                    .await;
                Ok(Some(RunStatus::Error))
            }
        }
    }

    async fn report(&self, id: &RunId, logger: &StepLogger<'_>) -> Result<Option<RunStatus>> {
        let Some(run) = self.jobs.active(id).await? else {
            logger
                .info(format!("Job '{}' no longer supposed to run?", id.job_type()))
                .await;
            return Ok(Some(RunStatus::Error));
        };
        self.jobs
            .controller()
            .trigger
            .notify_of_completion(JobReport::of_job(
                id.application().clone(),
                id.job_type(),
                id.number(),
                run.has_failed().then_some(JobError::Unknown),
            ))
            .await?;
        if run.has_failed() {
            self.send_notification(&run, logger).await;
        }
        Ok(Some(RunStatus::Running))
    }

    /// Sends a mail with a notification of a failed run, if one should be
    /// sent. Mailer errors go to the run log and never flip the run.
    async fn send_notification(&self, run: &Run, logger: &StepLogger<'_>) {
        let sent: Result<()> = async {
            let application = self
                .jobs
                .controller()
                .applications
                .require(run.id().application())
                .await?;
            let new_commit = application.change_application.as_ref()
                == Some(run.versions().target_application());
            let when = if new_commit {
                When::FailingCommit
            } else {
                When::Failing
            };

            let mut recipients: Vec<String> =
                application.notifications.email_addresses_for(when).to_vec();
            if application.notifications.email_roles_for(when).contains(&Role::Author) {
                if let Some(author) = run.versions().target_application().author_email() {
                    recipients.push(author.to_string());
                }
            }
            if recipients.is_empty() {
                return Ok(());
            }

            if let Some(mail) = self.mails.failure_mail(run.id(), run.status(), recipients) {
                self.jobs.controller().mailer.send(mail).await?;
            }
            Ok(())
        }
        .await;
        if let Err(e) = sent {
            logger
                .info(format!("Exception trying to send mail for {}: {e}", run.id()))
                .await;
        }
    }

    // --- Tester package and certificate ---

    /// Returns the test package of this run. For public systems this also
    /// mints the tester certificate, once, and stores it on the run.
    async fn tester_package(&self, id: &RunId) -> Result<Vec<u8>> {
        let run = self.run(id).await?;
        if self.jobs.system().is_public() && run.tester_certificate().is_none() {
            let pem = self.mint_tester_certificate(id)?;
            self.jobs.store_tester_certificate(id, pem).await?;
        }
        self.jobs
            .controller()
            .artifacts
            .get_tester(&id.tester(), run.versions().target_application())
            .await
    }

    /// Mints an EC P-256 key pair and a self-signed certificate valid for
    /// [`CERTIFICATE_TIMEOUT`], identifying this run's tester.
    fn mint_tester_certificate(&self, id: &RunId) -> Result<String> {
        let key = rcgen::KeyPair::generate().map_err(certificate_error)?;
        let mut params = rcgen::CertificateParams::default();
        params.distinguished_name.push(
            rcgen::DnType::CommonName,
            format!("{}.{}.{}", id.tester(), id.job_type(), id.number()),
        );
        let now = self.now();
        params.not_before = offset(now)?;
        params.not_after = offset(
            now + chrono::Duration::from_std(CERTIFICATE_TIMEOUT)
                .map_err(|e| Error::Certificate {
                    message: e.to_string(),
                })?,
        )?;
        let certificate = params.self_signed(&key).map_err(certificate_error)?;
        Ok(certificate.pem())
    }

    // --- Shared helpers ---

    async fn run(&self, id: &RunId) -> Result<Run> {
        self.jobs.run(id).await?.ok_or_else(|| Error::RunNotFound {
            run_id: id.clone(),
        })
    }

    async fn versions(&self, id: &RunId) -> Result<Versions> {
        Ok(self.run(id).await?.versions().clone())
    }

    /// Returns the deployment of the real application in the zone of the
    /// given job, if it exists.
    async fn deployment(
        &self,
        id: &ApplicationId,
        job_type: JobType,
    ) -> Result<Option<DeploymentInfo>> {
        Ok(self
            .jobs
            .controller()
            .config_server
            .deployment(&self.deployment_id(id, job_type))
            .await?)
    }

    async fn content_clusters(
        &self,
        id: &ApplicationId,
        zones: &[ZoneId],
    ) -> Result<BTreeMap<ZoneId, Vec<String>>> {
        let mut clusters = BTreeMap::new();
        for zone in zones {
            let deployment = DeploymentId::new(id.clone(), zone.clone());
            clusters.insert(
                zone.clone(),
                self.jobs
                    .controller()
                    .config_server
                    .content_clusters(&deployment)
                    .await
                    .unwrap_or_default(),
            );
        }
        Ok(clusters)
    }

    /// Returns whether the time since deployment exceeds the given timeout.
    ///
    /// The clock is shortened to the zone's deployment TTL minus one minute
    /// when the latter is smaller, so logs can still be copied before the
    /// deployment expires.
    fn timed_out(&self, job_type: JobType, deployment: &DeploymentInfo, default: Duration) -> bool {
        let zone = self.zone(job_type);
        let timeout = self
            .jobs
            .controller()
            .zones
            .deployment_ttl(&zone)
            .filter(|ttl| *ttl < default)
            .unwrap_or(default);
        let grace = timeout.saturating_sub(Duration::from_secs(60));
        self.now() - deployment.at
            > chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX)
    }

    fn deployment_id(&self, id: &ApplicationId, job_type: JobType) -> DeploymentId {
        DeploymentId::new(id.clone(), self.zone(job_type))
    }

    fn zone(&self, job_type: JobType) -> ZoneId {
        job_type.zone(self.jobs.system())
    }

    fn now(&self) -> DateTime<Utc> {
        self.jobs.controller().clock.now()
    }
}

fn is_transient(code: ErrorCode, job_type: JobType) -> bool {
    matches!(
        code,
        ErrorCode::ActivationConflict
            | ErrorCode::ApplicationLockFailure
            | ErrorCode::ParentHostNotReady
            | ErrorCode::CertificateNotReady
            | ErrorCode::LoadBalancerNotReady
    ) || (code == ErrorCode::OutOfCapacity && job_type.is_test())
}

async fn log_endpoints(
    endpoints: &BTreeMap<ZoneId, BTreeMap<String, url::Url>>,
    logger: &StepLogger<'_>,
) {
    let mut messages = vec!["Found endpoints:".to_string()];
    for (zone, endpoints) in endpoints {
        messages.push(format!("- {zone}"));
        for (cluster, url) in endpoints {
            messages.push(format!(" |-- {url} ({cluster})"));
        }
    }
    logger.log(messages).await;
}

/// Returns the validity interval of a PEM certificate.
fn certificate_validity(pem: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    use x509_cert::der::DecodePem;
    let certificate =
        x509_cert::Certificate::from_pem(pem.as_bytes()).map_err(certificate_error)?;
    let validity = &certificate.tbs_certificate.validity;
    Ok((
        DateTime::<Utc>::from(validity.not_before.to_system_time()),
        DateTime::<Utc>::from(validity.not_after.to_system_time()),
    ))
}

fn certificate_error(e: impl std::fmt::Display) -> Error {
    Error::Certificate {
        message: e.to_string(),
    }
}

fn offset(at: DateTime<Utc>) -> Result<time::OffsetDateTime> {
    time::OffsetDateTime::from_unix_timestamp(at.timestamp()).map_err(certificate_error)
}

/// Logs to the run's buffered log under the step, and through `tracing`.
struct StepLogger<'a> {
    jobs: &'a JobController,
    id: RunId,
    step: Step,
}

impl StepLogger<'_> {
    async fn log(&self, messages: Vec<String>) {
        self.append(LogLevel::Debug, messages).await;
    }

    async fn log_one(&self, message: impl Into<String>) {
        self.append(LogLevel::Debug, vec![message.into()]).await;
    }

    async fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run = %self.id, step = %self.step, "{message}");
        self.append(LogLevel::Info, vec![message]).await;
    }

    async fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(run = %self.id, step = %self.step, "{message}");
        self.append(LogLevel::Warning, vec![message]).await;
    }

    async fn append(&self, level: LogLevel, messages: Vec<String>) {
        if let Err(e) = self.jobs.log(&self.id, self.step, level, messages).await {
            tracing::debug!(run = %self.id, step = %self.step, error = %e, "failed to store run log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_follow_the_shared_policy() {
        for code in [
            ErrorCode::ActivationConflict,
            ErrorCode::ApplicationLockFailure,
            ErrorCode::ParentHostNotReady,
            ErrorCode::CertificateNotReady,
            ErrorCode::LoadBalancerNotReady,
        ] {
            assert!(is_transient(code, JobType::SystemTest));
            assert!(is_transient(code, JobType::ProductionUsEast3));
        }
        assert!(is_transient(ErrorCode::OutOfCapacity, JobType::SystemTest));
        assert!(!is_transient(ErrorCode::OutOfCapacity, JobType::ProductionUsEast3));
        assert!(!is_transient(ErrorCode::BadRequest, JobType::SystemTest));
        assert!(!is_transient(ErrorCode::InvalidApplicationPackage, JobType::SystemTest));
    }
}

//! A complete controller wired against the in-process doubles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use berth_core::{ApplicationId, Clock, LockRegistry, ManualClock, SystemName, TesterId, ZoneId};
use berth_deploy::application::{
    Application, ApplicationPackage, ApplicationRegistry, Notifications, Role, When,
};
use berth_deploy::config::{ControllerConfig, RunnerConfig, ZoneRegistry};
use berth_deploy::controller::{Controller, JobController};
use berth_deploy::job_type::JobType;
use berth_deploy::persistence::{MemoryJobStore, MemoryLogStore};
use berth_deploy::run::RunId;
use berth_deploy::runner::{InternalStepRunner, JobRunner};
use berth_deploy::step::{Step, StepStatus};
use berth_deploy::versions::{ApplicationVersion, SourceRevision, Versions};

use crate::{
    MemoryArtifactStore, MockConfigServer, MockDeploymentTrigger, MockMailer, MockRoutingLayer,
    MockTesterCloud,
};

/// A deployment job controller over in-process doubles, with a manual clock
/// and helpers to drive runs through their steps.
pub struct DeploymentHarness {
    /// The manual clock everything reads time from.
    pub clock: Arc<ManualClock>,
    /// The lock registry of the controller.
    pub locks: Arc<LockRegistry>,
    /// The application registry.
    pub registry: Arc<ApplicationRegistry>,
    /// The in-memory durable store.
    pub store: Arc<MemoryJobStore>,
    /// The in-memory log store.
    pub logs: Arc<MemoryLogStore>,
    /// The config server double.
    pub config_server: Arc<MockConfigServer>,
    /// The tester cloud double.
    pub tester_cloud: Arc<MockTesterCloud>,
    /// The routing layer double.
    pub routing: Arc<MockRoutingLayer>,
    /// The artifact store double.
    pub artifacts: Arc<MemoryArtifactStore>,
    /// The mailer double.
    pub mailer: Arc<MockMailer>,
    /// The triggering double.
    pub trigger: Arc<MockDeploymentTrigger>,
    /// The controller under test.
    pub jobs: Arc<JobController>,
    /// The maintainer, running the production step runner.
    pub runner: Arc<JobRunner>,
}

impl DeploymentHarness {
    /// Creates a harness in the main system.
    #[must_use]
    pub fn new() -> Self {
        Self::with_system(SystemName::Main)
    }

    /// Creates a harness in the given system.
    #[must_use]
    pub fn with_system(system: SystemName) -> Self {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new(Utc::now()));
        let locks = Arc::new(LockRegistry::new());
        let registry = Arc::new(ApplicationRegistry::new());
        let store = Arc::new(MemoryJobStore::new());
        let logs = Arc::new(MemoryLogStore::new());
        let system_version: berth_core::PlatformVersion = "6.1.0".parse().expect("valid version");
        let config_server = Arc::new(MockConfigServer::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            system_version.clone(),
        ));
        let tester_cloud = Arc::new(MockTesterCloud::new());
        let routing = Arc::new(MockRoutingLayer::new());
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let mailer = Arc::new(MockMailer::new());
        let trigger = Arc::new(MockDeploymentTrigger::new());

        let controller = Controller {
            clock: Arc::clone(&clock) as Arc<dyn Clock>,
            locks: Arc::clone(&locks),
            store: Arc::clone(&store) as Arc<dyn berth_deploy::persistence::JobStore>,
            logs: Arc::clone(&logs) as Arc<dyn berth_deploy::persistence::LogStore>,
            applications: Arc::clone(&registry),
            config_server: Arc::clone(&config_server) as Arc<dyn berth_deploy::integration::ConfigServer>,
            tester_cloud: Arc::clone(&tester_cloud) as Arc<dyn berth_deploy::integration::TesterCloud>,
            routing: Arc::clone(&routing) as Arc<dyn berth_deploy::integration::RoutingLayer>,
            artifacts: Arc::clone(&artifacts) as Arc<dyn berth_deploy::integration::ArtifactStore>,
            mailer: Arc::clone(&mailer) as Arc<dyn berth_deploy::integration::Mailer>,
            trigger: Arc::clone(&trigger) as Arc<dyn berth_deploy::integration::DeploymentTrigger>,
            zones: ZoneRegistry::new(system, system_version),
            config: ControllerConfig {
                lock_timeout: Duration::from_millis(200),
                ..ControllerConfig::default()
            },
        };
        let jobs = Arc::new(JobController::new(controller));
        let runner = JobRunner::new(
            Arc::clone(&jobs),
            Arc::new(InternalStepRunner::new(Arc::clone(&jobs))),
            RunnerConfig::default(),
        );

        Self {
            clock,
            locks,
            registry,
            store,
            logs,
            config_server,
            tester_cloud,
            routing,
            artifacts,
            mailer,
            trigger,
            jobs,
            runner,
        }
    }

    /// The application every helper operates on.
    ///
    /// # Panics
    ///
    /// Panics if the fixed id fails to parse.
    #[must_use]
    pub fn app_id() -> ApplicationId {
        ApplicationId::from_parts("tenant", "application").expect("valid id")
    }

    /// The tester paired with [`Self::app_id`].
    #[must_use]
    pub fn tester_id() -> TesterId {
        TesterId::of(&Self::app_id())
    }

    /// The versions used by tests that never touch the artifact store.
    ///
    /// # Panics
    ///
    /// Panics if the fixed versions fail to parse.
    #[must_use]
    pub fn default_versions() -> Versions {
        Versions::new(
            "1.2.3".parse().expect("valid version"),
            ApplicationVersion::from_full(
                SourceRevision::new("repo", "branch", "bada55"),
                321,
                "a@b",
                None,
                None,
            ),
            None,
            None,
        )
    }

    /// Registers the default application, notifying `b@a` and the author on
    /// failure.
    pub async fn create_application(&self) {
        let mut application = Application::new(Self::app_id(), Some(1));
        application.notifications = Notifications::none()
            .with_emails(When::Failing, vec!["b@a".to_string()])
            .with_role(When::Failing, Role::Author);
        self.registry.put(application).await;
    }

    /// Submits a default package pair, returning the assigned version.
    ///
    /// # Panics
    ///
    /// Panics if the submission fails.
    pub async fn submit_default(&self) -> ApplicationVersion {
        self.jobs
            .submit(
                &Self::app_id(),
                SourceRevision::new("repo", "branch", "bada55"),
                "a@b",
                2,
                ApplicationPackage::new(b"application package".to_vec()),
                b"test package".to_vec(),
            )
            .await
            .expect("submission should be accepted")
    }

    /// Creates the application, submits, and starts a run of the given job.
    ///
    /// # Panics
    ///
    /// Panics if any stage fails.
    pub async fn new_run(&self, job_type: JobType) -> RunId {
        self.create_application().await;
        let version = self.submit_default().await;
        self.jobs
            .start(
                &Self::app_id(),
                job_type,
                Versions::new("1.2.3".parse().expect("valid version"), version, None, None),
            )
            .await
            .expect("start should be accepted")
    }

    /// Runs one maintenance tick.
    ///
    /// # Panics
    ///
    /// Panics if the tick fails.
    pub async fn run_once(&self) {
        self.runner.maintain().await.expect("maintenance tick should succeed");
    }

    /// Runs maintenance ticks until the last run of the given job has ended.
    ///
    /// # Panics
    ///
    /// Panics if the run has not ended after `max_ticks`.
    pub async fn run_until_ended(&self, job_type: JobType, max_ticks: usize) {
        for _ in 0..max_ticks {
            if let Ok(Some(run)) = self.jobs.last(&Self::app_id(), job_type).await {
                if run.has_ended() {
                    return;
                }
            }
            self.run_once().await;
        }
        let last = self.jobs.last(&Self::app_id(), job_type).await;
        panic!("run did not end within {max_ticks} ticks: {last:?}");
    }

    /// Registers endpoints for the given application in the given zone.
    pub fn set_endpoints(&self, application: &ApplicationId, zone: &ZoneId) {
        self.routing.set_endpoints(application, zone);
    }

    /// Marks services converged for the given application in the given zone.
    pub fn converge(&self, application: &ApplicationId, zone: &ZoneId) {
        self.config_server.converge_services(application, zone);
    }

    /// Returns the zone of the given job in this harness's system.
    #[must_use]
    pub fn zone(&self, job_type: JobType) -> ZoneId {
        job_type.zone(self.jobs.system())
    }

    /// Drives a fresh system test run up to started tests: deployments done,
    /// installations converged, tests running in the tester.
    ///
    /// # Panics
    ///
    /// Panics if the run does not reach started tests.
    pub async fn start_system_test_tests(&self) -> RunId {
        let id = self.new_run(JobType::SystemTest).await;
        let zone = self.zone(JobType::SystemTest);
        self.run_once().await;

        self.converge(&Self::app_id(), &zone);
        self.converge(Self::tester_id().id(), &zone);
        self.set_endpoints(&Self::app_id(), &zone);
        self.set_endpoints(Self::tester_id().id(), &zone);
        self.run_once().await;
        self.run_once().await;

        let run = self
            .jobs
            .run(&id)
            .await
            .expect("store should be readable")
            .expect("run should exist");
        assert_eq!(
            run.step_status(Step::StartTests),
            Some(StepStatus::Succeeded),
            "tests should have started"
        );
        assert_eq!(run.step_status(Step::EndTests), Some(StepStatus::Unfinished));
        id
    }
}

impl Default for DeploymentHarness {
    fn default() -> Self {
        Self::new()
    }
}

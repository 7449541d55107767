//! The job controller: run state, history, submission, and lifecycle.
//!
//! All locking discipline lives here. Three lock scopes exist, acquired in
//! the order {application-job, run, step}: the job lock serialises writes to
//! the last run and history; the run lock is the same key; a step lock is
//! held while that step executes. The single sanctioned inversion is the
//! brief acquisition of each prerequisite's step lock to confirm it is idle
//! before a step starts.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

use berth_core::{ApplicationId, Clock, LockLease, LockRegistry, TesterId, ZoneId};

use crate::application::{ApplicationPackage, ApplicationRegistry};
use crate::config::{ControllerConfig, ZoneRegistry};
use crate::error::{Error, Result};
use crate::integration::config_server::{ConfigServer, DeploymentId, ErrorCode};
use crate::integration::{
    ArtifactStore, DeploymentTrigger, JobReport, Mailer, RoutingLayer, TesterCloud,
};
use crate::job_type::JobType;
use crate::locking::{job_lock_key, step_lock_key, LockedStep};
use crate::persistence::{JobStore, LogEntry, LogLevel, LogStore, RunLog};
use crate::profile::JobProfile;
use crate::run::{Run, RunId, RunStatus};
use crate::step::Step;
use crate::versions::{ApplicationVersion, SourceRevision, Versions};

/// The bundle of collaborators the job controller operates on.
///
/// Injected rather than global: the only process-wide state anywhere is the
/// worker pool lifecycle of the maintainer.
pub struct Controller {
    /// The time source.
    pub clock: Arc<dyn Clock>,
    /// The lock registry backing all three lock scopes.
    pub locks: Arc<LockRegistry>,
    /// The durable store of run data.
    pub store: Arc<dyn JobStore>,
    /// The per-run log store.
    pub logs: Arc<dyn LogStore>,
    /// The registry of applications known to this controller.
    pub applications: Arc<ApplicationRegistry>,
    /// The config server deploying and monitoring applications.
    pub config_server: Arc<dyn ConfigServer>,
    /// The tester cloud running test code.
    pub tester_cloud: Arc<dyn TesterCloud>,
    /// The routing layer resolving endpoints.
    pub routing: Arc<dyn RoutingLayer>,
    /// The artifact store of application and test packages.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// The mailer for failure notifications.
    pub mailer: Arc<dyn Mailer>,
    /// Higher-level triggering, notified of completions.
    pub trigger: Arc<dyn DeploymentTrigger>,
    /// The zones of this system.
    pub zones: ZoneRegistry,
    /// Controller configuration.
    pub config: ControllerConfig,
}

/// Advances the steps of a run immediately, outside the periodic tick.
///
/// Implemented by the maintainer and registered with the controller so
/// manually deployed jobs don't wait for the next tick.
#[async_trait]
pub trait RunAdvancer: Send + Sync {
    /// Dispatches the ready steps of the given run once.
    async fn advance_run(&self, run: &Run);
}

/// The state and methods for controlling deployment jobs.
///
/// Keys are the [`ApplicationId`] of the real application a job is run for,
/// the [`JobType`], and the strictly increasing run number of that
/// combination. Jobs consist of sets of [`Step`]s, selected by
/// [`JobProfile`]s; each run is a [`Run`] holding the status of every step
/// plus some metadata.
pub struct JobController {
    controller: Controller,
    runner: RwLock<Option<Arc<dyn RunAdvancer>>>,
}

impl JobController {
    /// Creates a job controller over the given collaborators.
    #[must_use]
    pub fn new(controller: Controller) -> Self {
        Self {
            controller,
            runner: RwLock::new(None),
        }
    }

    /// Returns the collaborators of this controller.
    #[must_use]
    pub const fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Returns the system this controller runs in.
    #[must_use]
    pub fn system(&self) -> berth_core::SystemName {
        self.controller.zones.system()
    }

    /// Returns the configured history length.
    #[must_use]
    pub const fn history_length(&self) -> usize {
        self.controller.config.history_length
    }

    /// Registers the advancer invoked when manual deployments need to run
    /// before the next maintenance tick.
    pub fn set_runner(&self, runner: Arc<dyn RunAdvancer>) {
        *self.runner.write().expect("runner registration poisoned") = Some(runner);
    }

    fn runner(&self) -> Option<Arc<dyn RunAdvancer>> {
        self.runner
            .read()
            .expect("runner registration poisoned")
            .clone()
    }

    // --- Queries ---

    /// Returns all applications registered for internal deployment.
    pub async fn applications(&self) -> Vec<ApplicationId> {
        let mut applications = Vec::new();
        for id in self.controller.applications.ids().await {
            if let Some(application) = self.controller.applications.get(&id).await {
                if application.deployed_internally {
                    applications.push(id);
                }
            }
        }
        applications
    }

    /// Returns all job types which have been run for the given application.
    pub async fn jobs(&self, id: &ApplicationId) -> Result<Vec<JobType>> {
        let mut jobs = Vec::new();
        for job_type in JobType::ALL {
            if self.last(id, job_type).await?.is_some() {
                jobs.push(job_type);
            }
        }
        Ok(jobs)
    }

    /// Returns all known runs of the given job, keyed by run number.
    pub async fn runs(
        &self,
        id: &ApplicationId,
        job_type: JobType,
    ) -> Result<BTreeMap<u64, Run>> {
        let mut runs = self.controller.store.read_historic_runs(id, job_type).await?;
        if let Some(last) = self.controller.store.read_last_run(id, job_type).await? {
            runs.insert(last.id().number(), last);
        }
        Ok(runs)
    }

    /// Returns the run with the given id, if it exists.
    pub async fn run(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self
            .runs(id.application(), id.job_type())
            .await?
            .remove(&id.number())
            .filter(|run| run.id() == id))
    }

    /// Returns the last run of the given job, if one has been run.
    pub async fn last(&self, id: &ApplicationId, job_type: JobType) -> Result<Option<Run>> {
        self.controller.store.read_last_run(id, job_type).await
    }

    /// Returns the run with the given id, provided it is still active.
    pub async fn active(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self
            .last(id.application(), id.job_type())
            .await?
            .filter(|run| !run.has_ended())
            .filter(|run| run.id() == id))
    }

    /// Returns all active runs, across all registered applications.
    pub async fn active_runs(&self) -> Result<Vec<Run>> {
        let mut active = Vec::new();
        for id in self.applications().await {
            for job_type in JobType::ALL {
                if let Some(run) = self.last(&id, job_type).await? {
                    if !run.has_ended() {
                        active.push(run);
                    }
                }
            }
        }
        Ok(active)
    }

    /// Returns the log of the given run, if the run exists: the buffered log
    /// while the run is active, the archive once it has finished.
    pub async fn details(&self, id: &RunId) -> Result<Option<RunLog>> {
        let _lease = self.lock_job(id.application(), id.job_type()).await?;
        let runs = self.runs(id.application(), id.job_type()).await?;
        if !runs.contains_key(&id.number()) {
            return Ok(None);
        }
        if self.active_unlocked(id).await?.is_some() {
            Ok(Some(
                self.controller
                    .logs
                    .read_active(id.application(), id.job_type(), 0)
                    .await?,
            ))
        } else {
            self.controller.logs.read_finished(id, 0).await
        }
    }

    // --- Logging ---

    /// Stores the given log messages for the given run and step.
    pub async fn log(
        &self,
        id: &RunId,
        step: Step,
        level: LogLevel,
        messages: Vec<String>,
    ) -> Result<()> {
        let entries = messages
            .into_iter()
            .map(|message| LogEntry::new(0, self.controller.clock.millis(), level, message))
            .collect();
        self.log_entries(id, step, entries).await
    }

    /// Stores the given log entries for the given run and step.
    pub async fn log_entries(&self, id: &RunId, step: Step, entries: Vec<LogEntry>) -> Result<()> {
        let _lease = self.lock_job(id.application(), id.job_type()).await?;
        if self.active_unlocked(id).await?.is_none() {
            return Ok(());
        }
        self.controller
            .logs
            .append(id.application(), id.job_type(), step, entries)
            .await
    }

    /// Fetches any new test log entries, and records the id of the last of
    /// these, for continuation.
    pub async fn update_test_log(&self, id: &RunId) -> Result<()> {
        let Some(run) = self.active(id).await? else {
            return Ok(());
        };
        if !run.ready_steps().contains(&Step::EndTests) {
            return Ok(());
        }
        let Some(endpoint) = self.tester_endpoint(id).await? else {
            return Ok(());
        };
        let entries = self
            .controller
            .tester_cloud
            .log(&endpoint, run.last_test_log_entry())
            .await?;
        if entries.is_empty() {
            return Ok(());
        }
        let last = entries.iter().map(|entry| entry.id).max().unwrap_or(0);

        let _lease = self.lock_job(id.application(), id.job_type()).await?;
        if self.active_unlocked(id).await?.is_some() {
            self.controller
                .logs
                .append(id.application(), id.job_type(), Step::EndTests, entries)
                .await?;
            self.write_active(id, |run| Ok(run.with_last_test_log_entry(last)))
                .await?;
        }
        Ok(())
    }

    // --- Mutations ---

    /// Changes the status of the given step, for the given run, provided it
    /// is still active.
    pub async fn update(&self, id: &RunId, status: RunStatus, step: &LockedStep) -> Result<()> {
        self.locked(id, |run| Ok(run.with_step_status(status, step)))
            .await
    }

    /// Stores the given PEM as the tester certificate for this run, or fails
    /// if it is already set.
    pub async fn store_tester_certificate(&self, id: &RunId, pem: String) -> Result<()> {
        self.locked(id, |run| run.with_tester_certificate(pem)).await
    }

    /// Marks the given run as aborted; no further ordinary steps will run,
    /// but always-run steps still try to succeed. Idempotent.
    #[tracing::instrument(skip(self), fields(run = %id))]
    pub async fn abort(&self, id: &RunId) -> Result<()> {
        self.locked(id, |run| Ok(run.aborted())).await
    }

    /// Changes the status of the given run to inactive, and stores it as a
    /// historic run. History exceeding the configured length or age is
    /// evicted, oldest first, and evicted runs' logs deleted.
    #[tracing::instrument(skip(self), fields(run = %id))]
    pub async fn finish(&self, id: &RunId) -> Result<()> {
        let _lease = self.lock_job(id.application(), id.job_type()).await?;
        let Some(run) = self.active_unlocked(id).await? else {
            return Ok(());
        };
        let now = self.controller.clock.now();
        let finished = run.finished(now);

        // Write history before the last-run document, in case the latter fails.
        let mut history = self
            .controller
            .store
            .read_historic_runs(id.application(), id.job_type())
            .await?;
        history.insert(id.number(), finished.clone());

        let last_number = id.number();
        let cutoff = now
            - chrono::Duration::from_std(self.controller.config.max_history_age)
                .map_err(|e| Error::internal(e.to_string()))?;
        while let Some((&number, oldest)) = history.first_key_value() {
            if number == last_number {
                break;
            }
            let evict = number + self.controller.config.history_length as u64 <= last_number
                || oldest.start() < cutoff;
            if !evict {
                break;
            }
            self.controller.logs.delete(oldest.id()).await?;
            history.remove(&number);
        }
        self.controller
            .store
            .write_historic_runs(id.application(), id.job_type(), &history)
            .await?;
        self.controller.logs.flush(id).await?;
        self.controller.store.write_last_run(&finished).await?;

        metrics::counter!(
            crate::metrics::names::RUNS_FINISHED_TOTAL,
            crate::metrics::labels::OUTCOME => finished.status().to_string(),
        )
        .increment(1);
        Ok(())
    }

    /// Accepts and stores a new application package and test package pair
    /// under a generated application version key.
    #[tracing::instrument(skip(self, revision, package, test_package), fields(application = %id))]
    pub async fn submit(
        &self,
        id: &ApplicationId,
        revision: SourceRevision,
        author_email: &str,
        project_id: u64,
        package: ApplicationPackage,
        test_package: Vec<u8>,
    ) -> Result<ApplicationVersion> {
        let application = self
            .controller
            .applications
            .update(id, |application| {
                application.deployed_internally = true;
                application.project_id = Some(project_id);
                application.last_build += 1;
            })
            .await?;

        let version = ApplicationVersion::from_full(
            revision,
            application.last_build,
            author_email,
            package.compile_version.clone(),
            package.build_time,
        );
        self.controller.artifacts.put(id, &version, package.content).await?;
        self.controller
            .artifacts
            .put_tester(&TesterId::of(id), &version, test_package)
            .await?;
        self.prune_packages(id).await?;

        self.controller
            .trigger
            .notify_of_completion(JobReport::of_submission(
                id.clone(),
                project_id,
                version.clone(),
            ))
            .await?;
        Ok(version)
    }

    /// Orders a run of the given type, or fails if that job is already
    /// running.
    #[tracing::instrument(skip(self, versions), fields(application = %id, job = %job_type))]
    pub async fn start(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        versions: Versions,
    ) -> Result<RunId> {
        if !job_type.environment().is_manually_deployed()
            && versions.target_application().is_unknown()
        {
            return Err(Error::InvalidVersions);
        }
        let application = self.controller.applications.require(id).await?;
        if !application.deployed_internally {
            return Err(Error::NotInternallyDeployed {
                application: id.clone(),
            });
        }

        let _lease = self.lock_job(id, job_type).await?;
        let last = self.controller.store.read_last_run(id, job_type).await?;
        if last.as_ref().is_some_and(|run| !run.has_ended()) {
            return Err(Error::AlreadyRunning {
                application: id.clone(),
                job_type,
            });
        }
        let number = last.map_or(0, |run| run.id().number()) + 1;
        let run = Run::initial(
            RunId::new(id.clone(), job_type, number),
            versions,
            self.controller.clock.now(),
        );
        self.controller.store.write_last_run(&run).await?;
        Ok(run.id().clone())
    }

    /// Stores the given package and starts a deployment of it, after aborting
    /// any ongoing deployment of the same job. Only allowed to manually
    /// deployed environments.
    #[tracing::instrument(skip(self, platform, package), fields(application = %id, job = %job_type))]
    pub async fn deploy(
        &self,
        id: &ApplicationId,
        job_type: JobType,
        platform: Option<berth_core::PlatformVersion>,
        package: ApplicationPackage,
    ) -> Result<()> {
        if !job_type.environment().is_manually_deployed() {
            return Err(Error::NotManuallyDeployed { job_type });
        }
        let application = self.controller.applications.require(id).await?;
        if !application.deployed_internally {
            self.controller
                .applications
                .update(id, |application| application.deployed_internally = true)
                .await?;
        }

        if let Some(last) = self.last(id, job_type).await? {
            if !last.has_ended() {
                self.abort_and_wait(last.id().clone()).await?;
            }
        }

        let zone = job_type.zone(self.system());
        self.controller
            .artifacts
            .put_dev(id, &zone, package.content)
            .await?;
        let versions = Versions::new(
            platform.unwrap_or_else(|| self.controller.zones.system_version().clone()),
            ApplicationVersion::unknown(),
            None,
            None,
        );
        self.start(id, job_type, versions).await?;

        // Kick the runner so the deployment doesn't wait for the next tick.
        if let (Some(run), Some(runner)) = (self.last(id, job_type).await?, self.runner()) {
            runner.advance_run(&run).await;
        }
        Ok(())
    }

    /// Unregisters the given application and makes all associated data
    /// eligible for garbage collection.
    #[tracing::instrument(skip(self), fields(application = %id))]
    pub async fn unregister(&self, id: &ApplicationId) -> Result<()> {
        if self.controller.applications.get(id).await.is_some() {
            self.controller
                .applications
                .update(id, |application| application.deployed_internally = false)
                .await?;
        }
        for job_type in self.jobs(id).await? {
            if let Some(last) = self.last(id, job_type).await? {
                self.abort(last.id()).await?;
            }
        }
        Ok(())
    }

    /// Deletes run data and tester deployments of applications which are no
    /// longer registered.
    ///
    /// Destruction is deferred while any step of a job may still be
    /// executing: every step lock of the profile is taken before deletion,
    /// and an unreachable lock skips the application until the next cycle.
    pub async fn collect_garbage(&self) -> Result<()> {
        let registered: HashSet<ApplicationId> =
            self.applications().await.into_iter().collect();
        let stored = self.controller.store.applications_with_jobs().await?;

        'applications: for application in stored {
            if registered.contains(&application) {
                continue;
            }
            let tester = TesterId::of(&application);
            for job_type in self.jobs(&application).await? {
                // Hold every step lock of the profile, so no in-flight step
                // races the deletion. Acquired latest-first, the same
                // direction as the prerequisite idle-checks.
                let mut leases: Vec<LockLease> = Vec::new();
                for step in JobProfile::of(job_type).steps().iter().rev() {
                    match self.lock_step(&application, job_type, *step).await {
                        Ok(lease) => leases.push(lease),
                        Err(_) => continue 'applications,
                    }
                }
                let Ok(_job_lease) = self.lock_job(&application, job_type).await else {
                    continue 'applications;
                };
                if self.deactivate_tester(&tester, job_type).await.is_err() {
                    continue 'applications;
                }
                self.controller
                    .store
                    .delete_job_data(&application, job_type)
                    .await?;
            }
            self.controller
                .store
                .delete_application_data(&application)
                .await?;
            self.controller.logs.delete_application(&application).await?;
        }
        Ok(())
    }

    /// Deactivates the tester deployment of the given job. A deployment
    /// already gone counts as deactivated.
    pub async fn deactivate_tester(&self, tester: &TesterId, job_type: JobType) -> Result<()> {
        let deployment =
            DeploymentId::new(tester.id().clone(), job_type.zone(self.system()));
        match self.controller.config_server.deactivate(&deployment).await {
            Ok(()) => Ok(()),
            Err(e) if e.code == ErrorCode::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // --- Endpoints and zones ---

    /// Returns the endpoint of the tester of the given run, if routing knows
    /// one.
    pub async fn tester_endpoint(&self, id: &RunId) -> Result<Option<Url>> {
        let deployment = DeploymentId::new(
            id.tester().id().clone(),
            id.job_type().zone(self.system()),
        );
        Ok(self
            .controller
            .routing
            .endpoints(&deployment)
            .await?
            .into_iter()
            .next()
            .map(|endpoint| endpoint.url))
    }

    /// Returns the zone tested by the given job, followed by all production
    /// zones of the application.
    pub async fn tested_zone_and_production_zones(
        &self,
        id: &ApplicationId,
        job_type: JobType,
    ) -> Result<Vec<ZoneId>> {
        let mut zones = vec![job_type.zone(self.system())];
        if let Some(application) = self.controller.applications.get(id).await {
            for zone in application.production_deployments.keys() {
                if !zones.contains(zone) {
                    zones.push(zone.clone());
                }
            }
        }
        Ok(zones)
    }

    // --- Locking ---

    /// Locks and modifies the run with the given id, provided it is still
    /// active.
    pub async fn locked(
        &self,
        id: &RunId,
        modification: impl FnOnce(Run) -> Result<Run> + Send,
    ) -> Result<()> {
        let _lease = self.lock_job(id.application(), id.job_type()).await?;
        self.write_active(id, modification).await
    }

    /// Locks the given step, briefly takes each prerequisite's step lock to
    /// confirm no predecessor is executing, then performs the given action.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] when a lock cannot be acquired in time; the
    /// maintainer treats that as "try again next tick".
    pub async fn locked_step<F, Fut, T>(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        step: Step,
        action: F,
    ) -> Result<T>
    where
        F: FnOnce(LockedStep) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let lease = self.lock_step(application, job_type, step).await?;
        for prerequisite in step.prerequisites() {
            let _idle = self
                .lock_step(application, job_type, *prerequisite)
                .await?;
        }
        action(LockedStep::new(lease, step)).await
    }

    async fn lock_job(&self, application: &ApplicationId, job_type: JobType) -> Result<LockLease> {
        Ok(self
            .controller
            .locks
            .lock(&job_lock_key(application, job_type), self.lock_timeout())
            .await?)
    }

    async fn lock_step(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        step: Step,
    ) -> Result<LockLease> {
        Ok(self
            .controller
            .locks
            .lock(
                &step_lock_key(application, job_type, step),
                self.lock_timeout(),
            )
            .await?)
    }

    const fn lock_timeout(&self) -> Duration {
        self.controller.config.lock_timeout
    }

    // --- Internal ---

    /// Reads the active run with the given id; the caller holds the job lock.
    async fn active_unlocked(&self, id: &RunId) -> Result<Option<Run>> {
        Ok(self
            .controller
            .store
            .read_last_run(id.application(), id.job_type())
            .await?
            .filter(|run| !run.has_ended())
            .filter(|run| run.id() == id))
    }

    /// Applies a modification to the active run and writes it back; the
    /// caller holds the job lock.
    async fn write_active(
        &self,
        id: &RunId,
        modification: impl FnOnce(Run) -> Result<Run> + Send,
    ) -> Result<()> {
        if let Some(run) = self.active_unlocked(id).await? {
            let run = modification(run)?;
            self.controller.store.write_last_run(&run).await?;
        }
        Ok(())
    }

    /// Aborts a run and drives it to completion through the registered
    /// runner.
    async fn abort_and_wait(&self, id: RunId) -> Result<()> {
        self.abort(&id).await?;
        loop {
            match self.last(id.application(), id.job_type()).await? {
                Some(last) if !last.has_ended() => {
                    let Some(runner) = self.runner() else {
                        return Err(Error::internal(
                            "no runner registered to drain the aborted run",
                        ));
                    };
                    runner.advance_run(&last).await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                _ => return Ok(()),
            }
        }
    }

    async fn prune_packages(&self, id: &ApplicationId) -> Result<()> {
        let application = self.controller.applications.require(id).await?;
        if let Some(oldest) = application.oldest_deployed_application().cloned() {
            self.controller.artifacts.prune(id, &oldest).await?;
            self.controller
                .artifacts
                .prune_tester(&TesterId::of(id), &oldest)
                .await?;
        }
        Ok(())
    }
}

//! Step execution: the step-runner interface and the periodic maintainer.

mod internal;

pub use internal::{
    InternalStepRunner, CERTIFICATE_TIMEOUT, ENDPOINT_TIMEOUT, INSTALLATION_TIMEOUT,
};

use async_trait::async_trait;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::RunnerConfig;
use crate::controller::{JobController, RunAdvancer};
use crate::error::Result;
use crate::locking::LockedStep;
use crate::metrics::{labels, names};
use crate::run::{Run, RunId, RunStatus};
use crate::step::Step;

/// Runs a single step of a run, deciding whether to advance, retry, fail, or
/// abort.
///
/// `None` means *no decision yet; retry next cycle*. A returned status is
/// folded into the run with [`Run::with_step_status`].
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Runs the given locked step of the given run.
    async fn run(&self, step: &LockedStep, id: &RunId) -> Option<RunStatus>;
}

/// The periodic maintainer: each tick enumerates all active runs, leases
/// every ready step, and dispatches it to the step runner on a bounded
/// worker pool.
pub struct JobRunner {
    jobs: Arc<JobController>,
    runner: Arc<dyn StepRunner>,
    config: RunnerConfig,
    workers: Arc<Semaphore>,
}

impl JobRunner {
    /// Creates a maintainer over the given controller and step runner, and
    /// registers it as the controller's immediate advancer.
    #[must_use]
    pub fn new(
        jobs: Arc<JobController>,
        runner: Arc<dyn StepRunner>,
        config: RunnerConfig,
    ) -> Arc<Self> {
        let workers = Arc::new(Semaphore::new(config.workers));
        let this = Arc::new(Self {
            jobs,
            runner,
            config,
            workers,
        });
        this.jobs.set_runner(Arc::clone(&this) as Arc<dyn RunAdvancer>);
        this
    }

    /// Starts the periodic maintenance loop on the runtime, returning its
    /// handle.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.tick_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.maintain().await {
                    tracing::warn!(error = %e, "maintenance tick failed");
                }
            }
        })
    }

    /// Runs one maintenance tick: aborts timed-out runs, dispatches every
    /// ready step of every active run, and collects garbage. Waits for all
    /// dispatched steps to complete.
    pub async fn maintain(&self) -> Result<()> {
        let started = Instant::now();
        counter!(names::MAINTENANCE_TICKS_TOTAL).increment(1);

        let mut tasks = JoinSet::new();
        for run in self.jobs.active_runs().await? {
            let run = match self.abort_if_timed_out(run).await? {
                Some(run) => run,
                None => continue,
            };
            for step in run.ready_steps() {
                let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() else {
                    tracing::debug!(run = %run.id(), %step, "worker pool saturated, skipping step");
                    continue;
                };
                counter!(
                    names::STEPS_DISPATCHED_TOTAL,
                    labels::STEP => step.name(),
                    labels::JOB_TYPE => run.id().job_type().job_name(),
                )
                .increment(1);

                let jobs = Arc::clone(&self.jobs);
                let runner = Arc::clone(&self.runner);
                let id = run.id().clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    advance_step(&jobs, &runner, &id, step).await;
                });
            }
        }
        while tasks.join_next().await.is_some() {}

        self.jobs.collect_garbage().await?;
        histogram!(names::MAINTENANCE_TICK_SECONDS).record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Aborts the run if it has exceeded the job timeout while still
    /// `running`, returning its refreshed state.
    async fn abort_if_timed_out(&self, run: Run) -> Result<Option<Run>> {
        let age = self.jobs.controller().clock.now() - run.start();
        let timeout = chrono::Duration::from_std(self.config.job_timeout)
            .unwrap_or(chrono::Duration::MAX);
        if age >= timeout && !run.has_failed() {
            tracing::info!(run = %run.id(), "aborting run past its job timeout");
            self.jobs.abort(run.id()).await?;
            return self.jobs.active(run.id()).await;
        }
        Ok(Some(run))
    }
}

#[async_trait]
impl RunAdvancer for JobRunner {
    async fn advance_run(&self, run: &Run) {
        // Not on the worker pool: the caller wants the steps advanced now.
        for step in run.ready_steps() {
            advance_step(&self.jobs, &self.runner, run.id(), step).await;
        }
    }
}

/// Executes one step of one run: takes the step lock, re-reads the run,
/// re-checks readiness, runs the step, and folds the outcome in. After the
/// step lock is released, finishes the run if no ready steps remain.
async fn advance_step(
    jobs: &Arc<JobController>,
    runner: &Arc<dyn StepRunner>,
    id: &RunId,
    step: Step,
) {
    let result = {
        let task_jobs = Arc::clone(jobs);
        let task_runner = Arc::clone(runner);
        let run_id = id.clone();
        jobs.locked_step(id.application(), id.job_type(), step, move |locked| {
            async move {
                // The run may have progressed or ended since dispatch.
                let Some(run) = task_jobs.active(&run_id).await? else {
                    return Ok(());
                };
                if !run.ready_steps().contains(&locked.step()) {
                    return Ok(());
                }
                if let Some(status) = task_runner.run(&locked, run.id()).await {
                    counter!(
                        names::STEP_OUTCOMES_TOTAL,
                        labels::STEP => locked.step().name(),
                        labels::OUTCOME => status.to_string(),
                    )
                    .increment(1);
                    task_jobs.update(run.id(), status, &locked).await?;
                }
                Ok(())
            }
        })
        .await
    };

    match result {
        Ok(()) => {}
        Err(e) if e.is_timeout() => {
            tracing::debug!(run = %id, %step, "step lock contended, will retry next tick");
            return;
        }
        Err(e) => {
            tracing::warn!(run = %id, %step, error = %e, "step execution failed");
        }
    }

    // Finish outside the step lock: finishing takes the job lock.
    if let Ok(Some(run)) = jobs.active(id).await {
        if run.ready_steps().is_empty() {
            if let Err(e) = jobs.finish(id).await {
                tracing::warn!(run = %id, error = %e, "failed to finish run");
            }
        }
    }
}

//! Maintainer loop tests: step dispatch, readiness, cleanup, history, locks,
//! and garbage collection, driven with synthetic step runners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use berth_core::LockRegistry;
use berth_deploy::config::RunnerConfig;
use berth_deploy::error::Error;
use berth_deploy::job_type::JobType;
use berth_deploy::locking::LockedStep;
use berth_deploy::run::{RunId, RunStatus};
use berth_deploy::runner::{JobRunner, StepRunner};
use berth_deploy::step::{Step, StepStatus};
use berth_deploy::versions::Versions;
use berth_test_utils::DeploymentHarness;

/// Returns the outcome configured for the step, or nothing (retry later).
struct MappedRunner {
    outcomes: Arc<Mutex<HashMap<Step, RunStatus>>>,
}

#[async_trait]
impl StepRunner for MappedRunner {
    async fn run(&self, step: &LockedStep, _id: &RunId) -> Option<RunStatus> {
        self.outcomes.lock().unwrap().get(&step.step()).copied()
    }
}

/// Succeeds every step, except that staging tests fail to start their tests.
struct StagingStartTestsFails;

#[async_trait]
impl StepRunner for StagingStartTestsFails {
    async fn run(&self, step: &LockedStep, id: &RunId) -> Option<RunStatus> {
        if id.job_type() == JobType::StagingTest && step.step() == Step::StartTests {
            Some(RunStatus::Error)
        } else {
            Some(RunStatus::Running)
        }
    }
}

/// Succeeds every step.
struct AlwaysRunning;

#[async_trait]
impl StepRunner for AlwaysRunning {
    async fn run(&self, _step: &LockedStep, _id: &RunId) -> Option<RunStatus> {
        Some(RunStatus::Running)
    }
}

/// Parks on the tester deployment step, holding its lock, until released.
struct WaitingRunner {
    entered: Arc<tokio::sync::Barrier>,
    release: Arc<tokio::sync::Barrier>,
}

#[async_trait]
impl StepRunner for WaitingRunner {
    async fn run(&self, step: &LockedStep, _id: &RunId) -> Option<RunStatus> {
        if step.step() == Step::DeployTester {
            self.entered.wait().await;
            self.release.wait().await;
        }
        Some(RunStatus::Running)
    }
}

fn versions() -> Versions {
    DeploymentHarness::default_versions()
}

async fn prepared_harness() -> DeploymentHarness {
    let harness = DeploymentHarness::new();
    harness.create_application().await;
    harness.submit_default().await;
    harness
}

async fn run_to_completion(runner: &Arc<JobRunner>, harness: &DeploymentHarness, job: JobType) {
    for _ in 0..16 {
        if harness
            .jobs
            .last(&DeploymentHarness::app_id(), job)
            .await
            .unwrap()
            .is_some_and(|run| run.has_ended())
        {
            return;
        }
        runner.maintain().await.unwrap();
    }
    panic!("run of {job} did not complete");
}

#[tokio::test]
async fn multi_threaded_execution_finishes() {
    let harness = prepared_harness().await;
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(StagingStartTestsFails),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();

    harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    let second = harness.jobs.start(&id, JobType::SystemTest, versions()).await;
    assert!(
        matches!(second, Err(Error::AlreadyRunning { .. })),
        "a second start of the same job must be refused"
    );
    harness
        .jobs
        .start(&id, JobType::StagingTest, versions())
        .await
        .unwrap();

    for job in [JobType::SystemTest, JobType::StagingTest] {
        let last = harness.jobs.last(&id, job).await.unwrap().unwrap();
        assert!(last
            .steps()
            .values()
            .all(|status| *status == StepStatus::Unfinished));
        assert!(!last.has_ended());
    }

    run_to_completion(&runner, &harness, JobType::SystemTest).await;
    run_to_completion(&runner, &harness, JobType::StagingTest).await;

    let system = harness.jobs.last(&id, JobType::SystemTest).await.unwrap().unwrap();
    assert!(system
        .steps()
        .values()
        .all(|status| *status == StepStatus::Succeeded));
    assert_eq!(system.status(), RunStatus::Success);
    assert!(system.has_ended());

    let staging = harness.jobs.last(&id, JobType::StagingTest).await.unwrap().unwrap();
    assert!(staging.has_ended());
    assert!(staging.has_failed());
    assert_eq!(staging.status(), RunStatus::Error);
    assert_eq!(staging.step_status(Step::StartTests), Some(StepStatus::Failed));
}

#[tokio::test]
async fn step_logic_advances_ready_steps() {
    let harness = prepared_harness().await;
    let outcomes = Arc::new(Mutex::new(HashMap::new()));
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(MappedRunner {
            outcomes: Arc::clone(&outcomes),
        }),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();

    let first = harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    let run = |harness: &DeploymentHarness| {
        let jobs = Arc::clone(&harness.jobs);
        let id = id.clone();
        async move { jobs.last(&id, JobType::SystemTest).await.unwrap().unwrap() }
    };

    // No outcomes: nothing advances.
    let steps_before = run(&harness).await.steps().clone();
    runner.maintain().await.unwrap();
    assert_eq!(steps_before, *run(&harness).await.steps());
    assert_eq!(
        run(&harness).await.ready_steps(),
        vec![Step::DeployTester, Step::DeployReal]
    );

    outcomes.lock().unwrap().insert(Step::DeployTester, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(
        run(&harness).await.ready_steps(),
        vec![Step::InstallTester, Step::DeployReal]
    );

    outcomes.lock().unwrap().insert(Step::DeployReal, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(
        run(&harness).await.ready_steps(),
        vec![Step::InstallTester, Step::InstallReal]
    );

    outcomes.lock().unwrap().insert(Step::InstallReal, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(run(&harness).await.ready_steps(), vec![Step::InstallTester]);

    outcomes.lock().unwrap().insert(Step::InstallTester, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(run(&harness).await.ready_steps(), vec![Step::StartTests]);

    outcomes.lock().unwrap().insert(Step::StartTests, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(run(&harness).await.ready_steps(), vec![Step::EndTests]);

    // Failure ending tests fails the run, but always-run steps continue.
    outcomes.lock().unwrap().insert(Step::EndTests, RunStatus::TestFailure);
    runner.maintain().await.unwrap();
    assert!(run(&harness).await.has_failed());
    assert_eq!(run(&harness).await.ready_steps(), vec![Step::CopyNodeLogs]);

    // Abortion does nothing, as the run has already failed.
    harness.jobs.abort(&first).await.unwrap();
    assert_eq!(run(&harness).await.status(), RunStatus::TestFailure);
    assert_eq!(run(&harness).await.ready_steps(), vec![Step::CopyNodeLogs]);

    outcomes.lock().unwrap().insert(Step::CopyNodeLogs, RunStatus::Running);
    runner.maintain().await.unwrap();
    assert_eq!(
        run(&harness).await.ready_steps(),
        vec![Step::DeactivateReal, Step::DeactivateTester]
    );

    outcomes.lock().unwrap().insert(Step::DeactivateReal, RunStatus::Running);
    outcomes.lock().unwrap().insert(Step::DeactivateTester, RunStatus::Running);
    outcomes.lock().unwrap().insert(Step::Report, RunStatus::Running);
    runner.maintain().await.unwrap();
    runner.maintain().await.unwrap();
    let finished = run(&harness).await;
    assert!(finished.has_failed());
    assert!(finished.has_ended());
    assert_eq!(finished.status(), RunStatus::TestFailure);

    // A new run is attempted, with the next number.
    harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    assert_eq!(run(&harness).await.id().number(), first.number() + 1);

    // Tester deployment fails: remaining always-run steps succeed, and the
    // run finishes, without having been aborted.
    outcomes.lock().unwrap().insert(Step::DeployTester, RunStatus::Error);
    for _ in 0..4 {
        runner.maintain().await.unwrap();
    }
    let failed = run(&harness).await;
    assert!(failed.has_ended());
    assert!(failed.has_failed());
    assert_eq!(failed.status(), RunStatus::Error);
    assert_eq!(failed.step_status(Step::DeployTester), Some(StepStatus::Failed));
    assert_eq!(
        failed.step_status(Step::InstallTester),
        Some(StepStatus::Unfinished)
    );
    assert_eq!(failed.step_status(Step::Report), Some(StepStatus::Succeeded));

    assert_eq!(harness.jobs.runs(&id, JobType::SystemTest).await.unwrap().len(), 2);

    // A third run starts; unregistering then aborts it, and maintenance
    // collects all data once no step is executing.
    harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    harness.jobs.unregister(&id).await.unwrap();
    runner.maintain().await.unwrap();
    assert!(harness.jobs.last(&id, JobType::SystemTest).await.unwrap().is_none());
    assert!(harness.jobs.runs(&id, JobType::SystemTest).await.unwrap().is_empty());
}

#[tokio::test]
async fn step_locks_block_prerequisite_checks_and_garbage_collection() {
    let harness = prepared_harness().await;
    let entered = Arc::new(tokio::sync::Barrier::new(2));
    let release = Arc::new(tokio::sync::Barrier::new(2));
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(WaitingRunner {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();

    let run_id = harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();

    let tick = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.maintain().await })
    };
    entered.wait().await;

    // The tester deployment step holds its lock, so a step gated on it
    // cannot confirm its prerequisite is idle.
    let blocked = harness
        .jobs
        .locked_step(&id, JobType::SystemTest, Step::InstallTester, |_locked| async {
            Ok(())
        })
        .await;
    assert!(matches!(blocked, Err(Error::Timeout { .. })));

    // Unregister mid-step: the run disappears from the active view, but its
    // data survives while the step is still executing.
    assert_eq!(
        harness
            .jobs
            .active_runs()
            .await
            .unwrap()
            .iter()
            .map(|run| run.id().clone())
            .collect::<Vec<_>>(),
        vec![run_id.clone()]
    );
    harness.registry.remove(&id).await;
    assert!(harness.jobs.active_runs().await.unwrap().is_empty());

    harness.jobs.collect_garbage().await.unwrap();
    assert_eq!(
        harness
            .jobs
            .last(&id, JobType::SystemTest)
            .await
            .unwrap()
            .map(|run| run.id().clone()),
        Some(run_id)
    );

    // The step lets go; the tick completes and its own garbage collection
    // throws the data out.
    release.wait().await;
    tick.await.unwrap().unwrap();
    harness.jobs.collect_garbage().await.unwrap();
    assert!(harness.jobs.last(&id, JobType::SystemTest).await.unwrap().is_none());
}

#[tokio::test]
async fn history_is_pruned_at_capacity() {
    let harness = prepared_harness().await;
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(AlwaysRunning),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();
    let length = harness.jobs.history_length() as u64;

    for _ in 0..length {
        harness
            .jobs
            .start(&id, JobType::SystemTest, versions())
            .await
            .unwrap();
        run_to_completion(&runner, &harness, JobType::SystemTest).await;
    }

    let runs = harness.jobs.runs(&id, JobType::SystemTest).await.unwrap();
    assert_eq!(runs.len(), 256);
    let first = RunId::new(id.clone(), JobType::SystemTest, 1);
    assert!(harness.jobs.details(&first).await.unwrap().is_some());

    harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    run_to_completion(&runner, &harness, JobType::SystemTest).await;

    let runs = harness.jobs.runs(&id, JobType::SystemTest).await.unwrap();
    assert_eq!(runs.len(), 256);
    assert_eq!(runs.keys().next(), Some(&2));
    assert!(harness.jobs.details(&first).await.unwrap().is_none());
    let newest = RunId::new(id.clone(), JobType::SystemTest, length + 1);
    assert!(harness.jobs.details(&newest).await.unwrap().is_some());
}

#[tokio::test]
async fn stuck_runs_are_aborted_after_the_job_timeout() {
    let harness = prepared_harness().await;
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(MappedRunner {
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();

    harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();
    harness
        .clock
        .advance(RunnerConfig::default().job_timeout + Duration::from_secs(1));
    runner.maintain().await.unwrap();

    let run = harness.jobs.last(&id, JobType::SystemTest).await.unwrap().unwrap();
    assert_eq!(run.status(), RunStatus::Aborted);
}

#[tokio::test]
async fn abort_is_idempotent() {
    let harness = prepared_harness().await;
    let id = DeploymentHarness::app_id();
    let run_id = harness
        .jobs
        .start(&id, JobType::SystemTest, versions())
        .await
        .unwrap();

    harness.jobs.abort(&run_id).await.unwrap();
    let once = harness.jobs.last(&id, JobType::SystemTest).await.unwrap().unwrap();
    harness.jobs.abort(&run_id).await.unwrap();
    let twice = harness.jobs.last(&id, JobType::SystemTest).await.unwrap().unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice.status(), RunStatus::Aborted);
}

#[tokio::test]
async fn garbage_collection_eventually_clears_unregistered_applications() {
    let harness = prepared_harness().await;
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(AlwaysRunning),
        RunnerConfig::default(),
    );
    let id = DeploymentHarness::app_id();

    for job in [JobType::SystemTest, JobType::StagingTest] {
        harness.jobs.start(&id, job, versions()).await.unwrap();
        run_to_completion(&runner, &harness, job).await;
    }
    harness.jobs.unregister(&id).await.unwrap();

    harness.jobs.collect_garbage().await.unwrap();
    for job in [JobType::SystemTest, JobType::StagingTest] {
        assert!(harness.jobs.last(&id, job).await.unwrap().is_none());
        assert!(harness.jobs.runs(&id, job).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn locks_release_between_ticks() {
    // A smoke test that repeated maintenance with an idle runner neither
    // deadlocks nor leaks leases.
    let harness = prepared_harness().await;
    let locks: Arc<LockRegistry> = Arc::clone(&harness.locks);
    let runner = JobRunner::new(
        Arc::clone(&harness.jobs),
        Arc::new(MappedRunner {
            outcomes: Arc::new(Mutex::new(HashMap::new())),
        }),
        RunnerConfig::default(),
    );
    harness
        .jobs
        .start(&DeploymentHarness::app_id(), JobType::SystemTest, versions())
        .await
        .unwrap();

    for _ in 0..3 {
        runner.maintain().await.unwrap();
    }
    let key = berth_deploy::locking::step_lock_key(
        &DeploymentHarness::app_id(),
        JobType::SystemTest,
        Step::DeployTester,
    );
    assert!(!locks.is_locked(&key));
}

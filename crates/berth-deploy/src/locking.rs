//! Lock keys and lock-holding proofs for the job runner.
//!
//! Three lock scopes exist, always acquired in the order {application-job,
//! run, step}, except for the single sanctioned inversion where a step
//! holder briefly takes each prerequisite's lock to confirm it is idle, and
//! the brief application-lock acquisitions a step makes to commit its result.

use berth_core::{ApplicationId, LockKey, LockLease};

use crate::job_type::JobType;
use crate::step::Step;

/// Returns the lock key serialising writes to the last run and history of the
/// given application and job type.
#[must_use]
pub fn job_lock_key(application: &ApplicationId, job_type: JobType) -> LockKey {
    LockKey::of(&["jobs", &application.serialized_form(), job_type.job_name()])
}

/// Returns the lock key held while executing the given step.
#[must_use]
pub fn step_lock_key(application: &ApplicationId, job_type: JobType, step: Step) -> LockKey {
    LockKey::of(&[
        "steps",
        &application.serialized_form(),
        job_type.job_name(),
        step.name(),
    ])
}

/// Proof that the holder owns the lock of a step.
///
/// Obtained only through [`crate::controller::JobController::locked_step`];
/// APIs which mutate step state take a `&LockedStep` so they cannot be called
/// without the lock.
pub struct LockedStep {
    _lease: LockLease,
    step: Step,
}

impl LockedStep {
    pub(crate) fn new(lease: LockLease, step: Step) -> Self {
        Self {
            _lease: lease,
            step,
        }
    }

    /// Returns the locked step.
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }
}

impl std::fmt::Debug for LockedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedStep").field("step", &self.step).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_distinct_per_scope() {
        let id = ApplicationId::from_parts("tenant", "app").unwrap();
        let job = job_lock_key(&id, JobType::SystemTest);
        let step = step_lock_key(&id, JobType::SystemTest, Step::DeployReal);
        assert_ne!(job, step);
        assert_eq!(job.value(), "jobs/tenant.app.default/systemTest");
        assert_eq!(
            step.value(),
            "steps/tenant.app.default/systemTest/deployReal"
        );
    }
}

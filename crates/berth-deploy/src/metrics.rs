//! Metric names and label keys of the job runner.

/// Metric names.
pub mod names {
    /// Counter: maintenance ticks run.
    pub const MAINTENANCE_TICKS_TOTAL: &str = "berth_deploy_maintenance_ticks_total";
    /// Counter: step executions dispatched to the worker pool.
    pub const STEPS_DISPATCHED_TOTAL: &str = "berth_deploy_steps_dispatched_total";
    /// Counter: step outcomes committed, labelled by outcome.
    pub const STEP_OUTCOMES_TOTAL: &str = "berth_deploy_step_outcomes_total";
    /// Counter: runs finished, labelled by status.
    pub const RUNS_FINISHED_TOTAL: &str = "berth_deploy_runs_finished_total";
    /// Histogram: wall-clock seconds per maintenance tick.
    pub const MAINTENANCE_TICK_SECONDS: &str = "berth_deploy_maintenance_tick_seconds";
}

/// Label keys.
pub mod labels {
    /// The job type of a run.
    pub const JOB_TYPE: &str = "job_type";
    /// The step of a run.
    pub const STEP: &str = "step";
    /// The outcome of a step or run.
    pub const OUTCOME: &str = "outcome";
}

//! # berth-deploy
//!
//! The continuous deployment job runner of the Berth hosting platform
//! controller.
//!
//! Each change an application submits is driven from source submission through
//! test environments, staged rollout, and production, one *step* at a time,
//! across many applications concurrently, with durable state, crash-safe
//! locking, and bounded resource use.
//!
//! ## Core Concepts
//!
//! - **Job**: A deployment-and-test activity bound to a zone, identified by a
//!   [`JobType`](job_type::JobType) and carried out as a fixed profile of steps
//! - **Run**: One execution of a job for an application, with a unique,
//!   monotonically assigned number
//! - **Step**: A unit of work within a run, with a fixed set of prerequisites
//!
//! ## Components
//!
//! - [`controller::JobController`]: owns run state, history, submission, and
//!   lifecycle; all locking discipline lives here
//! - [`runner::InternalStepRunner`]: executes individual steps against the
//!   config server, tester cloud, routing layer, and artifact store, deciding
//!   per step whether to advance, retry, fail, or abort
//! - [`runner::JobRunner`]: the periodic maintainer which leases each ready
//!   step of every active run and dispatches it on a bounded worker pool
//!
//! ## Guarantees
//!
//! - At most one active run per application and job type; run numbers are
//!   strictly increasing and never reused
//! - A step commits only after all of its prerequisites were observed idle
//!   and succeeded
//! - Cleanup steps execute even after failure or abort; errors never cross a
//!   run boundary

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod application;
pub mod config;
pub mod controller;
pub mod error;
pub mod integration;
pub mod job_type;
pub mod locking;
pub mod metrics;
pub mod node_log;
pub mod persistence;
pub mod profile;
pub mod run;
pub mod runner;
pub mod step;
pub mod test_config;
pub mod versions;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::application::{Application, ApplicationRegistry, Notifications, Role, When};
    pub use crate::config::{ControllerConfig, RunnerConfig, ZoneRegistry};
    pub use crate::controller::{Controller, JobController};
    pub use crate::error::{Error, Result};
    pub use crate::job_type::JobType;
    pub use crate::locking::LockedStep;
    pub use crate::persistence::{JobStore, LogEntry, LogLevel, LogStore, RunLog};
    pub use crate::profile::JobProfile;
    pub use crate::run::{Run, RunId, RunStatus};
    pub use crate::runner::{InternalStepRunner, JobRunner, StepRunner};
    pub use crate::step::{Step, StepStatus};
    pub use crate::versions::{ApplicationVersion, SourceRevision, Versions};
}

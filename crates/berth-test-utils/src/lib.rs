//! # berth-test-utils
//!
//! In-process test doubles for every external collaborator of the deployment
//! job runner, plus a [`DeploymentHarness`] wiring a complete controller for
//! integration tests.
//!
//! Nothing here touches the network: the mocks hold their state behind plain
//! mutexes and expose setters the tests drive directly, mirroring how the
//! real subsystems change state underneath the controller.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod artifact_store;
mod config_server;
mod harness;
mod mailer;
mod routing;
mod tester_cloud;
mod trigger;

pub use artifact_store::MemoryArtifactStore;
pub use config_server::MockConfigServer;
pub use harness::DeploymentHarness;
pub use mailer::MockMailer;
pub use routing::MockRoutingLayer;
pub use tester_cloud::MockTesterCloud;
pub use trigger::MockDeploymentTrigger;

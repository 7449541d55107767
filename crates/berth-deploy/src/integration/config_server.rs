//! The config server contract: deploys, activates, and monitors applications
//! and their nodes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use berth_core::{ApplicationId, PlatformVersion, ZoneId};

/// A deployment of an application to a zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentId {
    /// The deployed application.
    pub application: ApplicationId,
    /// The zone deployed to.
    pub zone: ZoneId,
}

impl DeploymentId {
    /// Creates a deployment id.
    #[must_use]
    pub const fn new(application: ApplicationId, zone: ZoneId) -> Self {
        Self { application, zone }
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.application, self.zone)
    }
}

/// Error codes of failed config server requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No capacity for the requested resources.
    OutOfCapacity,
    /// Another activation is in progress.
    ActivationConflict,
    /// The application lock could not be taken.
    ApplicationLockFailure,
    /// A parent host is not yet ready.
    ParentHostNotReady,
    /// The endpoint certificate is not yet provisioned.
    CertificateNotReady,
    /// The load balancer is not yet provisioned.
    LoadBalancerNotReady,
    /// The application package is invalid.
    InvalidApplicationPackage,
    /// The request was malformed.
    BadRequest,
    /// The referenced resource does not exist.
    NotFound,
    /// The config server failed internally.
    InternalServerError,
}

/// A failed config server request.
#[derive(Debug, Clone, thiserror::Error)]
#[error("config server request failed with {code:?}: {message}")]
pub struct ConfigServerError {
    /// The error code of the failure.
    pub code: ErrorCode,
    /// The message of the failure.
    pub message: String,
}

impl ConfigServerError {
    /// Creates a config server error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A service running on some node of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    /// The name of the service.
    pub service_name: String,
    /// The type of the service.
    pub service_type: String,
    /// The config id of the service.
    pub config_id: String,
    /// The host the service runs on.
    pub host_name: String,
}

/// A restart required by a config change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartAction {
    /// The cluster the restart applies to.
    pub cluster_name: String,
    /// The type of that cluster.
    pub cluster_type: String,
    /// The service type to restart.
    pub service_type: String,
    /// The services to restart.
    pub services: Vec<ServiceInfo>,
    /// Messages describing why the restart is needed.
    pub messages: Vec<String>,
}

/// A re-feed required by a config change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefeedAction {
    /// The name of the validation that triggered this action.
    pub name: String,
    /// Whether the change is allowed to proceed.
    pub allowed: bool,
    /// The document type which must be re-fed.
    pub document_type: String,
    /// The cluster the re-feed applies to.
    pub cluster_name: String,
    /// The services affected.
    pub services: Vec<ServiceInfo>,
    /// Messages describing why the re-feed is needed.
    pub messages: Vec<String>,
}

/// The config change actions of a prepare response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChangeActions {
    /// Restarts required by the change.
    pub restart_actions: Vec<RestartAction>,
    /// Re-feeds required by the change.
    pub refeed_actions: Vec<RefeedAction>,
}

/// One line of the free-form prepare log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareLogEntry {
    /// The level of the message.
    pub level: String,
    /// The message.
    pub message: String,
}

/// The response to a deployment: required config change actions plus a
/// free-form log.
#[derive(Debug, Clone, Default)]
pub struct PrepareResponse {
    /// A human-readable summary, if any.
    pub message: Option<String>,
    /// The prepare log.
    pub log: Vec<PrepareLogEntry>,
    /// The config change actions the deployment requires.
    pub config_change_actions: ConfigChangeActions,
}

/// Options of a deployment request.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Deploy directly, skipping the build pipeline (tester deployments).
    pub deploy_directly: bool,
    /// The platform version to deploy on, when fixed by the caller.
    pub platform: Option<PlatformVersion>,
    /// Whether this deployment stages the source versions of an upgrade.
    pub set_the_stage: bool,
}

/// The states a node can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Allocated to an application and active.
    Active,
    /// Reserved for an application, not yet active.
    Reserved,
    /// Failed out of its application.
    Failed,
    /// Ready for allocation.
    Ready,
}

/// The orchestration state of the services on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Services are expected to be up.
    Expected,
    /// Services are allowed to be down.
    Allowed,
    /// The orchestrator does not know this node.
    Unknown,
}

/// A node allocated to a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// The host name of the node.
    pub hostname: String,
    /// The allocation state of the node.
    pub state: NodeState,
    /// The orchestration state of the node's services.
    pub service_state: ServiceState,
    /// The platform version the node currently runs.
    pub current_version: PlatformVersion,
    /// The platform version the node should run.
    pub wanted_version: PlatformVersion,
    /// The restart generation the node has reached.
    pub restart_generation: u64,
    /// The restart generation the node should reach.
    pub wanted_restart_generation: u64,
    /// The reboot generation the node has reached.
    pub reboot_generation: u64,
    /// The reboot generation the node should reach.
    pub wanted_reboot_generation: u64,
}

/// The convergence status of one service of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// The host the service runs on.
    pub host: String,
    /// The port the service listens on.
    pub port: u16,
    /// The type of the service.
    pub service_type: String,
    /// The config generation the service is on, or -1 if not started.
    pub current_generation: i64,
}

/// The config convergence report of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConvergence {
    /// The config generation the deployment should reach.
    pub wanted_generation: i64,
    /// Whether every service is on the wanted generation.
    pub converged: bool,
    /// Per-service status.
    pub services: Vec<ServiceStatus>,
}

/// An existing deployment, as known to the config server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    /// When the deployment was last activated.
    pub at: DateTime<Utc>,
    /// The platform version deployed.
    pub platform: PlatformVersion,
}

/// The config server interface consumed by the job runner.
#[async_trait]
pub trait ConfigServer: Send + Sync {
    /// Deploys a package (or re-deploys the stored one) to the given zone.
    async fn deploy(
        &self,
        id: &DeploymentId,
        package: Option<Vec<u8>>,
        options: DeployOptions,
    ) -> Result<PrepareResponse, ConfigServerError>;

    /// Deactivates the given deployment.
    async fn deactivate(&self, id: &DeploymentId) -> Result<(), ConfigServerError>;

    /// Restarts services of the given deployment, on one host or all.
    async fn restart(
        &self,
        id: &DeploymentId,
        hostname: Option<String>,
    ) -> Result<(), ConfigServerError>;

    /// Returns the config convergence report of the given deployment, if
    /// currently available.
    async fn service_convergence(
        &self,
        id: &DeploymentId,
        platform: Option<PlatformVersion>,
    ) -> Result<Option<ServiceConvergence>, ConfigServerError>;

    /// Lists the nodes of the given application in the given zone, filtered
    /// by state.
    async fn nodes(
        &self,
        zone: &ZoneId,
        application: &ApplicationId,
        states: &[NodeState],
    ) -> Result<Vec<Node>, ConfigServerError>;

    /// Returns the given deployment, if it exists.
    async fn deployment(&self, id: &DeploymentId)
        -> Result<Option<DeploymentInfo>, ConfigServerError>;

    /// Returns the node logs of the given deployment, in the tab-separated
    /// node log format.
    async fn logs(&self, id: &DeploymentId) -> Result<String, ConfigServerError>;

    /// Returns the content clusters of the given deployment.
    async fn content_clusters(&self, id: &DeploymentId) -> Result<Vec<String>, ConfigServerError>;
}

//! A config server double with settable convergence, change actions, and
//! failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use berth_core::{ApplicationId, Clock, PlatformVersion, ZoneId};
use berth_deploy::integration::config_server::{
    ConfigChangeActions, ConfigServer, ConfigServerError, DeployOptions, DeploymentId,
    DeploymentInfo, ErrorCode, Node, NodeState, PrepareResponse, ServiceConvergence, ServiceState,
    ServiceStatus,
};

type DeploymentKey = (ApplicationId, ZoneId);

#[derive(Debug, Clone)]
struct MockDeployment {
    at: DateTime<Utc>,
    platform: PlatformVersion,
    converged: bool,
    restart_generation: u64,
    wanted_restart_generation: u64,
    reboot_generation: u64,
    wanted_reboot_generation: u64,
}

#[derive(Default)]
struct State {
    deployments: HashMap<DeploymentKey, MockDeployment>,
    config_change_actions: ConfigChangeActions,
    next_deploy_error: Option<ConfigServerError>,
    log_stream: Option<String>,
    content_clusters: HashMap<DeploymentKey, Vec<String>>,
    restarts: Vec<(DeploymentId, Option<String>)>,
}

/// A config server whose deployments exist purely in memory.
///
/// Deployed nodes come up on the deployed platform immediately; services
/// converge when the test says so; restarts raise the wanted restart
/// generation until the test completes them.
pub struct MockConfigServer {
    clock: Arc<dyn Clock>,
    default_platform: PlatformVersion,
    state: Mutex<State>,
}

impl MockConfigServer {
    /// Creates a config server double reading time from the given clock.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, default_platform: PlatformVersion) -> Self {
        Self {
            clock,
            default_platform,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns the deterministic host name of the node backing a deployment.
    #[must_use]
    pub fn hostname_of(application: &ApplicationId, zone: &ZoneId) -> String {
        format!("node-1-of-{}-{}", application.application(), zone.region())
    }

    /// Marks the services of the given deployment converged.
    pub fn converge_services(&self, application: &ApplicationId, zone: &ZoneId) {
        let mut state = self.state.lock().unwrap();
        if let Some(deployment) = state
            .deployments
            .get_mut(&(application.clone(), zone.clone()))
        {
            deployment.converged = true;
        }
    }

    /// Sets the config change actions returned by subsequent deployments.
    pub fn set_config_change_actions(&self, actions: ConfigChangeActions) {
        self.state.lock().unwrap().config_change_actions = actions;
    }

    /// Fails the next deployment with the given error.
    pub fn fail_next_deploy(&self, error: ConfigServerError) {
        self.state.lock().unwrap().next_deploy_error = Some(error);
    }

    /// Sets the node log stream returned for every deployment.
    pub fn set_log_stream(&self, stream: impl Into<String>) {
        self.state.lock().unwrap().log_stream = Some(stream.into());
    }

    /// Sets the content clusters of the given deployment.
    pub fn set_content_clusters(
        &self,
        application: &ApplicationId,
        zone: &ZoneId,
        clusters: Vec<String>,
    ) {
        self.state
            .lock()
            .unwrap()
            .content_clusters
            .insert((application.clone(), zone.clone()), clusters);
    }

    /// Completes any pending restart of the given deployment's node.
    pub fn complete_restart(&self, application: &ApplicationId, zone: &ZoneId) {
        let mut state = self.state.lock().unwrap();
        if let Some(deployment) = state
            .deployments
            .get_mut(&(application.clone(), zone.clone()))
        {
            deployment.restart_generation = deployment.wanted_restart_generation;
        }
    }

    /// Requests a reboot of the given deployment's node.
    pub fn request_reboot(&self, application: &ApplicationId, zone: &ZoneId) {
        let mut state = self.state.lock().unwrap();
        if let Some(deployment) = state
            .deployments
            .get_mut(&(application.clone(), zone.clone()))
        {
            deployment.wanted_reboot_generation += 1;
        }
    }

    /// Completes any pending reboot of the given deployment's node.
    pub fn complete_reboot(&self, application: &ApplicationId, zone: &ZoneId) {
        let mut state = self.state.lock().unwrap();
        if let Some(deployment) = state
            .deployments
            .get_mut(&(application.clone(), zone.clone()))
        {
            deployment.reboot_generation = deployment.wanted_reboot_generation;
        }
    }

    /// Returns whether the given deployment exists.
    #[must_use]
    pub fn has_deployment(&self, application: &ApplicationId, zone: &ZoneId) -> bool {
        self.state
            .lock()
            .unwrap()
            .deployments
            .contains_key(&(application.clone(), zone.clone()))
    }

    /// Returns the restart requests issued so far.
    #[must_use]
    pub fn restarts(&self) -> Vec<(DeploymentId, Option<String>)> {
        self.state.lock().unwrap().restarts.clone()
    }
}

#[async_trait]
impl ConfigServer for MockConfigServer {
    async fn deploy(
        &self,
        id: &DeploymentId,
        _package: Option<Vec<u8>>,
        options: DeployOptions,
    ) -> Result<PrepareResponse, ConfigServerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.next_deploy_error.take() {
            return Err(error);
        }
        let platform = options
            .platform
            .unwrap_or_else(|| self.default_platform.clone());
        let at = self.clock.now();
        let key = (id.application.clone(), id.zone.clone());
        let previous = state.deployments.get(&key).cloned();
        state.deployments.insert(
            key,
            MockDeployment {
                at,
                platform,
                converged: false,
                restart_generation: previous.as_ref().map_or(0, |d| d.restart_generation),
                wanted_restart_generation: previous
                    .as_ref()
                    .map_or(0, |d| d.wanted_restart_generation),
                reboot_generation: previous.as_ref().map_or(0, |d| d.reboot_generation),
                wanted_reboot_generation: previous
                    .as_ref()
                    .map_or(0, |d| d.wanted_reboot_generation),
            },
        );
        Ok(PrepareResponse {
            message: None,
            log: Vec::new(),
            config_change_actions: state.config_change_actions.clone(),
        })
    }

    async fn deactivate(&self, id: &DeploymentId) -> Result<(), ConfigServerError> {
        let mut state = self.state.lock().unwrap();
        let key = (id.application.clone(), id.zone.clone());
        if state.deployments.remove(&key).is_none() {
            return Err(ConfigServerError::new(
                ErrorCode::NotFound,
                format!("no deployment of {id}"),
            ));
        }
        Ok(())
    }

    async fn restart(
        &self,
        id: &DeploymentId,
        hostname: Option<String>,
    ) -> Result<(), ConfigServerError> {
        let mut state = self.state.lock().unwrap();
        let key = (id.application.clone(), id.zone.clone());
        let Some(deployment) = state.deployments.get_mut(&key) else {
            return Err(ConfigServerError::new(
                ErrorCode::NotFound,
                format!("no deployment of {id}"),
            ));
        };
        deployment.wanted_restart_generation += 1;
        state.restarts.push((id.clone(), hostname));
        Ok(())
    }

    async fn service_convergence(
        &self,
        id: &DeploymentId,
        _platform: Option<PlatformVersion>,
    ) -> Result<Option<ServiceConvergence>, ConfigServerError> {
        let state = self.state.lock().unwrap();
        let key = (id.application.clone(), id.zone.clone());
        Ok(state.deployments.get(&key).map(|deployment| {
            let services = if deployment.converged {
                Vec::new()
            } else {
                vec![ServiceStatus {
                    host: Self::hostname_of(&id.application, &id.zone),
                    port: 4080,
                    service_type: "container".to_string(),
                    current_generation: 1,
                }]
            };
            ServiceConvergence {
                wanted_generation: 2,
                converged: deployment.converged,
                services,
            }
        }))
    }

    async fn nodes(
        &self,
        zone: &ZoneId,
        application: &ApplicationId,
        _states: &[NodeState],
    ) -> Result<Vec<Node>, ConfigServerError> {
        let state = self.state.lock().unwrap();
        let key = (application.clone(), zone.clone());
        Ok(state
            .deployments
            .get(&key)
            .map(|deployment| {
                vec![Node {
                    hostname: Self::hostname_of(application, zone),
                    state: NodeState::Active,
                    service_state: ServiceState::Expected,
                    current_version: deployment.platform.clone(),
                    wanted_version: deployment.platform.clone(),
                    restart_generation: deployment.restart_generation,
                    wanted_restart_generation: deployment.wanted_restart_generation,
                    reboot_generation: deployment.reboot_generation,
                    wanted_reboot_generation: deployment.wanted_reboot_generation,
                }]
            })
            .unwrap_or_default())
    }

    async fn deployment(
        &self,
        id: &DeploymentId,
    ) -> Result<Option<DeploymentInfo>, ConfigServerError> {
        let state = self.state.lock().unwrap();
        let key = (id.application.clone(), id.zone.clone());
        Ok(state.deployments.get(&key).map(|deployment| DeploymentInfo {
            at: deployment.at,
            platform: deployment.platform.clone(),
        }))
    }

    async fn logs(&self, _id: &DeploymentId) -> Result<String, ConfigServerError> {
        Ok(self.state.lock().unwrap().log_stream.clone().unwrap_or_default())
    }

    async fn content_clusters(&self, id: &DeploymentId) -> Result<Vec<String>, ConfigServerError> {
        let state = self.state.lock().unwrap();
        let key = (id.application.clone(), id.zone.clone());
        Ok(state.content_clusters.get(&key).cloned().unwrap_or_default())
    }
}

//! The routing layer contract: endpoint discovery for deployments.

use async_trait::async_trait;
use std::collections::BTreeMap;
use url::Url;

use berth_core::{ApplicationId, ZoneId};

use crate::error::Result;
use crate::integration::config_server::DeploymentId;

/// An endpoint registered for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEndpoint {
    /// The URL of the endpoint.
    pub url: Url,
}

/// The routing layer interface consumed by the job runner.
#[async_trait]
pub trait RoutingLayer: Send + Sync {
    /// Returns the cluster endpoints of the given application in each of the
    /// given zones. Zones without endpoints are absent from the result.
    async fn cluster_endpoints(
        &self,
        application: &ApplicationId,
        zones: &[ZoneId],
    ) -> Result<BTreeMap<ZoneId, BTreeMap<String, Url>>>;

    /// Returns the endpoints of the given deployment.
    async fn endpoints(&self, id: &DeploymentId) -> Result<Vec<RoutingEndpoint>>;
}

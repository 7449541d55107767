//! A routing layer double with settable endpoints.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use url::Url;

use berth_core::{ApplicationId, ZoneId};
use berth_deploy::error::Result;
use berth_deploy::integration::config_server::DeploymentId;
use berth_deploy::integration::routing::{RoutingEndpoint, RoutingLayer};

/// A routing layer where tests register endpoints per deployment.
#[derive(Default)]
pub struct MockRoutingLayer {
    endpoints: Mutex<HashMap<(ApplicationId, ZoneId), Vec<Url>>>,
}

impl MockRoutingLayer {
    /// Creates a routing layer double with no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the default endpoint of the given deployment.
    ///
    /// # Panics
    ///
    /// Panics if the generated endpoint URL is invalid.
    pub fn set_endpoints(&self, application: &ApplicationId, zone: &ZoneId) {
        let url = Url::parse(&format!(
            "https://{}--{}.{}.endpoints.example.com/",
            application.application(),
            application.tenant(),
            zone.region()
        ))
        .expect("generated endpoint must parse");
        self.endpoints
            .lock()
            .unwrap()
            .insert((application.clone(), zone.clone()), vec![url]);
    }

    /// Removes the endpoints of the given deployment.
    pub fn remove_endpoints(&self, application: &ApplicationId, zone: &ZoneId) {
        self.endpoints
            .lock()
            .unwrap()
            .remove(&(application.clone(), zone.clone()));
    }
}

#[async_trait]
impl RoutingLayer for MockRoutingLayer {
    async fn cluster_endpoints(
        &self,
        application: &ApplicationId,
        zones: &[ZoneId],
    ) -> Result<BTreeMap<ZoneId, BTreeMap<String, Url>>> {
        let endpoints = self.endpoints.lock().unwrap();
        let mut result = BTreeMap::new();
        for zone in zones {
            if let Some(urls) = endpoints.get(&(application.clone(), zone.clone())) {
                if let Some(url) = urls.first() {
                    result.insert(
                        zone.clone(),
                        BTreeMap::from([("default".to_string(), url.clone())]),
                    );
                }
            }
        }
        Ok(result)
    }

    async fn endpoints(&self, id: &DeploymentId) -> Result<Vec<RoutingEndpoint>> {
        let endpoints = self.endpoints.lock().unwrap();
        Ok(endpoints
            .get(&(id.application.clone(), id.zone.clone()))
            .map(|urls| {
                urls.iter()
                    .map(|url| RoutingEndpoint { url: url.clone() })
                    .collect()
            })
            .unwrap_or_default())
    }
}

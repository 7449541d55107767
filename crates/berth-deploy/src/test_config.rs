//! The config handed to the tester cloud when tests start.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use url::Url;

use berth_core::{ApplicationId, SystemName, ZoneId};

/// Builds the JSON config for a test execution: the application under test,
/// the zone and system of the run, and, per tested zone, the cluster
/// endpoints and content clusters.
#[must_use]
pub fn test_config(
    application: &ApplicationId,
    zone: &ZoneId,
    system: SystemName,
    endpoints: &BTreeMap<ZoneId, BTreeMap<String, Url>>,
    clusters: &BTreeMap<ZoneId, Vec<String>>,
) -> Value {
    let endpoints: BTreeMap<String, Vec<String>> = endpoints
        .iter()
        .map(|(zone, endpoints)| {
            (
                zone.value(),
                endpoints.values().map(Url::to_string).collect(),
            )
        })
        .collect();
    let clusters: BTreeMap<String, Vec<String>> = clusters
        .iter()
        .map(|(zone, clusters)| (zone.value(), clusters.clone()))
        .collect();
    json!({
        "application": application.serialized_form(),
        "zone": zone.value(),
        "system": system.value(),
        "endpoints": endpoints,
        "clusters": clusters,
    })
}

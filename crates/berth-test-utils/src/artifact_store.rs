//! An artifact store double over in-memory maps.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use berth_core::{ApplicationId, TesterId, ZoneId};
use berth_deploy::error::{Error, Result};
use berth_deploy::integration::ArtifactStore;
use berth_deploy::versions::ApplicationVersion;

#[derive(Default)]
struct State {
    packages: HashMap<(ApplicationId, String), Vec<u8>>,
    tester_packages: HashMap<(ApplicationId, String), Vec<u8>>,
    dev_packages: HashMap<(ApplicationId, ZoneId), Vec<u8>>,
    pruned: Vec<(ApplicationId, ApplicationVersion)>,
}

/// An artifact store holding packages in memory.
#[derive(Default)]
pub struct MemoryArtifactStore {
    state: Mutex<State>,
}

impl MemoryArtifactStore {
    /// Creates an empty artifact store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the prune requests issued so far.
    #[must_use]
    pub fn pruned(&self) -> Vec<(ApplicationId, ApplicationVersion)> {
        self.state.lock().unwrap().pruned.clone()
    }

    /// Returns the stored application package, if any.
    #[must_use]
    pub fn package(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
    ) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .packages
            .get(&(application.clone(), version.id()))
            .cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
        package: Vec<u8>,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .packages
            .insert((application.clone(), version.id()), package);
        Ok(())
    }

    async fn put_tester(
        &self,
        tester: &TesterId,
        version: &ApplicationVersion,
        package: Vec<u8>,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .tester_packages
            .insert((tester.id().clone(), version.id()), package);
        Ok(())
    }

    async fn get_tester(
        &self,
        tester: &TesterId,
        version: &ApplicationVersion,
    ) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .tester_packages
            .get(&(tester.id().clone(), version.id()))
            .cloned()
            .ok_or_else(|| Error::storage(format!("no test package for {tester} at {version}")))
    }

    async fn put_dev(
        &self,
        application: &ApplicationId,
        zone: &ZoneId,
        package: Vec<u8>,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .dev_packages
            .insert((application.clone(), zone.clone()), package);
        Ok(())
    }

    async fn get_dev(&self, application: &ApplicationId, zone: &ZoneId) -> Result<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .dev_packages
            .get(&(application.clone(), zone.clone()))
            .cloned()
            .ok_or_else(|| {
                Error::storage(format!("no dev package for {application} in {zone}"))
            })
    }

    async fn prune(
        &self,
        application: &ApplicationId,
        oldest_kept: &ApplicationVersion,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .pruned
            .push((application.clone(), oldest_kept.clone()));
        Ok(())
    }

    async fn prune_tester(
        &self,
        tester: &TesterId,
        oldest_kept: &ApplicationVersion,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .pruned
            .push((tester.id().clone(), oldest_kept.clone()));
        Ok(())
    }
}

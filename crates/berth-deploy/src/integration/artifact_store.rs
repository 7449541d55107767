//! The artifact store contract: application packages, test packages, and
//! manually deployed dev packages.

use async_trait::async_trait;

use berth_core::{ApplicationId, TesterId, ZoneId};

use crate::error::Result;
use crate::versions::ApplicationVersion;

/// The artifact store interface consumed by the job runner.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores an application package under the given version.
    async fn put(
        &self,
        application: &ApplicationId,
        version: &ApplicationVersion,
        package: Vec<u8>,
    ) -> Result<()>;

    /// Stores a test package under the given version.
    async fn put_tester(
        &self,
        tester: &TesterId,
        version: &ApplicationVersion,
        package: Vec<u8>,
    ) -> Result<()>;

    /// Returns the test package stored under the given version.
    async fn get_tester(
        &self,
        tester: &TesterId,
        version: &ApplicationVersion,
    ) -> Result<Vec<u8>>;

    /// Stores a manually deployed package for the given zone.
    async fn put_dev(
        &self,
        application: &ApplicationId,
        zone: &ZoneId,
        package: Vec<u8>,
    ) -> Result<()>;

    /// Returns the manually deployed package for the given zone.
    async fn get_dev(&self, application: &ApplicationId, zone: &ZoneId) -> Result<Vec<u8>>;

    /// Deletes application packages older than the oldest version to keep.
    async fn prune(
        &self,
        application: &ApplicationId,
        oldest_kept: &ApplicationVersion,
    ) -> Result<()>;

    /// Deletes test packages older than the oldest version to keep.
    async fn prune_tester(
        &self,
        tester: &TesterId,
        oldest_kept: &ApplicationVersion,
    ) -> Result<()>;
}

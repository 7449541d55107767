//! The durable store contract for run data.
//!
//! Per application and job type the store holds one "last run" document and a
//! sorted map of historic runs keyed by run number. The in-memory
//! implementation stores the same serialized JSON documents a durable
//! implementation would, so every read and write exercises run serialization.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use berth_core::ApplicationId;

use crate::error::Result;
use crate::job_type::JobType;
use crate::run::Run;

/// The durable store contract, consumed but not implemented here beyond the
/// in-memory variant.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reads the last run of the given job, if any.
    async fn read_last_run(
        &self,
        application: &ApplicationId,
        job_type: JobType,
    ) -> Result<Option<Run>>;

    /// Writes the given run as the last run of its job.
    async fn write_last_run(&self, run: &Run) -> Result<()>;

    /// Reads the historic runs of the given job, keyed by run number.
    async fn read_historic_runs(
        &self,
        application: &ApplicationId,
        job_type: JobType,
    ) -> Result<BTreeMap<u64, Run>>;

    /// Replaces the historic runs of the given job.
    async fn write_historic_runs(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        runs: &BTreeMap<u64, Run>,
    ) -> Result<()>;

    /// Deletes the last run and history of the given job.
    async fn delete_job_data(&self, application: &ApplicationId, job_type: JobType) -> Result<()>;

    /// Deletes all run data of the given application.
    async fn delete_application_data(&self, application: &ApplicationId) -> Result<()>;

    /// Returns the applications which have any run data persisted.
    async fn applications_with_jobs(&self) -> Result<Vec<ApplicationId>>;
}

#[derive(Debug, Default)]
struct JobData {
    last: Option<Vec<u8>>,
    history: BTreeMap<u64, Vec<u8>>,
}

/// An in-memory job store over serialized run documents.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    inner: RwLock<HashMap<(ApplicationId, JobType), JobData>>,
}

impl MemoryJobStore {
    /// Creates an empty job store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn encode(run: &Run) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(run)?)
    }

    fn decode(bytes: &[u8]) -> Result<Run> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn read_last_run(
        &self,
        application: &ApplicationId,
        job_type: JobType,
    ) -> Result<Option<Run>> {
        let inner = self.inner.read().await;
        inner
            .get(&(application.clone(), job_type))
            .and_then(|data| data.last.as_deref())
            .map(Self::decode)
            .transpose()
    }

    async fn write_last_run(&self, run: &Run) -> Result<()> {
        let bytes = Self::encode(run)?;
        let mut inner = self.inner.write().await;
        inner
            .entry((run.id().application().clone(), run.id().job_type()))
            .or_default()
            .last = Some(bytes);
        Ok(())
    }

    async fn read_historic_runs(
        &self,
        application: &ApplicationId,
        job_type: JobType,
    ) -> Result<BTreeMap<u64, Run>> {
        let inner = self.inner.read().await;
        inner
            .get(&(application.clone(), job_type))
            .map(|data| &data.history)
            .into_iter()
            .flatten()
            .map(|(number, bytes)| Ok((*number, Self::decode(bytes)?)))
            .collect()
    }

    async fn write_historic_runs(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        runs: &BTreeMap<u64, Run>,
    ) -> Result<()> {
        let mut history = BTreeMap::new();
        for (number, run) in runs {
            history.insert(*number, Self::encode(run)?);
        }
        let mut inner = self.inner.write().await;
        inner
            .entry((application.clone(), job_type))
            .or_default()
            .history = history;
        Ok(())
    }

    async fn delete_job_data(&self, application: &ApplicationId, job_type: JobType) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove(&(application.clone(), job_type));
        Ok(())
    }

    async fn delete_application_data(&self, application: &ApplicationId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.retain(|(app, _), _| app != application);
        Ok(())
    }

    async fn applications_with_jobs(&self) -> Result<Vec<ApplicationId>> {
        let inner = self.inner.read().await;
        let mut applications: Vec<ApplicationId> =
            inner.keys().map(|(app, _)| app.clone()).collect();
        applications.sort();
        applications.dedup();
        Ok(applications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunId, RunStatus};
    use crate::versions::{ApplicationVersion, SourceRevision, Versions};
    use chrono::Utc;

    fn app() -> ApplicationId {
        ApplicationId::from_parts("tenant", "app").unwrap()
    }

    fn run(number: u64) -> Run {
        Run::initial(
            RunId::new(app(), JobType::SystemTest, number),
            Versions::new(
                "1.2.3".parse().unwrap(),
                ApplicationVersion::from(SourceRevision::new("repo", "branch", "bada55"), 321),
                None,
                None,
            ),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn last_run_roundtrips_through_serialization() {
        let store = MemoryJobStore::new();
        assert_eq!(store.read_last_run(&app(), JobType::SystemTest).await.unwrap(), None);

        let written = run(1);
        store.write_last_run(&written).await.unwrap();
        let read = store
            .read_last_run(&app(), JobType::SystemTest)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read, written);
        assert_eq!(read.status(), RunStatus::Running);
    }

    #[tokio::test]
    async fn history_is_sorted_by_number() {
        let store = MemoryJobStore::new();
        let mut history = BTreeMap::new();
        for number in [3, 1, 2] {
            history.insert(number, run(number));
        }
        store
            .write_historic_runs(&app(), JobType::SystemTest, &history)
            .await
            .unwrap();

        let read = store
            .read_historic_runs(&app(), JobType::SystemTest)
            .await
            .unwrap();
        assert_eq!(read.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn deletion_and_enumeration() {
        let store = MemoryJobStore::new();
        store.write_last_run(&run(1)).await.unwrap();
        assert_eq!(store.applications_with_jobs().await.unwrap(), vec![app()]);

        store.delete_job_data(&app(), JobType::SystemTest).await.unwrap();
        assert!(store.applications_with_jobs().await.unwrap().is_empty());

        store.write_last_run(&run(2)).await.unwrap();
        store.delete_application_data(&app()).await.unwrap();
        assert!(store.applications_with_jobs().await.unwrap().is_empty());
    }
}

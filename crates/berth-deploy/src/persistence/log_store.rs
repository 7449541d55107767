//! The append-only per-run log.
//!
//! Log entries carry numeric ids assigned on append, monotonic per run. The
//! log of the active run of a job is buffered under the job; `flush` archives
//! it under the run id once the run finishes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use berth_core::ApplicationId;

use crate::error::Result;
use crate::job_type::JobType;
use crate::run::RunId;
use crate::step::Step;

/// The level of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    /// Chatter, normally not shown.
    Spam,
    /// Detail useful when debugging a run.
    Debug,
    /// Normal progress messages.
    Info,
    /// Something unexpected, but not fatal to the run.
    Warning,
    /// Something went wrong.
    Error,
}

impl LogLevel {
    /// Maps a node log level name to a log level. Unknown names map to `Info`.
    #[must_use]
    pub fn from_level_name(name: &str) -> Self {
        match name {
            "spam" => Self::Spam,
            "debug" => Self::Debug,
            "warning" => Self::Warning,
            "error" | "fatal" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// One entry of a run's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// The id of this entry, monotonic per run. Assigned on append; entries
    /// handed to `append` may carry a foreign id (e.g. the tester cloud's),
    /// which is replaced.
    pub id: u64,
    /// When the logged event happened, in milliseconds since the epoch.
    pub at_millis: i64,
    /// The level of this entry.
    pub level: LogLevel,
    /// The message of this entry.
    pub message: String,
}

impl LogEntry {
    /// Creates a log entry.
    #[must_use]
    pub fn new(id: u64, at_millis: i64, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id,
            at_millis,
            level,
            message: message.into(),
        }
    }
}

/// A read view of a run's log: the entries of each step, and the id of the
/// last entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunLog {
    entries: BTreeMap<Step, Vec<LogEntry>>,
}

impl RunLog {
    /// Creates a run log from per-step entries.
    #[must_use]
    pub fn new(entries: BTreeMap<Step, Vec<LogEntry>>) -> Self {
        Self { entries }
    }

    /// Returns an empty run log.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the entries logged for the given step.
    #[must_use]
    pub fn get(&self, step: Step) -> &[LogEntry] {
        self.entries.get(&step).map_or(&[], Vec::as_slice)
    }

    /// Returns the id of the last entry, if any.
    #[must_use]
    pub fn last_id(&self) -> Option<u64> {
        self.entries
            .values()
            .flatten()
            .map(|entry| entry.id)
            .max()
    }
}

/// The append-only per-run log store contract.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Appends entries to the active run of the given job, under the given
    /// step, assigning ids.
    async fn append(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        step: Step,
        entries: Vec<LogEntry>,
    ) -> Result<()>;

    /// Reads the buffered log of the active run of the given job, with
    /// entries after the given id threshold.
    async fn read_active(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        after: u64,
    ) -> Result<RunLog>;

    /// Reads the archived log of a finished run, with entries after the given
    /// id threshold, if it exists.
    async fn read_finished(&self, id: &RunId, after: u64) -> Result<Option<RunLog>>;

    /// Archives the buffered log of the given run.
    async fn flush(&self, id: &RunId) -> Result<()>;

    /// Deletes the archived log of the given run.
    async fn delete(&self, id: &RunId) -> Result<()>;

    /// Deletes all logs of the given application.
    async fn delete_application(&self, application: &ApplicationId) -> Result<()>;
}

#[derive(Debug)]
struct Buffer {
    next_id: u64,
    entries: Vec<(Step, LogEntry)>,
}

impl Default for Buffer {
    fn default() -> Self {
        // Ids start at 1 so `after: 0` reads the whole log.
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }
}

impl Buffer {
    fn view(&self, after: u64) -> RunLog {
        let mut entries: BTreeMap<Step, Vec<LogEntry>> = BTreeMap::new();
        for (step, entry) in &self.entries {
            if entry.id > after {
                entries.entry(*step).or_default().push(entry.clone());
            }
        }
        RunLog::new(entries)
    }
}

/// An in-memory log store.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    inner: RwLock<MemoryLogState>,
}

#[derive(Debug, Default)]
struct MemoryLogState {
    active: HashMap<(ApplicationId, JobType), Buffer>,
    finished: HashMap<RunId, Buffer>,
}

impl MemoryLogStore {
    /// Creates an empty log store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        step: Step,
        entries: Vec<LogEntry>,
    ) -> Result<()> {
        let mut state = self.inner.write().await;
        let buffer = state
            .active
            .entry((application.clone(), job_type))
            .or_default();
        for mut entry in entries {
            entry.id = buffer.next_id;
            buffer.next_id += 1;
            buffer.entries.push((step, entry));
        }
        Ok(())
    }

    async fn read_active(
        &self,
        application: &ApplicationId,
        job_type: JobType,
        after: u64,
    ) -> Result<RunLog> {
        let state = self.inner.read().await;
        Ok(state
            .active
            .get(&(application.clone(), job_type))
            .map_or_else(RunLog::empty, |buffer| buffer.view(after)))
    }

    async fn read_finished(&self, id: &RunId, after: u64) -> Result<Option<RunLog>> {
        let state = self.inner.read().await;
        Ok(state.finished.get(id).map(|buffer| buffer.view(after)))
    }

    async fn flush(&self, id: &RunId) -> Result<()> {
        let mut state = self.inner.write().await;
        let buffer = state
            .active
            .remove(&(id.application().clone(), id.job_type()))
            .unwrap_or_default();
        state.finished.insert(id.clone(), buffer);
        Ok(())
    }

    async fn delete(&self, id: &RunId) -> Result<()> {
        let mut state = self.inner.write().await;
        state.finished.remove(id);
        Ok(())
    }

    async fn delete_application(&self, application: &ApplicationId) -> Result<()> {
        let mut state = self.inner.write().await;
        state.active.retain(|(app, _), _| app != application);
        state.finished.retain(|id, _| id.application() != application);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> ApplicationId {
        ApplicationId::from_parts("tenant", "app").unwrap()
    }

    fn entry(at: i64, message: &str) -> LogEntry {
        LogEntry::new(0, at, LogLevel::Info, message)
    }

    #[test]
    fn level_names_map_to_levels() {
        assert_eq!(LogLevel::from_level_name("info"), LogLevel::Info);
        assert_eq!(LogLevel::from_level_name("warning"), LogLevel::Warning);
        assert_eq!(LogLevel::from_level_name("error"), LogLevel::Error);
        assert_eq!(LogLevel::from_level_name("fatal"), LogLevel::Error);
        assert_eq!(LogLevel::from_level_name("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from_level_name("config"), LogLevel::Info);
    }

    #[tokio::test]
    async fn append_assigns_monotonic_ids() {
        let store = MemoryLogStore::new();
        store
            .append(&app(), JobType::SystemTest, Step::DeployReal, vec![
                entry(1, "one"),
                entry(2, "two"),
            ])
            .await
            .unwrap();
        store
            .append(&app(), JobType::SystemTest, Step::EndTests, vec![entry(3, "three")])
            .await
            .unwrap();

        let log = store.read_active(&app(), JobType::SystemTest, 0).await.unwrap();
        assert_eq!(log.get(Step::DeployReal).len(), 2);
        assert_eq!(log.get(Step::DeployReal)[0].id, 1);
        assert_eq!(log.get(Step::EndTests)[0].id, 3);
        assert_eq!(log.last_id(), Some(3));

        let all = store.read_active(&app(), JobType::SystemTest, u64::MAX).await.unwrap();
        assert!(all.get(Step::DeployReal).is_empty());
    }

    #[tokio::test]
    async fn flush_archives_the_active_buffer() {
        let store = MemoryLogStore::new();
        let id = RunId::new(app(), JobType::SystemTest, 1);
        store
            .append(&app(), JobType::SystemTest, Step::Report, vec![entry(1, "done")])
            .await
            .unwrap();

        assert_eq!(store.read_finished(&id, 0).await.unwrap(), None);
        store.flush(&id).await.unwrap();

        let archived = store.read_finished(&id, 0).await.unwrap().unwrap();
        assert_eq!(archived.get(Step::Report).len(), 1);
        assert!(store
            .read_active(&app(), JobType::SystemTest, 0)
            .await
            .unwrap()
            .get(Step::Report)
            .is_empty());

        store.delete(&id).await.unwrap();
        assert_eq!(store.read_finished(&id, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_application_clears_everything() {
        let store = MemoryLogStore::new();
        let id = RunId::new(app(), JobType::SystemTest, 1);
        store
            .append(&app(), JobType::SystemTest, Step::Report, vec![entry(1, "done")])
            .await
            .unwrap();
        store.flush(&id).await.unwrap();
        store
            .append(&app(), JobType::StagingTest, Step::Report, vec![entry(2, "more")])
            .await
            .unwrap();

        store.delete_application(&app()).await.unwrap();
        assert_eq!(store.read_finished(&id, 0).await.unwrap(), None);
        assert!(store
            .read_active(&app(), JobType::StagingTest, 0)
            .await
            .unwrap()
            .get(Step::Report)
            .is_empty());
    }
}

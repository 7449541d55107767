//! A tester cloud double with settable status and log.

use async_trait::async_trait;
use std::sync::Mutex;
use url::Url;

use berth_deploy::error::Result;
use berth_deploy::integration::tester_cloud::{Suite, TesterCloud, TesterStatus};
use berth_deploy::persistence::LogEntry;

struct State {
    status: TesterStatus,
    ready: bool,
    log: Vec<LogEntry>,
    last_url: Option<Url>,
    last_suite: Option<Suite>,
    last_config: Option<serde_json::Value>,
}

/// A tester cloud whose status and log the test sets directly.
pub struct MockTesterCloud {
    state: Mutex<State>,
}

impl Default for MockTesterCloud {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                status: TesterStatus::Running,
                ready: true,
                log: Vec::new(),
                last_url: None,
                last_suite: None,
                last_config: None,
            }),
        }
    }
}

impl MockTesterCloud {
    /// Creates a tester cloud double: ready, with tests running.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reported test status.
    pub fn set_status(&self, status: TesterStatus) {
        self.state.lock().unwrap().status = status;
    }

    /// Sets whether the tester reports ready.
    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    /// Appends an entry to the test log.
    pub fn add_log(&self, entry: LogEntry) {
        self.state.lock().unwrap().log.push(entry);
    }

    /// Returns the URL tests were started against, if any.
    #[must_use]
    pub fn tester_url(&self) -> Option<Url> {
        self.state.lock().unwrap().last_url.clone()
    }

    /// Returns the suite tests were started with, if any.
    #[must_use]
    pub fn suite(&self) -> Option<Suite> {
        self.state.lock().unwrap().last_suite
    }

    /// Returns the config tests were started with, if any.
    #[must_use]
    pub fn config(&self) -> Option<serde_json::Value> {
        self.state.lock().unwrap().last_config.clone()
    }
}

#[async_trait]
impl TesterCloud for MockTesterCloud {
    async fn ready(&self, _url: &Url) -> bool {
        self.state.lock().unwrap().ready
    }

    async fn start_tests(&self, url: &Url, suite: Suite, config: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.last_url = Some(url.clone());
        state.last_suite = Some(suite);
        state.last_config = Some(config);
        Ok(())
    }

    async fn status(&self, _url: &Url) -> Result<TesterStatus> {
        Ok(self.state.lock().unwrap().status)
    }

    async fn log(&self, _url: &Url, after: u64) -> Result<Vec<LogEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|entry| entry.id > after)
            .cloned()
            .collect())
    }
}

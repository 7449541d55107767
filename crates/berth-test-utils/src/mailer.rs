//! A mailer double with per-recipient inboxes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use berth_deploy::error::{Error, Result};
use berth_deploy::integration::{Mail, Mailer};

/// A mailer delivering into in-memory inboxes.
#[derive(Default)]
pub struct MockMailer {
    inboxes: Mutex<HashMap<String, Vec<Mail>>>,
    fail: Mutex<bool>,
}

impl MockMailer {
    /// Creates a mailer double.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send fail.
    pub fn fail_sends(&self) {
        *self.fail.lock().unwrap() = true;
    }

    /// Returns the mails delivered to the given address.
    #[must_use]
    pub fn inbox(&self, address: &str) -> Vec<Mail> {
        self.inboxes
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    async fn send(&self, mail: Mail) -> Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(Error::internal("mailer is down"));
        }
        let mut inboxes = self.inboxes.lock().unwrap();
        for recipient in &mail.recipients {
            inboxes
                .entry(recipient.clone())
                .or_default()
                .push(mail.clone());
        }
        Ok(())
    }
}

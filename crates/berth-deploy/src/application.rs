//! The controller-side record of registered applications.
//!
//! The job runner reads application state (whether it is built internally,
//! its production deployments, its notification preferences) and assigns
//! build numbers on submission. The wider application lifecycle is owned
//! elsewhere.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use berth_core::{ApplicationId, PlatformVersion, ZoneId};

use crate::error::{Error, Result};
use crate::versions::ApplicationVersion;

/// When a notification applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum When {
    /// The job is failing.
    Failing,
    /// The job is failing on a new commit.
    FailingCommit,
}

/// A role resolved to concrete addresses at notification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The author of the change being deployed.
    Author,
}

/// The notification preferences of an application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notifications {
    emails: BTreeMap<When, Vec<String>>,
    roles: BTreeMap<When, Vec<Role>>,
}

impl Notifications {
    /// Creates an empty notification spec: nobody is notified.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Adds addresses notified at the given condition.
    #[must_use]
    pub fn with_emails(mut self, when: When, addresses: Vec<String>) -> Self {
        self.emails.entry(when).or_default().extend(addresses);
        self
    }

    /// Adds a role notified at the given condition.
    #[must_use]
    pub fn with_role(mut self, when: When, role: Role) -> Self {
        self.roles.entry(when).or_default().push(role);
        self
    }

    /// Returns the addresses configured for the given condition.
    #[must_use]
    pub fn email_addresses_for(&self, when: When) -> &[String] {
        self.emails.get(&when).map_or(&[], Vec::as_slice)
    }

    /// Returns the roles configured for the given condition.
    #[must_use]
    pub fn email_roles_for(&self, when: When) -> &[Role] {
        self.roles.get(&when).map_or(&[], Vec::as_slice)
    }
}

/// A production deployment of an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    /// The zone deployed to.
    pub zone: ZoneId,
    /// The platform version deployed.
    pub platform: PlatformVersion,
    /// The application version deployed.
    pub application_version: ApplicationVersion,
    /// When the deployment was activated.
    pub at: DateTime<Utc>,
}

/// A package submitted for deployment, with the build metadata read from it.
#[derive(Debug, Clone, Default)]
pub struct ApplicationPackage {
    /// The zipped package content.
    pub content: Vec<u8>,
    /// The platform version the package was compiled against, if recorded.
    pub compile_version: Option<PlatformVersion>,
    /// When the package was built, if recorded.
    pub build_time: Option<DateTime<Utc>>,
}

impl ApplicationPackage {
    /// Creates a package from raw content, without build metadata.
    #[must_use]
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            compile_version: None,
            build_time: None,
        }
    }
}

/// A registered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    /// The id of the application.
    pub id: ApplicationId,
    /// The build project of the application, if known.
    pub project_id: Option<u64>,
    /// Whether the application is built and deployed by this controller.
    pub deployed_internally: bool,
    /// The last assigned build number; 0 before the first submission.
    pub last_build: u64,
    /// The notification preferences of the application.
    pub notifications: Notifications,
    /// The production deployments of the application, per zone.
    pub production_deployments: BTreeMap<ZoneId, Deployment>,
    /// The application version of an ongoing change, if any.
    pub change_application: Option<ApplicationVersion>,
}

impl Application {
    /// Creates a new application record.
    #[must_use]
    pub fn new(id: ApplicationId, project_id: Option<u64>) -> Self {
        Self {
            id,
            project_id,
            deployed_internally: false,
            last_build: 0,
            notifications: Notifications::none(),
            production_deployments: BTreeMap::new(),
            change_application: None,
        }
    }

    /// Returns the oldest application version among production deployments.
    #[must_use]
    pub fn oldest_deployed_application(&self) -> Option<&ApplicationVersion> {
        self.production_deployments
            .values()
            .map(|deployment| &deployment.application_version)
            .min()
    }
}

/// The in-memory registry of applications known to this controller.
#[derive(Debug, Default)]
pub struct ApplicationRegistry {
    inner: RwLock<HashMap<ApplicationId, Application>>,
}

impl ApplicationRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an application. Replaces any existing record.
    pub async fn put(&self, application: Application) {
        let mut inner = self.inner.write().await;
        inner.insert(application.id.clone(), application);
    }

    /// Returns the application with the given id, if registered.
    pub async fn get(&self, id: &ApplicationId) -> Option<Application> {
        let inner = self.inner.read().await;
        inner.get(id).cloned()
    }

    /// Returns the application with the given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the application is not registered.
    pub async fn require(&self, id: &ApplicationId) -> Result<Application> {
        self.get(id).await.ok_or_else(|| Error::ApplicationNotFound {
            application: id.clone(),
        })
    }

    /// Applies a mutation to the application with the given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the application is not registered.
    pub async fn update(
        &self,
        id: &ApplicationId,
        mutation: impl FnOnce(&mut Application) + Send,
    ) -> Result<Application> {
        let mut inner = self.inner.write().await;
        let application = inner.get_mut(id).ok_or_else(|| Error::ApplicationNotFound {
            application: id.clone(),
        })?;
        mutation(application);
        Ok(application.clone())
    }

    /// Removes the application with the given id.
    pub async fn remove(&self, id: &ApplicationId) {
        let mut inner = self.inner.write().await;
        inner.remove(id);
    }

    /// Returns the ids of all registered applications, sorted.
    pub async fn ids(&self) -> Vec<ApplicationId> {
        let inner = self.inner.read().await;
        let mut ids: Vec<ApplicationId> = inner.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versions::SourceRevision;

    fn app_id() -> ApplicationId {
        ApplicationId::from_parts("tenant", "app").unwrap()
    }

    #[tokio::test]
    async fn registry_crud() {
        let registry = ApplicationRegistry::new();
        assert!(registry.get(&app_id()).await.is_none());
        assert!(registry.require(&app_id()).await.is_err());

        registry.put(Application::new(app_id(), Some(1))).await;
        let updated = registry
            .update(&app_id(), |app| {
                app.deployed_internally = true;
                app.last_build += 1;
            })
            .await
            .unwrap();
        assert!(updated.deployed_internally);
        assert_eq!(updated.last_build, 1);

        registry.remove(&app_id()).await;
        assert!(registry.get(&app_id()).await.is_none());
    }

    #[test]
    fn notifications_resolution() {
        let notifications = Notifications::none()
            .with_emails(When::Failing, vec!["b@a".into()])
            .with_role(When::Failing, Role::Author);
        assert_eq!(notifications.email_addresses_for(When::Failing), ["b@a"]);
        assert_eq!(notifications.email_roles_for(When::Failing), [Role::Author]);
        assert!(notifications
            .email_addresses_for(When::FailingCommit)
            .is_empty());
    }

    #[test]
    fn oldest_deployed_application() {
        let mut application = Application::new(app_id(), None);
        assert!(application.oldest_deployed_application().is_none());

        for (region, build) in [("us-east-3", 7), ("us-west-1", 5)] {
            let zone = ZoneId::new(berth_core::Environment::Prod, region);
            application.production_deployments.insert(
                zone.clone(),
                Deployment {
                    zone,
                    platform: "1.2.3".parse().unwrap(),
                    application_version: ApplicationVersion::from(
                        SourceRevision::new("repo", "branch", "c0ffee"),
                        build,
                    ),
                    at: Utc::now(),
                },
            );
        }
        assert_eq!(
            application.oldest_deployed_application().unwrap().build(),
            Some(5)
        );
    }
}

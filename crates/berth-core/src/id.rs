//! Strongly-typed identifiers for Berth entities.
//!
//! All identifiers in Berth are:
//! - **Strongly typed**: Prevents mixing up different id types at compile time
//! - **Structural**: Identity is `(tenant, application, instance)`, so ids can
//!   be exchanged between components and persisted as plain strings
//!
//! # Example
//!
//! ```rust
//! use berth_core::id::{ApplicationId, TesterId};
//!
//! let id = ApplicationId::new("tenant", "application", "default").unwrap();
//! let tester = TesterId::of(&id);
//!
//! assert_eq!(tester.id().to_string(), "tenant.application-t.default");
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Returns whether `s` is a valid identifier segment: non-empty, lowercase
/// alphanumerics and dashes, not starting or ending with a dash.
fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// A tenant: the unit of isolation on the platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id from the given name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid identifier segment.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !valid_segment(&name) {
            return Err(Error::InvalidId {
                message: format!("invalid tenant name '{name}'"),
            });
        }
        Ok(Self(name))
    }

    /// Returns the tenant name.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The id of an application deployed to the platform: tenant, application
/// name, and instance name.
///
/// The serialized form is `"<tenant>.<application>.<instance>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApplicationId {
    tenant: TenantId,
    application: String,
    instance: String,
}

impl ApplicationId {
    /// Creates an application id from its three parts.
    ///
    /// # Errors
    ///
    /// Returns an error if any part is not a valid identifier segment.
    pub fn new(
        tenant: impl Into<String>,
        application: impl Into<String>,
        instance: impl Into<String>,
    ) -> Result<Self> {
        let application = application.into();
        let instance = instance.into();
        if !valid_segment(&application) {
            return Err(Error::InvalidId {
                message: format!("invalid application name '{application}'"),
            });
        }
        if !valid_segment(&instance) {
            return Err(Error::InvalidId {
                message: format!("invalid instance name '{instance}'"),
            });
        }
        Ok(Self {
            tenant: TenantId::new(tenant)?,
            application,
            instance,
        })
    }

    /// Creates an application id with the `default` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if either part is not a valid identifier segment.
    pub fn from_parts(tenant: impl Into<String>, application: impl Into<String>) -> Result<Self> {
        Self::new(tenant, application, "default")
    }

    /// Returns the tenant this application belongs to.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Returns the application name.
    #[must_use]
    pub fn application(&self) -> &str {
        &self.application
    }

    /// Returns the instance name.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Returns the serialized form, `"<tenant>.<application>.<instance>"`.
    #[must_use]
    pub fn serialized_form(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.tenant, self.application, self.instance)
    }
}

impl FromStr for ApplicationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(tenant), Some(application), Some(instance), None) => {
                Self::new(tenant, application, instance)
            }
            _ => Err(Error::InvalidId {
                message: format!("expected '<tenant>.<application>.<instance>', got '{s}'"),
            }),
        }
    }
}

impl Serialize for ApplicationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ApplicationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The id of the tester application paired with a real application.
///
/// Tester ids exist only inside the deployment job runner and must never be
/// used as real application ids elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TesterId(ApplicationId);

impl TesterId {
    /// Suffix appended to the real application's name.
    const SUFFIX: &'static str = "-t";

    /// Returns the tester id for the given real application.
    #[must_use]
    pub fn of(id: &ApplicationId) -> Self {
        Self(ApplicationId {
            tenant: id.tenant.clone(),
            application: format!("{}{}", id.application, Self::SUFFIX),
            instance: id.instance.clone(),
        })
    }

    /// Returns the application id of this tester.
    #[must_use]
    pub fn id(&self) -> &ApplicationId {
        &self.0
    }
}

impl fmt::Display for TesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_id_roundtrip() {
        let id = ApplicationId::new("tenant", "application", "default").unwrap();
        let parsed: ApplicationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn application_id_serde_is_a_string() {
        let id = ApplicationId::from_parts("tenant", "app").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tenant.app.default\"");
        let back: ApplicationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn invalid_ids_are_rejected() {
        assert!(ApplicationId::new("Tenant", "app", "default").is_err());
        assert!(ApplicationId::new("tenant", "", "default").is_err());
        assert!(ApplicationId::new("tenant", "-app", "default").is_err());
        assert!("tenant.app".parse::<ApplicationId>().is_err());
        assert!("tenant.app.default.extra".parse::<ApplicationId>().is_err());
    }

    #[test]
    fn tester_id_derives_from_application() {
        let id = ApplicationId::from_parts("tenant", "app").unwrap();
        let tester = TesterId::of(&id);
        assert_eq!(tester.id().application(), "app-t");
        assert_eq!(tester.id().tenant(), id.tenant());
    }
}

//! Version records: what a run deploys, and where it came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use berth_core::PlatformVersion;

/// The source control revision an application build was made from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRevision {
    /// The repository the revision lives in.
    pub repository: String,
    /// The branch of the revision.
    pub branch: String,
    /// The commit hash of the revision.
    pub commit: String,
}

impl SourceRevision {
    /// Creates a source revision.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
        }
    }
}

/// A build of an application package, created by `submit`.
///
/// The *unknown* version has no fields set and is used for manual deployments,
/// where the package comes from the dev artifact store rather than a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersion {
    /// The source revision this build was made from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<SourceRevision>,
    /// The strictly increasing build number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build: Option<u64>,
    /// The email of the commit author, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    author_email: Option<String>,
    /// The platform version the package was compiled against, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    compile_version: Option<PlatformVersion>,
    /// When the package was built, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    build_time: Option<DateTime<Utc>>,
}

impl ApplicationVersion {
    /// Creates an application version from a revision and a build number.
    #[must_use]
    pub fn from(source: SourceRevision, build: u64) -> Self {
        Self {
            source: Some(source),
            build: Some(build),
            author_email: None,
            compile_version: None,
            build_time: None,
        }
    }

    /// Creates a fully attributed application version.
    #[must_use]
    pub fn from_full(
        source: SourceRevision,
        build: u64,
        author_email: impl Into<String>,
        compile_version: Option<PlatformVersion>,
        build_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            source: Some(source),
            build: Some(build),
            author_email: Some(author_email.into()),
            compile_version,
            build_time,
        }
    }

    /// The unknown version, used for manual deployments.
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            source: None,
            build: None,
            author_email: None,
            compile_version: None,
            build_time: None,
        }
    }

    /// Returns whether this is the unknown version.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        self.build.is_none()
    }

    /// Returns the source revision, if known.
    #[must_use]
    pub const fn source(&self) -> Option<&SourceRevision> {
        self.source.as_ref()
    }

    /// Returns the build number, if known.
    #[must_use]
    pub const fn build(&self) -> Option<u64> {
        self.build
    }

    /// Returns the author email, if known.
    #[must_use]
    pub fn author_email(&self) -> Option<&str> {
        self.author_email.as_deref()
    }

    /// Returns the compile platform version, if known.
    #[must_use]
    pub const fn compile_version(&self) -> Option<&PlatformVersion> {
        self.compile_version.as_ref()
    }

    /// Returns the build time, if known.
    #[must_use]
    pub const fn build_time(&self) -> Option<DateTime<Utc>> {
        self.build_time
    }

    /// Returns a short label for this version, `"1.0.<build>-<commit>"`, or
    /// `"unknown"`.
    #[must_use]
    pub fn id(&self) -> String {
        match (&self.source, self.build) {
            (Some(source), Some(build)) => {
                let commit: String = source.commit.chars().take(9).collect();
                format!("1.0.{build}-{commit}")
            }
            _ => "unknown".to_string(),
        }
    }
}

impl PartialOrd for ApplicationVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ApplicationVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.build.cmp(&other.build)
    }
}

impl fmt::Display for ApplicationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// The platform and application versions of a run: what to deploy, and, when
/// staging an upgrade, what to deploy first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
    target_platform: PlatformVersion,
    target_application: ApplicationVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_platform: Option<PlatformVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_application: Option<ApplicationVersion>,
}

impl Versions {
    /// Creates a versions record. The sources are set only when a previous
    /// deployment exists to stage against.
    #[must_use]
    pub const fn new(
        target_platform: PlatformVersion,
        target_application: ApplicationVersion,
        source_platform: Option<PlatformVersion>,
        source_application: Option<ApplicationVersion>,
    ) -> Self {
        Self {
            target_platform,
            target_application,
            source_platform,
            source_application,
        }
    }

    /// Returns the platform version to deploy.
    #[must_use]
    pub const fn target_platform(&self) -> &PlatformVersion {
        &self.target_platform
    }

    /// Returns the application version to deploy.
    #[must_use]
    pub const fn target_application(&self) -> &ApplicationVersion {
        &self.target_application
    }

    /// Returns the platform version to stage from, if any.
    #[must_use]
    pub const fn source_platform(&self) -> Option<&PlatformVersion> {
        self.source_platform.as_ref()
    }

    /// Returns the application version to stage from, if any.
    #[must_use]
    pub const fn source_application(&self) -> Option<&ApplicationVersion> {
        self.source_application.as_ref()
    }
}

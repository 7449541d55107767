//! Error types for the deployment job domain.

use crate::job_type::JobType;
use crate::run::RunId;
use berth_core::ApplicationId;

use crate::integration::config_server::ConfigServerError;

/// The result type used throughout `berth-deploy`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in deployment job operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A run of the given job is already active.
    #[error("cannot start {job_type} for {application}; it is already running")]
    AlreadyRunning {
        /// The application whose job is running.
        application: ApplicationId,
        /// The job type that is already running.
        job_type: JobType,
    },

    /// The versions given to `start` do not reference a known application build.
    #[error("target application must be a valid build reference")]
    InvalidVersions,

    /// The application is not registered for internal deployment.
    #[error("{application} is not built here")]
    NotInternallyDeployed {
        /// The application that is not registered.
        application: ApplicationId,
    },

    /// Direct deployments are only allowed to manually deployed environments.
    #[error("direct deployments are not allowed to {job_type}")]
    NotManuallyDeployed {
        /// The job type that was refused.
        job_type: JobType,
    },

    /// The application is not known to the controller.
    #[error("application {application} not found")]
    ApplicationNotFound {
        /// The application that was looked up.
        application: ApplicationId,
    },

    /// A run was not found.
    #[error("run {run_id} not found")]
    RunNotFound {
        /// The run that was looked up.
        run_id: RunId,
    },

    /// A lock could not be acquired within its timeout.
    #[error("timed out acquiring {key}")]
    Timeout {
        /// The contended lock key.
        key: String,
    },

    /// The tester certificate of a run may be set at most once.
    #[error("tester certificate for {run_id} is already set")]
    CertificateAlreadySet {
        /// The run whose certificate was set twice.
        run_id: RunId,
    },

    /// A certificate could not be minted or parsed.
    #[error("certificate error: {message}")]
    Certificate {
        /// Description of the failure.
        message: String,
    },

    /// The config server rejected or failed a request.
    #[error(transparent)]
    ConfigServer(#[from] ConfigServerError),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// An error from `berth-core`.
    #[error(transparent)]
    Core(berth_core::Error),
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns whether this error is a lock-acquisition timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<berth_core::Error> for Error {
    fn from(e: berth_core::Error) -> Self {
        match e {
            berth_core::Error::LockTimeout { key } => Self::Timeout { key },
            berth_core::Error::Serialization { message } => Self::Serialization { message },
            other => Self::Core(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

//! # berth-core
//!
//! Core abstractions for the Berth hosting platform controller.
//!
//! This crate provides the foundational types used across all Berth components:
//!
//! - **Identifiers**: Strongly-typed ids for tenants, applications, and testers
//! - **Zones**: Deployment targets (`environment × region`) and system names
//! - **Locks**: Leased, timeout-bounded locks for crash-safe coordination
//! - **Clock**: An injectable time source so tests can drive virtual time
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `berth-core` is the **only** crate allowed to define shared primitives.
//! Domain crates build on these and never redefine them.
//!
//! ## Example
//!
//! ```rust
//! use berth_core::prelude::*;
//!
//! let id = ApplicationId::new("tenant", "application", "default").unwrap();
//! assert_eq!(id.to_string(), "tenant.application.default");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod clock;
pub mod error;
pub mod id;
pub mod lock;
pub mod observability;
pub mod zone;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use berth_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::error::{Error, Result};
    pub use crate::id::{ApplicationId, TenantId, TesterId};
    pub use crate::lock::{LockKey, LockLease, LockRegistry};
    pub use crate::zone::{Environment, PlatformVersion, SystemName, ZoneId};
}

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use id::{ApplicationId, TenantId, TesterId};
pub use lock::{LockKey, LockLease, LockRegistry};
pub use observability::{init_logging, LogFormat};
pub use zone::{Environment, PlatformVersion, SystemName, ZoneId};

//! fleetup desired-state model — immutable application/cluster mapping.
//!
//! The desired state is the globally published document describing which
//! application versions should run on which clusters. Every value in this
//! crate is immutable: mutations clone the backing map and return a new
//! value, so readers never need synchronization.
//!
//! # Components
//!
//! - **`identity`** — `ApplicationIdentity` (name + semantic version)
//! - **`record`** — `DeploymentRecord` (target clusters + properties)
//! - **`desired`** — `DesiredState` (the identity → record mapping)

pub mod desired;
pub mod error;
pub mod identity;
pub mod record;

pub use desired::DesiredState;
pub use error::{ModelError, ModelResult};
pub use identity::ApplicationIdentity;
pub use record::DeploymentRecord;

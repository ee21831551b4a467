//! Error types for the desired-state model.

use thiserror::Error;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur when editing or decoding desired state.
///
/// Removals of absent targets fail loudly rather than no-op: callers rely
/// on these errors to detect drift bugs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("application version not found: {0}")]
    VersionNotFound(String),

    #[error("deployment not found: {identity} is not targeted at cluster {cluster}")]
    DeploymentNotFound { identity: String, cluster: String },

    #[error("duplicate deployment: {identity} already targets cluster {cluster}")]
    DuplicateDeployment { identity: String, cluster: String },

    #[error("duplicate cluster: {cluster} already a target of {identity}")]
    DuplicateCluster { identity: String, cluster: String },

    #[error("property not found: {key} on {identity}")]
    PropertyNotFound { identity: String, key: String },

    #[error("record for {0} must target at least one cluster")]
    EmptyTargetClusters(String),

    #[error("duplicate record for {0} in desired-state document")]
    DuplicateRecord(String),
}

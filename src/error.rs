//! Error taxonomy of a stress run.
//!
//! Only [`StressError`] stops a run. Per-instance failures are recorded as
//! that instance's outcome and cleanup failures are logged and dropped.

use thiserror::Error;

use crate::config::ConfigError;
use crate::instance::Instance;
use crate::provider::LookupKind;
use crate::resource::ResourceKind;

/// Fatal errors raised before any instance is provisioned.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum StressError {
    /// A flavor, image, or network name could not be resolved.
    #[error("failed to resolve {kind} '{name}': {message}")]
    Lookup {
        /// Kind of the shared resource.
        kind: LookupKind,
        /// Name given by the operator.
        name: String,
        /// Provider message.
        message: String,
    },
    /// Shared scaffolding (network, subnet, server group) could not be
    /// created.
    #[error("failed to prepare shared resources: {message}")]
    Setup {
        /// Provider message.
        message: String,
    },
    /// The run configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reason a single instance failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InstanceError {
    /// Creating a server or volume failed, or it landed in an error state.
    #[error("failed to provision {kind} {name}: {message}")]
    Provision {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource name or identifier.
        name: String,
        /// Provider message.
        message: String,
    },
    /// Attaching a volume failed.
    #[error("failed to attach volume {volume_id} to server {server_id}: {message}")]
    Attach {
        /// Volume identifier.
        volume_id: String,
        /// Server identifier.
        server_id: String,
        /// Provider message.
        message: String,
    },
    /// A status wait passed its deadline.
    #[error("timed out waiting for {kind} {id} to become {target}")]
    Timeout {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource identifier.
        id: String,
        /// State that never arrived.
        target: &'static str,
    },
    /// The boot script reported a failure on the console.
    #[error("boot script failed on server {server_id}")]
    BootFailed {
        /// Server identifier.
        server_id: String,
    },
    /// Deleting a resource failed inside the provisioning task.
    #[error("failed to delete {kind} {id}: {message}")]
    Delete {
        /// Resource kind.
        kind: ResourceKind,
        /// Resource identifier.
        id: String,
        /// Provider message.
        message: String,
    },
    /// The task driving the instance panicked.
    #[error("provisioning task panicked: {message}")]
    TaskPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Per-instance failure carrying the instance as far as it got, so cleanup
/// can still reach what was created.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("instance {} failed: {error}", .instance.name)]
pub struct InstanceFailure {
    /// Instance snapshot at the moment of failure.
    pub instance: Box<Instance>,
    /// What went wrong.
    #[source]
    pub error: InstanceError,
}

/// Failed deletion during the cleanup pass. Logged, never propagated.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to delete {kind} {id}: {message}")]
pub struct CleanupError {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resource identifier.
    pub id: String,
    /// Provider message or timeout description.
    pub message: String,
}

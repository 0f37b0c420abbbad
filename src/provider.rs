//! Capability surface of the cloud platform consumed by the stress run.
//!
//! The orchestrator never talks to a cloud SDK directly. Everything it needs
//! (lookups, server and volume lifecycle, console output, scaffolding) goes
//! through [`ResourceProvider`], which keeps the core testable against the
//! in-memory provider in [`crate::test_support`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::config::AffinityPolicy;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Error contract shared by all provider implementations.
pub trait ProviderFailure: std::error::Error + Send + Sync + 'static {
    /// Returns `true` when the provider reported that the addressed resource
    /// does not exist.
    fn is_not_found(&self) -> bool;
}

/// Named shared resources resolved once before provisioning starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LookupKind {
    /// Compute flavour.
    Flavor,
    /// Boot image.
    Image,
    /// Pre-existing tenant network.
    Network,
}

impl LookupKind {
    /// Lower-case label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flavor => "flavor",
            Self::Image => "image",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for creating one server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRequest {
    /// Server name (`<prefix>-<index>`).
    pub name: String,
    /// Resolved flavour identifier.
    pub flavor_id: String,
    /// Image used to populate the boot volume.
    pub image_id: String,
    /// Network the server's port is attached to.
    pub network_id: String,
    /// Server group used as a scheduler hint.
    pub server_group_id: Option<String>,
    /// Compute availability zone.
    pub availability_zone: String,
    /// Base64 encoded user data.
    pub user_data: String,
    /// Boot volume size in GiB.
    pub boot_volume_size: u32,
    /// Volume type for the boot volume, when not the cloud default.
    pub volume_type: Option<String>,
    /// Free-form metadata stamped on the server.
    pub metadata: BTreeMap<String, String>,
}

/// Parameters for creating one block volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRequest {
    /// Volume name (`<instance>-volume-<k>`).
    pub name: String,
    /// Size in GiB.
    pub size_gib: u32,
    /// Storage availability zone.
    pub availability_zone: String,
    /// Volume type, when not the cloud default.
    pub volume_type: Option<String>,
}

/// Parameters for creating the run's server group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerGroupRequest {
    /// Group name.
    pub name: String,
    /// Placement policy.
    pub policy: AffinityPolicy,
}

/// Parameters for creating the run's subnet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubnetRequest {
    /// Subnet name.
    pub name: String,
    /// Owning network.
    pub network_id: String,
    /// Address range in CIDR notation.
    pub cidr: String,
}

/// Snapshot of a server as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerDetails {
    /// Provider identifier.
    pub id: String,
    /// Raw provider status (for example `BUILD`, `ACTIVE`, `ERROR`).
    pub status: String,
    /// Identifiers of volumes currently attached to the server.
    pub attached_volumes: Vec<String>,
    /// Fault message reported alongside an error status.
    pub fault: Option<String>,
}

impl ServerDetails {
    /// Returns `true` once the server is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }

    /// Returns `true` when the provider gave up building the server.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.eq_ignore_ascii_case("error")
    }
}

/// Snapshot of a volume as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeDetails {
    /// Provider identifier.
    pub id: String,
    /// Raw provider status (for example `creating`, `available`, `in-use`).
    pub status: String,
}

impl VolumeDetails {
    /// Returns `true` when the volume can be attached.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status.eq_ignore_ascii_case("available")
    }

    /// Returns `true` once the volume is attached to a server.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        self.status.eq_ignore_ascii_case("in-use")
    }

    /// Returns `true` for any of the provider's error states.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.to_ascii_lowercase().starts_with("error")
    }
}

/// Operations the stress run performs against a cloud.
///
/// Lookups of details return `Ok(None)` once a resource is gone; deletions of
/// missing resources surface an error for which
/// [`ProviderFailure::is_not_found`] holds.
pub trait ResourceProvider: Send + Sync {
    /// Provider specific error type.
    type Error: ProviderFailure;

    /// Resolves a flavour, image, or network name to its identifier.
    fn resolve<'a>(
        &'a self,
        kind: LookupKind,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Issues a server create and returns the new server's identifier.
    fn create_server<'a>(
        &'a self,
        request: &'a ServerRequest,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Fetches current server details.
    fn server_details<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ProviderFuture<'a, Option<ServerDetails>, Self::Error>;

    /// Issues a server delete.
    fn delete_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Returns the server's console log.
    fn console_output<'a>(&'a self, server_id: &'a str)
    -> ProviderFuture<'a, String, Self::Error>;

    /// Issues a volume create and returns the new volume's identifier.
    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Fetches current volume details.
    fn volume_details<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Option<VolumeDetails>, Self::Error>;

    /// Issues a volume delete.
    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Attaches a volume to a server.
    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Creates a server group and returns its identifier.
    fn create_server_group<'a>(
        &'a self,
        request: &'a ServerGroupRequest,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Deletes a server group.
    fn delete_server_group<'a>(&'a self, group_id: &'a str)
    -> ProviderFuture<'a, (), Self::Error>;

    /// Creates a network and returns its identifier.
    fn create_network<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, String, Self::Error>;

    /// Deletes a network.
    fn delete_network<'a>(&'a self, network_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Creates a subnet and returns its identifier.
    fn create_subnet<'a>(
        &'a self,
        request: &'a SubnetRequest,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Deletes a subnet.
    fn delete_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}

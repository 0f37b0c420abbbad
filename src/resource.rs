//! Resource-kind-agnostic create/wait/delete discipline.
//!
//! Servers and volumes each implement [`ManagedResource`] once; the
//! provisioning task and the cleanup pass drive both through [`Lifecycle`]
//! and never branch on the kind themselves.

use std::fmt;

use tracing::debug;

use crate::error::InstanceError;
use crate::provider::{
    ProviderFailure, ProviderFuture, ResourceProvider, ServerRequest, VolumeRequest,
};
use crate::wait::{PollError, PollPolicy, poll_until};

/// Kinds of cloud resources a run creates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Compute server.
    Server,
    /// Block volume.
    Volume,
    /// Server group used for placement.
    ServerGroup,
    /// Subnet of the run's network.
    Subnet,
    /// Tenant network.
    Network,
}

impl ResourceKind {
    /// Lower-case label used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Volume => "volume",
            Self::ServerGroup => "server group",
            Self::Subnet => "subnet",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single status check.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Readiness {
    /// Still transitioning.
    Pending,
    /// Usable.
    Ready,
    /// Landed in an error state.
    Failed(String),
}

/// Outcome of a delete request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Deletion {
    /// The provider accepted the delete.
    Deleted,
    /// The resource was already gone.
    AlreadyGone,
}

/// Capability interface implemented once per polled resource kind.
pub trait ManagedResource {
    /// Kind reported in logs and errors.
    const KIND: ResourceKind;
    /// State name the ready wait is waiting for.
    const READY_STATE: &'static str;
    /// Parameters accepted by [`Self::create`].
    type Request: Sync;

    /// Name carried by a create request.
    fn label(request: &Self::Request) -> &str;

    /// Issues the create call and returns the new identifier.
    fn create<'a, P: ResourceProvider>(
        provider: &'a P,
        request: &'a Self::Request,
    ) -> ProviderFuture<'a, String, P::Error>;

    /// Reports readiness, or `None` once the resource no longer exists.
    fn inspect<'a, P: ResourceProvider>(
        provider: &'a P,
        id: &'a str,
    ) -> ProviderFuture<'a, Option<Readiness>, P::Error>;

    /// Issues the delete call.
    fn delete<'a, P: ResourceProvider>(provider: &'a P, id: &'a str)
    -> ProviderFuture<'a, (), P::Error>;
}

/// Compute servers.
#[derive(Clone, Copy, Debug)]
pub struct Server;

impl ManagedResource for Server {
    const KIND: ResourceKind = ResourceKind::Server;
    const READY_STATE: &'static str = "active";
    type Request = ServerRequest;

    fn label(request: &Self::Request) -> &str {
        &request.name
    }

    fn create<'a, P: ResourceProvider>(
        provider: &'a P,
        request: &'a Self::Request,
    ) -> ProviderFuture<'a, String, P::Error> {
        provider.create_server(request)
    }

    fn inspect<'a, P: ResourceProvider>(
        provider: &'a P,
        id: &'a str,
    ) -> ProviderFuture<'a, Option<Readiness>, P::Error> {
        Box::pin(async move {
            let details = provider.server_details(id).await?;
            Ok(details.map(|server| {
                if server.is_active() {
                    Readiness::Ready
                } else if server.is_error() {
                    Readiness::Failed(server.fault.unwrap_or(server.status))
                } else {
                    Readiness::Pending
                }
            }))
        })
    }

    fn delete<'a, P: ResourceProvider>(
        provider: &'a P,
        id: &'a str,
    ) -> ProviderFuture<'a, (), P::Error> {
        provider.delete_server(id)
    }
}

/// Block volumes.
#[derive(Clone, Copy, Debug)]
pub struct Volume;

impl ManagedResource for Volume {
    const KIND: ResourceKind = ResourceKind::Volume;
    const READY_STATE: &'static str = "available";
    type Request = VolumeRequest;

    fn label(request: &Self::Request) -> &str {
        &request.name
    }

    fn create<'a, P: ResourceProvider>(
        provider: &'a P,
        request: &'a Self::Request,
    ) -> ProviderFuture<'a, String, P::Error> {
        provider.create_volume(request)
    }

    fn inspect<'a, P: ResourceProvider>(
        provider: &'a P,
        id: &'a str,
    ) -> ProviderFuture<'a, Option<Readiness>, P::Error> {
        Box::pin(async move {
            let details = provider.volume_details(id).await?;
            Ok(details.map(|volume| {
                if volume.is_available() {
                    Readiness::Ready
                } else if volume.is_error() {
                    Readiness::Failed(volume.status)
                } else {
                    Readiness::Pending
                }
            }))
        })
    }

    fn delete<'a, P: ResourceProvider>(
        provider: &'a P,
        id: &'a str,
    ) -> ProviderFuture<'a, (), P::Error> {
        provider.delete_volume(id)
    }
}

enum ReadyFailure<E> {
    Provider(E),
    Vanished,
    Failed(String),
}

/// Drives [`ManagedResource`] operations with a shared poll policy.
pub struct Lifecycle<'a, P> {
    provider: &'a P,
    policy: PollPolicy,
}

impl<'a, P: ResourceProvider> Lifecycle<'a, P> {
    /// Binds a provider and the policy used for every wait.
    #[must_use]
    pub const fn new(provider: &'a P, policy: PollPolicy) -> Self {
        Self { provider, policy }
    }

    /// Issues a create and returns the identifier.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Provision`] when the provider rejects the call.
    pub async fn create<R: ManagedResource>(
        &self,
        request: &R::Request,
    ) -> Result<String, InstanceError> {
        let id = R::create(self.provider, request)
            .await
            .map_err(|err| InstanceError::Provision {
                kind: R::KIND,
                name: R::label(request).to_owned(),
                message: err.to_string(),
            })?;
        debug!(kind = %R::KIND, name = R::label(request), id = %id, "create issued");
        Ok(id)
    }

    /// Polls until the resource is ready.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Timeout`] once the deadline passes and
    /// [`InstanceError::Provision`] when the resource fails or disappears.
    pub async fn wait_ready<R: ManagedResource>(&self, id: &str) -> Result<(), InstanceError> {
        let provider = self.provider;
        let result = poll_until(self.policy, move || async move {
            match R::inspect(provider, id).await {
                Ok(Some(Readiness::Ready)) => Ok(Some(())),
                Ok(Some(Readiness::Pending)) => Ok(None),
                Ok(Some(Readiness::Failed(message))) => Err(ReadyFailure::Failed(message)),
                Ok(None) => Err(ReadyFailure::Vanished),
                Err(err) if err.is_not_found() => Err(ReadyFailure::Vanished),
                Err(err) => Err(ReadyFailure::Provider(err)),
            }
        })
        .await;

        let provision = |message: String| InstanceError::Provision {
            kind: R::KIND,
            name: id.to_owned(),
            message,
        };
        match result {
            Ok(()) => Ok(()),
            Err(PollError::Exhausted { .. }) => Err(InstanceError::Timeout {
                kind: R::KIND,
                id: id.to_owned(),
                target: R::READY_STATE,
            }),
            Err(PollError::Check(ReadyFailure::Failed(status))) => {
                Err(provision(format!("entered error state: {status}")))
            }
            Err(PollError::Check(ReadyFailure::Vanished)) => {
                Err(provision("disappeared while waiting".to_owned()))
            }
            Err(PollError::Check(ReadyFailure::Provider(err))) => Err(provision(err.to_string())),
        }
    }

    /// Issues a delete. A resource that is already gone counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Delete`] for any other provider failure.
    pub async fn delete<R: ManagedResource>(&self, id: &str) -> Result<Deletion, InstanceError> {
        match R::delete(self.provider, id).await {
            Ok(()) => Ok(Deletion::Deleted),
            Err(err) if err.is_not_found() => {
                debug!(kind = %R::KIND, id, "already gone");
                Ok(Deletion::AlreadyGone)
            }
            Err(err) => Err(delete_error::<R>(id, &err)),
        }
    }

    /// Polls until the resource no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Timeout`] once the deadline passes and
    /// [`InstanceError::Delete`] when a status check fails.
    pub async fn wait_deleted<R: ManagedResource>(&self, id: &str) -> Result<(), InstanceError> {
        let provider = self.provider;
        let result = poll_until(self.policy, move || async move {
            match R::inspect(provider, id).await {
                Ok(None) => Ok(Some(())),
                Ok(Some(_)) => Ok(None),
                Err(err) if err.is_not_found() => Ok(Some(())),
                Err(err) => Err(err),
            }
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Exhausted { .. }) => Err(InstanceError::Timeout {
                kind: R::KIND,
                id: id.to_owned(),
                target: "deleted",
            }),
            Err(PollError::Check(err)) => Err(delete_error::<R>(id, &err)),
        }
    }

    /// Deletes and waits for the deletion to complete.
    ///
    /// # Errors
    ///
    /// See [`Self::delete`] and [`Self::wait_deleted`].
    pub async fn remove<R: ManagedResource>(&self, id: &str) -> Result<Deletion, InstanceError> {
        let deletion = self.delete::<R>(id).await?;
        if deletion == Deletion::Deleted {
            self.wait_deleted::<R>(id).await?;
        }
        Ok(deletion)
    }

    /// Polls the volume until the block storage service reports it `in-use`.
    ///
    /// The compute API accepts an attachment before it is complete, so a
    /// volume only counts as attached once this returns.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Timeout`] once the deadline passes and
    /// [`InstanceError::Attach`] when the volume fails, disappears, or cannot
    /// be queried.
    pub async fn wait_attached(
        &self,
        server_id: &str,
        volume_id: &str,
    ) -> Result<(), InstanceError> {
        let provider = self.provider;
        let result = poll_until(self.policy, move || async move {
            match provider.volume_details(volume_id).await {
                Ok(Some(volume)) if volume.is_in_use() => Ok(Some(())),
                Ok(Some(volume)) if volume.is_error() => {
                    Err(ReadyFailure::Failed(volume.status))
                }
                Ok(Some(_)) => Ok(None),
                Ok(None) => Err(ReadyFailure::Vanished),
                Err(err) if err.is_not_found() => Err(ReadyFailure::Vanished),
                Err(err) => Err(ReadyFailure::Provider(err)),
            }
        })
        .await;

        let attach = |message: String| InstanceError::Attach {
            volume_id: volume_id.to_owned(),
            server_id: server_id.to_owned(),
            message,
        };
        match result {
            Ok(()) => Ok(()),
            Err(PollError::Exhausted { .. }) => Err(InstanceError::Timeout {
                kind: ResourceKind::Volume,
                id: volume_id.to_owned(),
                target: "in-use",
            }),
            Err(PollError::Check(ReadyFailure::Failed(status))) => {
                Err(attach(format!("entered error state: {status}")))
            }
            Err(PollError::Check(ReadyFailure::Vanished)) => {
                Err(attach("volume disappeared while attaching".to_owned()))
            }
            Err(PollError::Check(ReadyFailure::Provider(err))) => Err(attach(err.to_string())),
        }
    }

    /// Checks whether the resource still exists with a single status check.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Delete`] when the status check itself fails.
    pub async fn exists<R: ManagedResource>(&self, id: &str) -> Result<bool, InstanceError> {
        match R::inspect(self.provider, id).await {
            Ok(found) => Ok(found.is_some()),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(delete_error::<R>(id, &err)),
        }
    }
}

fn delete_error<R: ManagedResource>(id: &str, err: &impl ProviderFailure) -> InstanceError {
    InstanceError::Delete {
        kind: R::KIND,
        id: id.to_owned(),
        message: err.to_string(),
    }
}

//! Per-instance provisioning state machine.
//!
//! One task drives one instance strictly sequentially:
//! create server, wait for it, create and attach volumes, wait for boot,
//! then either delete everything or leave it for the cleanup pass. The first
//! failing step ends the task; the instance snapshot returned with the error
//! still lists every resource created up to that point.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::context::CloudContext;
use crate::error::{InstanceError, InstanceFailure};
use crate::instance::{Instance, InstanceState, ServerRef, VolumeRef, VolumeState};
use crate::pool::panic_message;
use crate::provider::{ProviderFailure, ResourceProvider, ServerRequest, VolumeRequest};
use crate::resource::{Lifecycle, ResourceKind, Server, Volume};
use crate::user_data::{FAILURE_SENTINEL, SUCCESS_SENTINEL};
use crate::wait::{PollError, poll_until};

/// Metadata key carrying the run identifier on every server.
pub const RUN_ID_METADATA_KEY: &str = "simple-stress-run";

/// Input of one provisioning task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Submission position.
    pub index: usize,
    /// Server name.
    pub name: String,
}

/// Everything a provisioning task needs, cheap to clone into each task.
pub struct ProvisioningTask<P> {
    provider: Arc<P>,
    context: Arc<CloudContext>,
    config: Arc<RunConfig>,
}

impl<P> Clone for ProvisioningTask<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            context: Arc::clone(&self.context),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: ResourceProvider> ProvisioningTask<P> {
    /// Bundles the shared state.
    #[must_use]
    pub const fn new(
        provider: Arc<P>,
        context: Arc<CloudContext>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            provider,
            context,
            config,
        }
    }

    /// Drives one instance through its lifecycle.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceFailure`] carrying the instance snapshot and the
    /// typed reason of the first failing step.
    pub async fn run(self, spec: InstanceSpec) -> Result<Instance, InstanceFailure> {
        let mut instance = Instance::new(spec.index, spec.name);
        let caught = AssertUnwindSafe(self.drive(&mut instance))
            .catch_unwind()
            .await;
        let outcome = caught.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!(instance = %instance.name, %message, "provisioning task panicked");
            Err(InstanceError::TaskPanicked { message })
        });
        match outcome {
            Ok(()) => Ok(instance),
            Err(error) => {
                instance.state = InstanceState::Failed;
                Err(InstanceFailure {
                    instance: Box::new(instance),
                    error,
                })
            }
        }
    }

    async fn drive(&self, instance: &mut Instance) -> Result<(), InstanceError> {
        let lifecycle = Lifecycle::new(self.provider.as_ref(), self.config.status_policy());

        instance.state = InstanceState::Creating;
        let request = self.server_request(&instance.name);
        info!(instance = %instance.name, "creating server");
        let server_id = lifecycle.create::<Server>(&request).await?;
        instance.server = Some(ServerRef::new(server_id.clone()));

        info!(instance = %instance.name, server_id = %server_id, "waiting for server");
        lifecycle.wait_ready::<Server>(&server_id).await?;

        if self.config.volumes_per_instance() > 0 {
            instance.state = InstanceState::CreatingVolumes;
            self.create_volumes(&lifecycle, instance).await?;
            instance.state = InstanceState::Attaching;
            self.attach_volumes(&lifecycle, &server_id, instance).await?;
        }

        if self.config.wait {
            instance.state = InstanceState::WaitingBoot;
            info!(instance = %instance.name, server_id = %server_id, "waiting for boot");
            self.wait_for_boot(&server_id, &instance.name).await?;
            info!(instance = %instance.name, server_id = %server_id, "boot finished");
        }

        if self.config.delete {
            teardown(&lifecycle, instance).await
        } else if self.config.cleanup {
            instance.state = InstanceState::Ready;
            debug!(instance = %instance.name, "deletion deferred to cleanup");
            Ok(())
        } else {
            instance.state = InstanceState::Retained;
            info!(instance = %instance.name, server_id = %server_id, "skipping deletion");
            Ok(())
        }
    }

    fn server_request(&self, name: &str) -> ServerRequest {
        ServerRequest {
            name: name.to_owned(),
            flavor_id: self.context.flavor_id.clone(),
            image_id: self.context.image_id.clone(),
            network_id: self.context.network_id.clone(),
            server_group_id: Some(self.context.server_group_id.clone()),
            availability_zone: self.config.compute_zone.clone(),
            user_data: self.context.user_data.clone(),
            boot_volume_size: self.config.boot_volume_size,
            volume_type: self.config.requested_volume_type(),
            metadata: BTreeMap::from([(
                RUN_ID_METADATA_KEY.to_owned(),
                self.context.run_id.clone(),
            )]),
        }
    }

    async fn create_volumes(
        &self,
        lifecycle: &Lifecycle<'_, P>,
        instance: &mut Instance,
    ) -> Result<(), InstanceError> {
        for ordinal in 0..self.config.volumes_per_instance() {
            let request = VolumeRequest {
                name: RunConfig::volume_name(&instance.name, ordinal),
                size_gib: self.config.volume_size,
                availability_zone: self.config.storage_zone.clone(),
                volume_type: self.config.requested_volume_type(),
            };
            info!(instance = %instance.name, volume = %request.name, "creating volume");
            let volume_id = lifecycle.create::<Volume>(&request).await?;
            instance.volumes.push(VolumeRef {
                id: volume_id.clone(),
                name: request.name,
                state: VolumeState::Creating,
            });

            lifecycle.wait_ready::<Volume>(&volume_id).await?;
            if let Some(volume) = instance.volumes.last_mut() {
                volume.state = VolumeState::Available;
            }
        }
        Ok(())
    }

    async fn attach_volumes(
        &self,
        lifecycle: &Lifecycle<'_, P>,
        server_id: &str,
        instance: &mut Instance,
    ) -> Result<(), InstanceError> {
        let Instance {
            name,
            server,
            volumes,
            ..
        } = instance;

        for volume in volumes
            .iter_mut()
            .filter(|volume| volume.state == VolumeState::Available)
        {
            let volume_id = volume.id.as_str();
            info!(instance = %name, server_id, volume_id, "attaching volume");
            let attach_error = |message: String| InstanceError::Attach {
                volume_id: volume_id.to_owned(),
                server_id: server_id.to_owned(),
                message,
            };

            self.provider
                .attach_volume(server_id, volume_id)
                .await
                .map_err(|err| attach_error(err.to_string()))?;
            lifecycle.wait_attached(server_id, volume_id).await?;
            volume.state = VolumeState::Attached;

            let details = self
                .provider
                .server_details(server_id)
                .await
                .map_err(|err| attach_error(err.to_string()))?
                .ok_or_else(|| attach_error("server disappeared after attach".to_owned()))?;
            if let Some(server_ref) = server.as_mut() {
                server_ref.attachments = details.attached_volumes;
            }
        }
        Ok(())
    }

    async fn wait_for_boot(&self, server_id: &str, name: &str) -> Result<(), InstanceError> {
        let provider = self.provider.as_ref();
        let fail_fast = self.config.fail_on_boot_error;
        let seen = AtomicBool::new(false);
        let failure_seen = &seen;

        let result = poll_until(self.config.console_policy(), move || async move {
            let console = match provider.console_output(server_id).await {
                Ok(console) => console,
                Err(err) if err.is_not_found() => {
                    return Err(InstanceError::Provision {
                        kind: ResourceKind::Server,
                        name: server_id.to_owned(),
                        message: "disappeared while booting".to_owned(),
                    });
                }
                Err(err) => {
                    debug!(instance = name, server_id, error = %err, "console unavailable");
                    return Ok(None);
                }
            };

            if console.contains(FAILURE_SENTINEL) && !failure_seen.swap(true, Ordering::SeqCst) {
                error!(instance = name, server_id, "boot script failed");
                if fail_fast {
                    return Err(InstanceError::BootFailed {
                        server_id: server_id.to_owned(),
                    });
                }
            }
            Ok(console.contains(SUCCESS_SENTINEL).then_some(()))
        })
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(PollError::Check(err)) => Err(err),
            Err(PollError::Exhausted { attempts }) => {
                warn!(instance = name, server_id, attempts, "boot sentinel never appeared");
                Err(InstanceError::Timeout {
                    kind: ResourceKind::Server,
                    id: server_id.to_owned(),
                    target: "booted",
                })
            }
        }
    }
}

/// Deletes the server, waits for it to go, then deletes each volume in
/// creation order, waiting for each.
///
/// # Errors
///
/// Returns the first [`InstanceError`] met; resources not yet removed stay
/// recorded on the instance.
pub async fn teardown<P: ResourceProvider>(
    lifecycle: &Lifecycle<'_, P>,
    instance: &mut Instance,
) -> Result<(), InstanceError> {
    instance.state = InstanceState::Deleting;

    if let Some(server) = instance.server.as_mut().filter(|server| !server.deleted) {
        info!(instance = %instance.name, server_id = %server.id, "deleting server");
        lifecycle.remove::<Server>(&server.id).await?;
        server.deleted = true;
        server.attachments.clear();
    }

    for volume in instance
        .volumes
        .iter_mut()
        .filter(|volume| volume.state != VolumeState::Deleted)
    {
        info!(instance = %instance.name, volume_id = %volume.id, "deleting volume");
        volume.state = VolumeState::Deleting;
        lifecycle.remove::<Volume>(&volume.id).await?;
        volume.state = VolumeState::Deleted;
    }

    instance.state = InstanceState::Deleted;
    info!(instance = %instance.name, "deleted");
    Ok(())
}

//! Deferred, idempotent, best-effort teardown of instances.
//!
//! The cleanup pass runs after provisioning collection ends, however it
//! ended. Each instance that still owes cleanup gets one deletion task on the
//! worker pool: server first (delete, then wait), then its volumes in creation
//! order. Volumes of a server that could not be deleted stay owed, since they
//! may still be attached. A volume is checked before its delete so a volume
//! removed in the meantime counts as already clean. Nothing raised here
//! escapes; failures are logged and collected in the [`CleanupSummary`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{CleanupError, InstanceError};
use crate::instance::{Instance, InstanceState, VolumeState};
use crate::pool::{TaskOutcome, WorkerPool};
use crate::provider::ResourceProvider;
use crate::resource::{Deletion, Lifecycle, ManagedResource, ResourceKind, Server, Volume};
use crate::wait::PollPolicy;

/// What a cleanup pass did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Servers deleted by this pass.
    pub deleted_servers: usize,
    /// Volumes deleted by this pass.
    pub deleted_volumes: usize,
    /// Resources found to be gone already.
    pub already_gone: usize,
    /// Deletions that failed.
    pub failures: Vec<CleanupError>,
}

impl CleanupSummary {
    /// Returns `true` when no deletion failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, other: Self) {
        self.deleted_servers += other.deleted_servers;
        self.deleted_volumes += other.deleted_volumes;
        self.already_gone += other.already_gone;
        self.failures.extend(other.failures);
    }

    fn record(&mut self, kind: ResourceKind, deletion: Deletion) {
        match (deletion, kind) {
            (Deletion::AlreadyGone, _) => self.already_gone += 1,
            (Deletion::Deleted, ResourceKind::Server) => self.deleted_servers += 1,
            (Deletion::Deleted, _) => self.deleted_volumes += 1,
        }
    }

    fn fail(&mut self, kind: ResourceKind, id: &str, err: InstanceError) {
        let message = match err {
            InstanceError::Delete { message, .. } => message,
            other => other.to_string(),
        };
        warn!(kind = %kind, id, error = %message, "cleanup failed, continuing");
        self.failures.push(CleanupError {
            kind,
            id: id.to_owned(),
            message,
        });
    }
}

/// Result of [`CleanupOrchestrator::release`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Released {
    /// Instances the pass worked on, with their updated state, ordered by
    /// index.
    pub instances: Vec<Instance>,
    /// Aggregated counters and failures.
    pub summary: CleanupSummary,
}

/// Schedules best-effort deletions on the worker pool.
pub struct CleanupOrchestrator<P> {
    provider: Arc<P>,
    pool: WorkerPool,
    policy: PollPolicy,
}

impl<P: ResourceProvider + 'static> CleanupOrchestrator<P> {
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(provider: Arc<P>, pool: WorkerPool, policy: PollPolicy) -> Self {
        Self {
            provider,
            pool,
            policy,
        }
    }

    /// Deletes every resource the given instances still own.
    ///
    /// Instances that owe nothing are skipped without any provider call.
    /// This never fails; see [`CleanupSummary::failures`].
    pub async fn release(&self, instances: impl IntoIterator<Item = Instance>) -> Released {
        let owed: Vec<Instance> = instances
            .into_iter()
            .filter(Instance::owes_cleanup)
            .collect();
        if owed.is_empty() {
            return Released::default();
        }
        info!(instances = owed.len(), "cleaning up");

        let policy = self.policy;
        let reports = self
            .pool
            .run_all(owed, |instance| {
                let provider = Arc::clone(&self.provider);
                async move { release_instance(provider.as_ref(), policy, instance).await }
            })
            .await;

        let mut released = Released::default();
        for report in reports {
            match report.outcome {
                TaskOutcome::Completed((instance, summary)) => {
                    released.summary.absorb(summary);
                    released.instances.push(instance);
                }
                TaskOutcome::Panicked(message) => {
                    released.summary.failures.push(CleanupError {
                        kind: ResourceKind::Server,
                        id: format!("task #{}", report.index),
                        message,
                    });
                }
                TaskOutcome::NotAttempted(instance) => released.instances.push(instance),
            }
        }
        released.instances.sort_by_key(|instance| instance.index);
        released
    }
}

async fn release_instance<P: ResourceProvider>(
    provider: &P,
    policy: PollPolicy,
    mut instance: Instance,
) -> (Instance, CleanupSummary) {
    let lifecycle = Lifecycle::new(provider, policy);
    let mut summary = CleanupSummary::default();
    instance.state = InstanceState::Deleting;

    if let Some(server) = instance.server.as_mut().filter(|server| !server.deleted) {
        info!(instance = %instance.name, server_id = %server.id, "deleting server");
        match lifecycle.remove::<Server>(&server.id).await {
            Ok(deletion) => {
                summary.record(Server::KIND, deletion);
                server.deleted = true;
                server.attachments.clear();
            }
            Err(err) => {
                summary.fail(Server::KIND, &server.id, err);
                warn!(
                    instance = %instance.name,
                    server_id = %server.id,
                    "server still present; leaving its volumes for a later pass"
                );
                instance.state = InstanceState::Failed;
                return (instance, summary);
            }
        }
    }

    for volume in instance
        .volumes
        .iter_mut()
        .filter(|volume| volume.state != VolumeState::Deleted)
    {
        match lifecycle.exists::<Volume>(&volume.id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(volume_id = %volume.id, "volume already gone");
                summary.record(Volume::KIND, Deletion::AlreadyGone);
                volume.state = VolumeState::Deleted;
                continue;
            }
            Err(err) => {
                summary.fail(Volume::KIND, &volume.id, err);
                continue;
            }
        }

        info!(instance = %instance.name, volume_id = %volume.id, "deleting volume");
        volume.state = VolumeState::Deleting;
        match lifecycle.remove::<Volume>(&volume.id).await {
            Ok(deletion) => {
                summary.record(Volume::KIND, deletion);
                volume.state = VolumeState::Deleted;
            }
            Err(err) => summary.fail(Volume::KIND, &volume.id, err),
        }
    }

    instance.state = if instance.owes_cleanup() {
        InstanceState::Failed
    } else {
        InstanceState::Deleted
    };
    (instance, summary)
}

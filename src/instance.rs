//! Per-instance state and run results.

use std::time::Duration;

use crate::cleanup::CleanupSummary;
use crate::error::{InstanceError, InstanceFailure};

/// Lifecycle position of an instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InstanceState {
    /// Queued; nothing created yet.
    #[default]
    Pending,
    /// Server create issued or waiting for it to become active.
    Creating,
    /// Extra volumes are being created.
    CreatingVolumes,
    /// Volumes are being attached.
    Attaching,
    /// Waiting for the boot sentinel.
    WaitingBoot,
    /// Provisioned; deletion is owed to the cleanup pass.
    Ready,
    /// Teardown in progress.
    Deleting,
    /// Every resource of the instance is gone.
    Deleted,
    /// A step failed; resources created so far may remain.
    Failed,
    /// Kept alive on operator request.
    Retained,
}

/// Lifecycle position of a volume.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// Create issued, not yet available.
    Creating,
    /// Ready to be attached.
    Available,
    /// Attached to the instance's server.
    Attached,
    /// Delete issued.
    Deleting,
    /// Gone.
    Deleted,
}

/// Volume owned by an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VolumeRef {
    /// Provider identifier.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Current state.
    pub state: VolumeState,
}

/// Server owned by an instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerRef {
    /// Provider identifier.
    pub id: String,
    /// Volume identifiers the provider last reported as attached.
    pub attachments: Vec<String>,
    /// Set once the server's deletion has been confirmed.
    pub deleted: bool,
}

impl ServerRef {
    /// Reference to a freshly created server.
    #[must_use]
    pub const fn new(id: String) -> Self {
        Self {
            id,
            attachments: Vec::new(),
            deleted: false,
        }
    }
}

/// One logical unit under test: a server plus its extra volumes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Position in submission order, starting at zero.
    pub index: usize,
    /// Server name.
    pub name: String,
    /// Server, once its create call returned.
    pub server: Option<ServerRef>,
    /// Volumes in creation order.
    pub volumes: Vec<VolumeRef>,
    /// Current state.
    pub state: InstanceState,
}

impl Instance {
    /// Creates an instance that has not started yet.
    #[must_use]
    pub const fn new(index: usize, name: String) -> Self {
        Self {
            index,
            name,
            server: None,
            volumes: Vec::new(),
            state: InstanceState::Pending,
        }
    }

    /// Returns `true` while a server or volume of this instance may still
    /// exist.
    #[must_use]
    pub fn owes_cleanup(&self) -> bool {
        let server_pending = self.server.as_ref().is_some_and(|server| !server.deleted);
        let volume_pending = self
            .volumes
            .iter()
            .any(|volume| volume.state != VolumeState::Deleted);
        server_pending || volume_pending
    }

    /// Volumes currently attached to the server.
    pub fn attached_volumes(&self) -> impl Iterator<Item = &VolumeRef> {
        self.volumes
            .iter()
            .filter(|volume| volume.state == VolumeState::Attached)
    }
}

/// How an instance ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Every configured step completed.
    Succeeded,
    /// A step failed.
    Failed(InstanceError),
    /// Never started because the run was aborted.
    NotAttempted,
}

impl Outcome {
    /// Short label used in outcome lines.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::NotAttempted => "not attempted",
        }
    }
}

/// Instance paired with its outcome.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceReport {
    /// Final instance snapshot.
    pub instance: Instance,
    /// Outcome of the provisioning phase.
    pub outcome: Outcome,
}

impl From<Result<Instance, InstanceFailure>> for InstanceReport {
    fn from(value: Result<Instance, InstanceFailure>) -> Self {
        match value {
            Ok(instance) => Self {
                instance,
                outcome: Outcome::Succeeded,
            },
            Err(InstanceFailure { instance, error }) => Self {
                instance: *instance,
                outcome: Outcome::Failed(error),
            },
        }
    }
}

/// Outcome counts of a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Tally {
    /// Instances that succeeded.
    pub succeeded: usize,
    /// Instances that failed.
    pub failed: usize,
    /// Instances skipped because of an abort.
    pub not_attempted: usize,
}

/// Everything a finished run reports.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunResult {
    /// Identifier stamped on every server of the run.
    pub run_id: String,
    /// One report per submitted instance, in completion order.
    pub instances: Vec<InstanceReport>,
    /// Whether the operator confirmed an abort.
    pub aborted: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// What the cleanup pass did.
    pub cleanup: CleanupSummary,
}

impl RunResult {
    /// Counts outcomes.
    #[must_use]
    pub fn tally(&self) -> Tally {
        self.instances
            .iter()
            .fold(Tally::default(), |mut tally, report| {
                match report.outcome {
                    Outcome::Succeeded => tally.succeeded += 1,
                    Outcome::Failed(_) => tally.failed += 1,
                    Outcome::NotAttempted => tally.not_attempted += 1,
                }
                tally
            })
    }

    /// Looks up the report of the instance at `index`.
    #[must_use]
    pub fn report(&self, index: usize) -> Option<&InstanceReport> {
        self.instances
            .iter()
            .find(|report| report.instance.index == index)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn volume(state: VolumeState) -> VolumeRef {
        VolumeRef {
            id: "vol".to_owned(),
            name: "x-volume-0".to_owned(),
            state,
        }
    }

    #[rstest]
    fn fresh_instance_owes_nothing() {
        assert!(!Instance::new(0, "x-0".to_owned()).owes_cleanup());
    }

    #[rstest]
    fn live_server_owes_cleanup() {
        let mut instance = Instance::new(0, "x-0".to_owned());
        instance.server = Some(ServerRef::new("srv".to_owned()));
        assert!(instance.owes_cleanup());

        if let Some(server) = instance.server.as_mut() {
            server.deleted = true;
        }
        assert!(!instance.owes_cleanup());
    }

    #[rstest]
    #[case(VolumeState::Creating, true)]
    #[case(VolumeState::Attached, true)]
    #[case(VolumeState::Deleting, true)]
    #[case(VolumeState::Deleted, false)]
    fn volumes_owe_cleanup_until_deleted(#[case] state: VolumeState, #[case] owed: bool) {
        let mut instance = Instance::new(0, "x-0".to_owned());
        instance.volumes.push(volume(state));
        assert_eq!(instance.owes_cleanup(), owed);
    }
}

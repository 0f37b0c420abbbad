//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeProvider`] is an in-memory cloud. It behaves like the real compute
//! and block storage services where the orchestrator depends on it (servers
//! start in `BUILD`, volumes in `creating`, attachments pass through
//! `attaching`, attached volumes cannot be deleted, deleting something twice
//! reports not-found) and records every call so tests can assert on ordering
//! and concurrency.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

use crate::abort::AbortSignal;
use crate::provider::{
    LookupKind, ProviderFailure, ProviderFuture, ResourceProvider, ServerDetails,
    ServerGroupRequest, ServerRequest, SubnetRequest, VolumeDetails, VolumeRequest,
};
use crate::user_data::{FAILURE_SENTINEL, SUCCESS_SENTINEL};

/// Environment variable selecting a [`FakeProvider`] scenario for the binary.
pub const FAKE_CLOUD_ENV: &str = "SIMPLE_STRESS_FAKE_CLOUD";

/// Errors returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeError {
    /// The addressed resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Identifier or name.
        id: String,
    },
    /// A failure scripted by the test, or a rule of the fake cloud.
    #[error("{0}")]
    Rejected(String),
}

impl ProviderFailure for FakeError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Provider operations, as recorded in the journal.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Op {
    /// [`ResourceProvider::resolve`].
    Resolve,
    /// [`ResourceProvider::create_server`].
    CreateServer,
    /// [`ResourceProvider::server_details`].
    ServerDetails,
    /// [`ResourceProvider::delete_server`].
    DeleteServer,
    /// [`ResourceProvider::console_output`].
    ConsoleOutput,
    /// [`ResourceProvider::create_volume`].
    CreateVolume,
    /// [`ResourceProvider::volume_details`].
    VolumeDetails,
    /// [`ResourceProvider::delete_volume`].
    DeleteVolume,
    /// [`ResourceProvider::attach_volume`].
    AttachVolume,
    /// [`ResourceProvider::create_server_group`].
    CreateServerGroup,
    /// [`ResourceProvider::delete_server_group`].
    DeleteServerGroup,
    /// [`ResourceProvider::create_network`].
    CreateNetwork,
    /// [`ResourceProvider::delete_network`].
    DeleteNetwork,
    /// [`ResourceProvider::create_subnet`].
    CreateSubnet,
    /// [`ResourceProvider::delete_subnet`].
    DeleteSubnet,
}

impl Op {
    /// Returns `true` for calls that create or remove something.
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(
            self,
            Self::Resolve | Self::ServerDetails | Self::VolumeDetails | Self::ConsoleOutput
        )
    }
}

/// One recorded provider call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    /// Operation.
    pub op: Op,
    /// Name for creates and lookups, identifier otherwise. Attach calls
    /// record `server/volume`.
    pub target: String,
}

/// What a server prints on its console.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConsoleScript {
    /// The success sentinel from the first poll on.
    #[default]
    Boots,
    /// Nothing useful, ever.
    Silent,
    /// The failure sentinel, and never the success sentinel.
    ScriptFails,
    /// The failure sentinel first; the success sentinel from the third poll.
    FailsThenBoots,
}

#[derive(Debug)]
struct FakeServer {
    name: String,
    status: &'static str,
    attached: Vec<String>,
    console_polls: u32,
}

#[derive(Debug)]
struct FakeVolume {
    name: String,
    status: &'static str,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    servers: BTreeMap<String, FakeServer>,
    volumes: BTreeMap<String, FakeVolume>,
    scaffolding: BTreeMap<String, &'static str>,
    journal: Vec<Call>,
    missing: BTreeSet<(&'static str, String)>,
    failures: Vec<(Op, String)>,
    panics: Vec<(Op, String)>,
    broken_servers: BTreeSet<String>,
    stalled_attachments: BTreeSet<String>,
    console: ConsoleScript,
    console_overrides: BTreeMap<String, ConsoleScript>,
    in_flight: usize,
    peak_in_flight: usize,
    peak_live_servers: usize,
    servers_created: usize,
    abort_after: Option<(usize, AbortSignal)>,
}

impl FakeState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn injected(&self, op: Op, target: &str) -> Option<FakeError> {
        self.failures
            .iter()
            .find(|(failing, pattern)| *failing == op && target.contains(pattern.as_str()))
            .map(|(failing, pattern)| {
                FakeError::Rejected(format!("injected {failing:?} failure for '{pattern}'"))
            })
    }

    fn panics_on(&self, op: Op, target: &str) -> bool {
        self.panics
            .iter()
            .any(|(failing, pattern)| *failing == op && target.contains(pattern.as_str()))
    }

    fn attachment_stalled(&self, volume: &FakeVolume) -> bool {
        self.stalled_attachments
            .iter()
            .any(|pattern| volume.name.contains(pattern.as_str()))
    }

    fn remove_scaffolding(&mut self, kind: &'static str, id: &str) -> Result<(), FakeError> {
        match self.scaffolding.get(id) {
            Some(found) if *found == kind => {
                self.scaffolding.remove(id);
                Ok(())
            }
            _ => Err(not_found(kind, id)),
        }
    }
}

fn not_found(kind: &'static str, id: &str) -> FakeError {
    FakeError::NotFound {
        kind,
        id: id.to_owned(),
    }
}

/// In-memory [`ResourceProvider`].
#[derive(Clone, Debug)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
    latency: Duration,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeProvider {
    /// Creates an empty cloud where every lookup succeeds and every server
    /// boots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            latency: Duration::from_millis(5),
        }
    }

    /// Builds the provider for a named scenario, as selected through
    /// [`FAKE_CLOUD_ENV`].
    ///
    /// Known scenarios: `healthy`, `missing-flavor`, `missing-image`,
    /// `failing-servers`, `silent-console`.
    #[must_use]
    pub fn scenario(name: &str) -> Option<Self> {
        let provider = Self::new().with_latency(Duration::ZERO);
        match name {
            "healthy" => {}
            "missing-flavor" => provider.missing(LookupKind::Flavor, "SCS-1V-2"),
            "missing-image" => provider.missing(LookupKind::Image, "Ubuntu 24.04"),
            "failing-servers" => provider.fail(Op::CreateServer, "-"),
            "silent-console" => provider.set_console(ConsoleScript::Silent),
            _ => return None,
        }
        Some(provider)
    }

    /// Sets the simulated latency of every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes a lookup of `name` fail with not-found.
    pub fn missing(&self, kind: LookupKind, name: &str) {
        self.lock().missing.insert((kind.as_str(), name.to_owned()));
    }

    /// Makes every `op` whose target contains `pattern` fail.
    pub fn fail(&self, op: Op, pattern: &str) {
        self.lock().failures.push((op, pattern.to_owned()));
    }

    /// Makes every `op` whose target contains `pattern` panic inside the
    /// calling task.
    pub fn panic_on(&self, op: Op, pattern: &str) {
        self.lock().panics.push((op, pattern.to_owned()));
    }

    /// Volumes whose name contains `pattern` stay `attaching` forever.
    pub fn stall_attachments(&self, pattern: &str) {
        self.lock().stalled_attachments.insert(pattern.to_owned());
    }

    /// Servers whose name contains `pattern` go to `ERROR` instead of
    /// `ACTIVE`.
    pub fn break_servers(&self, pattern: &str) {
        self.lock().broken_servers.insert(pattern.to_owned());
    }

    /// Sets the console script of every server.
    pub fn set_console(&self, script: ConsoleScript) {
        self.lock().console = script;
    }

    /// Sets the console script of the server named `name`.
    pub fn set_console_for(&self, name: &str, script: ConsoleScript) {
        self.lock()
            .console_overrides
            .insert(name.to_owned(), script);
    }

    /// Confirms `signal` right after the `count`-th server create.
    pub fn abort_after_creates(&self, count: usize, signal: AbortSignal) {
        self.lock().abort_after = Some((count, signal));
    }

    /// Removes a volume behind the orchestrator's back.
    #[must_use]
    pub fn remove_volume(&self, id: &str) -> bool {
        self.lock().volumes.remove(id).is_some()
    }

    /// Every call so far, in the order it was issued.
    #[must_use]
    pub fn journal(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    /// Targets of every `op` call so far.
    #[must_use]
    pub fn targets(&self, op: Op) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter(|call| call.op == op)
            .map(|call| call.target.clone())
            .collect()
    }

    /// Number of `op` calls so far.
    #[must_use]
    pub fn count(&self, op: Op) -> usize {
        self.lock()
            .journal
            .iter()
            .filter(|call| call.op == op)
            .count()
    }

    /// Highest number of calls observed in flight at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.lock().peak_in_flight
    }

    /// Highest number of servers observed alive at once.
    #[must_use]
    pub fn peak_live_servers(&self) -> usize {
        self.lock().peak_live_servers
    }

    /// Servers that currently exist.
    #[must_use]
    pub fn live_servers(&self) -> usize {
        self.lock().servers.len()
    }

    /// Volumes that currently exist.
    #[must_use]
    pub fn live_volumes(&self) -> usize {
        self.lock().volumes.len()
    }

    /// Networks, subnets, and server groups that currently exist.
    #[must_use]
    pub fn live_scaffolding(&self) -> usize {
        self.lock().scaffolding.len()
    }

    /// Identifier of the live server named `name`.
    #[must_use]
    pub fn server_id(&self, name: &str) -> Option<String> {
        self.lock()
            .servers
            .iter()
            .find(|(_, server)| server.name == name)
            .map(|(id, _)| id.clone())
    }

    async fn call<T>(
        &self,
        op: Op,
        target: String,
        action: impl FnOnce(&mut FakeState) -> Result<T, FakeError>,
    ) -> Result<T, FakeError> {
        {
            let mut state = self.lock();
            state.journal.push(Call {
                op,
                target: target.clone(),
            });
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }

        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }

        let mut state = self.lock();
        state.in_flight -= 1;
        if state.panics_on(op, &target) {
            drop(state);
            std::panic::panic_any(format!("injected {op:?} panic for '{target}'"));
        }
        if let Some(err) = state.injected(op, &target) {
            return Err(err);
        }
        action(&mut state)
    }
}

fn console_text(script: ConsoleScript, polls: u32) -> String {
    let mut text = String::from("[    0.000000] Linux version 6.8.0\n");
    match script {
        ConsoleScript::Boots => text.push_str(SUCCESS_SENTINEL),
        ConsoleScript::Silent => {}
        ConsoleScript::ScriptFails => text.push_str(FAILURE_SENTINEL),
        ConsoleScript::FailsThenBoots => {
            text.push_str(FAILURE_SENTINEL);
            if polls >= 3 {
                text.push('\n');
                text.push_str(SUCCESS_SENTINEL);
            }
        }
    }
    text
}

impl ResourceProvider for FakeProvider {
    type Error = FakeError;

    fn resolve<'a>(
        &'a self,
        kind: LookupKind,
        name: &'a str,
    ) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::Resolve, name.to_owned(), move |state| {
            if state.missing.contains(&(kind.as_str(), name.to_owned())) {
                return Err(not_found(kind.as_str(), name));
            }
            Ok(format!("{kind}-{name}"))
        }))
    }

    fn create_server<'a>(
        &'a self,
        request: &'a ServerRequest,
    ) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::CreateServer, request.name.clone(), move |state| {
            let id = state.allocate("server");
            let broken = state
                .broken_servers
                .iter()
                .any(|pattern| request.name.contains(pattern.as_str()));
            state.servers.insert(
                id.clone(),
                FakeServer {
                    name: request.name.clone(),
                    status: if broken { "ERROR" } else { "BUILD" },
                    attached: Vec::new(),
                    console_polls: 0,
                },
            );
            state.peak_live_servers = state.peak_live_servers.max(state.servers.len());
            state.servers_created += 1;
            if let Some((count, signal)) = &state.abort_after {
                if state.servers_created >= *count {
                    signal.confirm();
                }
            }
            Ok(id)
        }))
    }

    fn server_details<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ProviderFuture<'a, Option<ServerDetails>, FakeError> {
        Box::pin(self.call(Op::ServerDetails, server_id.to_owned(), move |state| {
            Ok(state.servers.get_mut(server_id).map(|server| {
                let details = ServerDetails {
                    id: server_id.to_owned(),
                    status: server.status.to_owned(),
                    attached_volumes: server.attached.clone(),
                    fault: (server.status == "ERROR").then(|| "No valid host was found".to_owned()),
                };
                if server.status == "BUILD" {
                    server.status = "ACTIVE";
                }
                details
            }))
        }))
    }

    fn delete_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(Op::DeleteServer, server_id.to_owned(), move |state| {
            let server = state
                .servers
                .remove(server_id)
                .ok_or_else(|| not_found("server", server_id))?;
            for volume_id in server.attached {
                if let Some(volume) = state.volumes.get_mut(&volume_id) {
                    volume.status = "available";
                }
            }
            Ok(())
        }))
    }

    fn console_output<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::ConsoleOutput, server_id.to_owned(), move |state| {
            let default = state.console;
            let server = state
                .servers
                .get_mut(server_id)
                .ok_or_else(|| not_found("server", server_id))?;
            server.console_polls += 1;
            let polls = server.console_polls;
            let name = server.name.clone();
            let script = state.console_overrides.get(&name).copied().unwrap_or(default);
            Ok(console_text(script, polls))
        }))
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::CreateVolume, request.name.clone(), move |state| {
            let id = state.allocate("volume");
            state.volumes.insert(
                id.clone(),
                FakeVolume {
                    name: request.name.clone(),
                    status: "creating",
                },
            );
            Ok(id)
        }))
    }

    fn volume_details<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Option<VolumeDetails>, FakeError> {
        Box::pin(self.call(Op::VolumeDetails, volume_id.to_owned(), move |state| {
            let Some(volume) = state.volumes.get(volume_id) else {
                return Ok(None);
            };
            let details = VolumeDetails {
                id: volume_id.to_owned(),
                status: volume.status.to_owned(),
            };
            let next = match volume.status {
                "creating" => Some("available"),
                "attaching" if !state.attachment_stalled(volume) => Some("in-use"),
                _ => None,
            };
            if let (Some(status), Some(volume)) = (next, state.volumes.get_mut(volume_id)) {
                volume.status = status;
            }
            Ok(Some(details))
        }))
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(Op::DeleteVolume, volume_id.to_owned(), move |state| {
            let volume = state
                .volumes
                .get(volume_id)
                .ok_or_else(|| not_found("volume", volume_id))?;
            if matches!(volume.status, "in-use" | "attaching") {
                return Err(FakeError::Rejected(format!(
                    "volume {volume_id} is still attached"
                )));
            }
            state.volumes.remove(volume_id);
            Ok(())
        }))
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(
            Op::AttachVolume,
            format!("{server_id}/{volume_id}"),
            move |state| {
                let volume = state
                    .volumes
                    .get_mut(volume_id)
                    .ok_or_else(|| not_found("volume", volume_id))?;
                if volume.status != "available" {
                    return Err(FakeError::Rejected(format!(
                        "volume {volume_id} is {}",
                        volume.status
                    )));
                }
                let server = state
                    .servers
                    .get_mut(server_id)
                    .ok_or_else(|| not_found("server", server_id))?;
                if server.status != "ACTIVE" {
                    return Err(FakeError::Rejected(format!(
                        "server {server_id} is {}",
                        server.status
                    )));
                }
                server.attached.push(volume_id.to_owned());
                if let Some(attached) = state.volumes.get_mut(volume_id) {
                    attached.status = "attaching";
                }
                Ok(())
            },
        ))
    }

    fn create_server_group<'a>(
        &'a self,
        request: &'a ServerGroupRequest,
    ) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::CreateServerGroup, request.name.clone(), |state| {
            let id = state.allocate("group");
            state.scaffolding.insert(id.clone(), "server group");
            Ok(id)
        }))
    }

    fn delete_server_group<'a>(&'a self, group_id: &'a str) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(Op::DeleteServerGroup, group_id.to_owned(), move |state| {
            state.remove_scaffolding("server group", group_id)
        }))
    }

    fn create_network<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::CreateNetwork, name.to_owned(), |state| {
            let id = state.allocate("network");
            state.scaffolding.insert(id.clone(), "network");
            Ok(id)
        }))
    }

    fn delete_network<'a>(&'a self, network_id: &'a str) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(Op::DeleteNetwork, network_id.to_owned(), move |state| {
            state.remove_scaffolding("network", network_id)
        }))
    }

    fn create_subnet<'a>(
        &'a self,
        request: &'a SubnetRequest,
    ) -> ProviderFuture<'a, String, FakeError> {
        Box::pin(self.call(Op::CreateSubnet, request.name.clone(), |state| {
            let id = state.allocate("subnet");
            state.scaffolding.insert(id.clone(), "subnet");
            Ok(id)
        }))
    }

    fn delete_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, (), FakeError> {
        Box::pin(self.call(Op::DeleteSubnet, subnet_id.to_owned(), move |state| {
            state.remove_scaffolding("subnet", subnet_id)
        }))
    }
}

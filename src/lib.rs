//! Core library for the simple-stress OpenStack load tester.
//!
//! A run provisions many short-lived instances (a server plus optional block
//! volumes) through a bounded worker pool, waits for each to boot, and tears
//! everything down again, even when the operator aborts half way. The cloud
//! is reached through the [`ResourceProvider`] trait; [`openstack`] holds the
//! REST implementation and [`test_support`] an in-memory one.

pub mod abort;
pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod openstack;
pub mod pool;
pub mod provider;
pub mod provision;
pub mod resource;
pub mod run;
pub mod test_support;
pub mod user_data;
pub mod wait;

pub use abort::{AbortPrompt, AbortSignal, AbortState, StdinPrompt, spawn_interrupt_listener};
pub use cleanup::{CleanupOrchestrator, CleanupSummary};
pub use config::{AffinityPolicy, ConfigError, OpenStackConfig, RunConfig};
pub use error::{CleanupError, InstanceError, InstanceFailure, StressError};
pub use instance::{Instance, InstanceReport, InstanceState, Outcome, RunResult, Tally};
pub use openstack::{OpenStackError, OpenStackProvider};
pub use pool::WorkerPool;
pub use provider::{ProviderFailure, ResourceProvider};
pub use run::StressRun;
pub use user_data::{UserDataError, resolve_user_data};

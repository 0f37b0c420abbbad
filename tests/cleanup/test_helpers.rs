//! Shared fixtures for cleanup BDD scenarios.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use rstest::fixture;
use simple_stress::test_support::FakeProvider;
use simple_stress::wait::PollPolicy;
use simple_stress::{CleanupOrchestrator, CleanupSummary, Instance, RunConfig, WorkerPool};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct CleanupPass {
    pub summary: CleanupSummary,
    pub calls_before: usize,
    pub calls_after: usize,
}

#[derive(Clone, Debug)]
pub struct CleanupContext {
    pub provider: FakeProvider,
    pub instances: Vec<Instance>,
    pub passes: Vec<CleanupPass>,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("run failed: {0}")]
    Run(String),
    #[error("runtime: {0}")]
    Runtime(String),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[fixture]
pub fn cleanup_context() -> CleanupContext {
    CleanupContext {
        provider: FakeProvider::new().with_latency(Duration::from_millis(1)),
        instances: Vec::new(),
        passes: Vec::new(),
    }
}

pub fn deferred_config(number: usize) -> RunConfig {
    RunConfig {
        number,
        parallel: NonZeroUsize::new(2).unwrap_or(NonZeroUsize::MIN),
        prefix: "stress".to_owned(),
        delete: false,
        cleanup: false,
        interval: Duration::from_millis(10),
        timeout: Duration::from_secs(30),
        ..RunConfig::default()
    }
}

pub fn orchestrator(provider: &FakeProvider) -> CleanupOrchestrator<FakeProvider> {
    CleanupOrchestrator::new(
        Arc::new(provider.clone()),
        WorkerPool::new(NonZeroUsize::MIN),
        PollPolicy::new(Duration::from_millis(10), Duration::from_secs(30)),
    )
}

pub fn runtime() -> Result<tokio::runtime::Runtime, StepError> {
    tokio::runtime::Runtime::new().map_err(|err| StepError::Runtime(err.to_string()))
}

pub fn instance<'a>(context: &'a CleanupContext, name: &str) -> Result<&'a Instance, StepError> {
    context
        .instances
        .iter()
        .find(|instance| instance.name == name)
        .ok_or_else(|| StepError::Assertion(format!("no instance named {name}")))
}

pub fn last_pass(context: &CleanupContext) -> Result<&CleanupPass, StepError> {
    context
        .passes
        .last()
        .ok_or_else(|| StepError::Assertion("no cleanup pass ran".to_owned()))
}

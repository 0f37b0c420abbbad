//! Drives a complete stress run.
//!
//! The run resolves the shared context once, feeds one provisioning task per
//! instance through the worker pool, collects outcomes as they arrive, then
//! hands every instance to the cleanup pass and finally tears the scaffolding
//! down. Cleanup and scaffolding teardown run no matter how collection ended.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::abort::AbortSignal;
use crate::cleanup::{CleanupOrchestrator, CleanupSummary};
use crate::config::RunConfig;
use crate::context::{CloudContext, prepare, teardown_scaffolding};
use crate::error::{InstanceError, InstanceFailure, StressError};
use crate::instance::{Instance, InstanceReport, InstanceState, Outcome, RunResult};
use crate::pool::{TaskOutcome, TaskReport, WorkerPool};
use crate::provider::ResourceProvider;
use crate::provision::{InstanceSpec, ProvisioningTask};

/// One stress run against a provider.
pub struct StressRun<P> {
    provider: Arc<P>,
    config: Arc<RunConfig>,
    abort: AbortSignal,
}

impl<P: ResourceProvider + 'static> StressRun<P> {
    /// Creates a run. `abort` is consulted before every instance starts.
    #[must_use]
    pub fn new(provider: Arc<P>, config: RunConfig, abort: AbortSignal) -> Self {
        Self {
            provider,
            config: Arc::new(config),
            abort,
        }
    }

    /// Configuration of this run.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Executes the run.
    ///
    /// An aborted run is still a successful call; see [`RunResult::aborted`].
    ///
    /// # Errors
    ///
    /// Returns [`StressError`] when the configuration is invalid or the shared
    /// context cannot be prepared. No instance is provisioned in that case.
    pub async fn execute(&self) -> Result<RunResult, StressError> {
        let started = Instant::now();
        self.config.validate()?;

        let run_id = Uuid::new_v4().simple().to_string();
        info!(
            run_id = %run_id,
            number = self.config.number,
            parallel = self.config.parallel.get(),
            "starting stress run"
        );

        let (context, scaffolding) = prepare(self.provider.as_ref(), &self.config, &run_id).await?;
        let pool = WorkerPool::new(self.config.parallel);

        let mut reports = self.provision(pool, Arc::new(context)).await;
        let aborted = self.abort.is_confirmed();
        if aborted {
            warn!("abort confirmed, cleaning up what was created");
        }

        let cleanup = self.clean_up(pool, &mut reports).await;
        teardown_scaffolding(self.provider.as_ref(), &scaffolding).await;

        let elapsed = started.elapsed();
        info!(aborted, "runtime: {:.4}s", elapsed.as_secs_f64());
        if aborted {
            warn!("run aborted by operator");
        }

        Ok(RunResult {
            run_id,
            instances: reports,
            aborted,
            elapsed,
            cleanup,
        })
    }

    async fn provision(
        &self,
        pool: WorkerPool,
        context: Arc<CloudContext>,
    ) -> Vec<InstanceReport> {
        let task = ProvisioningTask::new(
            Arc::clone(&self.provider),
            context,
            Arc::clone(&self.config),
        );
        let specs = (0..self.config.number).map(|index| InstanceSpec {
            index,
            name: self.config.instance_name(index),
        });

        let mut dispatch = pool.dispatch_until_aborted(
            specs,
            move |spec| task.clone().run(spec),
            self.abort.clone(),
        );

        let mut reports = Vec::with_capacity(self.config.number);
        while let Some(report) = dispatch.next().await {
            let collected = self.collect(report);
            log_outcome(&collected);
            reports.push(collected);
        }
        reports
    }

    fn collect(
        &self,
        report: TaskReport<InstanceSpec, Result<Instance, InstanceFailure>>,
    ) -> InstanceReport {
        match report.outcome {
            TaskOutcome::Completed(result) => InstanceReport::from(result),
            TaskOutcome::Panicked(message) => {
                let name = self.config.instance_name(report.index);
                let mut instance = Instance::new(report.index, name);
                instance.state = InstanceState::Failed;
                InstanceReport {
                    instance,
                    outcome: Outcome::Failed(InstanceError::TaskPanicked { message }),
                }
            }
            TaskOutcome::NotAttempted(spec) => InstanceReport {
                instance: Instance::new(spec.index, spec.name),
                outcome: Outcome::NotAttempted,
            },
        }
    }

    async fn clean_up(&self, pool: WorkerPool, reports: &mut [InstanceReport]) -> CleanupSummary {
        if !self.config.cleanup {
            for report in reports.iter_mut().filter(|report| report.instance.owes_cleanup()) {
                report.instance.state = InstanceState::Retained;
                info!(instance = %report.instance.name, "skipping deletion");
            }
            return CleanupSummary::default();
        }

        let orchestrator = CleanupOrchestrator::new(
            Arc::clone(&self.provider),
            pool,
            self.config.status_policy(),
        );
        let released = orchestrator
            .release(reports.iter().map(|report| report.instance.clone()))
            .await;

        for instance in released.instances {
            if let Some(report) = reports
                .iter_mut()
                .find(|report| report.instance.index == instance.index)
            {
                report.instance = instance;
            }
        }

        let summary = released.summary;
        info!(
            deleted_servers = summary.deleted_servers,
            deleted_volumes = summary.deleted_volumes,
            already_gone = summary.already_gone,
            failures = summary.failures.len(),
            "cleanup finished"
        );
        summary
    }
}

fn log_outcome(report: &InstanceReport) {
    let name = &report.instance.name;
    match &report.outcome {
        Outcome::Succeeded => info!(instance = %name, "succeeded"),
        Outcome::Failed(err) => error!(instance = %name, error = %err, "failed"),
        Outcome::NotAttempted => warn!(instance = %name, "not attempted"),
    }
}

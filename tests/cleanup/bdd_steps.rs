//! BDD step definitions for the cleanup pass.

use std::sync::Arc;

use rstest_bdd_macros::{given, then, when};
use simple_stress::instance::{InstanceState, VolumeState};
use simple_stress::resource::ResourceKind;
use simple_stress::test_support::Op;
use simple_stress::{AbortSignal, StressRun};

use super::test_helpers::{
    CleanupContext, CleanupPass, StepError, deferred_config, instance, last_pass, orchestrator,
    runtime,
};

#[given("{count} instances provisioned with deferred deletion")]
fn deferred_instances(
    mut cleanup_context: CleanupContext,
    count: usize,
) -> Result<CleanupContext, StepError> {
    let run = StressRun::new(
        Arc::new(cleanup_context.provider.clone()),
        deferred_config(count),
        AbortSignal::new(),
    );
    let result = runtime()?
        .block_on(run.execute())
        .map_err(|err| StepError::Run(err.to_string()))?;

    let mut instances: Vec<_> = result
        .instances
        .into_iter()
        .map(|report| report.instance)
        .collect();
    instances.sort_by_key(|instance| instance.index);
    if instances.iter().any(|instance| !instance.owes_cleanup()) {
        return Err(StepError::Assertion(
            "deferred instances should still own resources".to_owned(),
        ));
    }
    cleanup_context.instances = instances;
    Ok(cleanup_context)
}

#[given("the first volume of \"{name}\" was removed externally")]
fn volume_removed(
    cleanup_context: CleanupContext,
    name: String,
) -> Result<CleanupContext, StepError> {
    let volume_id = instance(&cleanup_context, &name)?
        .volumes
        .first()
        .map(|volume| volume.id.clone())
        .ok_or_else(|| StepError::Assertion(format!("{name} has no volumes")))?;
    if !cleanup_context.provider.remove_volume(&volume_id) {
        return Err(StepError::Assertion(format!("volume {volume_id} did not exist")));
    }
    Ok(cleanup_context)
}

#[given("deleting the server of \"{name}\" fails")]
fn server_delete_fails(
    cleanup_context: CleanupContext,
    name: String,
) -> Result<CleanupContext, StepError> {
    let server_id = cleanup_context
        .provider
        .server_id(&name)
        .ok_or_else(|| StepError::Assertion(format!("no live server named {name}")))?;
    cleanup_context.provider.fail(Op::DeleteServer, &server_id);
    Ok(cleanup_context)
}

#[when("the cleanup pass runs")]
fn cleanup_runs(cleanup_context: CleanupContext) -> Result<CleanupContext, StepError> {
    run_pass(cleanup_context)
}

#[when("the cleanup pass runs again")]
fn cleanup_runs_again(cleanup_context: CleanupContext) -> Result<CleanupContext, StepError> {
    run_pass(cleanup_context)
}

fn run_pass(mut cleanup_context: CleanupContext) -> Result<CleanupContext, StepError> {
    let calls_before = cleanup_context.provider.journal().len();
    let released = runtime()?.block_on(
        orchestrator(&cleanup_context.provider).release(cleanup_context.instances.clone()),
    );
    let calls_after = cleanup_context.provider.journal().len();

    for updated in released.instances {
        if let Some(slot) = cleanup_context
            .instances
            .iter_mut()
            .find(|instance| instance.index == updated.index)
        {
            *slot = updated;
        }
    }
    cleanup_context.passes.push(CleanupPass {
        summary: released.summary,
        calls_before,
        calls_after,
    });
    Ok(cleanup_context)
}

#[then("every instance is deleted")]
fn every_instance_deleted(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    for instance in &cleanup_context.instances {
        if instance.state != InstanceState::Deleted || instance.owes_cleanup() {
            return Err(StepError::Assertion(format!(
                "{} ended in {:?}",
                instance.name, instance.state
            )));
        }
    }
    Ok(())
}

#[then("instance \"{name}\" is deleted")]
fn named_instance_deleted(cleanup_context: &CleanupContext, name: String) -> Result<(), StepError> {
    let found = instance(cleanup_context, &name)?;
    if found.state == InstanceState::Deleted && !found.owes_cleanup() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{name} ended in {:?}",
            found.state
        )))
    }
}

#[then("instance \"{name}\" still owes cleanup")]
fn named_instance_owes(cleanup_context: &CleanupContext, name: String) -> Result<(), StepError> {
    let found = instance(cleanup_context, &name)?;
    if found.state == InstanceState::Failed && found.owes_cleanup() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{name} should still owe cleanup, ended in {:?}",
            found.state
        )))
    }
}

#[then("the cleanup pass records no failures")]
fn no_failures(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    let pass = last_pass(cleanup_context)?;
    if pass.summary.is_clean() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "unexpected failures: {:?}",
            pass.summary.failures
        )))
    }
}

#[then("the cleanup pass records a failure for the server of \"{name}\"")]
fn server_failure_recorded(
    cleanup_context: &CleanupContext,
    name: String,
) -> Result<(), StepError> {
    let server_id = instance(cleanup_context, &name)?
        .server
        .as_ref()
        .map(|server| server.id.clone())
        .ok_or_else(|| StepError::Assertion(format!("{name} has no server")))?;
    let pass = last_pass(cleanup_context)?;
    let recorded = pass
        .summary
        .failures
        .iter()
        .any(|failure| failure.kind == ResourceKind::Server && failure.id == server_id);
    if recorded {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "no server failure for {server_id} in {:?}",
            pass.summary.failures
        )))
    }
}

#[then("the cleanup pass records exactly {count} failures")]
fn failure_count(cleanup_context: &CleanupContext, count: usize) -> Result<(), StepError> {
    let pass = last_pass(cleanup_context)?;
    if pass.summary.failures.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} failures, got {:?}",
            pass.summary.failures
        )))
    }
}

#[then("the volumes of \"{name}\" were left untouched")]
fn volumes_untouched(cleanup_context: &CleanupContext, name: String) -> Result<(), StepError> {
    let volume_ids: Vec<String> = instance(cleanup_context, &name)?
        .volumes
        .iter()
        .map(|volume| volume.id.clone())
        .collect();
    let pass = last_pass(cleanup_context)?;
    let touched: Vec<_> = cleanup_context
        .provider
        .journal()
        .into_iter()
        .skip(pass.calls_before)
        .take(pass.calls_after - pass.calls_before)
        .filter(|call| matches!(call.op, Op::VolumeDetails | Op::DeleteVolume))
        .filter(|call| volume_ids.contains(&call.target))
        .collect();
    if !touched.is_empty() {
        return Err(StepError::Assertion(format!(
            "volumes of {name} were touched: {touched:?}"
        )));
    }
    let found = instance(cleanup_context, &name)?;
    if found.volumes.iter().any(|volume| volume.state == VolumeState::Deleted) {
        return Err(StepError::Assertion(format!("a volume of {name} was marked deleted")));
    }
    Ok(())
}

#[then("{count} resources are reported as already gone")]
fn already_gone(cleanup_context: &CleanupContext, count: usize) -> Result<(), StepError> {
    let pass = last_pass(cleanup_context)?;
    if pass.summary.already_gone == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} already gone, got {}",
            pass.summary.already_gone
        )))
    }
}

#[then("no servers or volumes remain")]
fn nothing_remains(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    let servers = cleanup_context.provider.live_servers();
    let volumes = cleanup_context.provider.live_volumes();
    if servers == 0 && volumes == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{servers} servers and {volumes} volumes left behind"
        )))
    }
}

#[then("the second pass makes no provider calls")]
fn second_pass_idle(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    let pass = cleanup_context
        .passes
        .get(1)
        .ok_or_else(|| StepError::Assertion("second pass did not run".to_owned()))?;
    if pass.calls_before == pass.calls_after && pass.summary == Default::default() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "second pass issued {} calls",
            pass.calls_after - pass.calls_before
        )))
    }
}

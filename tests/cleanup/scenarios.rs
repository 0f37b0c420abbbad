//! BDD scenarios for the cleanup pass.

use rstest_bdd_macros::scenario;

use super::test_helpers::{CleanupContext, cleanup_context};

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "Deferred instances are deleted by the cleanup pass"
)]
fn scenario_deferred_instances_deleted(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "A volume removed behind the run's back counts as already clean"
)]
fn scenario_external_removal_is_clean(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "A failing server delete does not stop other deletions"
)]
fn scenario_failure_is_isolated(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "A second cleanup pass has nothing to do"
)]
fn scenario_second_pass_is_idle(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

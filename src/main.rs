//! Binary entry point for the simple-stress CLI.

use std::env;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use simple_stress::test_support::{FAKE_CLOUD_ENV, FakeProvider};
use simple_stress::{
    AbortSignal, AffinityPolicy, OpenStackConfig, OpenStackProvider, ResourceProvider, RunConfig,
    RunResult, StdinPrompt, StressError, StressRun, UserDataError, resolve_user_data,
    spawn_interrupt_listener,
};

mod cli;

use cli::{Affinity, Cli};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("user data error: {0}")]
    UserData(#[from] UserDataError),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("unknown {FAKE_CLOUD_ENV} scenario '{0}'")]
    UnknownScenario(String),
    #[error(transparent)]
    Stress(#[from] StressError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let exit_code = match dispatch(cli).await {
        Ok(result) => {
            write_summary(io::stdout(), &result);
            0
        }
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<RunResult, CliError> {
    let config = run_config(&cli)?;

    if let Some(provider) = fake_cloud_from_env()? {
        return execute(provider, config).await;
    }

    let credentials =
        OpenStackConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let provider = OpenStackProvider::connect(&credentials)
        .await
        .map_err(|err| CliError::Provider(err.to_string()))?;
    execute(provider, config).await
}

async fn execute<P: ResourceProvider + 'static>(
    provider: P,
    config: RunConfig,
) -> Result<RunResult, CliError> {
    let abort = AbortSignal::new();
    let listener = spawn_interrupt_listener(abort.clone(), Arc::new(StdinPrompt));
    let outcome = StressRun::new(Arc::new(provider), config, abort).execute().await;
    listener.abort();
    outcome.map_err(CliError::from)
}

fn run_config(cli: &Cli) -> Result<RunConfig, CliError> {
    let user_data = resolve_user_data(cli.user_data.as_deref(), cli.user_data_file.as_deref())?;
    let config = RunConfig {
        number: cli.number,
        parallel: cli.parallel,
        volume: !cli.no_volume,
        volume_number: cli.volume_number,
        volume_size: cli.volume_size,
        volume_type: cli.volume_type.clone(),
        boot_volume_size: cli.boot_volume_size,
        compute_zone: cli.compute_zone.clone(),
        storage_zone: cli.storage_zone.clone(),
        delete: !cli.no_delete,
        cleanup: !cli.no_cleanup,
        wait: !cli.no_wait,
        interval: Duration::from_secs(cli.interval),
        timeout: Duration::from_secs(cli.timeout),
        console_interval: Duration::from_secs(cli.console_interval),
        prefix: cli.prefix.clone(),
        affinity: affinity_policy(cli.affinity),
        flavor: cli.flavor.clone(),
        image: cli.image.clone(),
        network: cli.network.clone(),
        subnet_cidr: cli.subnet_cidr.clone(),
        fail_on_boot_error: cli.fail_on_boot_error,
        user_data,
    };
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    Ok(config)
}

const fn affinity_policy(affinity: Affinity) -> AffinityPolicy {
    match affinity {
        Affinity::Affinity => AffinityPolicy::Affinity,
        Affinity::AntiAffinity => AffinityPolicy::AntiAffinity,
        Affinity::SoftAffinity => AffinityPolicy::SoftAffinity,
        Affinity::SoftAntiAffinity => AffinityPolicy::SoftAntiAffinity,
    }
}

fn fake_cloud_from_env() -> Result<Option<FakeProvider>, CliError> {
    let Ok(scenario) = env::var(FAKE_CLOUD_ENV) else {
        return Ok(None);
    };
    FakeProvider::scenario(&scenario)
        .map(Some)
        .ok_or(CliError::UnknownScenario(scenario))
}

fn write_summary(mut target: impl Write, result: &RunResult) {
    let tally = result.tally();
    writeln!(
        target,
        "run {}: {} succeeded, {} failed, {} not attempted{}",
        result.run_id,
        tally.succeeded,
        tally.failed,
        tally.not_attempted,
        if result.aborted { " (aborted)" } else { "" }
    )
    .ok();
    for failure in &result.cleanup.failures {
        writeln!(target, "cleanup failed: {failure}").ok();
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use simple_stress::CleanupSummary;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("simple-stress").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[rstest]
    fn defaults_map_to_default_run_config() {
        let config = run_config(&parse(&[])).expect("defaults are valid");
        assert_eq!(config, RunConfig::default());
    }

    #[rstest]
    fn negative_flags_invert_toggles() {
        let config = run_config(&parse(&[
            "--no-volume",
            "--no-delete",
            "--no-cleanup",
            "--no-wait",
            "--affinity",
            "anti-affinity",
            "--parallel",
            "4",
        ]))
        .expect("flags are valid");

        assert!(!config.volume);
        assert!(!config.delete);
        assert!(!config.cleanup);
        assert!(!config.wait);
        assert!(config.retains_resources());
        assert_eq!(config.affinity, AffinityPolicy::AntiAffinity);
        assert_eq!(config.parallel.get(), 4);
    }

    #[rstest]
    #[case(&["--parallel", "0"])]
    #[case(&["--interval", "0"])]
    #[case(&["--affinity", "sideways"])]
    #[case(&["--user-data", "x", "--user-data-file", "y"])]
    fn rejects_unusable_arguments(#[case] args: &[&str]) {
        let parsed =
            Cli::try_parse_from(std::iter::once("simple-stress").chain(args.iter().copied()));
        assert!(parsed.is_err());
    }

    #[rstest]
    fn empty_prefix_is_a_config_error() {
        let err = run_config(&parse(&["--prefix", ""])).expect_err("empty prefix");
        assert!(matches!(err, CliError::Config(_)), "unexpected error: {err}");
    }

    #[rstest]
    fn summary_reports_tally_and_abort() {
        let result = RunResult {
            run_id: "abc".to_owned(),
            instances: Vec::new(),
            aborted: true,
            elapsed: Duration::from_secs(1),
            cleanup: CleanupSummary::default(),
        };
        let mut buf = Vec::new();
        write_summary(&mut buf, &result);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(
            rendered,
            "run abc: 0 succeeded, 0 failed, 0 not attempted (aborted)\n"
        );
    }

    #[rstest]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::UnknownScenario("nope".to_owned()));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("scenario 'nope'"), "rendered: {rendered}");
    }
}

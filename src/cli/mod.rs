//! Command-line interface definitions for the `simple-stress` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::num::NonZeroUsize;

use clap::{Parser, ValueEnum};

/// Server group placement policy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum Affinity {
    /// All servers on one host.
    Affinity,
    /// Every server on a different host.
    AntiAffinity,
    /// Prefer one host.
    SoftAffinity,
    /// Prefer different hosts.
    #[default]
    SoftAntiAffinity,
}

/// Provision many OpenStack instances concurrently, wait for them to boot,
/// and tear everything down again.
#[derive(Debug, Parser)]
#[command(
    name = "simple-stress",
    version,
    about = "Concurrent OpenStack provisioning and teardown stress tester"
)]
pub(crate) struct Cli {
    /// Number of instances to provision.
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub(crate) number: usize,
    /// Maximum number of instances in flight at once.
    #[arg(long, default_value = "1", value_name = "N")]
    pub(crate) parallel: NonZeroUsize,
    /// Do not create extra volumes.
    #[arg(long)]
    pub(crate) no_volume: bool,
    /// Extra volumes per instance.
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub(crate) volume_number: usize,
    /// Size of each extra volume in GiB.
    #[arg(long, default_value_t = 1, value_name = "GIB")]
    pub(crate) volume_size: u32,
    /// Volume type for boot and extra volumes; `__DEFAULT__` lets the cloud
    /// choose.
    #[arg(long, default_value = "__DEFAULT__", value_name = "TYPE")]
    pub(crate) volume_type: String,
    /// Size of the boot volume in GiB.
    #[arg(long, default_value_t = 20, value_name = "GIB")]
    pub(crate) boot_volume_size: u32,
    /// Availability zone for servers.
    #[arg(long, default_value = "nova", value_name = "ZONE")]
    pub(crate) compute_zone: String,
    /// Availability zone for volumes.
    #[arg(long, default_value = "nova", value_name = "ZONE")]
    pub(crate) storage_zone: String,
    /// Leave instances running after they boot; the cleanup pass deletes them.
    #[arg(long)]
    pub(crate) no_delete: bool,
    /// Skip the cleanup pass. Together with --no-delete every resource is
    /// kept.
    #[arg(long)]
    pub(crate) no_cleanup: bool,
    /// Do not wait for the boot sentinel on the console.
    #[arg(long)]
    pub(crate) no_wait: bool,
    /// Seconds between status polls.
    #[arg(long, default_value_t = 10, value_name = "SECONDS",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) interval: u64,
    /// Seconds before any single wait gives up.
    #[arg(long, default_value_t = 600, value_name = "SECONDS",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) timeout: u64,
    /// Seconds between console polls while waiting for boot.
    #[arg(long, default_value_t = 1, value_name = "SECONDS",
          value_parser = clap::value_parser!(u64).range(1..))]
    pub(crate) console_interval: u64,
    /// Prefix for every resource name.
    #[arg(long, default_value = "simple-stress", value_name = "PREFIX")]
    pub(crate) prefix: String,
    /// Placement policy of the run's server group.
    #[arg(long, value_enum, default_value_t = Affinity::SoftAntiAffinity)]
    pub(crate) affinity: Affinity,
    /// Flavor name or identifier.
    #[arg(long, default_value = "SCS-1V-2", value_name = "FLAVOR")]
    pub(crate) flavor: String,
    /// Image name or identifier.
    #[arg(long, default_value = "Ubuntu 24.04", value_name = "IMAGE")]
    pub(crate) image: String,
    /// Use an existing network instead of creating one.
    #[arg(long, value_name = "NETWORK")]
    pub(crate) network: Option<String>,
    /// CIDR of the subnet created for the run.
    #[arg(long, default_value = "10.100.0.0/16", value_name = "CIDR")]
    pub(crate) subnet_cidr: String,
    /// Fail an instance as soon as its boot script reports an error.
    #[arg(long)]
    pub(crate) fail_on_boot_error: bool,
    /// Inline user data replacing the default cloud-config.
    #[arg(long, value_name = "USER_DATA", conflicts_with = "user_data_file")]
    pub(crate) user_data: Option<String>,
    /// Read user data from a file.
    #[arg(long, value_name = "PATH", conflicts_with = "user_data")]
    pub(crate) user_data_file: Option<String>,
    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
}

//! Run parameters and provider credentials.
//!
//! [`RunConfig`] is assembled from CLI flags and stays immutable for the whole
//! run. [`OpenStackConfig`] is loaded via `ortho-config` from defaults,
//! configuration files, and `OS_*` environment variables.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::user_data::DEFAULT_USER_DATA;
use crate::wait::PollPolicy;

/// Default naming prefix for every resource the run creates.
pub const DEFAULT_PREFIX: &str = "simple-stress";
/// Address range used for the run's subnet when none (or an invalid one) is
/// supplied.
pub const DEFAULT_SUBNET_CIDR: &str = "10.100.0.0/16";
/// Volume type sentinel meaning "let the cloud pick".
pub const DEFAULT_VOLUME_TYPE: &str = "__DEFAULT__";

/// Placement policy of the run's server group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AffinityPolicy {
    /// All servers on the same host.
    Affinity,
    /// Every server on a different host.
    AntiAffinity,
    /// Prefer the same host.
    SoftAffinity,
    /// Prefer different hosts.
    #[default]
    SoftAntiAffinity,
}

impl AffinityPolicy {
    /// Policy name as understood by the compute API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Affinity => "affinity",
            Self::AntiAffinity => "anti-affinity",
            Self::SoftAffinity => "soft-affinity",
            Self::SoftAntiAffinity => "soft-anti-affinity",
        }
    }
}

impl fmt::Display for AffinityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable parameters of one stress run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunConfig {
    /// Number of instances to provision.
    pub number: usize,
    /// Maximum number of instances in flight at once.
    pub parallel: NonZeroUsize,
    /// Whether to create and attach extra volumes.
    pub volume: bool,
    /// Extra volumes per instance.
    pub volume_number: usize,
    /// Size of each extra volume in GiB.
    pub volume_size: u32,
    /// Volume type for extra and boot volumes.
    pub volume_type: String,
    /// Size of the boot volume in GiB.
    pub boot_volume_size: u32,
    /// Availability zone for servers.
    pub compute_zone: String,
    /// Availability zone for volumes.
    pub storage_zone: String,
    /// Delete each instance inside its own task right after it is ready.
    pub delete: bool,
    /// Run the deferred cleanup pass.
    pub cleanup: bool,
    /// Wait for the boot sentinel on the console.
    pub wait: bool,
    /// Status poll interval.
    pub interval: Duration,
    /// Deadline applied to every status wait and to the boot wait.
    pub timeout: Duration,
    /// Console poll interval while waiting for boot.
    pub console_interval: Duration,
    /// Naming prefix.
    pub prefix: String,
    /// Server group placement policy.
    pub affinity: AffinityPolicy,
    /// Flavor name.
    pub flavor: String,
    /// Image name.
    pub image: String,
    /// Existing network name; a network and subnet are created when absent.
    pub network: Option<String>,
    /// CIDR of the created subnet.
    pub subnet_cidr: String,
    /// Fail the instance as soon as the failure sentinel shows up.
    pub fail_on_boot_error: bool,
    /// Plain-text user data passed to every server.
    pub user_data: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            number: 1,
            parallel: NonZeroUsize::MIN,
            volume: true,
            volume_number: 1,
            volume_size: 1,
            volume_type: DEFAULT_VOLUME_TYPE.to_owned(),
            boot_volume_size: 20,
            compute_zone: "nova".to_owned(),
            storage_zone: "nova".to_owned(),
            delete: true,
            cleanup: true,
            wait: true,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            console_interval: Duration::from_secs(1),
            prefix: DEFAULT_PREFIX.to_owned(),
            affinity: AffinityPolicy::default(),
            flavor: "SCS-1V-2".to_owned(),
            image: "Ubuntu 24.04".to_owned(),
            network: None,
            subnet_cidr: DEFAULT_SUBNET_CIDR.to_owned(),
            fail_on_boot_error: false,
            user_data: DEFAULT_USER_DATA.to_owned(),
        }
    }
}

impl RunConfig {
    /// Checks the semantic constraints clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval", "must be at least one second"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be at least one second"));
        }
        if self.console_interval.is_zero() {
            return Err(ConfigError::invalid(
                "console-interval",
                "must be at least one second",
            ));
        }
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::invalid("prefix", "must not be empty"));
        }
        if self.flavor.trim().is_empty() {
            return Err(ConfigError::invalid("flavor", "must not be empty"));
        }
        if self.image.trim().is_empty() {
            return Err(ConfigError::invalid("image", "must not be empty"));
        }
        if self.volume && self.volume_number > 0 && self.volume_size == 0 {
            return Err(ConfigError::invalid("volume-size", "must be at least 1 GiB"));
        }
        if self.boot_volume_size == 0 {
            return Err(ConfigError::invalid(
                "boot-volume-size",
                "must be at least 1 GiB",
            ));
        }
        if self.user_data.trim().is_empty() {
            return Err(ConfigError::invalid("user-data", "must not be empty"));
        }
        Ok(())
    }

    /// Name of the instance at `index`.
    #[must_use]
    pub fn instance_name(&self, index: usize) -> String {
        format!("{}-{index}", self.prefix)
    }

    /// Name of the `ordinal`-th extra volume of `instance`.
    #[must_use]
    pub fn volume_name(instance: &str, ordinal: usize) -> String {
        format!("{instance}-volume-{ordinal}")
    }

    /// Number of extra volumes each instance receives.
    #[must_use]
    pub const fn volumes_per_instance(&self) -> usize {
        if self.volume { self.volume_number } else { 0 }
    }

    /// Volume type to request, or `None` for the cloud default.
    #[must_use]
    pub fn requested_volume_type(&self) -> Option<String> {
        let value = self.volume_type.trim();
        (!value.is_empty() && value != DEFAULT_VOLUME_TYPE).then(|| value.to_owned())
    }

    /// Policy used for server and volume status waits.
    #[must_use]
    pub const fn status_policy(&self) -> PollPolicy {
        PollPolicy::new(self.interval, self.timeout)
    }

    /// Policy used while polling the console for the boot sentinel.
    #[must_use]
    pub const fn console_policy(&self) -> PollPolicy {
        PollPolicy::new(self.console_interval, self.timeout)
    }

    /// Returns `true` when no teardown happens at all.
    #[must_use]
    pub const fn retains_resources(&self) -> bool {
        !self.delete && !self.cleanup
    }
}

/// OpenStack credentials and endpoint selection.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OS",
    discovery(
        app_name = "simple-stress",
        env_var = "SIMPLE_STRESS_CONFIG_PATH",
        config_file_name = "simple-stress.toml",
        dotfile_name = ".simple-stress.toml",
        project_file_name = "simple-stress.toml"
    )
)]
pub struct OpenStackConfig {
    /// Keystone endpoint, with or without the `/v3` suffix.
    pub auth_url: String,
    /// User name for password authentication.
    pub username: String,
    /// Password for password authentication.
    pub password: String,
    /// Project the token is scoped to.
    pub project_name: String,
    /// Domain of the user.
    #[ortho_config(default = "Default".to_owned())]
    pub user_domain_name: String,
    /// Domain of the project.
    #[ortho_config(default = "Default".to_owned())]
    pub project_domain_name: String,
    /// Region used to pick catalog endpoints.
    pub region_name: Option<String>,
    /// Endpoint interface (`public`, `internal`, or `admin`).
    #[ortho_config(default = "public".to_owned())]
    pub interface: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 4] = [
    FieldMetadata::new("Keystone authentication URL", "OS_AUTH_URL", "auth_url"),
    FieldMetadata::new("OpenStack user name", "OS_USERNAME", "username"),
    FieldMetadata::new("OpenStack password", "OS_PASSWORD", "password"),
    FieldMetadata::new("OpenStack project name", "OS_PROJECT_NAME", "project_name"),
];

impl OpenStackConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to simple-stress.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads credentials from defaults, configuration files, and environment
    /// variables without looking at the process arguments, which belong to
    /// the CLI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("simple-stress")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every required credential is present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first empty credential
    /// and [`ConfigError::Invalid`] for an unknown interface.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            &self.auth_url,
            &self.username,
            &self.password,
            &self.project_name,
        ];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        if !matches!(self.interface.as_str(), "public" | "internal" | "admin") {
            return Err(ConfigError::invalid(
                "OS_INTERFACE",
                "must be one of public, internal, admin",
            ));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// A value is present but unusable.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Option or variable name.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl ConfigError {
    const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn credentials() -> OpenStackConfig {
        OpenStackConfig {
            auth_url: "https://keystone.example.test:5000".to_owned(),
            username: "stress".to_owned(),
            password: "secret".to_owned(),
            project_name: "load".to_owned(),
            user_domain_name: "Default".to_owned(),
            project_domain_name: "Default".to_owned(),
            region_name: None,
            interface: "public".to_owned(),
        }
    }

    #[rstest]
    fn default_run_config_is_valid() {
        assert_eq!(RunConfig::default().validate(), Ok(()));
    }

    #[rstest]
    fn rejects_zero_interval() {
        let config = RunConfig {
            interval: Duration::ZERO,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "interval",
                ..
            })
        ));
    }

    #[rstest]
    fn zero_volume_size_is_fine_without_volumes() {
        let config = RunConfig {
            volume: false,
            volume_size: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.volumes_per_instance(), 0);
    }

    #[rstest]
    fn names_follow_prefix_scheme() {
        let config = RunConfig {
            prefix: "load".to_owned(),
            ..RunConfig::default()
        };
        let name = config.instance_name(4);
        assert_eq!(name, "load-4");
        assert_eq!(RunConfig::volume_name(&name, 2), "load-4-volume-2");
    }

    #[rstest]
    #[case(DEFAULT_VOLUME_TYPE, None)]
    #[case("", None)]
    #[case("ssd", Some("ssd"))]
    fn maps_volume_type_sentinel(#[case] input: &str, #[case] expected: Option<&str>) {
        let config = RunConfig {
            volume_type: input.to_owned(),
            ..RunConfig::default()
        };
        assert_eq!(config.requested_volume_type().as_deref(), expected);
    }

    #[rstest]
    fn retention_requires_both_flags_off() {
        let mut config = RunConfig {
            delete: false,
            ..RunConfig::default()
        };
        assert!(!config.retains_resources());
        config.cleanup = false;
        assert!(config.retains_resources());
    }

    #[rstest]
    fn credentials_validate(credentials: OpenStackConfig) {
        assert_eq!(credentials.validate(), Ok(()));
    }

    #[rstest]
    fn missing_password_names_env_var(mut credentials: OpenStackConfig) {
        credentials.password = "  ".to_owned();
        let Err(ConfigError::MissingField(message)) = credentials.validate() else {
            panic!("expected missing field error");
        };
        assert!(message.contains("OS_PASSWORD"), "message: {message}");
        assert!(message.contains("password"), "message: {message}");
    }

    #[rstest]
    fn rejects_unknown_interface(mut credentials: OpenStackConfig) {
        credentials.interface = "private".to_owned();
        assert!(matches!(
            credentials.validate(),
            Err(ConfigError::Invalid {
                field: "OS_INTERFACE",
                ..
            })
        ));
    }
}

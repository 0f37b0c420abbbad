//! Shared context resolved once before provisioning, and the scaffolding the
//! run creates for itself.

use std::net::IpAddr;

use tracing::{error, info, warn};

use crate::config::{DEFAULT_SUBNET_CIDR, RunConfig};
use crate::error::StressError;
use crate::provider::{
    LookupKind, ProviderFailure, ResourceProvider, ServerGroupRequest, SubnetRequest,
};
use crate::resource::ResourceKind;
use crate::user_data::encode_user_data;

/// Identifiers every provisioning task reads. Never mutated after
/// [`prepare`] returns.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloudContext {
    /// Identifier of the run, stamped on every server.
    pub run_id: String,
    /// Resolved flavor.
    pub flavor_id: String,
    /// Resolved image.
    pub image_id: String,
    /// Network servers are attached to.
    pub network_id: String,
    /// Server group used as scheduler hint.
    pub server_group_id: String,
    /// Base64 encoded user data.
    pub user_data: String,
}

/// Shared resources created by the run. Pre-existing resources are never
/// recorded here and therefore never deleted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Scaffolding {
    /// Server group.
    pub server_group: Option<String>,
    /// Subnet of the created network.
    pub subnet: Option<String>,
    /// Created network.
    pub network: Option<String>,
}

impl Scaffolding {
    /// Returns `true` when nothing was created.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.server_group.is_none() && self.subnet.is_none() && self.network.is_none()
    }

    /// Created resources in teardown order: server group, subnet, network.
    pub fn teardown_order(&self) -> impl Iterator<Item = (ResourceKind, &str)> {
        [
            (ResourceKind::ServerGroup, self.server_group.as_deref()),
            (ResourceKind::Subnet, self.subnet.as_deref()),
            (ResourceKind::Network, self.network.as_deref()),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|value| (kind, value)))
    }
}

/// Resolves flavor, image, and network, then creates whatever scaffolding the
/// run needs.
///
/// Lookups happen first, so a lookup failure leaves no trace in the cloud.
/// When creating scaffolding fails, everything created so far is removed
/// before the error is returned.
///
/// # Errors
///
/// Returns [`StressError::Lookup`] for unresolved names and
/// [`StressError::Setup`] when scaffolding cannot be created.
pub async fn prepare<P: ResourceProvider>(
    provider: &P,
    config: &RunConfig,
    run_id: &str,
) -> Result<(CloudContext, Scaffolding), StressError> {
    let flavor_id = lookup(provider, LookupKind::Flavor, &config.flavor).await?;
    let image_id = lookup(provider, LookupKind::Image, &config.image).await?;
    let existing_network = match &config.network {
        Some(name) => Some(lookup(provider, LookupKind::Network, name).await?),
        None => None,
    };

    let mut scaffolding = Scaffolding::default();
    match build_scaffolding(provider, config, existing_network, &mut scaffolding).await {
        Ok((network_id, server_group_id)) => Ok((
            CloudContext {
                run_id: run_id.to_owned(),
                flavor_id,
                image_id,
                network_id,
                server_group_id,
                user_data: encode_user_data(&config.user_data),
            },
            scaffolding,
        )),
        Err(message) => {
            error!(error = %message, "failed to prepare shared resources");
            teardown_scaffolding(provider, &scaffolding).await;
            Err(StressError::Setup { message })
        }
    }
}

async fn lookup<P: ResourceProvider>(
    provider: &P,
    kind: LookupKind,
    name: &str,
) -> Result<String, StressError> {
    info!(kind = %kind, name, "resolving");
    let id = provider
        .resolve(kind, name)
        .await
        .map_err(|err| StressError::Lookup {
            kind,
            name: name.to_owned(),
            message: err.to_string(),
        })?;
    info!(kind = %kind, name, id = %id, "resolved");
    Ok(id)
}

async fn build_scaffolding<P: ResourceProvider>(
    provider: &P,
    config: &RunConfig,
    existing_network: Option<String>,
    scaffolding: &mut Scaffolding,
) -> Result<(String, String), String> {
    let network_id = if let Some(id) = existing_network {
        id
    } else {
        info!(name = %config.prefix, "creating network");
        let network_id = provider
            .create_network(&config.prefix)
            .await
            .map_err(|err| format!("network {}: {err}", config.prefix))?;
        scaffolding.network = Some(network_id.clone());

        let request = SubnetRequest {
            name: format!("{}-subnet", config.prefix),
            network_id: network_id.clone(),
            cidr: effective_cidr(&config.subnet_cidr).to_owned(),
        };
        info!(name = %request.name, cidr = %request.cidr, "creating subnet");
        let subnet_id = provider
            .create_subnet(&request)
            .await
            .map_err(|err| format!("subnet {}: {err}", request.name))?;
        scaffolding.subnet = Some(subnet_id);
        network_id
    };

    let request = ServerGroupRequest {
        name: config.prefix.clone(),
        policy: config.affinity,
    };
    info!(name = %request.name, policy = %request.policy, "creating server group");
    let group_id = provider
        .create_server_group(&request)
        .await
        .map_err(|err| format!("server group {}: {err}", request.name))?;
    scaffolding.server_group = Some(group_id.clone());

    Ok((network_id, group_id))
}

/// Deletes the run's scaffolding one resource after another. Failures are
/// logged and the remaining steps still run.
pub async fn teardown_scaffolding<P: ResourceProvider>(provider: &P, scaffolding: &Scaffolding) {
    for (kind, id) in scaffolding.teardown_order() {
        info!(kind = %kind, id, "deleting");
        let result = match kind {
            ResourceKind::ServerGroup => provider.delete_server_group(id).await,
            ResourceKind::Subnet => provider.delete_subnet(id).await,
            ResourceKind::Network => provider.delete_network(id).await,
            ResourceKind::Server | ResourceKind::Volume => continue,
        };
        match result {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                info!(kind = %kind, id, "already gone");
            }
            Err(err) => warn!(kind = %kind, id, error = %err, "failed to delete"),
        }
    }
}

/// Returns `cidr` when it is a valid network address, otherwise logs and
/// falls back to [`DEFAULT_SUBNET_CIDR`].
#[must_use]
pub fn effective_cidr(cidr: &str) -> &str {
    if is_valid_cidr(cidr) {
        cidr.trim()
    } else {
        error!(cidr, fallback = DEFAULT_SUBNET_CIDR, "invalid subnet CIDR, using fallback");
        DEFAULT_SUBNET_CIDR
    }
}

/// Checks `address/prefix` notation with no host bits set.
#[must_use]
pub fn is_valid_cidr(cidr: &str) -> bool {
    let Some((address, prefix)) = cidr.trim().split_once('/') else {
        return false;
    };
    let (Ok(ip), Ok(bits)) = (address.parse::<IpAddr>(), prefix.parse::<u32>()) else {
        return false;
    };
    match ip {
        IpAddr::V4(v4) => bits <= 32 && u32::from(v4).checked_shl(bits).unwrap_or(0) == 0,
        IpAddr::V6(v6) => bits <= 128 && u128::from(v6).checked_shl(bits).unwrap_or(0) == 0,
    }
}

/// IP version Neutron expects for `cidr`.
#[must_use]
pub fn ip_version(cidr: &str) -> u8 {
    if cidr.contains(':') { 6 } else { 4 }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("10.100.0.0/16", true)]
    #[case("192.168.1.0/24", true)]
    #[case("0.0.0.0/0", true)]
    #[case("10.0.0.1/32", true)]
    #[case("fd00::/64", true)]
    #[case("10.100.0.1/16", false)]
    #[case("10.100.0.0/33", false)]
    #[case("10.100.0.0", false)]
    #[case("not-a-cidr", false)]
    #[case("", false)]
    fn validates_cidr(#[case] input: &str, #[case] valid: bool) {
        assert_eq!(is_valid_cidr(input), valid);
    }

    #[rstest]
    fn invalid_cidr_falls_back() {
        assert_eq!(effective_cidr("300.0.0.0/8"), DEFAULT_SUBNET_CIDR);
        assert_eq!(effective_cidr("172.16.0.0/12"), "172.16.0.0/12");
    }

    #[rstest]
    fn detects_ip_version() {
        assert_eq!(ip_version("10.0.0.0/8"), 4);
        assert_eq!(ip_version("fd00::/64"), 6);
    }

    #[rstest]
    fn teardown_order_skips_missing_entries() {
        let scaffolding = Scaffolding {
            server_group: Some("sg".to_owned()),
            subnet: None,
            network: Some("net".to_owned()),
        };
        let order: Vec<_> = scaffolding.teardown_order().collect();
        assert_eq!(
            order,
            vec![(ResourceKind::ServerGroup, "sg"), (ResourceKind::Network, "net")]
        );
    }
}

//! Neutron calls for the run's network and subnet.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::ip_version;
use crate::provider::SubnetRequest;

use super::{OpenStackError, OpenStackProvider, Target, single_match};

const SERVICE: &str = "network";

#[derive(Deserialize)]
struct NetworkList {
    networks: Vec<NetworkEntry>,
}

#[derive(Deserialize)]
struct NetworkEntry {
    id: String,
}

#[derive(Deserialize)]
struct CreatedNetwork {
    network: NetworkEntry,
}

#[derive(Serialize)]
struct CreateSubnetRequest<'a> {
    subnet: SubnetBody<'a>,
}

#[derive(Serialize)]
struct SubnetBody<'a> {
    name: &'a str,
    network_id: &'a str,
    cidr: &'a str,
    ip_version: u8,
}

#[derive(Deserialize)]
struct CreatedSubnet {
    subnet: NetworkEntry,
}

impl<'a> CreateSubnetRequest<'a> {
    fn from_request(request: &'a SubnetRequest) -> Self {
        Self {
            subnet: SubnetBody {
                name: &request.name,
                network_id: &request.network_id,
                cidr: &request.cidr,
                ip_version: ip_version(&request.cidr),
            },
        }
    }
}

impl OpenStackProvider {
    fn network_url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoints.network)
    }

    /// Finds a network by name; an exact identifier also matches.
    pub(super) async fn find_network(&self, name: &str) -> Result<String, OpenStackError> {
        let by_name: NetworkList = self
            .fetch(
                Target::new(SERVICE, "network", name),
                self.request(Method::GET, &self.network_url("/networks"))
                    .query(&[("name", name)]),
            )
            .await?;
        if !by_name.networks.is_empty() {
            let ids = by_name.networks.into_iter().map(|network| network.id).collect();
            return single_match("network", name, ids);
        }

        let by_id: NetworkList = self
            .fetch(
                Target::new(SERVICE, "network", name),
                self.request(Method::GET, &self.network_url("/networks"))
                    .query(&[("id", name)]),
            )
            .await?;
        let ids = by_id.networks.into_iter().map(|network| network.id).collect();
        single_match("network", name, ids)
    }

    pub(super) async fn post_network(&self, name: &str) -> Result<String, OpenStackError> {
        let created: CreatedNetwork = self
            .fetch(
                Target::new(SERVICE, "network", name),
                self.request(Method::POST, &self.network_url("/networks"))
                    .json(&json!({ "network": { "name": name } })),
            )
            .await?;
        Ok(created.network.id)
    }

    pub(super) async fn remove_network(&self, network_id: &str) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "network", network_id),
            self.request(
                Method::DELETE,
                &self.network_url(&format!("/networks/{network_id}")),
            ),
        )
        .await
    }

    pub(super) async fn post_subnet(
        &self,
        request: &SubnetRequest,
    ) -> Result<String, OpenStackError> {
        let created: CreatedSubnet = self
            .fetch(
                Target::new(SERVICE, "subnet", &request.name),
                self.request(Method::POST, &self.network_url("/subnets"))
                    .json(&CreateSubnetRequest::from_request(request)),
            )
            .await?;
        Ok(created.subnet.id)
    }

    pub(super) async fn remove_subnet(&self, subnet_id: &str) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "subnet", subnet_id),
            self.request(
                Method::DELETE,
                &self.network_url(&format!("/subnets/{subnet_id}")),
            ),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("10.100.0.0/16", 4)]
    #[case("fd00:10::/64", 6)]
    fn subnet_payload_carries_ip_version(#[case] cidr: &str, #[case] version: u8) {
        let request = SubnetRequest {
            name: "simple-stress-subnet".to_owned(),
            network_id: "net-1".to_owned(),
            cidr: cidr.to_owned(),
        };
        let body = serde_json::to_value(CreateSubnetRequest::from_request(&request)).ok();
        assert_eq!(
            body,
            Some(json!({
                "subnet": {
                    "name": "simple-stress-subnet",
                    "network_id": "net-1",
                    "cidr": cidr,
                    "ip_version": version
                }
            }))
        );
    }
}

//! Nova calls: flavors, servers, console output, volume attachments, and
//! server groups.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::provider::{ServerDetails, ServerGroupRequest, ServerRequest};

use super::{OpenStackError, OpenStackProvider, Target, single_match};

const SERVICE: &str = "compute";
/// Microversion 2.67 accepts `volume_type` in block device mappings and the
/// singular server group `policy` field.
const MICROVERSION_HEADER: &str = "X-OpenStack-Nova-API-Version";
const MICROVERSION: &str = "2.67";

#[derive(Serialize)]
struct CreateServerRequest<'a> {
    server: ServerBody<'a>,
    #[serde(rename = "os:scheduler_hints", skip_serializing_if = "Option::is_none")]
    scheduler_hints: Option<SchedulerHints<'a>>,
}

#[derive(Serialize)]
struct ServerBody<'a> {
    name: &'a str,
    #[serde(rename = "flavorRef")]
    flavor_ref: &'a str,
    networks: [NetworkRef<'a>; 1],
    availability_zone: &'a str,
    user_data: &'a str,
    metadata: &'a BTreeMap<String, String>,
    block_device_mapping_v2: [BootVolume<'a>; 1],
}

#[derive(Serialize)]
struct NetworkRef<'a> {
    uuid: &'a str,
}

#[derive(Serialize)]
struct BootVolume<'a> {
    boot_index: u8,
    uuid: &'a str,
    source_type: &'static str,
    destination_type: &'static str,
    volume_size: u32,
    delete_on_termination: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<&'a str>,
}

#[derive(Serialize)]
struct SchedulerHints<'a> {
    group: &'a str,
}

impl<'a> CreateServerRequest<'a> {
    fn from_request(request: &'a ServerRequest) -> Self {
        Self {
            server: ServerBody {
                name: &request.name,
                flavor_ref: &request.flavor_id,
                networks: [NetworkRef {
                    uuid: &request.network_id,
                }],
                availability_zone: &request.availability_zone,
                user_data: &request.user_data,
                metadata: &request.metadata,
                block_device_mapping_v2: [BootVolume {
                    boot_index: 0,
                    uuid: &request.image_id,
                    source_type: "image",
                    destination_type: "volume",
                    volume_size: request.boot_volume_size,
                    delete_on_termination: true,
                    volume_type: request.volume_type.as_deref(),
                }],
            },
            scheduler_hints: request
                .server_group_id
                .as_deref()
                .map(|group| SchedulerHints { group }),
        }
    }
}

#[derive(Deserialize)]
struct CreatedServer {
    server: IdOnly,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct ServerEnvelope {
    server: ServerBodyResponse,
}

#[derive(Deserialize)]
struct ServerBodyResponse {
    id: String,
    status: String,
    #[serde(rename = "os-extended-volumes:volumes_attached", default)]
    volumes_attached: Vec<IdOnly>,
    #[serde(default)]
    fault: Option<Fault>,
}

#[derive(Deserialize)]
struct Fault {
    message: String,
}

impl From<ServerBodyResponse> for ServerDetails {
    fn from(value: ServerBodyResponse) -> Self {
        Self {
            id: value.id,
            status: value.status,
            attached_volumes: value.volumes_attached.into_iter().map(|volume| volume.id).collect(),
            fault: value.fault.map(|fault| fault.message),
        }
    }
}

#[derive(Deserialize)]
struct ConsoleOutput {
    output: String,
}

#[derive(Deserialize)]
struct FlavorList {
    flavors: Vec<Flavor>,
}

#[derive(Deserialize)]
struct Flavor {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct CreatedServerGroup {
    server_group: IdOnly,
}

impl OpenStackProvider {
    fn compute_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", self.endpoints.compute);
        self.request(method, &url)
            .header(MICROVERSION_HEADER, MICROVERSION)
    }

    /// Finds a flavor by identifier or name.
    pub(super) async fn find_flavor(&self, name: &str) -> Result<String, OpenStackError> {
        let list: FlavorList = self
            .fetch(
                Target::new(SERVICE, "flavor", name),
                self.compute_request(Method::GET, "/flavors/detail"),
            )
            .await?;
        if let Some(flavor) = list.flavors.iter().find(|flavor| flavor.id == name) {
            return Ok(flavor.id.clone());
        }
        let matches = list
            .flavors
            .into_iter()
            .filter(|flavor| flavor.name == name)
            .map(|flavor| flavor.id)
            .collect();
        single_match("flavor", name, matches)
    }

    pub(super) async fn post_server(
        &self,
        request: &ServerRequest,
    ) -> Result<String, OpenStackError> {
        let created: CreatedServer = self
            .fetch(
                Target::new(SERVICE, "server", &request.name),
                self.compute_request(Method::POST, "/servers")
                    .json(&CreateServerRequest::from_request(request)),
            )
            .await?;
        Ok(created.server.id)
    }

    pub(super) async fn get_server(
        &self,
        server_id: &str,
    ) -> Result<ServerDetails, OpenStackError> {
        let envelope: ServerEnvelope = self
            .fetch(
                Target::new(SERVICE, "server", server_id),
                self.compute_request(Method::GET, &format!("/servers/{server_id}")),
            )
            .await?;
        Ok(envelope.server.into())
    }

    pub(super) async fn remove_server(&self, server_id: &str) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "server", server_id),
            self.compute_request(Method::DELETE, &format!("/servers/{server_id}")),
        )
        .await
    }

    pub(super) async fn get_console_output(
        &self,
        server_id: &str,
    ) -> Result<String, OpenStackError> {
        let console: ConsoleOutput = self
            .fetch(
                Target::new(SERVICE, "server", server_id),
                self.compute_request(Method::POST, &format!("/servers/{server_id}/action"))
                    .json(&json!({ "os-getConsoleOutput": { "length": null } })),
            )
            .await?;
        Ok(console.output)
    }

    pub(super) async fn post_volume_attachment(
        &self,
        server_id: &str,
        volume_id: &str,
    ) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "server", server_id),
            self.compute_request(
                Method::POST,
                &format!("/servers/{server_id}/os-volume_attachments"),
            )
            .json(&json!({ "volumeAttachment": { "volumeId": volume_id } })),
        )
        .await
    }

    pub(super) async fn post_server_group(
        &self,
        request: &ServerGroupRequest,
    ) -> Result<String, OpenStackError> {
        let created: CreatedServerGroup = self
            .fetch(
                Target::new(SERVICE, "server group", &request.name),
                self.compute_request(Method::POST, "/os-server-groups").json(&json!({
                    "server_group": { "name": request.name, "policy": request.policy.as_str() }
                })),
            )
            .await?;
        Ok(created.server_group.id)
    }

    pub(super) async fn remove_server_group(&self, group_id: &str) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "server group", group_id),
            self.compute_request(Method::DELETE, &format!("/os-server-groups/{group_id}")),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use serde_json::Value;

    use super::*;

    #[fixture]
    fn request() -> ServerRequest {
        ServerRequest {
            name: "stress-0".to_owned(),
            flavor_id: "flavor-1".to_owned(),
            image_id: "image-1".to_owned(),
            network_id: "net-1".to_owned(),
            server_group_id: Some("group-1".to_owned()),
            availability_zone: "nova".to_owned(),
            user_data: "I2Nsb3VkLWNvbmZpZw==".to_owned(),
            boot_volume_size: 20,
            volume_type: None,
            metadata: BTreeMap::from([("simple-stress-run".to_owned(), "abc".to_owned())]),
        }
    }

    fn payload(request: &ServerRequest) -> Value {
        serde_json::to_value(CreateServerRequest::from_request(request)).unwrap_or_default()
    }

    #[rstest]
    fn server_payload_boots_from_volume(request: ServerRequest) {
        let body = payload(&request);
        assert_eq!(
            body.pointer("/server/block_device_mapping_v2/0"),
            Some(&json!({
                "boot_index": 0,
                "uuid": "image-1",
                "source_type": "image",
                "destination_type": "volume",
                "volume_size": 20,
                "delete_on_termination": true
            }))
        );
        assert_eq!(body.pointer("/server/flavorRef"), Some(&json!("flavor-1")));
        assert_eq!(body.pointer("/server/networks/0/uuid"), Some(&json!("net-1")));
        assert_eq!(
            body.pointer("/server/metadata/simple-stress-run"),
            Some(&json!("abc"))
        );
        assert_eq!(
            body.pointer("/os:scheduler_hints/group"),
            Some(&json!("group-1"))
        );
    }

    #[rstest]
    fn volume_type_is_sent_only_when_requested(mut request: ServerRequest) {
        assert_eq!(
            payload(&request).pointer("/server/block_device_mapping_v2/0/volume_type"),
            None
        );
        request.volume_type = Some("ssd".to_owned());
        assert_eq!(
            payload(&request).pointer("/server/block_device_mapping_v2/0/volume_type"),
            Some(&json!("ssd"))
        );
    }

    #[rstest]
    fn scheduler_hints_are_omitted_without_group(mut request: ServerRequest) {
        request.server_group_id = None;
        assert_eq!(payload(&request).get("os:scheduler_hints"), None);
    }

    #[rstest]
    fn server_details_collect_attachments_and_fault() {
        let envelope: Result<ServerEnvelope, _> = serde_json::from_value(json!({
            "server": {
                "id": "srv-1",
                "status": "ERROR",
                "os-extended-volumes:volumes_attached": [{"id": "vol-1"}, {"id": "vol-2"}],
                "fault": {"message": "No valid host was found", "code": 500}
            }
        }));
        let details = envelope.map(|parsed| ServerDetails::from(parsed.server));
        assert_eq!(
            details.ok(),
            Some(ServerDetails {
                id: "srv-1".to_owned(),
                status: "ERROR".to_owned(),
                attached_volumes: vec!["vol-1".to_owned(), "vol-2".to_owned()],
                fault: Some("No valid host was found".to_owned()),
            })
        );
    }
}

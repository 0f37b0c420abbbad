//! Cinder volume calls.

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::provider::{VolumeDetails, VolumeRequest};

use super::{OpenStackError, OpenStackProvider, Target};

const SERVICE: &str = "block-storage";

#[derive(Serialize)]
struct CreateVolumeRequest<'a> {
    volume: VolumeBody<'a>,
}

#[derive(Serialize)]
struct VolumeBody<'a> {
    name: &'a str,
    size: u32,
    availability_zone: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume_type: Option<&'a str>,
}

#[derive(Deserialize)]
struct VolumeEnvelope {
    volume: VolumeResponse,
}

#[derive(Deserialize)]
struct VolumeResponse {
    id: String,
    status: String,
}

impl OpenStackProvider {
    fn volume_url(&self, path: &str) -> String {
        format!("{}/volumes{path}", self.endpoints.block_storage)
    }

    pub(super) async fn post_volume(
        &self,
        request: &VolumeRequest,
    ) -> Result<String, OpenStackError> {
        let payload = CreateVolumeRequest {
            volume: VolumeBody {
                name: &request.name,
                size: request.size_gib,
                availability_zone: &request.availability_zone,
                volume_type: request.volume_type.as_deref(),
            },
        };
        let created: VolumeEnvelope = self
            .fetch(
                Target::new(SERVICE, "volume", &request.name),
                self.request(Method::POST, &self.volume_url("")).json(&payload),
            )
            .await?;
        Ok(created.volume.id)
    }

    pub(super) async fn get_volume(
        &self,
        volume_id: &str,
    ) -> Result<VolumeDetails, OpenStackError> {
        let envelope: VolumeEnvelope = self
            .fetch(
                Target::new(SERVICE, "volume", volume_id),
                self.request(Method::GET, &self.volume_url(&format!("/{volume_id}"))),
            )
            .await?;
        Ok(VolumeDetails {
            id: envelope.volume.id,
            status: envelope.volume.status,
        })
    }

    pub(super) async fn remove_volume(&self, volume_id: &str) -> Result<(), OpenStackError> {
        self.discard(
            Target::new(SERVICE, "volume", volume_id),
            self.request(Method::DELETE, &self.volume_url(&format!("/{volume_id}"))),
        )
        .await
    }
}

//! Glance image lookup.

use reqwest::Method;
use serde::Deserialize;

use super::{OpenStackError, OpenStackProvider, Target, single_match};

const SERVICE: &str = "image";

#[derive(Deserialize)]
struct ImageList {
    images: Vec<Image>,
}

#[derive(Deserialize)]
struct Image {
    id: String,
}

impl OpenStackProvider {
    /// Finds an image by name, falling back to a lookup by identifier.
    pub(super) async fn find_image(&self, name: &str) -> Result<String, OpenStackError> {
        let url = format!("{}/images", self.endpoints.image);
        let by_name: ImageList = self
            .fetch(
                Target::new(SERVICE, "image", name),
                self.request(Method::GET, &url).query(&[("name", name)]),
            )
            .await?;
        if !by_name.images.is_empty() {
            let ids = by_name.images.into_iter().map(|image| image.id).collect();
            return single_match("image", name, ids);
        }

        let by_id: Image = self
            .fetch(
                Target::new(SERVICE, "image", name),
                self.request(Method::GET, &format!("{url}/{name}")),
            )
            .await?;
        Ok(by_id.id)
    }
}

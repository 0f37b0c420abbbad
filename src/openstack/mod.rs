//! OpenStack implementation of [`ResourceProvider`] over the public REST
//! APIs (Keystone, Nova, Cinder, Neutron, Glance).

mod auth;
mod block_storage;
mod compute;
mod error;
mod image;
mod network;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::OpenStackConfig;
use crate::provider::{
    LookupKind, ProviderFuture, ResourceProvider, ServerDetails, ServerGroupRequest, ServerRequest,
    SubnetRequest, VolumeDetails, VolumeRequest,
};
use auth::{Endpoints, TOKEN_HEADER};

pub use error::OpenStackError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Addressee of a request, used to classify failures.
#[derive(Clone, Copy, Debug)]
struct Target<'a> {
    service: &'static str,
    kind: &'static str,
    id: &'a str,
}

impl<'a> Target<'a> {
    const fn new(service: &'static str, kind: &'static str, id: &'a str) -> Self {
        Self { service, kind, id }
    }
}

/// Provider backed by an authenticated OpenStack session.
#[derive(Clone, Debug)]
pub struct OpenStackProvider {
    http: reqwest::Client,
    token: String,
    endpoints: Endpoints,
}

impl OpenStackProvider {
    /// Authenticates against Keystone and resolves the service endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Auth`] when the credentials are rejected and
    /// [`OpenStackError::MissingEndpoint`] when the catalog lacks a service.
    pub async fn connect(config: &OpenStackConfig) -> Result<Self, OpenStackError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| OpenStackError::Transport {
                url: config.auth_url.clone(),
                message: err.to_string(),
            })?;
        let session = auth::authenticate(&http, config).await?;
        debug!(
            compute = %session.endpoints.compute,
            block_storage = %session.endpoints.block_storage,
            network = %session.endpoints.network,
            image = %session.endpoints.image,
            "authenticated"
        );
        Ok(Self {
            http,
            token: session.token,
            endpoints: session.endpoints,
        })
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(TOKEN_HEADER, &self.token)
    }

    async fn execute(
        &self,
        target: Target<'_>,
        builder: RequestBuilder,
    ) -> Result<Vec<u8>, OpenStackError> {
        let transport = |err: reqwest::Error| OpenStackError::Transport {
            url: err.url().map(ToString::to_string).unwrap_or_default(),
            message: err.to_string(),
        };
        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        if status == StatusCode::NOT_FOUND {
            return Err(OpenStackError::NotFound {
                kind: target.kind,
                id: target.id.to_owned(),
            });
        }
        if !status.is_success() {
            return Err(OpenStackError::Api {
                service: target.service,
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body.to_vec())
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        target: Target<'_>,
        builder: RequestBuilder,
    ) -> Result<T, OpenStackError> {
        let body = self.execute(target, builder).await?;
        decode(target.service, &body)
    }

    async fn discard(
        &self,
        target: Target<'_>,
        builder: RequestBuilder,
    ) -> Result<(), OpenStackError> {
        self.execute(target, builder).await.map(drop)
    }
}

fn decode<T: DeserializeOwned>(service: &'static str, body: &[u8]) -> Result<T, OpenStackError> {
    serde_json::from_slice(body).map_err(|err| OpenStackError::Decode {
        service,
        message: err.to_string(),
    })
}

/// Maps a not-found answer of a details call to `None`.
fn absent_if_missing<T>(result: Result<T, OpenStackError>) -> Result<Option<T>, OpenStackError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(OpenStackError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Picks the single resource whose name matches, if any.
fn single_match<T>(
    kind: &'static str,
    name: &str,
    mut matches: Vec<T>,
) -> Result<T, OpenStackError> {
    match matches.len() {
        0 => Err(OpenStackError::NotFound {
            kind,
            id: name.to_owned(),
        }),
        1 => matches.pop().ok_or_else(|| OpenStackError::NotFound {
            kind,
            id: name.to_owned(),
        }),
        count => Err(OpenStackError::Ambiguous {
            kind,
            name: name.to_owned(),
            count,
        }),
    }
}

impl ResourceProvider for OpenStackProvider {
    type Error = OpenStackError;

    fn resolve<'a>(
        &'a self,
        kind: LookupKind,
        name: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move {
            match kind {
                LookupKind::Flavor => self.find_flavor(name).await,
                LookupKind::Image => self.find_image(name).await,
                LookupKind::Network => self.find_network(name).await,
            }
        })
    }

    fn create_server<'a>(
        &'a self,
        request: &'a ServerRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.post_server(request))
    }

    fn server_details<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ProviderFuture<'a, Option<ServerDetails>, Self::Error> {
        Box::pin(async move { absent_if_missing(self.get_server(server_id).await) })
    }

    fn delete_server<'a>(&'a self, server_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_server(server_id))
    }

    fn console_output<'a>(
        &'a self,
        server_id: &'a str,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.get_console_output(server_id))
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.post_volume(request))
    }

    fn volume_details<'a>(
        &'a self,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, Option<VolumeDetails>, Self::Error> {
        Box::pin(async move { absent_if_missing(self.get_volume(volume_id).await) })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_volume(volume_id))
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.post_volume_attachment(server_id, volume_id))
    }

    fn create_server_group<'a>(
        &'a self,
        request: &'a ServerGroupRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.post_server_group(request))
    }

    fn delete_server_group<'a>(
        &'a self,
        group_id: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_server_group(group_id))
    }

    fn create_network<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.post_network(name))
    }

    fn delete_network<'a>(&'a self, network_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_network(network_id))
    }

    fn create_subnet<'a>(
        &'a self,
        request: &'a SubnetRequest,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(self.post_subnet(request))
    }

    fn delete_subnet<'a>(&'a self, subnet_id: &'a str) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(self.remove_subnet(subnet_id))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn missing_details_become_none() {
        let result: Result<u8, _> = Err(OpenStackError::NotFound {
            kind: "server",
            id: "abc".to_owned(),
        });
        assert_eq!(absent_if_missing(result), Ok(None));
    }

    #[rstest]
    fn other_errors_pass_through() {
        let err = OpenStackError::Api {
            service: "compute",
            status: 500,
            message: "boom".to_owned(),
        };
        assert_eq!(absent_if_missing::<u8>(Err(err.clone())), Err(err));
    }

    #[rstest]
    #[case(vec![], Err(OpenStackError::NotFound { kind: "image", id: "jammy".to_owned() }))]
    #[case(vec!["a"], Ok("a"))]
    #[case(
        vec!["a", "b"],
        Err(OpenStackError::Ambiguous { kind: "image", name: "jammy".to_owned(), count: 2 })
    )]
    fn picks_single_match(
        #[case] matches: Vec<&'static str>,
        #[case] expected: Result<&'static str, OpenStackError>,
    ) {
        assert_eq!(single_match("image", "jammy", matches), expected);
    }
}

//! Keystone v3 password authentication and service catalog lookup.

use serde::{Deserialize, Serialize};

use crate::config::OpenStackConfig;

use super::OpenStackError;

/// Header carrying the issued token in Keystone responses and in every
/// authenticated request.
pub(super) const TOKEN_HEADER: &str = "X-Auth-Token";
const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

#[derive(Serialize)]
struct AuthRequest<'a> {
    auth: Auth<'a>,
}

#[derive(Serialize)]
struct Auth<'a> {
    identity: Identity<'a>,
    scope: Scope<'a>,
}

#[derive(Serialize)]
struct Identity<'a> {
    methods: [&'static str; 1],
    password: PasswordMethod<'a>,
}

#[derive(Serialize)]
struct PasswordMethod<'a> {
    user: User<'a>,
}

#[derive(Serialize)]
struct User<'a> {
    name: &'a str,
    domain: Domain<'a>,
    password: &'a str,
}

#[derive(Serialize)]
struct Scope<'a> {
    project: Project<'a>,
}

#[derive(Serialize)]
struct Project<'a> {
    name: &'a str,
    domain: Domain<'a>,
}

#[derive(Serialize)]
struct Domain<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct CatalogEntry {
    #[serde(rename = "type")]
    pub(super) service_type: String,
    #[serde(default)]
    pub(super) endpoints: Vec<CatalogEndpoint>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub(super) struct CatalogEndpoint {
    pub(super) interface: String,
    #[serde(default)]
    pub(super) region: Option<String>,
    #[serde(default)]
    pub(super) region_id: Option<String>,
    pub(super) url: String,
}

/// Base URLs of the services a run talks to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct Endpoints {
    pub(super) compute: String,
    pub(super) block_storage: String,
    pub(super) network: String,
    pub(super) image: String,
}

/// Scoped token plus the endpoints picked from its catalog.
#[derive(Clone, Debug)]
pub(super) struct Session {
    pub(super) token: String,
    pub(super) endpoints: Endpoints,
}

fn identity_url(auth_url: &str) -> String {
    let base = auth_url.trim_end_matches('/');
    if base.ends_with("/v3") {
        format!("{base}/auth/tokens")
    } else {
        format!("{base}/v3/auth/tokens")
    }
}

fn auth_body(config: &OpenStackConfig) -> AuthRequest<'_> {
    AuthRequest {
        auth: Auth {
            identity: Identity {
                methods: ["password"],
                password: PasswordMethod {
                    user: User {
                        name: &config.username,
                        domain: Domain {
                            name: &config.user_domain_name,
                        },
                        password: &config.password,
                    },
                },
            },
            scope: Scope {
                project: Project {
                    name: &config.project_name,
                    domain: Domain {
                        name: &config.project_domain_name,
                    },
                },
            },
        },
    }
}

/// Picks the endpoint of the first matching service type for `interface`,
/// restricted to `region` when one is configured.
pub(super) fn select_endpoint(
    catalog: &[CatalogEntry],
    service_types: &[&str],
    service: &'static str,
    interface: &str,
    region: Option<&str>,
) -> Result<String, OpenStackError> {
    let in_region = |endpoint: &CatalogEndpoint| {
        region.is_none_or(|wanted| {
            endpoint.region.as_deref() == Some(wanted)
                || endpoint.region_id.as_deref() == Some(wanted)
        })
    };

    service_types
        .iter()
        .filter_map(|wanted| catalog.iter().find(|entry| entry.service_type == *wanted))
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| endpoint.interface == interface && in_region(endpoint))
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
        .ok_or_else(|| OpenStackError::MissingEndpoint {
            service,
            interface: interface.to_owned(),
        })
}

fn versioned(url: String, suffix: &str) -> String {
    if url.ends_with(suffix) {
        url
    } else {
        format!("{url}{suffix}")
    }
}

pub(super) fn endpoints_from_catalog(
    catalog: &[CatalogEntry],
    config: &OpenStackConfig,
) -> Result<Endpoints, OpenStackError> {
    let interface = config.interface.as_str();
    let region = config.region_name.as_deref();
    Ok(Endpoints {
        compute: select_endpoint(catalog, &["compute"], "compute", interface, region)?,
        block_storage: select_endpoint(
            catalog,
            &["volumev3", "block-storage"],
            "block-storage",
            interface,
            region,
        )?,
        network: versioned(
            select_endpoint(catalog, &["network"], "network", interface, region)?,
            "/v2.0",
        ),
        image: versioned(
            select_endpoint(catalog, &["image"], "image", interface, region)?,
            "/v2",
        ),
    })
}

/// Requests a project-scoped token with password credentials.
pub(super) async fn authenticate(
    http: &reqwest::Client,
    config: &OpenStackConfig,
) -> Result<Session, OpenStackError> {
    let url = identity_url(&config.auth_url);
    let response = http
        .post(&url)
        .json(&auth_body(config))
        .send()
        .await
        .map_err(|err| OpenStackError::Transport {
            url: url.clone(),
            message: err.to_string(),
        })?;

    let status = response.status();
    let issued = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response
        .bytes()
        .await
        .map_err(|err| OpenStackError::Transport {
            url,
            message: err.to_string(),
        })?;

    if !status.is_success() {
        return Err(OpenStackError::Auth {
            message: format!(
                "HTTP {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&body)
            ),
        });
    }
    let token = issued.ok_or_else(|| OpenStackError::Auth {
        message: format!("response carried no {SUBJECT_TOKEN_HEADER} header"),
    })?;
    let parsed: TokenResponse =
        serde_json::from_slice(&body).map_err(|err| OpenStackError::Decode {
            service: "identity",
            message: err.to_string(),
        })?;

    Ok(Session {
        token,
        endpoints: endpoints_from_catalog(&parsed.token.catalog, config)?,
    })
}

//! Error types for the OpenStack provider.

use thiserror::Error;

use crate::provider::ProviderFailure;

/// Errors raised by the OpenStack provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OpenStackError {
    /// Keystone rejected the credentials or returned no token.
    #[error("authentication failed: {message}")]
    Auth {
        /// Keystone's explanation.
        message: String,
    },
    /// The request never produced a response.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// Target URL.
        url: String,
        /// Underlying transport error.
        message: String,
    },
    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {message}")]
    Api {
        /// Catalog service type.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, as returned.
        message: String,
    },
    /// The addressed resource does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Resource kind.
        kind: &'static str,
        /// Identifier or name used for the lookup.
        id: String,
    },
    /// A name matched more than one resource.
    #[error("{kind} name '{name}' is ambiguous ({count} matches)")]
    Ambiguous {
        /// Resource kind.
        kind: &'static str,
        /// Name used for the lookup.
        name: String,
        /// Number of matches.
        count: usize,
    },
    /// A response body did not have the expected shape.
    #[error("unexpected response from {service}: {message}")]
    Decode {
        /// Catalog service type.
        service: &'static str,
        /// Parser error.
        message: String,
    },
    /// The service catalog has no usable endpoint for a service.
    #[error("no {interface} endpoint for service '{service}' in the catalog")]
    MissingEndpoint {
        /// Catalog service type.
        service: &'static str,
        /// Interface that was requested.
        interface: String,
    },
}

impl ProviderFailure for OpenStackError {
    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

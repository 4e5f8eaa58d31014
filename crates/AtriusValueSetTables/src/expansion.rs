//! Value set expansion strategies.
//!
//! Expansion itself is delegated to one of two capabilities:
//!
//! - a [`ValueSetResolver`], which expands locally and avoids network requests
//!   where it can (see [`LocalValueSetResolver`](crate::resolver::LocalValueSetResolver));
//! - a [`TerminologyService`], which asks a remote FHIR terminology server
//!   (see [`TerminologyServiceClient`](crate::terminology_client::TerminologyServiceClient)).
//!
//! [`ExpansionSource`] selects between them. A terminology service URL can only
//! be attached to the service variant, so "service URL with a local resolver"
//! is not representable. [`ExpansionSource::new`] is the checked constructor for
//! callers that assemble the pieces at runtime, such as the CLI.

use crate::error::{ExpansionError, MaterializeError, ServiceError};
use crate::models::ValueSet;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Expands value set URLs without a terminology server.
#[async_trait]
pub trait ValueSetResolver: Send + Sync {
    /// Expands `url` (optionally `url|version`).
    async fn expand_value_set_url(&self, url: &str) -> Result<ValueSet, ExpansionError>;
}

/// Expands value set URLs through a remote terminology server.
#[async_trait]
pub trait TerminologyService: Send + Sync {
    /// Expands `url` using the service inferred from the URL's domain.
    async fn expand_value_set_url(&self, url: &str) -> Result<ValueSet, ServiceError>;

    /// Expands `url` using the terminology service at `service_url`.
    async fn expand_value_set_url_using_service(
        &self,
        url: &str,
        service_url: &str,
    ) -> Result<ValueSet, ServiceError>;
}

/// An expansion capability without any configuration attached.
#[derive(Clone)]
pub enum Expander {
    Local(Arc<dyn ValueSetResolver>),
    Service(Arc<dyn TerminologyService>),
}

/// The expansion strategy used by
/// [`ValueSetManager::materialize_value_set_expansion`](crate::manager::ValueSetManager::materialize_value_set_expansion).
#[derive(Clone)]
pub enum ExpansionSource {
    /// Expand with a local resolver.
    Local(Arc<dyn ValueSetResolver>),
    /// Expand with a terminology service client, either at `service_url` or at
    /// the service inferred from each value set URL's domain.
    Service {
        client: Arc<dyn TerminologyService>,
        service_url: Option<String>,
    },
}

impl ExpansionSource {
    /// Pairs an expander with an optional terminology service URL.
    ///
    /// Fails with [`MaterializeError::Configuration`] when a service URL is given
    /// together with a local resolver.
    pub fn new(expander: Expander, service_url: Option<String>) -> Result<Self, MaterializeError> {
        match (expander, service_url) {
            (Expander::Local(_), Some(url)) => Err(MaterializeError::configuration(format!(
                "a terminology service URL ({}) can only be given with a terminology service client, not a local resolver",
                url
            ))),
            (Expander::Local(resolver), None) => Ok(Self::Local(resolver)),
            (Expander::Service(client), service_url) => Ok(Self::Service {
                client,
                service_url,
            }),
        }
    }

    pub fn local(resolver: impl ValueSetResolver + 'static) -> Self {
        Self::Local(Arc::new(resolver))
    }

    pub fn service(client: impl TerminologyService + 'static, service_url: Option<String>) -> Self {
        Self::Service {
            client: Arc::new(client),
            service_url,
        }
    }

    /// Expands one value set URL, attaching the URL to any failure.
    pub async fn expand(&self, url: &str) -> Result<ValueSet, MaterializeError> {
        match self {
            Self::Local(resolver) => {
                debug!("Expanding {} with local resolver", url);
                resolver
                    .expand_value_set_url(url)
                    .await
                    .map_err(|source| MaterializeError::Expansion {
                        url: url.to_string(),
                        source,
                    })
            }
            Self::Service {
                client,
                service_url: Some(service_url),
            } => {
                debug!("Expanding {} with terminology service {}", url, service_url);
                client
                    .expand_value_set_url_using_service(url, service_url)
                    .await
                    .map_err(|source| MaterializeError::Service {
                        url: url.to_string(),
                        source,
                    })
            }
            Self::Service {
                client,
                service_url: None,
            } => {
                debug!("Expanding {} with inferred terminology service", url);
                client
                    .expand_value_set_url(url)
                    .await
                    .map_err(|source| MaterializeError::Service {
                        url: url.to_string(),
                        source,
                    })
            }
        }
    }
}

impl fmt::Debug for ExpansionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("ExpansionSource::Local"),
            Self::Service { service_url, .. } => f
                .debug_struct("ExpansionSource::Service")
                .field("service_url", service_url)
                .finish(),
        }
    }
}

/// Splits `url|version` into its parts.
pub fn split_versioned_url(url: &str) -> (&str, Option<&str>) {
    match url.split_once('|') {
        Some((base, version)) if !version.is_empty() => (base, Some(version)),
        Some((base, _)) => (base, None),
        None => (url, None),
    }
}

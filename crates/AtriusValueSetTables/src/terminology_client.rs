//! HTTP client for expanding value sets with a FHIR terminology server.
//!
//! Expansion uses `GET /ValueSet/$expand?url=...` and pages through large
//! expansions with `offset`/`count` until the reported `expansion.total` has
//! been collected.
//!
//! ## Choosing a server
//!
//! When no service URL is given, the server is inferred from the value set
//! URL's domain:
//!
//! | value set domain        | terminology service              |
//! |-------------------------|----------------------------------|
//! | `cts.nlm.nih.gov`       | `https://cts.nlm.nih.gov/fhir`   |
//! | `hl7.org`, `fhir.org`   | `https://tx.fhir.org/r4`         |
//! | `terminology.hl7.org`   | `https://tx.fhir.org/r4`         |
//!
//! Subdomains match their parent (`build.fhir.org` uses the `fhir.org` entry).
//!
//! ## Authentication
//!
//! API keys are configured per service base URL and sent as HTTP basic auth
//! with the user name `apikey`, which is what VSAC expects.

use crate::error::ServiceError;
use crate::expansion::{TerminologyService, split_versioned_url};
use crate::models::ValueSet;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Page size requested from `$expand`.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;

const VSAC_SERVICE: &str = "https://cts.nlm.nih.gov/fhir";
const TX_FHIR_ORG_SERVICE: &str = "https://tx.fhir.org/r4";

fn default_service_per_domain() -> HashMap<String, String> {
    [
        ("cts.nlm.nih.gov", VSAC_SERVICE),
        ("hl7.org", TX_FHIR_ORG_SERVICE),
        ("fhir.org", TX_FHIR_ORG_SERVICE),
        ("terminology.hl7.org", TX_FHIR_ORG_SERVICE),
    ]
    .into_iter()
    .map(|(domain, service)| (domain.to_string(), service.to_string()))
    .collect()
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Client for remote value set expansion.
#[derive(Debug, Clone)]
pub struct TerminologyServiceClient {
    client: Client,
    api_keys: HashMap<String, String>,
    service_per_domain: HashMap<String, String>,
    page_size: u64,
}

impl TerminologyServiceClient {
    pub fn new() -> Self {
        Self::with_client(
            Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
        )
    }

    /// Creates a client around a preconfigured `reqwest::Client`.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            api_keys: HashMap::new(),
            service_per_domain: default_service_per_domain(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Sends `api_key` to the service at `service_url`.
    pub fn with_api_key(mut self, service_url: &str, api_key: impl Into<String>) -> Self {
        self.api_keys
            .insert(normalize_base_url(service_url), api_key.into());
        self
    }

    /// Routes value sets under `domain` to `service_url` when no service is given.
    pub fn with_domain_service(mut self, domain: &str, service_url: &str) -> Self {
        self.service_per_domain
            .insert(domain.to_ascii_lowercase(), normalize_base_url(service_url));
        self
    }

    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// The terminology service for a value set URL, inferred from its domain.
    pub fn service_url_for(&self, value_set_url: &str) -> Result<String, ServiceError> {
        let (base, _) = split_versioned_url(value_set_url);
        let parsed = Url::parse(base).map_err(|e| ServiceError::InvalidUrl {
            url: value_set_url.to_string(),
            message: e.to_string(),
        })?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ServiceError::UnknownDomain(value_set_url.to_string()))?
            .to_ascii_lowercase();

        // Longest matching domain wins, so terminology.hl7.org beats hl7.org.
        self.service_per_domain
            .iter()
            .filter(|(domain, _)| host == **domain || host.ends_with(&format!(".{}", domain)))
            .max_by_key(|(domain, _)| domain.len())
            .map(|(_, service)| service.clone())
            .ok_or_else(|| ServiceError::UnknownDomain(value_set_url.to_string()))
    }

    async fn fetch_page(
        &self,
        endpoint: &str,
        api_key: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<ValueSet, ServiceError> {
        let mut request = self
            .client
            .get(endpoint)
            .query(query)
            .header("Accept", "application/fhir+json");
        if let Some(key) = api_key {
            request = request.basic_auth("apikey", Some(key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| ServiceError::Parse(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(ServiceError::Http { status, body })
        }
    }

    /// Expands `url` (optionally `url|version`) with the service at `service_url`,
    /// collecting every page of the expansion.
    pub async fn expand(&self, url: &str, service_url: &str) -> Result<ValueSet, ServiceError> {
        let service_url = normalize_base_url(service_url);
        Url::parse(&service_url).map_err(|e| ServiceError::InvalidUrl {
            url: service_url.clone(),
            message: e.to_string(),
        })?;
        let endpoint = format!("{}/ValueSet/$expand", service_url);
        let api_key = self.api_keys.get(&service_url).map(String::as_str);
        let (base, version) = split_versioned_url(url);

        info!("Expanding value set {} using {}", url, service_url);

        let mut first: Option<ValueSet> = None;
        let mut contains = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let mut query = vec![("url", base.to_string())];
            if let Some(version) = version {
                query.push(("valueSetVersion", version.to_string()));
            }
            query.push(("offset", offset.to_string()));
            query.push(("count", self.page_size.to_string()));

            let page = self.fetch_page(&endpoint, api_key, &query).await?;
            let expansion = page.expansion.clone().ok_or_else(|| {
                ServiceError::Parse(format!("response for {} has no expansion", url))
            })?;

            let received = expansion.contains.len() as u64;
            let total = expansion.total;
            contains.extend(expansion.contains);
            offset += received;
            debug!(
                "Received {} codes for {} (collected {}, total {:?})",
                received, url, offset, total
            );

            if first.is_none() {
                first = Some(page);
            }

            let done = match total {
                Some(total) => offset >= total,
                None => received < self.page_size,
            };
            if received == 0 || done {
                break;
            }
        }

        let mut value_set = first.unwrap_or_default();
        if value_set.url.is_none() {
            value_set.url = Some(base.to_string());
        }
        if value_set.version.is_none() {
            value_set.version = version.map(str::to_string);
        }
        if let Some(expansion) = value_set.expansion.as_mut() {
            expansion.total = Some(contains.len() as u64);
            expansion.offset = None;
            expansion.contains = contains;
        }
        Ok(value_set)
    }
}

impl Default for TerminologyServiceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TerminologyService for TerminologyServiceClient {
    async fn expand_value_set_url(&self, url: &str) -> Result<ValueSet, ServiceError> {
        let service_url = self.service_url_for(url)?;
        self.expand(url, &service_url).await
    }

    async fn expand_value_set_url_using_service(
        &self,
        url: &str,
        service_url: &str,
    ) -> Result<ValueSet, ServiceError> {
        self.expand(url, service_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_inferred_from_domain() {
        let client = TerminologyServiceClient::new();
        assert_eq!(
            client
                .service_url_for("http://cts.nlm.nih.gov/fhir/ValueSet/2.16.840.1.113762.1.4.1")
                .unwrap(),
            VSAC_SERVICE
        );
        assert_eq!(
            client
                .service_url_for("http://hl7.org/fhir/ValueSet/administrative-gender")
                .unwrap(),
            TX_FHIR_ORG_SERVICE
        );
        assert_eq!(
            client
                .service_url_for("http://terminology.hl7.org/ValueSet/v3-ActCode|2.0.0")
                .unwrap(),
            TX_FHIR_ORG_SERVICE
        );
        assert_eq!(
            client.service_url_for("http://build.fhir.org/ValueSet/x").unwrap(),
            TX_FHIR_ORG_SERVICE
        );
    }

    #[test]
    fn test_unknown_domain() {
        let client = TerminologyServiceClient::new();
        assert!(matches!(
            client.service_url_for("http://example.com/ValueSet/x"),
            Err(ServiceError::UnknownDomain(_))
        ));
        assert!(matches!(
            client.service_url_for("not a url"),
            Err(ServiceError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_domain_override_is_normalized() {
        let client = TerminologyServiceClient::new()
            .with_domain_service("Example.COM", "http://localhost:8080/fhir/");
        assert_eq!(
            client.service_url_for("http://example.com/ValueSet/x").unwrap(),
            "http://localhost:8080/fhir"
        );
    }
}

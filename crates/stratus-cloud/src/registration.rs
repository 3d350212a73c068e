//! HTTP client for the DNS registration service
//!
//! `GET /dns/` lists entries, `POST /dns/` registers a name and `PUT /dns/`
//! sets its name servers. Every request carries a bearer token.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response};
use serde::Serialize;
use stratus_common::{ApiError, Error, Result};
use tracing::debug;

use crate::api::{DnsEntry, DnsRegistrationApi};
use crate::config::{CloudConfig, DnsServiceConfig};

const SERVICE: &str = "dns-registration";

#[derive(Serialize)]
struct CreateEntryRequest<'a> {
    clustername: &'a str,
}

#[derive(Serialize)]
struct NameserversRequest<'a> {
    clustername: &'a str,
    nameservers: &'a [String],
}

/// [`DnsRegistrationApi`] over HTTP
#[derive(Clone, Debug)]
pub struct HttpDnsRegistration {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpDnsRegistration {
    /// Build a client with the cloud connect/read timeouts
    pub fn new(service: &DnsServiceConfig, cloud: &CloudConfig) -> Result<Self> {
        service.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(cloud.connect_timeout)
            .timeout(cloud.read_timeout)
            .build()
            .map_err(|e| {
                Error::internal_with_context("dns_registration", format!("http client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/dns/", service.base_url.trim_end_matches('/')),
            token: service.token.clone(),
        })
    }

    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, &self.endpoint)
            .bearer_auth(&self.token)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiError::new(SERVICE, operation, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            body
        };
        Err(ApiError::new(SERVICE, operation, message)
            .with_status(status.as_u16())
            .into())
    }
}

#[async_trait]
impl DnsRegistrationApi for HttpDnsRegistration {
    async fn list_entries(&self) -> Result<Vec<DnsEntry>> {
        let response = self.send("GET /dns/", self.request(Method::GET)).await?;
        let entries: Vec<DnsEntry> = response.json().await.map_err(|e| {
            Error::serialization_for_kind("DnsEntry", format!("GET /dns/ response: {}", e))
        })?;
        debug!(count = entries.len(), "listed DNS registration entries");
        Ok(entries)
    }

    async fn create_entry(&self, clustername: &str) -> Result<()> {
        let body = CreateEntryRequest { clustername };
        self.send("POST /dns/", self.request(Method::POST).json(&body))
            .await?;
        Ok(())
    }

    async fn set_nameservers(&self, clustername: &str, nameservers: &[String]) -> Result<()> {
        let body = NameserversRequest {
            clustername,
            nameservers,
        };
        self.send("PUT /dns/", self.request(Method::PUT).json(&body))
            .await?;
        Ok(())
    }
}

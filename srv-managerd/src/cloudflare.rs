//! Cloudflare DNS client for the `_minecraft._tcp` SRV records we manage.
//!
//! Wraps `reqwest::Client` with zone-scoped URL construction and the
//! `{ success, errors, result, result_info }` envelope. Callers only ever
//! see unwrapped results or a [`ProviderError`].

use std::time::Duration;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use shared::protocol::{
    domain_from_srv_name, srv_content, srv_name, SRV_PRIORITY, SRV_PROTO, SRV_SERVICE, SRV_WEIGHT,
};
use shared::types::{SrvRecord, TargetFields};
use crate::config::ProviderConfig;

const PAGE_SIZE: u32 = 100;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Connection refused, DNS failure, timeout, etc.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The API answered but refused the request
    #[error("Cloudflare API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// JSON deserialization failed, with the raw body for debugging
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RecordId {
    id: String,
}

/// DNS record as listed by the API
#[derive(Debug, Deserialize)]
struct DnsRecord {
    id: String,
    name: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    data: Option<SrvData>,
}

#[derive(Debug, Deserialize)]
struct SrvData {
    port: u16,
    target: String,
}

#[derive(Debug, Serialize)]
struct SrvRecordBody<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    name: String,
    content: String,
    data: SrvBodyData<'a>,
}

#[derive(Debug, Serialize)]
struct SrvBodyData<'a> {
    service: &'static str,
    proto: &'static str,
    name: &'a str,
    priority: u16,
    weight: u16,
    port: u16,
    target: &'a str,
}

impl<'a> SrvRecordBody<'a> {
    fn new(fields: &'a TargetFields) -> Self {
        Self {
            record_type: "SRV",
            name: srv_name(&fields.dns_record),
            content: srv_content(SRV_PRIORITY, SRV_WEIGHT, fields.target_port, &fields.target_host),
            data: SrvBodyData {
                service: SRV_SERVICE,
                proto: SRV_PROTO,
                name: &fields.dns_record,
                priority: SRV_PRIORITY,
                weight: SRV_WEIGHT,
                port: fields.target_port,
                target: &fields.target_host,
            },
        }
    }
}

impl DnsRecord {
    /// Convert to our view, dropping records that are not Minecraft SRV records
    fn into_srv_record(self) -> Option<SrvRecord> {
        let domain = domain_from_srv_name(&self.name)?.to_string();
        let (target_port, target_host) = match self.data {
            Some(data) => (data.port, data.target),
            None => parse_content(self.content.as_deref()?)?,
        };

        Some(SrvRecord {
            external_key: self.id,
            domain,
            target_host: target_host.trim_end_matches('.').to_string(),
            target_port,
        })
    }
}

/// Parse "priority weight port target" SRV content
fn parse_content(content: &str) -> Option<(u16, String)> {
    let mut parts = content.split_whitespace();
    let _priority = parts.next()?;
    let _weight = parts.next()?;
    let port = parts.next()?.parse().ok()?;
    let target = parts.next()?.to_string();
    Some((port, target))
}

fn matches_domain(domain: &str, filter: &str) -> bool {
    let domain = domain.to_ascii_lowercase();
    let filter = filter.trim_end_matches('.').to_ascii_lowercase();
    domain == filter || domain.ends_with(&format!(".{filter}"))
}

/// Client for one Cloudflare zone
pub struct CloudflareClient {
    http: reqwest::Client,
    base_url: Url,
    zone_id: String,
    api_token: String,
    email: Option<String>,
}

impl CloudflareClient {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self::with_client(
            http,
            Url::parse(&config.base_url)?,
            config.zone_id.clone(),
            config.api_token.clone(),
            config.email.clone(),
        ))
    }

    /// Create a client with a pre-built `reqwest::Client`
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        zone_id: String,
        api_token: String,
        email: Option<String>,
    ) -> Self {
        Self { http, base_url, zone_id, api_token, email }
    }

    /// `{base}/zones/{zone}/dns_records[/{id}]`
    fn records_url(&self, id: Option<&str>) -> Result<Url, ProviderError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut full = format!("{base}/zones/{}/dns_records", self.zone_id);
        if let Some(id) = id {
            full.push('/');
            full.push_str(id);
        }
        Ok(Url::parse(&full)?)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let builder = builder.bearer_auth(&self.api_token);
        match &self.email {
            Some(email) => builder.header("X-Auth-Email", email),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<Envelope<T>, ProviderError> {
        let resp = self.authorize(builder).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        let envelope: Envelope<T> = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) if !status.is_success() => {
                return Err(ProviderError::Api {
                    status: status.as_u16(),
                    message: body.chars().take(200).collect(),
                });
            }
            Err(e) => {
                return Err(ProviderError::Deserialization { message: e.to_string(), body });
            }
        };

        if !status.is_success() || !envelope.success {
            let message = if envelope.errors.is_empty() {
                "request failed".to_string()
            } else {
                envelope
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            return Err(ProviderError::Api { status: status.as_u16(), message });
        }

        Ok(envelope)
    }

    fn require_result<T>(envelope: Envelope<T>) -> Result<T, ProviderError> {
        envelope.result.ok_or_else(|| ProviderError::Deserialization {
            message: "response has no result".to_string(),
            body: String::new(),
        })
    }

    /// List Minecraft SRV records, optionally limited to a domain and its subdomains
    pub async fn list_srv_records(&self, domain_filter: Option<&str>) -> Result<Vec<SrvRecord>, ProviderError> {
        let url = self.records_url(None)?;
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            tracing::debug!("GET {} (page {})", url, page);
            let request = self.http.get(url.clone()).query(&[
                ("type", "SRV".to_string()),
                ("page", page.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ]);
            let envelope: Envelope<Vec<DnsRecord>> = self.send(request).await?;
            let total_pages = envelope
                .result_info
                .as_ref()
                .and_then(|info| info.total_pages)
                .unwrap_or(1);

            records.extend(
                Self::require_result(envelope)?
                    .into_iter()
                    .filter_map(DnsRecord::into_srv_record)
                    .filter(|r| domain_filter.map_or(true, |f| matches_domain(&r.domain, f))),
            );

            if page >= total_pages {
                break;
            }
            page += 1;
        }

        Ok(records)
    }

    /// Create the SRV record for a target. Returns the provider record id.
    pub async fn create_srv_record(&self, fields: &TargetFields) -> Result<String, ProviderError> {
        let url = self.records_url(None)?;
        tracing::debug!("POST {}", url);

        let envelope: Envelope<RecordId> = self
            .send(self.http.post(url).json(&SrvRecordBody::new(fields)))
            .await?;
        Ok(Self::require_result(envelope)?.id)
    }

    pub async fn update_srv_record(&self, external_key: &str, fields: &TargetFields) -> Result<(), ProviderError> {
        let url = self.records_url(Some(external_key))?;
        tracing::debug!("PUT {}", url);

        let _: Envelope<serde_json::Value> = self
            .send(self.http.put(url).json(&SrvRecordBody::new(fields)))
            .await?;
        Ok(())
    }

    pub async fn delete_srv_record(&self, external_key: &str) -> Result<(), ProviderError> {
        let url = self.records_url(Some(external_key))?;
        tracing::debug!("DELETE {}", url);

        let _: Envelope<serde_json::Value> = self.send(self.http.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RECORDS_PATH: &str = "/zones/zone123/dns_records";

    async fn setup() -> (MockServer, CloudflareClient) {
        let server = MockServer::start().await;
        let client = CloudflareClient::with_client(
            reqwest::Client::new(),
            Url::parse(&server.uri()).unwrap(),
            "zone123".into(),
            "token".into(),
            Some("ops@example.com".into()),
        );
        (server, client)
    }

    fn fields() -> TargetFields {
        TargetFields {
            name: "Survival".to_string(),
            dns_record: "mc1.example.com".to_string(),
            target_host: "play.example.net".to_string(),
            target_port: 25565,
            poll_host: Some("192.168.1.20".to_string()),
        }
    }

    fn srv(id: &str, name: &str, port: u16, target: &str) -> serde_json::Value {
        json!({
            "id": id,
            "type": "SRV",
            "name": name,
            "content": format!("1 1 {port} {target}"),
            "data": { "priority": 1, "weight": 1, "port": port, "target": target }
        })
    }

    #[tokio::test]
    async fn test_list_follows_pages_and_filters() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .and(query_param("type", "SRV"))
            .and(query_param("page", "1"))
            .and(header("Authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [
                    srv("r1", "_minecraft._tcp.mc1.example.com", 25565, "10.0.0.1"),
                    srv("sip", "_sip._udp.example.com", 5060, "sip.example.com"),
                ],
                "result_info": { "page": 1, "total_pages": 2 }
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(RECORDS_PATH))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": [
                    srv("r2", "_minecraft._tcp.other.org", 25566, "10.0.0.2."),
                ],
                "result_info": { "page": 2, "total_pages": 2 }
            })))
            .mount(&server)
            .await;

        let all = client.list_srv_records(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].external_key, "r1");
        assert_eq!(all[0].domain, "mc1.example.com");
        assert_eq!(all[1].target_host, "10.0.0.2");

        let filtered = client.list_srv_records(Some("example.com")).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].external_key, "r1");
    }

    #[tokio::test]
    async fn test_create_sends_srv_body() {
        let (server, client) = setup().await;

        Mock::given(method("POST"))
            .and(path(RECORDS_PATH))
            .and(header("X-Auth-Email", "ops@example.com"))
            .and(body_partial_json(json!({
                "type": "SRV",
                "name": "_minecraft._tcp.mc1.example.com",
                "content": "1 1 25565 play.example.net",
                "data": { "service": "_minecraft", "proto": "_tcp", "port": 25565, "target": "play.example.net" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": { "id": "new-record" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client.create_srv_record(&fields()).await.unwrap();
        assert_eq!(id, "new-record");
    }

    #[tokio::test]
    async fn test_api_rejection_surfaces_messages() {
        let (server, client) = setup().await;

        Mock::given(method("PUT"))
            .and(path(format!("{RECORDS_PATH}/r1")))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "success": false,
                "errors": [{ "code": 9005, "message": "Content for SRV record is invalid" }],
                "result": null
            })))
            .mount(&server)
            .await;

        let result = client.update_srv_record("r1", &fields()).await;
        match result {
            Err(ProviderError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert!(message.contains("9005"), "unexpected message: {message}");
            }
            other => panic!("expected Api error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_record() {
        let (server, client) = setup().await;

        Mock::given(method("DELETE"))
            .and(path(format!("{RECORDS_PATH}/r1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "errors": [],
                "result": { "id": "r1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        client.delete_srv_record("r1").await.unwrap();
    }

    #[tokio::test]
    async fn test_non_json_error_page() {
        let (server, client) = setup().await;

        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad gateway</html>"))
            .mount(&server)
            .await;

        let result = client.delete_srv_record("r1").await;
        assert!(
            matches!(result, Err(ProviderError::Api { status: 502, .. })),
            "expected Api error, got: {result:?}"
        );
    }

    #[test]
    fn test_content_fallback() {
        let record = DnsRecord {
            id: "r9".to_string(),
            name: "_minecraft._tcp.mc9.example.com".to_string(),
            content: Some("0 5 25570 host.example.com".to_string()),
            data: None,
        };
        let parsed = record.into_srv_record().unwrap();
        assert_eq!(parsed.target_port, 25570);
        assert_eq!(parsed.target_host, "host.example.com");
    }
}

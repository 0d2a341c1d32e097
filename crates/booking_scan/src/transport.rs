use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, cookie::Jar};
use tracing::debug;

use crate::config::MonitorConfig;
use crate::scan_types::ScanError;

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl TransportResponse {
    /// Response with the given status and body
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Leading part of the body, for log lines
    pub fn body_preview(&self) -> &str {
        let mut end = self.body.len().min(500);
        while !self.body.is_char_boundary(end) {
            end -= 1;
        }
        &self.body[..end]
    }
}

/// HTTP seam between the booking client and the network
#[async_trait]
pub trait BookingTransport: Send + Sync {
    /// GET a page with query parameters
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError>;

    /// POST url-encoded form fields with extra request headers
    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError>;
}

/// Cookie-keeping reqwest client carrying the browser identity headers
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with one cookie jar for the whole process
    pub fn new(config: &MonitorConfig) -> Result<Self, ScanError> {
        let jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"),
        );
        headers.insert(header::ORIGIN, header_value(&config.base_url)?);
        headers.insert(header::REFERER, header_value(&config.reservation_url())?);

        let client = Client::builder()
            .cookie_provider(jar)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScanError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn finish(
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<TransportResponse, ScanError> {
        let response = request.send().await.map_err(|e| request_error(url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| request_error(url, e))?;

        debug!("{} -> HTTP {} ({} bytes)", url, status, body.len());

        Ok(TransportResponse { status, body })
    }
}

#[async_trait]
impl BookingTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError> {
        Self::finish(self.client.get(url).query(query), url).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<TransportResponse, ScanError> {
        let mut request = self.client.post(url).form(form);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        Self::finish(request, url).await
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ScanError> {
    HeaderValue::from_str(value)
        .map_err(|e| ScanError::ConfigError(format!("Invalid header value {:?}: {}", value, e)))
}

fn request_error(url: &str, error: reqwest::Error) -> ScanError {
    if error.is_timeout() {
        ScanError::Network(format!("Request to {} timed out", url))
    } else {
        ScanError::Network(format!("Request to {} failed: {}", url, error))
    }
}

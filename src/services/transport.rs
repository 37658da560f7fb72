//! Outbound HTTP seam between the annotation client and the VEP REST API.

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::AnnotationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: UpstreamMethod,
    pub url: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn header_u64(&self, name: &str) -> Option<u64> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }
}

/// Issues a single request and returns whatever the server answered.
///
/// Implementations report only transport failures as errors; HTTP error
/// statuses come back as ordinary responses for the client to interpret.
#[async_trait]
pub trait AnnotationTransport: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, AnnotationError>;
}

#[async_trait]
impl<T: AnnotationTransport + ?Sized> AnnotationTransport for Arc<T> {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, AnnotationError> {
        (**self).send(request).await
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, AnnotationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("variant-annotator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                AnnotationError::UpstreamService(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AnnotationTransport for HttpTransport {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, AnnotationError> {
        let builder = match request.method {
            UpstreamMethod::Get => self.client.get(&request.url),
            UpstreamMethod::Post => {
                let builder = self.client.post(&request.url);
                match &request.body {
                    Some(body) => builder.json(body),
                    None => builder,
                }
            }
        };

        let response = builder
            .header("Accept", "application/json")
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnnotationError::UpstreamService(format!(
                        "request to {} timed out after {}s",
                        request.url,
                        request.timeout.as_secs()
                    ))
                } else {
                    AnnotationError::UpstreamService(format!(
                        "request to {} failed: {}",
                        request.url, e
                    ))
                }
            })?;

        let status = StatusCode::from_u16(response.status().as_u16()).map_err(|e| {
            AnnotationError::UpstreamService(format!("invalid upstream status: {}", e))
        })?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|e| {
            AnnotationError::UpstreamService(format!("Error reading response body: {}", e))
        })?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}

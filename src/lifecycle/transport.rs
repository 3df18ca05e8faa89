//! Control plane transport
//!
//! The lifecycle manager speaks to the control plane through `ApiTransport`
//! so that tests can script responses without a network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde_json::Value;

use crate::error::Result;

/// Upper bound for one control plane round trip, body included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Which host a request goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiBase {
    /// Organization-wide APIs (destinations)
    Global,
    /// Region-local APIs (webhook singleton, destination delete)
    Regional,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub base: ApiBase,
    /// Path including any query string
    pub path: String,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(base: ApiBase, path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            base,
            path: path.into(),
            body: None,
        }
    }

    pub fn delete(base: ApiBase, path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            base,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_json(method: Method, base: ApiBase, path: impl Into<String>, body: Value) -> Self {
        Self {
            method,
            base,
            path: path.into(),
            body: Some(body),
        }
    }
}

/// Status and raw body; callers decide what counts as success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ApiTransport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// reqwest-backed transport with bearer auth
pub struct HttpTransport {
    client: Client,
    token: String,
    global_base_url: String,
    regional_base_url: String,
}

impl HttpTransport {
    pub fn new(
        token: impl Into<String>,
        global_base_url: impl Into<String>,
        regional_base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("audit-listener/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
            global_base_url: global_base_url.into(),
            regional_base_url: regional_base_url.into(),
        })
    }

    pub fn base_url(&self, base: ApiBase) -> &str {
        match base {
            ApiBase::Global => &self.global_base_url,
            ApiBase::Regional => &self.regional_base_url,
        }
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = format!(
            "{}{}",
            self.base_url(request.base).trim_end_matches('/'),
            request.path
        );
        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            "control plane call completed"
        );
        Ok(ApiResponse { status, body })
    }
}

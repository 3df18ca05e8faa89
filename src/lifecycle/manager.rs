//! Destination provisioning and teardown

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use url::Url;

use super::retry::{is_destination_in_use_conflict, DeleteBackoff};
use super::tolerant::{
    decode_maybe_json, extract_destination_records, find_first_string,
    payload_contains_destination_name, DestinationRecord, WebhookConfig,
};
use super::transport::{ApiBase, ApiRequest, ApiResponse, ApiTransport, REQUEST_TIMEOUT};
use crate::config::{sanitize_endpoint_for_log, LogFormat};
use crate::error::{RelayError, Result};

pub const DESTINATIONS_PATH: &str = "/v3/audit-log-destinations";
pub const WEBHOOK_PATH_V2: &str = "/v2/audit-log-webhook";
pub const WEBHOOK_PATH_V3: &str = "/v3/audit-log-webhook";
pub const DELETE_DESTINATION_PATH_V2: &str = "/v2/audit-log-destinations";

/// Ceiling for teardown, independent of the listener's shutdown signal
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(60);

const LIST_PAGE_SIZE: usize = 100;
const MAX_LIST_PAGES: u32 = 100;

/// What to provision
#[derive(Debug, Clone, Default)]
pub struct DestinationSpec {
    pub endpoint: String,
    pub name: Option<String>,
    pub log_format: LogFormat,
    pub skip_ssl_verification: bool,
    pub authorization: Option<String>,
    /// Bind the regional webhook singleton to the new destination
    pub configure_webhook: bool,
}

/// Local mirror of a created destination; also the destination state file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedDestination {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub profile: String,
    pub destination_id: String,
    pub name: String,
    pub endpoint: String,
    pub log_format: LogFormat,
    pub skip_ssl_verification: bool,
    pub authorization_configured: bool,
    pub webhook_configured: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub events_file: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub destination_state_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_destination: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_webhook: Option<Value>,
}

/// Outcome of a successful destination delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub attempts: u32,
    /// Backoff slept between attempts, in order
    pub delays: Vec<Duration>,
}

#[derive(Serialize)]
struct CreateDestinationRequest<'a> {
    name: &'a str,
    endpoint: &'a str,
    log_format: LogFormat,
    skip_ssl_verification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization: Option<&'a str>,
}

pub struct DestinationManager {
    transport: Arc<dyn ApiTransport>,
    backoff: DeleteBackoff,
    request_timeout: Duration,
}

impl DestinationManager {
    pub fn new(transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            transport,
            backoff: DeleteBackoff::DEFAULT,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_backoff(mut self, backoff: DeleteBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bound for each individual control plane call, whatever the transport
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Provision a destination and, if requested, bind the regional webhook.
    ///
    /// A failed bind is reported as `RelayError::WebhookBind` and carries the
    /// id of the destination, which is left in place.
    pub async fn create(&self, spec: &DestinationSpec) -> Result<ProvisionedDestination> {
        let endpoint = spec.endpoint.trim();
        if endpoint.is_empty() {
            return Err(RelayError::config("endpoint is required"));
        }
        Url::parse(endpoint)
            .map_err(|e| RelayError::config(format!("endpoint must be a valid URL: {}", e)))?;
        let authorization = spec
            .authorization
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty());

        tracing::debug!(
            endpoint = %sanitize_endpoint_for_log(endpoint),
            name_provided = spec.name.is_some(),
            log_format = %spec.log_format,
            skip_ssl_verification = spec.skip_ssl_verification,
            authorization_configured = authorization.is_some(),
            configure_webhook = spec.configure_webhook,
            "audit-log destination setup started"
        );

        if spec.configure_webhook {
            self.ensure_no_active_webhook().await.map_err(|e| {
                RelayError::execution("active audit-log webhook already configured for this region", e)
            })?;
        }

        let name = match spec.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => {
                let generated = default_destination_name();
                tracing::debug!(name = %generated, "generated default audit-log destination name");
                generated
            }
        };

        let taken = self.destination_name_exists(&name).await.map_err(|e| {
            RelayError::execution("failed to verify destination name uniqueness", e)
        })?;
        if taken {
            return Err(RelayError::execution(
                "failed to create audit-log destination",
                RelayError::Precondition(format!("destination name {:?} already exists", name)),
            ));
        }

        let body = serde_json::to_value(CreateDestinationRequest {
            name: &name,
            endpoint,
            log_format: spec.log_format,
            skip_ssl_verification: spec.skip_ssl_verification,
            authorization,
        })?;
        let response = self
            .call(ApiRequest::with_json(Method::POST, ApiBase::Global, DESTINATIONS_PATH, body))
            .await
            .map_err(|e| RelayError::execution("failed to create audit-log destination", e))?;

        let payload = decode_maybe_json(&response.body);
        let destination_id = payload
            .as_ref()
            .and_then(|p| find_first_string(p, &["id", "audit_log_destination_id", "destination_id"]))
            .unwrap_or_default();
        tracing::debug!(
            destination_id_present = !destination_id.is_empty(),
            "parsed audit-log destination create response"
        );

        let mut provisioned = ProvisionedDestination {
            created_at: Utc::now(),
            profile: String::new(),
            destination_id,
            name,
            endpoint: endpoint.to_string(),
            log_format: spec.log_format,
            skip_ssl_verification: spec.skip_ssl_verification,
            authorization_configured: authorization.is_some(),
            webhook_configured: false,
            events_file: String::new(),
            destination_state_file: String::new(),
            raw_destination: payload,
            raw_webhook: None,
        };

        if spec.configure_webhook {
            if provisioned.destination_id.is_empty() {
                return Err(RelayError::WebhookBind {
                    destination_id: String::new(),
                    source: Box::new(RelayError::Protocol(
                        "destination created but no destination ID was returned".to_string(),
                    )),
                });
            }
            let bound = self
                .bind_webhook(&provisioned.destination_id)
                .await
                .map_err(|e| RelayError::WebhookBind {
                    destination_id: provisioned.destination_id.clone(),
                    source: Box::new(e),
                })?;
            provisioned.webhook_configured = true;
            provisioned.raw_webhook = decode_maybe_json(&bound.body);
        }

        tracing::info!(
            destination_id = %provisioned.destination_id,
            name = %provisioned.name,
            endpoint = %sanitize_endpoint_for_log(&provisioned.endpoint),
            webhook_configured = provisioned.webhook_configured,
            "audit-log destination ready"
        );
        Ok(provisioned)
    }

    /// Fail unless the regional webhook is disabled and unconfigured
    pub async fn ensure_no_active_webhook(&self) -> Result<()> {
        let webhook = self.get_webhook().await?;
        if webhook.is_unconfigured() {
            tracing::debug!("regional webhook is unconfigured; startup guard passed");
            return Ok(());
        }
        Err(RelayError::Precondition(format!(
            "regional audit-log webhook is already configured (enabled={} endpoint={:?}); \
             expected enabled=false and endpoint=\"unconfigured\"",
            webhook.enabled.unwrap_or(false),
            sanitize_endpoint_for_log(webhook.endpoint.as_deref().unwrap_or_default()),
        )))
    }

    pub async fn get_webhook(&self) -> Result<WebhookConfig> {
        let response = self
            .call(ApiRequest::get(ApiBase::Regional, WEBHOOK_PATH_V2))
            .await?;
        Ok(decode_maybe_json(&response.body)
            .map(|payload| WebhookConfig::from_payload(&payload))
            .unwrap_or_default())
    }

    async fn bind_webhook(&self, destination_id: &str) -> Result<ApiResponse> {
        let body = json!({
            "enabled": true,
            "audit_log_destination_id": destination_id,
        });
        self.call(ApiRequest::with_json(Method::PATCH, ApiBase::Regional, WEBHOOK_PATH_V3, body))
            .await
    }

    /// Fetch every page of the destination list
    pub async fn list_destination_pages(&self) -> Result<Vec<Value>> {
        let mut pages = Vec::new();
        for page_number in 1..=MAX_LIST_PAGES {
            let path = format!(
                "{}?page[size]={}&page[number]={}",
                DESTINATIONS_PATH, LIST_PAGE_SIZE, page_number
            );
            let response = self.call(ApiRequest::get(ApiBase::Global, path)).await?;
            let Some(payload) = decode_maybe_json(&response.body) else {
                break;
            };
            let full_page = payload
                .get("data")
                .and_then(Value::as_array)
                .is_some_and(|data| data.len() >= LIST_PAGE_SIZE);
            pages.push(payload);
            if !full_page {
                break;
            }
        }
        Ok(pages)
    }

    pub async fn list_destinations(&self) -> Result<Vec<DestinationRecord>> {
        Ok(extract_destination_records(&self.list_destination_pages().await?))
    }

    pub async fn destination_name_exists(&self, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Ok(false);
        }
        let pages = self.list_destination_pages().await?;
        let exists = pages
            .iter()
            .any(|page| payload_contains_destination_name(page, name));
        tracing::debug!(name, exists, "audit-log destination name uniqueness check completed");
        Ok(exists)
    }

    /// Find exactly one destination by id or name
    pub async fn resolve_destination(&self, selector: &str) -> Result<DestinationRecord> {
        let target = selector.trim();
        if target.is_empty() {
            return Err(RelayError::config("destination selector cannot be empty"));
        }
        let mut matches: Vec<DestinationRecord> = self
            .list_destinations()
            .await?
            .into_iter()
            .filter(|record| record.id == target || record.name == target)
            .collect();
        match matches.len() {
            0 => Err(RelayError::config(format!("audit-log destination {:?} not found", target))),
            1 => Ok(matches.remove(0)),
            _ => Err(RelayError::config(format!(
                "multiple audit-log destinations matched {:?}; use destination id instead",
                target
            ))),
        }
    }

    /// Best-effort disable and delete of the regional webhook.
    ///
    /// 404 on either step counts as already gone. Both steps always run;
    /// their failures are returned together.
    pub async fn release_webhook(&self) -> Result<()> {
        let mut failures = Vec::new();

        let disable = ApiRequest::with_json(
            Method::PATCH,
            ApiBase::Regional,
            WEBHOOK_PATH_V2,
            json!({ "enabled": false }),
        );
        if let Err(e) = self.call_allow_missing(disable).await {
            failures.push(RelayError::execution("disable audit-log webhook", e));
        }

        let delete = ApiRequest::delete(ApiBase::Regional, WEBHOOK_PATH_V3);
        if let Err(e) = self.call_allow_missing(delete).await {
            failures.push(RelayError::execution("delete audit-log webhook", e));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RelayError::Joined(failures))
        }
    }

    /// Delete a destination, retrying only while it is reported in use.
    ///
    /// 200/202/204/404 are success. Any other status and any transport
    /// failure is final. The loop itself is unbounded; callers bound it
    /// with a deadline (see `teardown`).
    pub async fn delete_destination_with_retry(&self, destination_id: &str) -> Result<DeleteReport> {
        let path = format!(
            "{}/{}",
            DELETE_DESTINATION_PATH_V2,
            urlencoding::encode(destination_id)
        );
        let mut attempt: u32 = 1;
        let mut delays = Vec::new();
        loop {
            let response = self
                .send(ApiRequest::delete(ApiBase::Regional, path.clone()))
                .await?;
            tracing::debug!(
                destination_id,
                status = response.status,
                attempt,
                "audit-log destination delete call completed"
            );

            match response.status {
                200 | 202 | 204 | 404 => return Ok(DeleteReport { attempts: attempt, delays }),
                409 if is_destination_in_use_conflict(&response.body) => {
                    let delay = self.backoff.delay_for_attempt(attempt - 1);
                    tracing::debug!(
                        destination_id,
                        attempt,
                        sleep_ms = delay.as_millis() as u64,
                        "destination still in use; retrying delete with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    delays.push(delay);
                    attempt += 1;
                }
                status => {
                    return Err(RelayError::RemoteStatus {
                        status,
                        body: response.body,
                    })
                }
            }
        }
    }

    /// Release the webhook (if bound) and delete the destination, all within
    /// `timeout`. Webhook release problems are logged and do not stop the delete.
    pub async fn teardown(
        &self,
        destination_id: &str,
        release_webhook: bool,
        timeout: Duration,
    ) -> Result<DeleteReport> {
        let work = async {
            if release_webhook {
                if let Err(e) = self.release_webhook().await {
                    tracing::warn!(error = %e, "regional audit-log webhook release had non-fatal errors");
                }
            }
            self.delete_destination_with_retry(destination_id).await
        };
        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Cancelled(format!(
                "audit-log destination {} cleanup did not finish within {}s",
                destination_id,
                timeout.as_secs()
            ))),
        }
    }

    /// Send one request, giving up after `request_timeout`
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let method = request.method.clone();
        let path = request.path.clone();
        match tokio::time::timeout(self.request_timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "control plane request {} {} timed out after {}s",
                    method,
                    path,
                    self.request_timeout.as_secs()
                ),
            ))),
        }
    }

    /// Send and require a 2xx answer
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.send(request).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(RelayError::RemoteStatus {
                status: response.status,
                body: response.body,
            })
        }
    }

    /// Like `call`, but 404 is also fine
    async fn call_allow_missing(&self, request: ApiRequest) -> Result<ApiResponse> {
        let response = self.send(request).await?;
        if response.is_success() || response.status == 404 {
            Ok(response)
        } else {
            Err(RelayError::RemoteStatus {
                status: response.status,
                body: response.body,
            })
        }
    }
}

/// `kongctl-<sanitized hostname>-<pid>`
pub fn default_destination_name() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "kongctl-{}-{}",
        sanitize_destination_name_component(&host),
        std::process::id()
    )
}

/// Lowercase letters, keep digits and `-_.`, replace the rest with `-`
pub fn sanitize_destination_name_component(raw: &str) -> String {
    let safe: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '-'
            }
        })
        .collect();
    let safe = safe.trim_matches('-');
    if safe.is_empty() {
        "unknown-host".to_string()
    } else {
        safe.to_string()
    }
}

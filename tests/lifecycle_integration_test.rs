/*!
 * Destination lifecycle against a scripted control plane
 */

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use audit_listener::commands::listen::combine_outcome;
use audit_listener::error::{RelayError, Result};
use audit_listener::lifecycle::manager::{
    DELETE_DESTINATION_PATH_V2, DESTINATIONS_PATH, WEBHOOK_PATH_V2, WEBHOOK_PATH_V3,
};
use audit_listener::lifecycle::{
    ApiRequest, ApiResponse, ApiTransport, DeleteBackoff, DestinationManager, DestinationSpec,
    CLEANUP_TIMEOUT,
};

/// In-memory control plane: one webhook singleton, one destination table
#[derive(Default)]
struct FakeControlPlane {
    state: Mutex<PlaneState>,
}

#[derive(Default)]
struct PlaneState {
    destinations: Vec<(String, String)>,
    webhook_destination: Option<String>,
    in_use_answers_left: u32,
    log: Vec<String>,
}

#[async_trait]
impl ApiTransport for FakeControlPlane {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        let path = request.path.split('?').next().unwrap_or_default().to_string();
        state.log.push(format!("{} {}", request.method, path));

        let response = match (request.method.as_str(), path.as_str()) {
            ("GET", WEBHOOK_PATH_V2) => match &state.webhook_destination {
                Some(id) => ApiResponse::new(
                    200,
                    format!(
                        r#"{{"enabled":true,"endpoint":"https://x","audit_log_destination_id":"{}"}}"#,
                        id
                    ),
                ),
                None => ApiResponse::new(200, r#"{"enabled":false,"endpoint":"unconfigured"}"#),
            },
            ("PATCH", WEBHOOK_PATH_V2) => {
                state.webhook_destination = None;
                ApiResponse::new(200, "{}")
            }
            ("PATCH", WEBHOOK_PATH_V3) => {
                let body = request.body.clone().unwrap_or_default();
                state.webhook_destination = body
                    .get("audit_log_destination_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                ApiResponse::new(200, "{}")
            }
            ("DELETE", WEBHOOK_PATH_V3) => {
                state.webhook_destination = None;
                ApiResponse::new(204, "")
            }
            ("GET", DESTINATIONS_PATH) => {
                let data: Vec<_> = state
                    .destinations
                    .iter()
                    .map(|(id, name)| serde_json::json!({"id": id, "name": name, "endpoint": "https://x"}))
                    .collect();
                ApiResponse::new(200, serde_json::json!({ "data": data }).to_string())
            }
            ("POST", DESTINATIONS_PATH) => {
                let body = request.body.clone().unwrap_or_default();
                let name = body["name"].as_str().unwrap_or_default().to_string();
                let id = format!("dest-{}", state.destinations.len() + 1);
                state.destinations.push((id.clone(), name));
                ApiResponse::new(201, serde_json::json!({ "id": id }).to_string())
            }
            ("DELETE", p) if p.starts_with(DELETE_DESTINATION_PATH_V2) => {
                if state.in_use_answers_left > 0 {
                    state.in_use_answers_left -= 1;
                    ApiResponse::new(
                        409,
                        r#"{"detail":"audit log destination is in use by a webhook"}"#,
                    )
                } else {
                    let id = p.rsplit('/').next().unwrap_or_default().to_string();
                    state.destinations.retain(|(d, _)| *d != id);
                    ApiResponse::new(204, "")
                }
            }
            _ => ApiResponse::new(500, "unexpected request"),
        };
        Ok(response)
    }
}

fn spec(name: &str) -> DestinationSpec {
    DestinationSpec {
        endpoint: "https://tunnel.example.com/audit-logs".to_string(),
        name: Some(name.to_string()),
        authorization: Some("Bearer s3cret".to_string()),
        configure_webhook: true,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_provision_then_teardown_restores_control_plane() {
    let plane = Arc::new(FakeControlPlane::default());
    plane.state.lock().unwrap().in_use_answers_left = 2;
    let manager = DestinationManager::new(plane.clone());

    let created = manager.create(&spec("kongctl-it")).await.unwrap();
    assert_eq!(created.destination_id, "dest-1");
    assert!(created.webhook_configured);
    assert!(created.authorization_configured);
    assert_eq!(
        plane.state.lock().unwrap().webhook_destination.as_deref(),
        Some("dest-1")
    );

    let report = manager
        .teardown(&created.destination_id, true, CLEANUP_TIMEOUT)
        .await
        .unwrap();
    assert_eq!(report.attempts, 3);

    let state = plane.state.lock().unwrap();
    assert!(state.destinations.is_empty());
    assert!(state.webhook_destination.is_none());
    // Release happens before the first delete attempt
    let first_delete = state
        .log
        .iter()
        .position(|l| l.starts_with("DELETE /v2/audit-log-destinations"))
        .unwrap();
    let release = state
        .log
        .iter()
        .position(|l| l == "PATCH /v2/audit-log-webhook")
        .unwrap();
    assert!(release < first_delete);
}

#[tokio::test]
async fn test_second_listener_is_refused_while_webhook_is_active() {
    let plane = Arc::new(FakeControlPlane::default());
    let manager = DestinationManager::new(plane.clone());
    manager.create(&spec("first")).await.unwrap();

    let err = manager.create(&spec("second")).await.unwrap_err();
    assert!(err
        .to_string()
        .contains("active audit-log webhook already configured"));
    assert_eq!(plane.state.lock().unwrap().destinations.len(), 1);
}

#[tokio::test]
async fn test_duplicate_name_is_refused_without_webhook_binding() {
    let plane = Arc::new(FakeControlPlane::default());
    plane
        .state
        .lock()
        .unwrap()
        .destinations
        .push(("dest-9".to_string(), "taken".to_string()));
    let manager = DestinationManager::new(plane.clone());

    let mut no_bind = spec("taken");
    no_bind.configure_webhook = false;
    let err = manager.create(&no_bind).await.unwrap_err();
    assert!(err.to_string().contains("already exists"));
    let log = plane.state.lock().unwrap().log.clone();
    assert!(!log.iter().any(|l| l.starts_with("POST")));
}

#[tokio::test(start_paused = true)]
async fn test_teardown_gives_up_at_deadline() {
    let plane = Arc::new(FakeControlPlane::default());
    plane.state.lock().unwrap().in_use_answers_left = u32::MAX;
    let manager = DestinationManager::new(plane.clone()).with_backoff(DeleteBackoff {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
    });

    let err = manager
        .teardown("dest-1", false, Duration::from_secs(3))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Cancelled(_)));
    // 100 + 200 + 400 * n stays under 3s for the first 8 attempts
    let deletes = plane
        .state
        .lock()
        .unwrap()
        .log
        .iter()
        .filter(|l| l.starts_with("DELETE"))
        .count();
    assert!(deletes >= 8, "only {} delete attempts", deletes);
}

#[test]
fn test_listener_and_cleanup_failures_are_both_reported() {
    let combined = combine_outcome(
        Err(RelayError::Process("receiver crashed".to_string())),
        Err(RelayError::Cancelled("cleanup timed out".to_string())),
    )
    .unwrap_err();
    let text = combined.to_string();
    assert!(text.contains("receiver crashed"));
    assert!(text.contains("cleanup timed out"));
}

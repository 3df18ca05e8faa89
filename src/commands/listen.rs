/*!
 * `listen`: provision, receive, tear down
 *
 * Three sequential phases. The receiver phase ends on a termination signal;
 * teardown then runs on its own deadline (`CLEANUP_TIMEOUT`) so that it is
 * not cancelled along with the receiver. With `--detach` only validation and
 * endpoint resolution happen here; the rest runs in a re-executed child.
 */

use std::io::{self, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{cancel_on_signal, record_destination_state, runtime, CommandContext};
use crate::config::{self, sanitize_endpoint_for_log, ListenOptions};
use crate::error::{RelayError, Result};
use crate::lifecycle::{DeleteReport, DestinationSpec, ProvisionedDestination, CLEANUP_TIMEOUT};
use crate::output::terminal_value;
use crate::receiver::{ListenerState, Receiver, ReceiverConfig};
use crate::supervisor::{self, ProcessRegistry};
use crate::tail::{RecordSink, TailEmitter};

/// Entry point for `listen`. `argv` is the process argv without the program name.
pub fn run(ctx: &CommandContext, options: ListenOptions, argv: &[String]) -> Result<()> {
    let result = execute(ctx, options, argv);
    // Only meaningful inside a detached child; keeps the record after a failure
    supervisor::cleanup_own_record(result.is_ok());
    result
}

fn execute(ctx: &CommandContext, options: ListenOptions, argv: &[String]) -> Result<()> {
    options.validate()?;
    let listen_path = config::normalize_path(&options.path);

    tracing::debug!(
        endpoint_provided = config::non_blank(options.endpoint.as_deref()).is_some(),
        public_url_provided = config::non_blank(options.public_url.as_deref()).is_some(),
        listen_address = %options.listen_address,
        listen_path = %listen_path,
        max_body_bytes = options.max_body_bytes,
        name_provided = config::non_blank(options.name.as_deref()).is_some(),
        log_format = %options.log_format,
        skip_ssl_verification = options.skip_ssl_verification,
        authorization_configured = config::non_blank(options.authorization.as_deref()).is_some(),
        configure_webhook = options.configure_webhook,
        tail_enabled = options.tail,
        detach_enabled = options.detach,
        jq_configured = config::non_blank(options.jq.as_deref()).is_some(),
        "listen audit-logs command started"
    );

    let tail = if options.tail {
        let emitter = TailEmitter::spawn(io::stdout(), options.jq.as_deref())
            .map_err(|e| RelayError::execution("invalid tail configuration", e))?;
        Some(Arc::new(emitter))
    } else {
        None
    };

    let endpoint = options.resolve_endpoint()?;
    tracing::debug!(endpoint = %sanitize_endpoint_for_log(&endpoint), "resolved destination endpoint");

    if options.detach {
        let registry = ProcessRegistry::resolve()?;
        let launch = supervisor::launch_detached(
            argv,
            ctx.config.log_file.as_deref(),
            &ctx.config.profile,
            &registry,
        )?;
        render_detached_started(&mut io::stdout(), &launch)?;
        return Ok(());
    }

    let runtime = runtime()?;
    runtime.block_on(run_foreground(ctx, &options, endpoint, listen_path, tail))
}

async fn run_foreground(
    ctx: &CommandContext,
    options: &ListenOptions,
    endpoint: String,
    listen_path: String,
    tail: Option<Arc<TailEmitter>>,
) -> Result<()> {
    let manager = ctx.destination_manager()?;
    let spec = DestinationSpec {
        endpoint,
        name: config::non_blank(options.name.as_deref()).map(str::to_string),
        log_format: options.log_format,
        skip_ssl_verification: options.skip_ssl_verification,
        authorization: config::non_blank(options.authorization.as_deref()).map(str::to_string),
        configure_webhook: options.configure_webhook,
    };
    let mut destination = manager.create(&spec).await?;
    record_destination_state(&ctx.paths, &ctx.config.profile, &mut destination);

    if destination.destination_id.is_empty() {
        return Err(RelayError::execution(
            "failed to listen for audit logs",
            RelayError::Protocol("destination creation succeeded but destination ID is missing".to_string()),
        ));
    }

    let receiver_config = ReceiverConfig {
        listen_address: options.listen_address.clone(),
        path: listen_path,
        max_body_bytes: options.max_body_bytes,
        expected_authorization: spec.authorization.clone().unwrap_or_default(),
        public_url: config::non_blank(options.public_url.as_deref()).map(str::to_string),
        profile: ctx.config.profile.clone(),
    };

    let shutdown = CancellationToken::new();
    let signals = cancel_on_signal(shutdown.clone());
    let listener_result = run_receiver(ctx, receiver_config, &destination, tail.clone(), shutdown).await;
    signals.abort();
    match &listener_result {
        Ok(()) => tracing::debug!("audit-log listener exited cleanly"),
        Err(e) => tracing::debug!(error = %e, "audit-log listener exited with error"),
    }

    // Separate scope: the receiver's token is already cancelled here
    let cleanup = manager
        .teardown(
            &destination.destination_id,
            destination.webhook_configured,
            CLEANUP_TIMEOUT,
        )
        .await;
    if let Ok(report) = &cleanup {
        if tail.is_some() {
            tracing::info!(
                destination_id = %destination.destination_id,
                delete_attempts = report.attempts,
                "Listener stopped. Deleted audit-log destination (tail mode)."
            );
        } else {
            render_stopped(&mut io::stdout(), &destination.destination_id, report)?;
        }
    }

    combine_outcome(listener_result, cleanup).map(|report| {
        tracing::debug!(
            destination_id = %destination.destination_id,
            delete_attempts = report.attempts,
            "listen audit-logs command completed successfully"
        );
    })
}

async fn run_receiver(
    ctx: &CommandContext,
    receiver_config: ReceiverConfig,
    destination: &ProvisionedDestination,
    tail: Option<Arc<TailEmitter>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut receiver = Receiver::new(receiver_config, ctx.paths.clone());
    let tailing = tail.is_some();
    if let Some(emitter) = tail {
        receiver = receiver.with_sink(emitter as Arc<dyn RecordSink>);
    }
    let bound = receiver.bind().await?;

    if tailing {
        log_tail_started(destination, bound.state());
    } else {
        render_started(&mut io::stdout(), destination, bound.state())?;
    }
    bound.serve(shutdown).await
}

/// Fold the receiver and teardown results into one outcome.
///
/// Neither failure hides the other: both present yields `ListenerAndCleanup`.
pub fn combine_outcome(listener: Result<()>, cleanup: Result<DeleteReport>) -> Result<DeleteReport> {
    match (listener, cleanup) {
        (Ok(()), Ok(report)) => Ok(report),
        (Err(listener), Ok(_)) => Err(listener),
        (Ok(()), Err(cleanup)) => Err(RelayError::execution(
            "listener stopped but destination cleanup failed",
            cleanup,
        )),
        (Err(listener), Err(cleanup)) => Err(RelayError::ListenerAndCleanup {
            listener: Box::new(listener),
            cleanup: Box::new(cleanup),
        }),
    }
}

pub fn render_started(
    out: &mut dyn Write,
    destination: &ProvisionedDestination,
    listener: &ListenerState,
) -> Result<()> {
    writeln!(out, "Konnect Audit-Log Listener Started")?;
    writeln!(out)?;
    writeln!(out, "Destination")?;
    writeln!(out, "  name: {}", destination.name)?;
    writeln!(out, "  id: {}", destination.destination_id)?;
    writeln!(out, "  endpoint: {}", destination.endpoint)?;
    writeln!(out, "  log format: {}", destination.log_format)?;
    writeln!(out, "  skip ssl verification: {}", destination.skip_ssl_verification)?;
    writeln!(out, "  authorization configured: {}", destination.authorization_configured)?;
    writeln!(out, "  webhook configured: {}", destination.webhook_configured)?;
    writeln!(out)?;
    writeln!(out, "Listener")?;
    writeln!(out, "  local endpoint: {}", listener.local_endpoint)?;
    writeln!(out, "  listen address: {}", listener.listen_address)?;
    writeln!(out, "  path: {}", listener.listen_path)?;
    if let Some(public_url) = &listener.public_url {
        writeln!(out, "  public base URL: {}", public_url)?;
    }
    writeln!(out, "  events file: {}", listener.events_file)?;
    if !destination.destination_state_file.is_empty() {
        writeln!(out, "  destination state file: {}", destination.destination_state_file)?;
    }
    writeln!(out)?;
    writeln!(out, "Listening for audit-log events. Press Ctrl+C to stop.")?;
    out.flush()?;
    Ok(())
}

pub fn render_stopped(out: &mut dyn Write, destination_id: &str, report: &DeleteReport) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "Listener stopped. Deleted audit-log destination: {}", destination_id)?;
    if report.attempts > 1 {
        writeln!(out, "  delete attempts: {}", report.attempts)?;
    }
    out.flush()?;
    Ok(())
}

fn log_tail_started(destination: &ProvisionedDestination, listener: &ListenerState) {
    tracing::info!(
        destination_name = %destination.name,
        destination_id = %destination.destination_id,
        destination_endpoint = %sanitize_endpoint_for_log(&destination.endpoint),
        log_format = %destination.log_format,
        skip_ssl_verification = destination.skip_ssl_verification,
        authorization_configured = destination.authorization_configured,
        webhook_configured = destination.webhook_configured,
        local_endpoint = %listener.local_endpoint,
        listen_address = %listener.listen_address,
        listen_path = %listener.listen_path,
        events_file = %listener.events_file,
        destination_state_file = %destination.destination_state_file,
        public_url = listener.public_url.as_deref().unwrap_or_default(),
        "Konnect Audit-Log Listener Started (tail mode)"
    );
    tracing::info!("Listening for audit-log events (tail mode).");
}

pub fn render_detached_started(out: &mut dyn Write, launch: &supervisor::DetachedLaunch) -> Result<()> {
    writeln!(out, "Detached Konnect audit-log listener started.")?;
    writeln!(out, "  pid: {}", launch.pid)?;
    writeln!(out, "  log file: {}", terminal_value(&launch.log_file.display().to_string()))?;
    writeln!(
        out,
        "  process record: {}",
        terminal_value(&launch.record_file.display().to_string())
    )?;
    writeln!(out, "Use the log file to inspect listener startup and runtime details.")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use chrono::Utc;
    use std::path::PathBuf;
    use std::time::Duration;

    fn destination() -> ProvisionedDestination {
        ProvisionedDestination {
            created_at: Utc::now(),
            profile: "default".to_string(),
            destination_id: "dest-1".to_string(),
            name: "kongctl-laptop-42".to_string(),
            endpoint: "https://example.ngrok.app/audit-logs".to_string(),
            log_format: LogFormat::Json,
            skip_ssl_verification: false,
            authorization_configured: true,
            webhook_configured: true,
            events_file: "/tmp/events.jsonl".to_string(),
            destination_state_file: "/tmp/destination.json".to_string(),
            raw_destination: None,
            raw_webhook: None,
        }
    }

    fn listener_state(public_url: Option<&str>) -> ListenerState {
        ListenerState {
            started_at: Utc::now(),
            profile: "default".to_string(),
            listen_address: "127.0.0.1:19090".to_string(),
            listen_path: "/audit-logs".to_string(),
            local_endpoint: "http://127.0.0.1:19090/audit-logs".to_string(),
            public_url: public_url.map(str::to_string),
            events_file: "/tmp/events.jsonl".to_string(),
        }
    }

    fn report(attempts: u32) -> DeleteReport {
        DeleteReport {
            attempts,
            delays: vec![Duration::from_millis(250); attempts.saturating_sub(1) as usize],
        }
    }

    #[test]
    fn test_combine_both_failures() {
        let combined = combine_outcome(
            Err(RelayError::Process("bind failed".to_string())),
            Err(RelayError::Cancelled("cleanup timed out".to_string())),
        )
        .unwrap_err();
        match combined {
            RelayError::ListenerAndCleanup { listener, cleanup } => {
                assert!(listener.to_string().contains("bind failed"));
                assert!(cleanup.to_string().contains("cleanup timed out"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_combine_single_failures() {
        let cleanup_only = combine_outcome(
            Ok(()),
            Err(RelayError::RemoteStatus {
                status: 500,
                body: String::new(),
            }),
        )
        .unwrap_err();
        assert!(cleanup_only
            .to_string()
            .starts_with("listener stopped but destination cleanup failed"));

        let listener_only =
            combine_outcome(Err(RelayError::Process("boom".to_string())), Ok(report(1))).unwrap_err();
        assert!(matches!(listener_only, RelayError::Process(_)));

        assert_eq!(combine_outcome(Ok(()), Ok(report(3))).unwrap().attempts, 3);
    }

    #[test]
    fn test_render_started_output() {
        let mut out = Vec::new();
        render_started(&mut out, &destination(), &listener_state(Some("https://example.ngrok.app"))).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Konnect Audit-Log Listener Started\n\nDestination\n"));
        assert!(text.contains("  id: dest-1\n"));
        assert!(text.contains("  log format: json\n"));
        assert!(text.contains("  public base URL: https://example.ngrok.app\n"));
        assert!(text.contains("  destination state file: /tmp/destination.json\n"));
        assert!(text.ends_with("Listening for audit-log events. Press Ctrl+C to stop.\n"));

        let mut out = Vec::new();
        render_started(&mut out, &destination(), &listener_state(None)).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("public base URL"));
    }

    #[test]
    fn test_render_stopped_output() {
        let mut out = Vec::new();
        render_stopped(&mut out, "dest-1", &report(1)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\nListener stopped. Deleted audit-log destination: dest-1\n"
        );

        let mut out = Vec::new();
        render_stopped(&mut out, "dest-1", &report(4)).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("delete attempts: 4"));
    }

    #[test]
    fn test_render_detached_started() {
        let launch = supervisor::DetachedLaunch {
            pid: 4321,
            log_file: PathBuf::from("/logs/kongctl-listener-4321.log"),
            record_file: PathBuf::from("/cfg/processes/4321.json"),
        };
        let mut out = Vec::new();
        render_detached_started(&mut out, &launch).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  pid: 4321\n"));
        assert!(text.contains("  process record: /cfg/processes/4321.json\n"));
    }

    #[test]
    fn test_validation_runs_before_side_effects() {
        let ctx = CommandContext::with_paths(
            crate::config::ListenerConfig::default(),
            crate::paths::AuditPaths::under(std::path::Path::new("/nonexistent"), "p"),
        );
        let options = ListenOptions {
            listen_address: crate::config::DEFAULT_LISTEN_ADDRESS.to_string(),
            path: crate::config::DEFAULT_LISTEN_PATH.to_string(),
            max_body_bytes: crate::config::DEFAULT_MAX_BODY_BYTES,
            tail: true,
            detach: true,
            public_url: Some("https://example.ngrok.app".to_string()),
            ..Default::default()
        };
        let err = execute(&ctx, options, &[]).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_FATAL);
        assert!(err.to_string().contains("--detach is not supported with --tail"));
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let ctx = CommandContext::with_paths(
            crate::config::ListenerConfig::default(),
            crate::paths::AuditPaths::under(std::path::Path::new("/nonexistent"), "p"),
        );
        let options = ListenOptions {
            listen_address: crate::config::DEFAULT_LISTEN_ADDRESS.to_string(),
            path: crate::config::DEFAULT_LISTEN_PATH.to_string(),
            max_body_bytes: crate::config::DEFAULT_MAX_BODY_BYTES,
            ..Default::default()
        };
        let err = execute(&ctx, options, &[]).unwrap_err();
        assert!(err.to_string().contains("provide either --endpoint or --public-url"));
    }
}

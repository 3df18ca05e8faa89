//! `receive`: run the local receiver without touching the control plane

use std::io::{self, Write};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{cancel_on_signal, runtime, CommandContext};
use crate::error::{RelayError, Result};
use crate::receiver::{ListenerState, Receiver, ReceiverConfig};
use crate::tail::{RecordSink, TailEmitter};

#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    pub listen_address: String,
    pub path: String,
    pub max_body_bytes: u64,
    pub authorization: Option<String>,
    pub public_url: Option<String>,
    pub tail: bool,
    pub jq: Option<String>,
}

pub fn run(ctx: &CommandContext, options: ReceiveOptions) -> Result<()> {
    if crate::config::non_blank(options.jq.as_deref()).is_some() && !options.tail {
        return Err(RelayError::config("--jq requires --tail"));
    }
    if options.max_body_bytes == 0 {
        return Err(RelayError::config("--max-body-bytes must be greater than zero"));
    }
    crate::config::parse_listen_address(&options.listen_address)?;

    let sink: Option<Arc<dyn RecordSink>> = if options.tail {
        let emitter = TailEmitter::spawn(io::stdout(), options.jq.as_deref())
            .map_err(|e| RelayError::execution("invalid tail configuration", e))?;
        Some(Arc::new(emitter))
    } else {
        None
    };

    let receiver_config = ReceiverConfig {
        listen_address: options.listen_address,
        path: options.path,
        max_body_bytes: options.max_body_bytes,
        expected_authorization: options.authorization.unwrap_or_default(),
        public_url: options.public_url,
        profile: ctx.config.profile.clone(),
    };
    let tailing = sink.is_some();
    let mut receiver = Receiver::new(receiver_config, ctx.paths.clone());
    if let Some(sink) = sink {
        receiver = receiver.with_sink(sink);
    }

    runtime()?.block_on(async move {
        let bound = receiver.bind().await?;
        if tailing {
            tracing::info!(
                local_endpoint = %bound.state().local_endpoint,
                events_file = %bound.state().events_file,
                "Konnect audit-log receiver started (tail mode)"
            );
        } else {
            render_receiver_started(&mut io::stdout(), bound.state())?;
        }

        let shutdown = CancellationToken::new();
        let signals = cancel_on_signal(shutdown.clone());
        let result = bound.serve(shutdown).await;
        signals.abort();
        if result.is_ok() && !tailing {
            writeln!(io::stdout(), "\nReceiver stopped.")?;
        }
        result
    })
}

pub fn render_receiver_started(out: &mut dyn Write, state: &ListenerState) -> Result<()> {
    writeln!(out, "Konnect Audit-Log Receiver Started")?;
    writeln!(out, "  local endpoint: {}", state.local_endpoint)?;
    writeln!(out, "  listen address: {}", state.listen_address)?;
    writeln!(out, "  path: {}", state.listen_path)?;
    if let Some(public_url) = &state.public_url {
        writeln!(out, "  public base URL: {}", public_url)?;
    }
    writeln!(out, "  events file: {}", state.events_file)?;
    writeln!(out)?;
    writeln!(out, "Receiving audit-log events. Press Ctrl+C to stop.")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::paths::AuditPaths;
    use chrono::Utc;

    #[test]
    fn test_jq_without_tail_is_rejected() {
        let ctx = CommandContext::with_paths(
            ListenerConfig::default(),
            AuditPaths::under(std::path::Path::new("/nonexistent"), "p"),
        );
        let err = run(
            &ctx,
            ReceiveOptions {
                listen_address: "127.0.0.1:0".to_string(),
                max_body_bytes: 1024,
                jq: Some(".id".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("--jq requires --tail"));
    }

    #[test]
    fn test_render_receiver_started() {
        let state = ListenerState {
            started_at: Utc::now(),
            profile: "default".to_string(),
            listen_address: "0.0.0.0:19090".to_string(),
            listen_path: "/audit-logs".to_string(),
            local_endpoint: "http://127.0.0.1:19090/audit-logs".to_string(),
            public_url: None,
            events_file: "/tmp/events.jsonl".to_string(),
        };
        let mut out = Vec::new();
        render_receiver_started(&mut out, &state).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  local endpoint: http://127.0.0.1:19090/audit-logs\n"));
        assert!(!text.contains("public base URL"));
    }
}

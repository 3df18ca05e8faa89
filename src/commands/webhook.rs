//! `webhook get|disable`

use std::io::{self, Write};

use super::{runtime, CommandContext};
use crate::error::{RelayError, Result};
use crate::lifecycle::WebhookConfig;
use crate::output::{print_json, terminal_value};

pub fn get(ctx: &CommandContext, json: bool) -> Result<()> {
    let manager = ctx.destination_manager()?;
    let webhook = runtime()?
        .block_on(manager.get_webhook())
        .map_err(|e| RelayError::execution("failed to get audit-log webhook", e))?;

    let mut out = io::stdout();
    if json {
        print_json(&mut out, &webhook)
    } else {
        render_webhook(&mut out, &webhook)
    }
}

/// Disable and delete the regional webhook; missing counts as done
pub fn disable(ctx: &CommandContext) -> Result<()> {
    let manager = ctx.destination_manager()?;
    runtime()?
        .block_on(manager.release_webhook())
        .map_err(|e| RelayError::execution("failed to disable audit-log webhook", e))?;
    writeln!(io::stdout(), "Regional audit-log webhook disabled.")?;
    Ok(())
}

pub fn render_webhook(out: &mut dyn Write, webhook: &WebhookConfig) -> Result<()> {
    let flag = |value: Option<bool>| value.map_or_else(|| "n/a".to_string(), |v| v.to_string());
    let text = |value: &Option<String>| terminal_value(value.as_deref().unwrap_or_default());

    writeln!(out, "Audit-log webhook")?;
    writeln!(out, "  enabled: {}", flag(webhook.enabled))?;
    writeln!(
        out,
        "  endpoint: {}",
        terminal_value(&crate::config::sanitize_endpoint_for_log(
            webhook.endpoint.as_deref().unwrap_or_default()
        ))
    )?;
    writeln!(out, "  log format: {}", text(&webhook.log_format))?;
    writeln!(out, "  skip ssl verification: {}", flag(webhook.skip_ssl_verification))?;
    writeln!(out, "  destination id: {}", text(&webhook.destination_id))?;
    writeln!(out, "  updated at: {}", text(&webhook.updated_at))?;
    Ok(())
}

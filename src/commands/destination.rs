//! `destination create|delete|list`

use std::io::{self, Write};

use comfy_table::{Cell, Table};

use super::{record_destination_state, runtime, CommandContext};
use crate::config::{non_blank, LogFormat};
use crate::error::{RelayError, Result};
use crate::lifecycle::{DestinationRecord, DestinationSpec, ProvisionedDestination, CLEANUP_TIMEOUT};
use crate::output::{create_table, header_cell, print_json, terminal_value};

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub endpoint: Option<String>,
    pub public_url: Option<String>,
    pub path: String,
    pub name: Option<String>,
    pub log_format: LogFormat,
    pub skip_ssl_verification: bool,
    pub authorization: Option<String>,
    pub configure_webhook: bool,
    pub json: bool,
}

pub fn create(ctx: &CommandContext, options: CreateOptions) -> Result<()> {
    let endpoint = match non_blank(options.endpoint.as_deref()) {
        Some(endpoint) => endpoint.to_string(),
        None => {
            let public_url = non_blank(options.public_url.as_deref())
                .ok_or_else(|| RelayError::config("provide either --endpoint or --public-url"))?;
            crate::config::build_endpoint_from_public_url(public_url, &options.path)?
        }
    };
    let manager = ctx.destination_manager()?;
    let spec = DestinationSpec {
        endpoint,
        name: non_blank(options.name.as_deref()).map(str::to_string),
        log_format: options.log_format,
        skip_ssl_verification: options.skip_ssl_verification,
        authorization: non_blank(options.authorization.as_deref()).map(str::to_string),
        configure_webhook: options.configure_webhook,
    };

    let mut created = runtime()?.block_on(manager.create(&spec))?;
    record_destination_state(&ctx.paths, &ctx.config.profile, &mut created);

    let mut out = io::stdout();
    if options.json {
        print_json(&mut out, &created)
    } else {
        render_created(&mut out, &created)
    }
}

pub fn render_created(out: &mut dyn Write, created: &ProvisionedDestination) -> Result<()> {
    writeln!(out, "Audit-log destination created")?;
    if !created.destination_id.is_empty() {
        writeln!(out, "  destination id: {}", created.destination_id)?;
    }
    writeln!(out, "  name: {}", created.name)?;
    writeln!(out, "  endpoint: {}", created.endpoint)?;
    writeln!(out, "  log format: {}", created.log_format)?;
    writeln!(out, "  skip ssl verification: {}", created.skip_ssl_verification)?;
    writeln!(out, "  authorization configured: {}", created.authorization_configured)?;
    writeln!(out, "  webhook configured: {}", created.webhook_configured)?;
    if !created.destination_state_file.is_empty() {
        writeln!(out, "  state file: {}", created.destination_state_file)?;
    }
    Ok(())
}

/// Delete by id or name, optionally releasing the regional webhook first
pub fn delete(ctx: &CommandContext, selector: &str, release_webhook: bool) -> Result<()> {
    let manager = ctx.destination_manager()?;
    let rt = runtime()?;
    let (record, report) = rt.block_on(async {
        let record = manager.resolve_destination(selector).await?;
        let report = manager
            .teardown(&record.id, release_webhook, CLEANUP_TIMEOUT)
            .await
            .map_err(|e| RelayError::execution("failed to delete audit-log destination", e))?;
        Ok::<_, RelayError>((record, report))
    })?;

    let mut out = io::stdout();
    writeln!(out, "Deleted audit-log destination: {}", terminal_value(&record.id))?;
    if !record.name.is_empty() {
        writeln!(out, "  name: {}", terminal_value(&record.name))?;
    }
    if report.attempts > 1 {
        writeln!(out, "  delete attempts: {}", report.attempts)?;
    }
    Ok(())
}

pub fn list(ctx: &CommandContext, json: bool) -> Result<()> {
    let manager = ctx.destination_manager()?;
    let records = runtime()?
        .block_on(manager.list_destinations())
        .map_err(|e| RelayError::execution("failed to list audit-log destinations", e))?;

    let mut out = io::stdout();
    if json {
        return print_json(&mut out, &records);
    }
    if records.is_empty() {
        writeln!(out, "No audit-log destinations found.")?;
        return Ok(());
    }
    writeln!(out, "{}", destinations_table(&records))?;
    Ok(())
}

pub fn destinations_table(records: &[DestinationRecord]) -> Table {
    let mut table = create_table();
    table.set_header(
        ["ID", "NAME", "ENDPOINT", "FORMAT", "SKIP SSL", "CREATED"]
            .into_iter()
            .map(header_cell)
            .collect::<Vec<_>>(),
    );
    for record in records {
        table.add_row(vec![
            Cell::new(terminal_value(&record.id)),
            Cell::new(terminal_value(&record.name)),
            Cell::new(crate::config::sanitize_endpoint_for_log(&record.endpoint)),
            Cell::new(terminal_value(&record.log_format)),
            Cell::new(
                record
                    .skip_ssl_verification
                    .map_or_else(|| "n/a".to_string(), |v| v.to_string()),
            ),
            Cell::new(terminal_value(&record.created_at)),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_created() {
        let created = ProvisionedDestination {
            created_at: Utc::now(),
            profile: "default".to_string(),
            destination_id: "d-1".to_string(),
            name: "kongctl-box-7".to_string(),
            endpoint: "https://example.ngrok.app/audit-logs".to_string(),
            log_format: LogFormat::Cef,
            skip_ssl_verification: true,
            authorization_configured: false,
            webhook_configured: false,
            events_file: String::new(),
            destination_state_file: String::new(),
            raw_destination: None,
            raw_webhook: None,
        };
        let mut out = Vec::new();
        render_created(&mut out, &created).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("  destination id: d-1\n"));
        assert!(text.contains("  log format: cef\n"));
        assert!(text.contains("  skip ssl verification: true\n"));
        assert!(!text.contains("state file"));
    }

    #[test]
    fn test_destinations_table_masks_credentials() {
        let records = vec![DestinationRecord {
            id: "d-1".to_string(),
            name: "siem".to_string(),
            endpoint: "https://user:pw@siem.example.com/in?key=1".to_string(),
            log_format: "json".to_string(),
            skip_ssl_verification: None,
            created_at: String::new(),
            updated_at: String::new(),
        }];
        let rendered = destinations_table(&records).to_string();
        assert!(rendered.contains("siem.example.com"));
        assert!(!rendered.contains("pw@"));
        assert!(!rendered.contains("key=1"));
    }
}

/*!
 * Configuration types for the audit-log listener
 *
 * Values are resolved in order: command-line flag, environment variable,
 * config file, built-in default. The config file is TOML:
 *
 * ```toml
 * profile = "default"
 * log_level = "info"
 *
 * [konnect]
 * region = "eu"
 *
 * [listener]
 * listen_address = "127.0.0.1:19090"
 * path = "/audit-logs"
 * max_body_bytes = 1048576
 *
 * [destination]
 * log_format = "json"
 * ```
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::error::{RelayError, Result};

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:19090";
pub const DEFAULT_LISTEN_PATH: &str = "/audit-logs";
pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_REGION: &str = "us";
pub const GLOBAL_BASE_URL: &str = "https://global.api.konghq.com";
pub const DEFAULT_PROFILE: &str = "default";

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Profile used to scope on-disk state
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr). May contain `%PID%`.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub konnect: KonnectConfig,

    #[serde(default)]
    pub listener: ReceiverSettings,

    #[serde(default)]
    pub destination: DestinationSettings,
}

/// Control plane connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KonnectConfig {
    /// Explicit regional base URL; wins over `region`
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub global_base_url: Option<String>,

    /// Personal access token
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverSettings {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_listen_path")]
    pub path: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            path: default_listen_path(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DestinationSettings {
    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(default)]
    pub skip_ssl_verification: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: LogLevel::default(),
            log_file: None,
            konnect: KonnectConfig::default(),
            listener: ReceiverSettings::default(),
            destination: DestinationSettings::default(),
        }
    }
}

fn default_profile() -> String {
    DEFAULT_PROFILE.to_string()
}

fn default_listen_address() -> String {
    DEFAULT_LISTEN_ADDRESS.to_string()
}

fn default_listen_path() -> String {
    DEFAULT_LISTEN_PATH.to_string()
}

fn default_max_body_bytes() -> u64 {
    DEFAULT_MAX_BODY_BYTES
}

impl ListenerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        let config: ListenerConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Regional base URL: explicit `base_url`, else derived from `region`
    pub fn regional_base_url(&self) -> String {
        if let Some(base) = self.konnect.base_url.as_deref().map(str::trim) {
            if !base.is_empty() {
                return base.trim_end_matches('/').to_string();
            }
        }
        let region = self
            .konnect
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REGION)
            .to_ascii_lowercase();
        format!("https://{}.api.konghq.com", region)
    }

    pub fn global_base_url(&self) -> String {
        self.konnect
            .global_base_url
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(GLOBAL_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    /// Access token, or a configuration error when none was supplied
    pub fn require_token(&self) -> Result<String> {
        self.konnect
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                RelayError::config("no Konnect access token; pass --token or set KONNECT_TOKEN")
            })
    }
}

/// Logging level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Audit-log payload format requested from the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Cef,
    #[default]
    Json,
    Cps,
}

impl LogFormat {
    pub const ALLOWED: [&'static str; 3] = ["cef", "json", "cps"];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Cef => "cef",
            LogFormat::Json => "json",
            LogFormat::Cps => "cps",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogFormat {
    type Err = RelayError;

    /// Case-insensitive; blank input selects the default
    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(LogFormat::Json),
            "cef" => Ok(LogFormat::Cef),
            "cps" => Ok(LogFormat::Cps),
            _ => Err(RelayError::config(format!(
                "invalid log-format {:?}, allowed values are: {}",
                raw,
                LogFormat::ALLOWED.join(", ")
            ))),
        }
    }
}

/// Options for the orchestrated `listen` command, after flag/env/file merge
#[derive(Debug, Clone, Default)]
pub struct ListenOptions {
    pub endpoint: Option<String>,
    pub public_url: Option<String>,
    pub listen_address: String,
    pub path: String,
    pub max_body_bytes: u64,
    pub name: Option<String>,
    pub log_format: LogFormat,
    pub skip_ssl_verification: bool,
    pub authorization: Option<String>,
    pub configure_webhook: bool,
    pub tail: bool,
    pub detach: bool,
    pub jq: Option<String>,
}

impl ListenOptions {
    /// Reject flag combinations before any side effect happens
    pub fn validate(&self) -> Result<()> {
        if self.detach && self.tail {
            return Err(RelayError::config("--detach is not supported with --tail"));
        }
        if non_blank(self.jq.as_deref()).is_some() && !self.tail {
            return Err(RelayError::config("--jq requires --tail"));
        }
        if self.max_body_bytes == 0 {
            return Err(RelayError::config("--max-body-bytes must be greater than zero"));
        }
        parse_listen_address(&self.listen_address)?;
        Ok(())
    }

    /// Destination endpoint: `--endpoint` as given, else derived from `--public-url`
    pub fn resolve_endpoint(&self) -> Result<String> {
        if let Some(endpoint) = non_blank(self.endpoint.as_deref()) {
            return Ok(endpoint.to_string());
        }
        let public_url = non_blank(self.public_url.as_deref())
            .ok_or_else(|| RelayError::config("provide either --endpoint or --public-url"))?;
        build_endpoint_from_public_url(public_url, &self.path).map_err(|e| {
            RelayError::config(format!(
                "failed to build endpoint from --public-url and --path: {}",
                e
            ))
        })
    }
}

pub fn parse_listen_address(raw: &str) -> Result<SocketAddr> {
    let trimmed = raw.trim();
    let candidate = if trimmed.is_empty() {
        DEFAULT_LISTEN_ADDRESS
    } else {
        trimmed
    };
    candidate
        .parse::<SocketAddr>()
        .map_err(|e| RelayError::config(format!("invalid listen address {:?}: {}", raw, e)))
}

/// Blank path becomes the default; a leading `/` is guaranteed
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_LISTEN_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Join a public base URL (e.g. a tunnel) with the local listen path.
///
/// The base path is kept, the listen path appended unless it is `/`,
/// and query/fragment are dropped.
pub fn build_endpoint_from_public_url(public_base_url: &str, listen_path: &str) -> Result<String> {
    let mut parsed = Url::parse(public_base_url.trim())
        .map_err(|e| RelayError::config(format!("invalid public URL: {}", e)))?;
    if parsed.scheme().is_empty() || parsed.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::config("public URL must include scheme and host"));
    }

    let path = normalize_path(listen_path);
    let base_path = parsed.path().trim_end_matches('/').to_string();
    let joined = if base_path.is_empty() {
        path
    } else if path == "/" {
        base_path
    } else {
        format!("{}{}", base_path, path)
    };
    parsed.set_path(&joined);
    parsed.set_query(None);
    parsed.set_fragment(None);
    Ok(parsed.to_string())
}

/// Strip credentials, query and fragment from a URL before it is logged
pub fn sanitize_endpoint_for_log(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn options() -> ListenOptions {
        ListenOptions {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            path: DEFAULT_LISTEN_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            configure_webhook: true,
            endpoint: Some("https://example.com/audit-logs".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_endpoint_from_public_url() {
        assert_eq!(
            build_endpoint_from_public_url("https://example.ngrok.app", "/audit-logs").unwrap(),
            "https://example.ngrok.app/audit-logs"
        );
        assert_eq!(
            build_endpoint_from_public_url("https://example.ngrok.app/forwarded", "/audit-logs")
                .unwrap(),
            "https://example.ngrok.app/forwarded/audit-logs"
        );
        assert_eq!(
            build_endpoint_from_public_url("https://example.ngrok.app/forwarded/", "/").unwrap(),
            "https://example.ngrok.app/forwarded"
        );
        assert_eq!(
            build_endpoint_from_public_url("https://example.ngrok.app/?a=b#frag", "hooks").unwrap(),
            "https://example.ngrok.app/hooks"
        );
    }

    #[test]
    fn test_endpoint_from_public_url_requires_host() {
        assert!(build_endpoint_from_public_url("example.ngrok.app", "/audit-logs").is_err());
        assert!(build_endpoint_from_public_url("", "/audit-logs").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(""), "/audit-logs");
        assert_eq!(normalize_path("  hooks "), "/hooks");
        assert_eq!(normalize_path("/x"), "/x");
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("CEF".parse::<LogFormat>().unwrap(), LogFormat::Cef);
        assert_eq!(" ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("cps".parse::<LogFormat>().unwrap(), LogFormat::Cps);
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(err.to_string().contains("allowed values are: cef, json, cps"));
    }

    #[test]
    fn test_validate_flag_combinations() {
        let mut opts = options();
        assert!(opts.validate().is_ok());

        opts.detach = true;
        opts.tail = true;
        assert!(matches!(opts.validate(), Err(RelayError::Config(_))));

        let mut opts = options();
        opts.jq = Some(".id".to_string());
        assert!(opts.validate().unwrap_err().to_string().contains("--jq requires --tail"));

        let mut opts = options();
        opts.max_body_bytes = 0;
        assert!(opts.validate().is_err());

        let mut opts = options();
        opts.listen_address = "not-an-address".to_string();
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_resolve_endpoint_precedence() {
        let mut opts = options();
        opts.public_url = Some("https://tunnel.example".to_string());
        assert_eq!(opts.resolve_endpoint().unwrap(), "https://example.com/audit-logs");

        opts.endpoint = None;
        assert_eq!(
            opts.resolve_endpoint().unwrap(),
            "https://tunnel.example/audit-logs"
        );

        opts.public_url = None;
        assert!(opts.resolve_endpoint().is_err());
    }

    #[test]
    fn test_sanitize_endpoint_for_log() {
        assert_eq!(
            sanitize_endpoint_for_log("https://user:pw@example.com/hook?token=abc#x"),
            "https://example.com/hook"
        );
        assert_eq!(sanitize_endpoint_for_log("  "), "");
    }

    #[test]
    fn test_regional_base_url() {
        let mut config = ListenerConfig::default();
        assert_eq!(config.regional_base_url(), "https://us.api.konghq.com");
        config.konnect.region = Some("EU".to_string());
        assert_eq!(config.regional_base_url(), "https://eu.api.konghq.com");
        config.konnect.base_url = Some("http://localhost:8080/".to_string());
        assert_eq!(config.regional_base_url(), "http://localhost:8080");
        assert_eq!(config.global_base_url(), GLOBAL_BASE_URL);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
profile = "staging"
log_level = "debug"

[konnect]
region = "au"

[listener]
path = "/hooks"

[destination]
log_format = "cef"
"#
        )
        .unwrap();

        let config = ListenerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.profile, "staging");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.listener.path, "/hooks");
        assert_eq!(config.listener.listen_address, DEFAULT_LISTEN_ADDRESS);
        assert_eq!(config.listener.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.destination.log_format, LogFormat::Cef);
        assert_eq!(config.regional_base_url(), "https://au.api.konghq.com");
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}

/*!
 * audit-listener CLI
 *
 * Receive Konnect audit-log webhook deliveries locally, provision the
 * destination that points at them, and manage detached listeners.
 */

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use audit_listener::{
    commands::{
        destination::{self, CreateOptions},
        listen, ps,
        receive::{self, ReceiveOptions},
        webhook, CommandContext,
    },
    config::{ListenOptions, ListenerConfig, LogFormat, LogLevel},
    error::{Result, EXIT_SUCCESS},
    logging,
    supervisor::{runtime::DEFAULT_STOP_TIMEOUT, ProcessRegistry},
};

#[derive(Parser)]
#[command(name = "audit-listener")]
#[command(version, about = "Receive Konnect audit logs on a local webhook endpoint", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, value_name = "PATH", env = "AUDIT_LISTENER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Profile used to scope on-disk state
    #[arg(long, env = "KONGCTL_PROFILE", global = true)]
    profile: Option<String>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write logs to this file instead of stderr (may contain %PID%)
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Konnect personal access token
    #[arg(long, env = "KONNECT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Regional API base URL (overrides --region)
    #[arg(long, env = "KONNECT_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Konnect region, e.g. us, eu, au
    #[arg(long, env = "KONNECT_REGION", global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a destination, receive events, and tear down on exit
    Listen {
        #[command(flatten)]
        destination: DestinationArgs,

        #[command(flatten)]
        receiver: ReceiverArgs,

        /// Stream received records to stdout
        #[arg(long)]
        tail: bool,

        /// Run in the background and return immediately
        #[arg(
            short = 'd',
            long,
            num_args = 0..=1,
            default_value_t = false,
            default_missing_value = "true",
            action = ArgAction::Set
        )]
        detach: bool,

        /// jq expression applied to each tailed record (requires --tail)
        #[arg(long)]
        jq: Option<String>,
    },

    /// Run only the local receiver; no remote calls
    Receive {
        #[command(flatten)]
        receiver: ReceiverArgs,

        /// Public base URL shown in the startup summary
        #[arg(long)]
        public_url: Option<String>,

        /// Authorization header value required on deliveries
        #[arg(long)]
        authorization: Option<String>,

        /// Stream received records to stdout
        #[arg(long)]
        tail: bool,

        /// jq expression applied to each tailed record (requires --tail)
        #[arg(long)]
        jq: Option<String>,
    },

    /// Manage audit-log destinations
    #[command(subcommand)]
    Destination(DestinationCommands),

    /// Inspect or disable the regional audit-log webhook
    #[command(subcommand)]
    Webhook(WebhookCommands),

    /// List or stop detached listeners
    Ps {
        #[command(subcommand)]
        command: Option<PsCommands>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum DestinationCommands {
    /// Create a destination and optionally bind the regional webhook to it
    Create {
        #[command(flatten)]
        destination: DestinationArgs,

        /// Listen path appended to --public-url
        #[arg(long)]
        path: Option<String>,

        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Delete a destination by id or name
    Delete {
        /// Destination id or name
        selector: String,

        /// Disable and delete the regional webhook first
        #[arg(long)]
        release_webhook: bool,
    },

    /// List destinations
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum WebhookCommands {
    /// Show the regional webhook configuration
    Get {
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Disable and delete the regional webhook
    Disable,
}

#[derive(Subcommand)]
enum PsCommands {
    /// List detached listeners
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Stop a detached listener, or all of them
    Stop {
        /// Process id
        pid: Option<i32>,

        /// Stop every recorded process
        #[arg(long)]
        all: bool,

        /// Seconds to wait for exit after SIGTERM
        #[arg(long, default_value_t = DEFAULT_STOP_TIMEOUT.as_secs())]
        timeout: u64,
    },
}

/// Remote destination settings shared by `listen` and `destination create`
#[derive(clap::Args)]
struct DestinationArgs {
    /// Destination webhook URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Public base URL; the listen path is appended to build the endpoint
    #[arg(long)]
    public_url: Option<String>,

    /// Destination name. Default: kongctl-<hostname>-<pid>
    #[arg(long)]
    name: Option<String>,

    /// Payload format: cef, json or cps
    #[arg(long)]
    log_format: Option<String>,

    /// Ask the control plane to skip TLS verification when delivering
    #[arg(long)]
    skip_ssl_verification: bool,

    /// Authorization header value required on deliveries
    #[arg(long)]
    authorization: Option<String>,

    /// Bind the regional webhook to the new destination
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    configure_webhook: bool,
}

/// Local receiver settings shared by `listen` and `receive`
#[derive(clap::Args)]
struct ReceiverArgs {
    /// Socket address to bind
    #[arg(long)]
    listen_address: Option<String>,

    /// Path accepting deliveries
    #[arg(long)]
    path: Option<String>,

    /// Maximum decoded request body size
    #[arg(long)]
    max_body_bytes: Option<u64>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            tracing::debug!(
                category = %e.category(),
                "command failed"
            );
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        use clap::CommandFactory;
        use clap_complete::generate;
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "audit-listener", &mut std::io::stdout());
        return Ok(());
    }

    let config = merge_config(&cli)?;
    if let Err(e) = logging::init_logging(config.log_level, config.log_file.as_deref()) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    handle_subcommand(cli.command, config)
}

/// Flags over environment (handled by clap) over config file over defaults
fn merge_config(cli: &Cli) -> Result<ListenerConfig> {
    let mut config = match &cli.config {
        Some(path) => ListenerConfig::from_file(path)?,
        None => ListenerConfig::default(),
    };

    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
    }
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if let Some(log_file) = &cli.log_file {
        config.log_file = Some(log_file.clone());
    }
    if let Some(token) = &cli.token {
        config.konnect.token = Some(token.clone());
    }
    if let Some(base_url) = &cli.base_url {
        config.konnect.base_url = Some(base_url.clone());
    }
    if let Some(region) = &cli.region {
        config.konnect.region = Some(region.clone());
    }
    Ok(config)
}

fn handle_subcommand(command: Commands, config: ListenerConfig) -> Result<()> {
    match command {
        Commands::Listen {
            destination,
            receiver,
            tail,
            detach,
            jq,
        } => {
            let log_format = resolve_log_format(&destination, &config)?;
            let options = ListenOptions {
                endpoint: destination.endpoint,
                public_url: destination.public_url,
                listen_address: receiver
                    .listen_address
                    .unwrap_or_else(|| config.listener.listen_address.clone()),
                path: receiver.path.unwrap_or_else(|| config.listener.path.clone()),
                max_body_bytes: receiver
                    .max_body_bytes
                    .unwrap_or(config.listener.max_body_bytes),
                name: destination.name,
                log_format,
                skip_ssl_verification: destination.skip_ssl_verification
                    || config.destination.skip_ssl_verification,
                authorization: destination.authorization,
                configure_webhook: destination.configure_webhook,
                tail,
                detach,
                jq,
            };
            let argv: Vec<String> = std::env::args().skip(1).collect();
            let ctx = CommandContext::new(config)?;
            listen::run(&ctx, options, &argv)
        }
        Commands::Receive {
            receiver,
            public_url,
            authorization,
            tail,
            jq,
        } => {
            let options = ReceiveOptions {
                listen_address: receiver
                    .listen_address
                    .unwrap_or_else(|| config.listener.listen_address.clone()),
                path: receiver.path.unwrap_or_else(|| config.listener.path.clone()),
                max_body_bytes: receiver
                    .max_body_bytes
                    .unwrap_or(config.listener.max_body_bytes),
                authorization,
                public_url,
                tail,
                jq,
            };
            let ctx = CommandContext::new(config)?;
            receive::run(&ctx, options)
        }
        Commands::Destination(cmd) => handle_destination_command(cmd, config),
        Commands::Webhook(cmd) => {
            let ctx = CommandContext::new(config)?;
            match cmd {
                WebhookCommands::Get { json } => webhook::get(&ctx, json),
                WebhookCommands::Disable => webhook::disable(&ctx),
            }
        }
        Commands::Ps { command, json } => {
            let registry = ProcessRegistry::resolve()?;
            match command {
                None => ps::list(&registry, json),
                Some(PsCommands::List { json: list_json }) => ps::list(&registry, json || list_json),
                Some(PsCommands::Stop { pid, all, timeout }) => {
                    ps::stop(&registry, pid, all, Duration::from_secs(timeout))
                }
            }
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn handle_destination_command(cmd: DestinationCommands, config: ListenerConfig) -> Result<()> {
    match cmd {
        DestinationCommands::Create {
            destination,
            path,
            json,
        } => {
            let log_format = resolve_log_format(&destination, &config)?;
            let options = CreateOptions {
                endpoint: destination.endpoint,
                public_url: destination.public_url,
                path: path.unwrap_or_else(|| config.listener.path.clone()),
                name: destination.name,
                log_format,
                skip_ssl_verification: destination.skip_ssl_verification
                    || config.destination.skip_ssl_verification,
                authorization: destination.authorization,
                configure_webhook: destination.configure_webhook,
                json,
            };
            let ctx = CommandContext::new(config)?;
            destination::create(&ctx, options)
        }
        DestinationCommands::Delete {
            selector,
            release_webhook,
        } => {
            let ctx = CommandContext::new(config)?;
            destination::delete(&ctx, &selector, release_webhook)
        }
        DestinationCommands::List { json } => {
            let ctx = CommandContext::new(config)?;
            destination::list(&ctx, json)
        }
    }
}

fn resolve_log_format(args: &DestinationArgs, config: &ListenerConfig) -> Result<LogFormat> {
    match args.log_format.as_deref() {
        Some(raw) => raw.parse::<LogFormat>(),
        None => Ok(config.destination.log_format),
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lxdc::lxd::http::format_lxd_error;
use lxdc::model::{ImageKind, InstanceKind, NetworkKind, ProfileKind, StoragePoolKind};
use lxdc::{Client, Config, Entity, ExecOptions, Instance, Kind, Operation};
use std::io::Write;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Command line client for LXD
#[derive(Parser, Debug)]
#[command(name = "lxdc", version, about, long_about = None)]
struct Args {
    /// Daemon endpoint, e.g. https://10.0.0.2:8443
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Project to scope requests to
    #[arg(short, long)]
    project: Option<String>,

    /// Skip server certificate verification
    #[arg(long)]
    insecure: bool,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show daemon information
    Info,
    /// List a collection
    List {
        #[arg(value_enum)]
        kind: Collection,
    },
    /// Run a command in an instance
    Exec {
        instance: String,
        /// Environment variables as KEY=VALUE
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Working directory
        #[arg(long)]
        cwd: Option<String>,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Wait for an operation to finish
    Wait { operation: String },
    /// Trust this client's certificate using the daemon's trust password
    Trust { password: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Collection {
    Instances,
    Images,
    Profiles,
    Networks,
    StoragePools,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_env(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("lxdc started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("lxdc").join("lxdc.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".lxdc").join("lxdc.log");
    }
    PathBuf::from("lxdc.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_guard = setup_logging(args.log_level)?;

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(endpoint) = &args.endpoint {
        config = config.with_endpoint(endpoint.clone());
    }
    if let Some(project) = &args.project {
        config = config.with_project(project.clone());
    }
    if args.insecure {
        config = config.with_verify(false);
    }

    let code = match run(config, args.command).await {
        Ok(code) => code,
        Err(err) => {
            let message = match err.downcast_ref::<lxdc::Error>() {
                Some(lxd_err) => format_lxd_error(lxd_err),
                None => format!("{err:#}"),
            };
            eprintln!("Error: {message}");
            1
        }
    };

    // Flush the log writer before exiting with the remote exit code.
    drop(log_guard);
    std::process::exit(code);
}

async fn run(config: Config, command: Command) -> Result<i32> {
    let client = Client::new(config).await?;

    match command {
        Command::Info => {
            let info = client.host_info().await;
            println!("api_version: {}", info.api_version);
            println!("api_status:  {}", info.api_status);
            println!("auth:        {}", info.auth);
            println!("extensions:  {}", info.api_extensions.len());
            for extension in &info.api_extensions {
                println!("  - {extension}");
            }
        }
        Command::List { kind } => {
            let keys = match kind {
                Collection::Instances => list::<InstanceKind>(&client).await?,
                Collection::Images => list::<ImageKind>(&client).await?,
                Collection::Profiles => list::<ProfileKind>(&client).await?,
                Collection::Networks => list::<NetworkKind>(&client).await?,
                Collection::StoragePools => list::<StoragePoolKind>(&client).await?,
            };
            for key in keys {
                println!("{key}");
            }
        }
        Command::Exec {
            instance,
            env,
            cwd,
            command,
        } => {
            let instance = Instance::partial(&client, instance);
            let mut options = ExecOptions::new();
            for (key, value) in env {
                options = options.with_env(key, value);
            }
            if let Some(cwd) = cwd {
                options = options.with_cwd(cwd);
            }

            let result = instance.execute(command, options).await?;
            std::io::stdout().write_all(result.stdout.as_bytes())?;
            std::io::stderr().write_all(result.stderr.as_bytes())?;
            return Ok(result.exit_code);
        }
        Command::Wait { operation } => {
            let operation = Operation::wait_for_operation(&client, &operation).await?;
            let status = operation.status().map(|s| s.as_str()).unwrap_or("unknown");
            println!("{} {}", operation.id(), status);
        }
        Command::Trust { password } => {
            client
                .authenticate(&password)
                .await
                .context("Failed to add client certificate")?;
            println!("Client certificate is trusted");
        }
    }

    Ok(0)
}

async fn list<K: Kind>(client: &Client) -> Result<Vec<String>> {
    let entities = Entity::<K>::all(client)
        .await
        .with_context(|| format!("Failed to list {}", K::COLLECTION))?;
    Ok(entities
        .iter()
        .filter_map(|e| e.key().map(str::to_string))
        .collect())
}

//! Editor Link — editor command server
//!
//! Accepts newline-delimited JSON commands over TCP and executes them against
//! the editor model on the main thread, one tick at a time. Networking runs
//! on a background tokio runtime; only the tick loop touches the model.
//!
//! Usage:
//!   editor-link                               # 127.0.0.1:13377, sandbox model
//!   editor-link --port 0                      # OS-assigned port
//!   editor-link --config editor-link.json     # Load settings from a file
//!   editor-link --generate-token              # Require authentication
//!   editor-link --status-port 13378           # Serve GET /health

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use edl_sandbox::SandboxEditor;
use edl_server::context::run_timeout_sweeper;
use edl_server::{EditorExecutor, ServerConfig, ServerContext, TickDriver};
use edl_transport::TransportServer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Lower bound for the network-side timeout sweep.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

#[derive(Parser, Debug)]
#[command(name = "editor-link", about = "Editor Link — editor command server")]
struct Cli {
    /// JSON config file (camelCase keys); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long)]
    port: Option<u16>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Pending requests admitted before answering Busy
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Requests started per editor tick
    #[arg(long)]
    batch_size: Option<usize>,

    /// Editor tick interval in milliseconds
    #[arg(long)]
    tick_interval_ms: Option<u64>,

    /// Deadline for commands without timeoutMs (0 disables)
    #[arg(long)]
    default_timeout_ms: Option<u64>,

    /// Close connections idle for this many seconds
    #[arg(long)]
    idle_timeout_secs: Option<u64>,

    /// Serve GET /health on this port
    #[arg(long)]
    status_port: Option<u16>,

    /// Require clients to authenticate with this token
    #[arg(long, conflicts_with = "generate_token")]
    token: Option<String>,

    /// Require authentication with a freshly generated random token
    #[arg(long)]
    generate_token: bool,

    /// Reject every mutating command
    #[arg(long)]
    read_only: bool,

    /// Polls a sandbox compile takes before it finishes
    #[arg(long, default_value = "3")]
    compile_ticks: u32,

    /// Write host, port and token to this file once listening
    #[arg(long)]
    info_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// File settings (or defaults) with command-line overrides applied.
    fn resolve_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(batch) = self.batch_size {
            config.batch_size = batch;
        }
        if let Some(ms) = self.tick_interval_ms {
            config.tick_interval_ms = ms;
        }
        if let Some(ms) = self.default_timeout_ms {
            config.default_timeout_ms = ms;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.idle_timeout_secs = Some(secs);
        }
        if let Some(port) = self.status_port {
            config.status_port = Some(port);
        }
        if let Some(token) = &self.token {
            config.auth_token = Some(token.clone());
        } else if self.generate_token {
            config.auth_token = Some(generate_token());
        }
        config.read_only |= self.read_only;
        config.verbose_logging |= self.verbose;

        config.validate()?;
        Ok(config)
    }
}

fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if let Some(log_path) = &cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

/// The configuration as `--print-config` shows it, with the token masked.
fn printable_config(config: &ServerConfig) -> serde_json::Result<serde_json::Value> {
    let mut value = serde_json::to_value(config)?;
    if config.auth_token.is_some() {
        value["authToken"] = serde_json::Value::from("<redacted>");
    }
    Ok(value)
}

/// Connection details for launch scripts and clients. The file holds the
/// token, so it is created owner-only before anything is written.
fn write_info_file(path: &Path, config: &ServerConfig, port: u16) -> anyhow::Result<()> {
    let info = serde_json::json!({
        "host": config.host,
        "port": port,
        "statusPort": config.status_port,
        "token": config.auth_token,
        "serverVersion": env!("CARGO_PKG_VERSION"),
        "pid": std::process::id(),
    });
    // A stale file would keep its old permissions.
    let _ = std::fs::remove_file(path);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create info file {}", path.display()))?;
    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())
        .with_context(|| format!("failed to write info file {}", path.display()))?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&printable_config(&config)?)?);
        return Ok(());
    }

    init_tracing(&cli)?;

    let context = ServerContext::builder(config.clone())
        .register_all(edl_sandbox::descriptors())?
        .build();

    // Networking lives on its own runtime; the main thread is the editor thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("edl-net")
        .build()
        .context("failed to start network runtime")?;

    let mut transport = runtime
        .block_on(TransportServer::start(config.transport_config(), context.clone()))
        .context("failed to start transport")?;
    runtime.spawn(run_timeout_sweeper(
        context.clone(),
        config.tick_interval().max(MIN_SWEEP_PERIOD),
    ));

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         Editor Link                          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Listening:  tcp://{}", transport.local_addr());
    if let Some(addr) = transport.status_addr() {
        println!("  Status:     http://{addr}/health");
    }
    println!("  Commands:   {}", context.registry().len());
    println!("  Queue:      {} pending max, {} per tick", config.queue_capacity, config.batch_size);
    match &config.auth_token {
        Some(token) => println!("  Auth:       token required ({token})"),
        None => println!("  Auth:       disabled"),
    }
    if config.read_only {
        println!("  Mode:       read-only");
    }
    println!();

    if let Some(path) = &cli.info_file {
        write_info_file(path, &config, transport.port())?;
        info!("Wrote connection info to {}", path.display());
    }

    let driver = TickDriver::new(config.tick_interval());
    let stop = driver.stop_handle();
    runtime.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
        stop.store(true, Ordering::SeqCst);
    });

    let editor = SandboxEditor::new().with_compile_ticks(cli.compile_ticks);
    let mut executor = EditorExecutor::new(Arc::clone(&context), editor);
    driver.run(&mut executor);
    driver.shutdown(&mut executor, config.drain_grace());

    runtime.block_on(transport.stop());
    runtime.shutdown_timeout(Duration::from_secs(1));

    if let Some(path) = &cli.info_file {
        let _ = std::fs::remove_file(path);
    }
    info!("Editor Link stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token() -> ServerConfig {
        ServerConfig {
            auth_token: Some("s3cret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn printed_config_hides_the_token() {
        let printed = printable_config(&config_with_token()).unwrap();
        assert_eq!(printed["authToken"], "<redacted>");
        assert!(!printed.to_string().contains("s3cret"));
        assert_eq!(printed["port"], 13377);

        let open = printable_config(&ServerConfig::default()).unwrap();
        assert!(open["authToken"].is_null());
    }

    #[test]
    fn info_file_carries_connection_details() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor-link.json");
        write_info_file(&path, &config_with_token(), 4242).unwrap();

        let info: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(info["port"], 4242);
        assert_eq!(info["token"], "s3cret");
    }

    #[cfg(unix)]
    #[test]
    fn info_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor-link.json");
        write_info_file(&path, &config_with_token(), 4242).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

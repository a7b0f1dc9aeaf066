//! `qalink` command-line client.
//!
//! Sends JSON requests to the backend over a persistent connection and prints
//! each response envelope, or watches the connection state.
//!
//! # Usage
//!
//! ```text
//! qalink [OPTIONS] <REQUEST_JSON>...
//! qalink [OPTIONS] watch
//!
//! Options:
//!   --config <FILE>         TOML config file
//!   --host <HOST>           Backend host [default: 127.0.0.1]
//!   --port <PORT>           Backend port [default: 54321]
//!   --legacy                Raw framing + FIFO correlation (legacy server)
//!   --framing <FRAMING>     raw | length_prefixed | lines
//!   --correlation <MODE>    fifo | tagged
//!   --timeout-secs <SECS>   Wait for each response at most this long [default: 10]
//! ```
//!
//! Values are resolved in this order, later ones winning: built-in defaults,
//! the config file, environment variables, command-line flags.
//!
//! | Variable              | Flag             |
//! |-----------------------|------------------|
//! | `QALINK_CONFIG`       | `--config`       |
//! | `QALINK_HOST`         | `--host`         |
//! | `QALINK_PORT`         | `--port`         |
//! | `QALINK_TIMEOUT_SECS` | `--timeout-secs` |
//!
//! Exit status is non-zero if any request fails or the server answers with a
//! non-success status.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use qalink_client::{load_config, ClientConfig, ConfigFile, LinkState, SocketClient};
use qalink_core::{CorrelationMode, Framing, ResponseEnvelope};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "qalink",
    about = "Persistent TCP request/response client",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// TOML config file.  Flags below override its values.
    #[arg(long, env = "QALINK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Backend host name or IP address.
    #[arg(long, env = "QALINK_HOST", global = true)]
    host: Option<String>,

    /// Backend TCP port.
    #[arg(long, env = "QALINK_PORT", global = true)]
    port: Option<u16>,

    /// Talk to a backend that sends bare JSON and answers in order.
    #[arg(long, global = true)]
    legacy: bool,

    /// Message framing: raw, length_prefixed, or lines.
    #[arg(long, global = true)]
    framing: Option<Framing>,

    /// Reply correlation: fifo or tagged.
    #[arg(long, global = true)]
    correlation: Option<CorrelationMode>,

    /// Seconds to wait for each response.
    #[arg(long, default_value_t = 10, env = "QALINK_TIMEOUT_SECS")]
    timeout_secs: u64,

    /// JSON requests to send, in order.
    #[arg(value_name = "REQUEST_JSON")]
    requests: Vec<String>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
enum Command {
    /// Log connection state changes until Ctrl+C.
    Watch,
}

impl Cli {
    /// Reads the config file named by `--config`, or the defaults.
    fn load_file(&self) -> anyhow::Result<ConfigFile> {
        match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display())),
            None => Ok(ConfigFile::default()),
        }
    }

    /// Applies command-line overrides on top of `file`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file contains unusable values.
    fn build_config(&self, file: ConfigFile) -> anyhow::Result<ClientConfig> {
        let mut config = file
            .into_client_config()
            .context("invalid configuration")?;

        if self.legacy {
            config.framing = Framing::Raw;
            config.correlation = CorrelationMode::Fifo;
        }
        if let Some(framing) = self.framing {
            config.framing = framing;
        }
        if let Some(correlation) = self.correlation {
            config.correlation = correlation;
        }
        if let Some(host) = &self.host {
            config.endpoint.host = host.clone();
        }
        if let Some(port) = self.port {
            if port == 0 {
                bail!("--port must not be 0");
            }
            config.endpoint.port = port;
        }
        Ok(config)
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Sends every request in order and prints each envelope as pretty JSON.
async fn send_requests(
    client: &SocketClient,
    raw_requests: &[String],
    timeout: Duration,
) -> anyhow::Result<()> {
    if raw_requests.is_empty() {
        bail!("nothing to send: pass one or more JSON requests, or use `qalink watch`");
    }

    let mut rejected = 0usize;
    for (n, raw) in raw_requests.iter().enumerate() {
        let request: Value = serde_json::from_str(raw)
            .with_context(|| format!("request #{} is not valid JSON: {raw}", n + 1))?;

        let envelope: ResponseEnvelope = tokio::time::timeout(timeout, client.request_envelope(&request))
            .await
            .with_context(|| format!("no response to request #{} within {timeout:?}", n + 1))?
            .with_context(|| format!("request #{} failed", n + 1))?;

        if !envelope.is_success() {
            warn!(
                "request #{} answered with status {:?}: {}",
                n + 1,
                envelope.status,
                envelope.message.as_deref().unwrap_or("no message")
            );
            rejected += 1;
        }
        let pretty = serde_json::to_string_pretty(&envelope).context("failed to format response")?;
        println!("{pretty}");
    }

    if rejected > 0 {
        bail!("{rejected} request(s) were answered with an error status");
    }
    Ok(())
}

/// Logs every link state change until Ctrl+C or until the client gives up.
async fn watch(client: &SocketClient) -> anyhow::Result<()> {
    let mut states = client.watch_link_state();
    info!("link state: {}", *states.borrow_and_update());

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!("link state: {state}");
                if let LinkState::GaveUp { attempts } = state {
                    bail!("gave up reconnecting after {attempts} attempt(s)");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("received Ctrl+C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.load_file()?;

    // RUST_LOG wins; otherwise the config file's log_level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&file.log_level)),
        )
        .init();

    let config = cli.build_config(file)?;
    info!(
        "qalink starting: endpoint={}, framing={}, correlation={}",
        config.endpoint, config.framing, config.correlation
    );

    let client = SocketClient::connect(config);
    let outcome = match &cli.command {
        Some(Command::Watch) => watch(&client).await,
        None => send_requests(&client, &cli.requests, cli.response_timeout()).await,
    };
    client.close().await;
    outcome
}

// ── Tests ─────────────────────────────────────────────────────────────────────

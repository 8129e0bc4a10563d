//! # apisync
//!
//! Demo sync server and command-line client.

#![deny(unsafe_code)]

mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use apisync_client::{ClientConfig, SyncClient};
use apisync_server::shutdown::DRAIN_TIMEOUT;
use apisync_server::{ServerConfig, SyncServer};
use apisync_settings::{ApiSyncSettings, ClientSettings, ServerSettings};
use clap::{Parser, Subcommand};
use serde_json::Value;

/// apisync demo server and client.
#[derive(Parser, Debug)]
#[command(name = "apisync", about = "WebSocket RPC and live-state sync")]
struct Cli {
    /// Settings file (defaults to `~/.apisync/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Server URL for client commands (overrides settings).
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the demo namespace.
    Serve {
        /// Host to bind (overrides settings).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind, 0 for auto-assign (overrides settings).
        #[arg(long)]
        port: Option<u16>,
        /// Serve Prometheus metrics on `/metrics`.
        #[arg(long)]
        metrics: bool,
    },
    /// Call a remote procedure and print its result.
    Call {
        /// Dotted procedure path, e.g. `math.add`.
        path: String,
        /// Positional parameters, each parsed as JSON (bare words become strings).
        params: Vec<String>,
    },
    /// Print updates for a signal or state until interrupted.
    Watch {
        /// Dotted signal or state path, e.g. `room.count`.
        path: String,
        /// Dependency slot to watch.
        #[arg(long, short, default_value = "")]
        dependency: String,
    },
    /// Print the server's schema.
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => apisync_settings::load_settings_from_path(path),
        None => apisync_settings::load_settings(),
    }
    .context("failed to load settings")?;
    apisync_logging::init_from_settings(&settings.logging);

    match cli.command {
        Command::Serve { host, port, metrics } => serve(&settings, host, port, metrics).await,
        Command::Call { path, params } => {
            let client = connect(&settings, cli.url).await?;
            let params = params.iter().map(|p| parse_param(p)).collect();
            let result = client.call(&path, params).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            client.close().await;
            Ok(())
        }
        Command::Watch { path, dependency } => {
            let client = connect(&settings, cli.url).await?;
            watch(&client, &path, &dependency).await
        }
        Command::Schema => {
            let client = connect(&settings, cli.url).await?;
            println!("{}", serde_json::to_string_pretty(&client.schema())?);
            client.close().await;
            Ok(())
        }
    }
}

async fn serve(settings: &ApiSyncSettings, host: Option<String>, port: Option<u16>, metrics: bool) -> Result<()> {
    let mut config = server_config(&settings.server);
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let demo = demo::Demo::new();
    let mut server = SyncServer::with_hooks(config, demo.namespace(), demo.hooks())
        .context("failed to mount demo namespace")?;
    if metrics {
        let handle = apisync_server::metrics::install_recorder().context("failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("failed to bind")?;
    tracing::info!(%addr, leaves = server.schema().len(), "serving demo namespace");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    server.shutdown().track(handle);
    if !server.shutdown().drain(DRAIN_TIMEOUT).await {
        tracing::warn!("forced exit with server tasks still running");
    }
    Ok(())
}

async fn connect(settings: &ApiSyncSettings, url: Option<String>) -> Result<SyncClient> {
    let mut config = client_config(&settings.client);
    if let Some(url) = url {
        config.url = url;
    }
    let url = config.url.clone();
    SyncClient::connect(config)
        .await
        .with_context(|| format!("failed to connect to {url}"))
}

async fn watch(client: &SyncClient, path: &str, dependency: &str) -> Result<()> {
    let handle = client.path(path).signal::<Value>()?;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = handle.subscribe(
        move |value: Option<Value>| {
            let _ = tx.send(value);
        },
        dependency,
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = client.closed() => bail!("server closed the connection"),
            value = rx.recv() => match value {
                Some(Some(value)) => println!("{value}"),
                Some(None) => println!("null"),
                None => break,
            },
        }
    }
    client.close().await;
    Ok(())
}

/// Map server settings onto the engine config.
fn server_config(settings: &ServerSettings) -> ServerConfig {
    ServerConfig {
        host: settings.host.clone(),
        port: settings.port,
        path: settings.path.clone(),
        max_connections: settings.max_connections,
        heartbeat_interval_secs: settings.heartbeat_interval_secs,
        max_missed_pongs: settings.max_missed_pongs,
        handler_timeout_secs: settings.handler_timeout_secs,
        send_queue_capacity: settings.send_queue_capacity,
        ..ServerConfig::default()
    }
}

/// Map client settings onto the client config.
fn client_config(settings: &ClientSettings) -> ClientConfig {
    ClientConfig {
        url: settings.url.clone(),
        call_timeout_secs: settings.call_timeout_secs,
        strict_paths: settings.strict_paths,
        ..ClientConfig::default()
    }
}

/// Parse a CLI parameter as JSON, falling back to a plain string.
fn parse_param(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_serve_defaults() {
        let cli = Cli::parse_from(["apisync", "serve"]);
        match cli.command {
            Command::Serve { host, port, metrics } => {
                assert!(host.is_none());
                assert!(port.is_none());
                assert!(!metrics);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(cli.settings.is_none());
    }

    #[test]
    fn cli_serve_overrides() {
        let cli = Cli::parse_from(["apisync", "serve", "--port", "8080", "--host", "0.0.0.0", "--metrics"]);
        match cli.command {
            Command::Serve { host, port, metrics } => {
                assert_eq!(host.as_deref(), Some("0.0.0.0"));
                assert_eq!(port, Some(8080));
                assert!(metrics);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_call_collects_params() {
        let cli = Cli::parse_from(["apisync", "--url", "ws://h:1/x", "call", "math.add", "1", "2"]);
        assert_eq!(cli.url.as_deref(), Some("ws://h:1/x"));
        match cli.command {
            Command::Call { path, params } => {
                assert_eq!(path, "math.add");
                assert_eq!(params, vec!["1", "2"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_watch_dependency() {
        let cli = Cli::parse_from(["apisync", "watch", "room.count", "-d", "lobby"]);
        match cli.command {
            Command::Watch { path, dependency } => {
                assert_eq!(path, "room.count");
                assert_eq!(dependency, "lobby");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn params_parse_as_json_or_string() {
        assert_eq!(parse_param("1"), json!(1));
        assert_eq!(parse_param("[1,2]"), json!([1, 2]));
        assert_eq!(parse_param("\"quoted\""), json!("quoted"));
        assert_eq!(parse_param("lobby"), json!("lobby"));
    }

    #[test]
    fn settings_map_onto_configs() {
        let mut settings = ApiSyncSettings::default();
        settings.server.port = 4000;
        settings.server.max_missed_pongs = 3;
        settings.client.strict_paths = false;

        let server = server_config(&settings.server);
        assert_eq!(server.port, 4000);
        assert_eq!(server.max_missed_pongs, 3);
        assert_eq!(server.route(), "/api-sync");

        let client = client_config(&settings.client);
        assert_eq!(client.url, "ws://127.0.0.1:9847/api-sync");
        assert!(!client.strict_paths);
    }

    #[test]
    fn settings_file_feeds_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"path":"sync","heartbeatIntervalSecs":5}}"#).unwrap();

        let settings = apisync_settings::load_settings_from_path(&path).unwrap();
        let server = server_config(&settings.server);
        assert_eq!(server.route(), "/sync");
        assert_eq!(server.heartbeat_interval_secs, 5);
    }
}

//! dexrpc CLI — query and subscribe to a Tendermint node from the terminal.
//!
//! Usage:
//! ```bash
//! # Node status over the WebSocket session
//! dexrpc status --url tcp://127.0.0.1:26657
//!
//! # Send a raw JSON-RPC call, over HTTP instead of WebSocket
//! dexrpc call --url http://127.0.0.1:26657 --method block --params '{"height":"10"}' --http
//!
//! # Stream the next five blocks
//! dexrpc subscribe --url tcp://127.0.0.1:26657 --query "tm.event = 'NewBlock'" --count 5
//! ```

mod logging;

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;

use dexrpc_core::{RpcTransport, TendermintRpc};
use dexrpc_http::HttpRpcClient;
use dexrpc_ws::{Session, WsConfig, DEFAULT_ENDPOINT};

use crate::logging::LogConfig;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    logging::init(&log_config(&args[2..]));

    let result = match args[1].as_str() {
        "status" => cmd_status(&args[2..]).await,
        "call" => cmd_call(&args[2..]).await,
        "subscribe" => cmd_subscribe(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("dexrpc {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("dexrpc {}", env!("CARGO_PKG_VERSION"));
    println!("Query and subscribe to a Tendermint node\n");
    println!("USAGE:");
    println!("    dexrpc <COMMAND> [FLAGS]\n");
    println!("COMMANDS:");
    println!("    status     Print node identity and sync state");
    println!("    call       Send a raw JSON-RPC call");
    println!("    subscribe  Stream events matching a query");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --url <REMOTE>      Node address (tcp://, http(s)://, ws(s)://)  [required]");
    println!("    --method <NAME>     RPC method (call)");
    println!("    --params <JSON>     RPC params object (call)");
    println!("    --http              Use a plain HTTP transport (status, call)");
    println!("    --query <QUERY>     Event query, e.g. \"tm.event = 'Tx'\" (subscribe)");
    println!("    --count <N>         Stop after N events; 0 streams until Ctrl-C (subscribe)");
    println!("    --timeout-ms <MS>   Per-call timeout");
    println!("    --log-level <LVL>   trace | debug | info | warn | error");
    println!("    --log-crate <C=LVL> Level for one crate, e.g. dexrpc-ws=debug");
    println!("    --json-logs         Emit JSON structured logs on stderr");
}

fn log_config(args: &[String]) -> LogConfig {
    let mut config = LogConfig::default();
    if let Some(level) = parse_flag(args, "--log-level") {
        config.level = level;
    }
    if let Some((name, level)) = parse_flag(args, "--log-crate")
        .as_deref()
        .and_then(|raw| raw.split_once('='))
    {
        config.crates.insert(name.to_string(), level.to_string());
    }
    config.json = has_flag(args, "--json-logs");
    config
}

fn ws_config(args: &[String]) -> Result<WsConfig> {
    let mut config = WsConfig::default();
    if let Some(ms) = parse_flag(args, "--timeout-ms") {
        let ms: u64 = ms.parse().context("--timeout-ms must be an integer")?;
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    Ok(config)
}

/// Either transport behind one `RpcTransport` object.
async fn connect(args: &[String]) -> Result<Box<dyn RpcTransport>> {
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    if has_flag(args, "--http") {
        let mut config = dexrpc_http::HttpClientConfig::default();
        if let Some(ms) = parse_flag(args, "--timeout-ms") {
            config.request_timeout =
                Duration::from_millis(ms.parse().context("--timeout-ms must be an integer")?);
        }
        let client = HttpRpcClient::new(http_url(&url), config)?;
        return Ok(Box::new(client));
    }
    let session = Session::dial(&url, DEFAULT_ENDPOINT, ws_config(args)?)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    Ok(Box::new(session))
}

async fn cmd_status(args: &[String]) -> Result<()> {
    let transport = connect(args).await?;

    let start = std::time::Instant::now();
    let status = transport.status().await?;
    let latency = start.elapsed();

    println!("  Node:        {} ({})", status.node_info.moniker, status.node_info.id);
    println!("  Network:     {}", status.node_info.network);
    println!("  Version:     {}", status.node_info.version);
    println!("  Height:      {}", status.sync_info.latest_block_height);
    println!("  Block time:  {}", status.sync_info.latest_block_time);
    println!("  Catching up: {}", status.sync_info.catching_up);
    println!("  Latency:     {}ms", latency.as_millis());
    println!("  Transport:   {} ({})", transport.url(), transport.health());
    Ok(())
}

async fn cmd_call(args: &[String]) -> Result<()> {
    let method = parse_flag(args, "--method").ok_or_else(|| anyhow!("--method is required"))?;
    let params = match parse_flag(args, "--params") {
        Some(raw) => serde_json::from_str(&raw).context("--params must be valid JSON")?,
        None => Value::Null,
    };

    let transport = connect(args).await?;
    let result = transport.request(&method, params).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_subscribe(args: &[String]) -> Result<()> {
    if has_flag(args, "--http") {
        bail!("subscriptions need the WebSocket transport; drop --http");
    }
    let url = parse_flag(args, "--url").ok_or_else(|| anyhow!("--url is required"))?;
    let query = parse_flag(args, "--query").ok_or_else(|| anyhow!("--query is required"))?;
    let count: usize = match parse_flag(args, "--count") {
        Some(n) => n.parse().context("--count must be an integer")?,
        None => 0,
    };

    let session = Session::dial(&url, DEFAULT_ENDPOINT, ws_config(args)?)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    let mut events = session.subscribe(&query, 0).await?;
    tracing::info!(query = %query, count, "streaming events");

    let mut seen = 0usize;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        let Some(event) = event else { break };
        println!("{}", serde_json::to_string(&event.result)?);
        seen += 1;
        if count != 0 && seen >= count {
            break;
        }
    }

    if let Err(e) = session.unsubscribe(&query).await {
        tracing::warn!(query = %query, error = %e, "unsubscribe failed");
    }
    session.close().await;
    Ok(())
}

/// Map a node address to the HTTP RPC URL.
fn http_url(remote: &str) -> String {
    let remote = remote.trim().trim_end_matches('/');
    match remote.split_once("://") {
        Some(("tcp" | "ws", rest)) => format!("http://{rest}"),
        Some(("wss", rest)) => format!("https://{rest}"),
        Some(_) => remote.to_string(),
        None => format!("http://{remote}"),
    }
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn node_addresses_map_to_http() {
        assert_eq!(http_url("tcp://127.0.0.1:26657"), "http://127.0.0.1:26657");
        assert_eq!(http_url("wss://rpc.dex.example/"), "https://rpc.dex.example");
        assert_eq!(http_url("https://rpc.dex.example"), "https://rpc.dex.example");
        assert_eq!(http_url("localhost:26657"), "http://localhost:26657");
    }

    #[test]
    fn flags_are_parsed() {
        let a = args(&["--url", "tcp://n:1", "--http", "--timeout-ms", "250"]);
        assert_eq!(parse_flag(&a, "--url").as_deref(), Some("tcp://n:1"));
        assert!(has_flag(&a, "--http"));
        assert!(parse_flag(&a, "--method").is_none());
        assert_eq!(
            ws_config(&a).unwrap().request_timeout,
            Duration::from_millis(250)
        );
        assert!(ws_config(&args(&["--timeout-ms", "soon"])).is_err());
    }

    #[test]
    fn log_flags_build_config() {
        let config = log_config(&args(&[
            "--log-level",
            "debug",
            "--log-crate",
            "dexrpc-ws=trace",
            "--json-logs",
        ]));
        assert_eq!(config.level, "debug");
        assert_eq!(config.directives(), "debug,dexrpc_ws=trace");
        assert!(config.json);
    }
}

//! WatchExpr Server
//!
//! JSON-RPC server that resolves watch expressions for probe front ends.
//! Communicates via stdin/stdout for easy subprocess management.
//!
//! Usage: `watchexpr-server [config.toml]` (falls back to `$WATCHEXPR_CONFIG`)

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, warn, Level};
use watchexpr_core::protocol::RpcMessage;
use watchexpr_core::{EngineConfig, Request, Response, WatchEngine};

mod handler;

fn load_config() -> Result<EngineConfig> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| env::var_os("WATCHEXPR_CONFIG").map(PathBuf::from));
    match path {
        Some(path) => EngineConfig::load(&path),
        None => Ok(EngineConfig::default()),
    }
}

fn main() -> Result<()> {
    let config = load_config()?;

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    // Logging goes to stderr; stdout is for JSON-RPC
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .init();

    info!("watchexpr-server starting...");
    if !config.log_level.eq_ignore_ascii_case(&level.to_string()) {
        warn!("Unknown log level {:?}, using {}", config.log_level, level);
    }

    let engine = Arc::new(WatchEngine::from_config(&config));
    let mut handler = handler::Handler::new(engine);
    if let Some(path) = &config.symbol_file {
        handler.start_load(path.clone());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to read line: {}", e);
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        debug!("Received: {}", line);

        let mut shutdown = false;
        let response = match serde_json::from_str::<RpcMessage<Request>>(&line) {
            Ok(msg) => {
                shutdown = msg.content == Request::Shutdown;
                let result = handler.handle(&msg.content);
                RpcMessage::new(msg.id.unwrap_or(0), result)
            }
            Err(e) => RpcMessage::new(0, Response::error("invalid_request", format!("Parse error: {}", e))),
        };

        let response_json = serde_json::to_string(&response)?;
        debug!("Sending: {}", response_json);
        writeln!(stdout, "{}", response_json)?;
        stdout.flush()?;

        if shutdown {
            break;
        }
    }

    handler.finish();
    info!("watchexpr-server shutting down");
    Ok(())
}

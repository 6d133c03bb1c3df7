//! mail-gmail-mcp-rs: Gmail MCP server over stdio
//!
//! This server exposes the Gmail v1 REST API as MCP tools over stdio, with a
//! credential lifecycle that survives restarts: grants are obtained through a
//! loopback redirect OAuth flow, stored encrypted at rest, refreshed
//! transparently, and re-acquired interactively when the remote invalidates
//! them.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and stdio serving
//! - [`config`]: Client identity resolution and path settings
//! - [`errors`]: Application error model with MCP error mapping
//! - [`crypto`]: Key derivation and AES-GCM sealing of the token record
//! - [`token_store`]: Encrypted grant persistence, tolerant of absence
//! - [`oauth`]: Loopback authorization flow and token endpoint calls
//! - [`session`]: Handle cache, lazy resolve, invalidation handling
//! - [`gmail`]: Gmail REST pass-through calls bound to one grant
//! - [`email`]: RFC822 assembly for send/draft
//! - [`server`]: MCP tool handlers with validation and dispatch
//! - [`models`]: Input/output DTOs and schema-bearing types

mod config;
mod crypto;
mod email;
mod errors;
mod gmail;
mod models;
mod oauth;
mod server;
mod session;
mod token_store;

use std::fs::OpenOptions;
use std::sync::Mutex;

use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over stdio. This process expects to be spawned by an MCP client
/// via `stdio` transport; authentication happens lazily on the first tool
/// call that needs it.
///
/// # Environment Variables
///
/// `GOOGLE_CLIENT_ID`/`GOOGLE_CLIENT_SECRET` (or a `credentials.json`), plus
/// the optional `GMAIL_MCP_*` path overrides in [`ServerConfig::load_from_env`].
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::load_from_env();
    init_logging(&config);

    let service = server::GmailMcpServer::new(config).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

/// Initialize the logging sinks
///
/// Always writes to stderr so stdout stays clean for the protocol. When a log
/// file is configured it is opened append-only as a second sink; failure to
/// open it is swallowed and logging continues on stderr alone.
fn init_logging(config: &ServerConfig) {
    let file_layer = config
        .log_file
        .as_ref()
        .and_then(|path| OpenOptions::new().create(true).append(true).open(path).ok())
        .map(|file| fmt::layer().with_ansi(false).with_writer(Mutex::new(file)));

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
}

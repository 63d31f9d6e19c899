//! huddle server binary: wires the crates together and serves.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use huddle_core::{GroupId, UserId};
use huddle_realtime::{IdentityGate, InMemoryIdentityGate};
use huddle_server::{HuddleServer, ServerConfig};
use huddle_workflows::{FunctionRegistry, StepExecutor, WorkflowEngine};

/// Realtime messaging and workflow server.
#[derive(Parser, Debug)]
#[command(name = "huddle-server", about = "Realtime messaging and workflow server")]
struct Cli {
    /// Host to bind (overrides config/env).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config/env; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// JSON file of users and tokens to seed the in-memory identity gate.
    #[arg(long)]
    users: Option<PathBuf>,
}

/// One entry in the seed users file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedUser {
    user_id: String,
    display_name: String,
    token: String,
    #[serde(default)]
    group_ids: Vec<String>,
}

fn load_seed_users(path: &PathBuf) -> Result<Vec<SeedUser>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read users file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid users file: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let gate = Arc::new(InMemoryIdentityGate::new());
    if let Some(path) = &cli.users {
        let seed = load_seed_users(path)?;
        info!(count = seed.len(), "seeding identity gate");
        for user in seed {
            let user_id = UserId::from(user.user_id);
            gate.insert_user(
                user_id.clone(),
                user.display_name,
                user.group_ids.into_iter().map(GroupId::from).collect(),
            );
            gate.insert_token(user.token, user_id);
        }
    }
    let gate: Arc<dyn IdentityGate> = gate;

    let executor = StepExecutor::new(
        FunctionRegistry::new(),
        Duration::from_secs(config.step_timeout_secs),
    );
    let engine = WorkflowEngine::new(executor, Arc::clone(&gate));

    let bind = format!("{}:{}", config.host, config.port);
    let server = HuddleServer::new(config, gate, engine);
    let shutdown = Arc::clone(server.shutdown());
    let app = server.router();

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let addr = listener.local_addr()?;
    info!(%addr, "huddle server listening");

    let token = shutdown.token();
    let serve_task = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server error");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("ctrl-c received, shutting down");
    shutdown.graceful_shutdown(vec![serve_task], None).await;
    info!("goodbye");
    Ok(())
}

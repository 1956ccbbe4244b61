use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::client;
use crate::config::AppConfig;
use crate::gateway::{self, AppState};

#[derive(Parser)]
#[command(name = "moderation-gateway")]
#[command(about = "Role-gated gateway in front of a content moderation classifier")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, env = "GATEWAY_CONFIG", help = "YAML configuration file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP server (default)")]
    Serve {
        #[arg(long, help = "Bind address, overrides configuration")]
        host: Option<String>,
        #[arg(long, help = "Port, overrides configuration")]
        port: Option<u16>,
    },

    #[command(about = "Validate configuration and print it with secrets redacted")]
    CheckConfig,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve { host: None, port: None }) {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Commands::CheckConfig => check_config(&config),
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    tracing::info!("Starting moderation gateway in {:?} mode", config.environment);

    let service_client = client::init_client(&config)?;
    let state = AppState::from_client(&service_client, &config)?;
    let app = gateway::router(state, &config.server);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Moderation gateway listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    client::reset_client();
    tracing::info!("Moderation gateway stopped");
    Ok(())
}

fn check_config(config: &AppConfig) -> anyhow::Result<()> {
    let rendered = serde_yaml::to_string(&config.redacted())?;
    println!("{}", rendered);
    config.validate()?;
    println!("configuration OK");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

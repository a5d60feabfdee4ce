// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! NFS control plane daemon
//!
//! # Usage
//!
//! ```bash
//! # Run with defaults (docker on the local host)
//! nfs-control
//!
//! # Using configuration file
//! nfs-control --config nfs.toml --log-level debug
//!
//! # Generate and check a configuration file
//! nfs-control gen-config --output nfs.toml
//! nfs-control validate --config nfs.toml
//! ```

use clap::{Parser, Subcommand};
use nfs_control::config::FabricConfig;
use nfs_control::{CommandServer, ControlConfig, ControlState, TelemetryListener};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// NFS control plane
#[derive(Parser, Debug)]
#[command(name = "nfs-control")]
#[command(about = "Control plane for the elastic VoIP network-function test fabric")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "nfs-control.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config = match args.config {
        Some(ref path) => {
            info!("Loading config from {:?}", path);
            ControlConfig::from_file(path)?
        }
        None => {
            let config = ControlConfig::default();
            config.validate()?;
            config
        }
    };

    info!("NFS control plane v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Fabric: {:?} over {} host(s), reference {} B/s, alpha {}",
        config.fabric.kind,
        config.fabric.hosts.len(),
        config.control.reference,
        config.control.alpha
    );

    let state = Arc::new(ControlState::from_config(&config));
    let setup_state = state.clone();
    tokio::task::spawn_blocking(move || setup_state.setup()).await??;

    let server = CommandServer::bind(&config.server, state.clone())?;
    let handle = server.shutdown_handle();

    let telemetry = match config.telemetry.bind {
        Some(ref addr) => {
            let listener = TelemetryListener::bind(addr, state.clone()).await?;
            Some(tokio::spawn(listener.run(handle.subscribe())))
        }
        None => None,
    };

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutting down...");
        signal_handle.shutdown();
    });

    server.run().await?;

    if let Some(task) = telemetry {
        task.await??;
    }

    info!("NFS control plane stopped");
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ControlConfig::default();
    config.telemetry.bind = Some("0.0.0.0:8089".into());
    config.tables.queue = Some("snort_queue".into());
    config.fabric = FabricConfig {
        hosts: [
            ("h1".to_string(), "tcp://10.0.0.1:2375".to_string()),
            ("h2".to_string(), "tcp://10.0.0.2:2375".to_string()),
        ]
        .into_iter()
        .collect(),
        ..FabricConfig::default()
    };

    let content = format!(
        r#"# NFS Control Plane Configuration
# Generated by nfs-control gen-config

{}"#,
        config.to_toml()?
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match ControlConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Socket:  {}", config.server.socket_path.display());
            println!(
                "Control: step {} ms, period {} ms, reference {} B/s, alpha {}",
                config.control.step_length_ms,
                config.control.period_length_ms,
                config.control.reference,
                config.control.alpha
            );
            println!("Fabric:  {:?}", config.fabric.kind);
            for (name, addr) in &config.fabric.hosts {
                println!("  {} -> {}", name, addr);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

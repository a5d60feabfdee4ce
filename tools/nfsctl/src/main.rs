// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! nfsctl - send commands to a running nfs-control daemon
//!
//! ```bash
//! SERVER=$(nfsctl start-server h1)
//! SNORT=$(nfsctl start-snort h1 --shares 512)
//! CLIENT=$(nfsctl start-client h2 --server "$SERVER")
//! nfsctl route --client "$CLIENT" --server "$SERVER" --router "$SNORT"
//! nfsctl set-rate "$CLIENT" 100
//! ```

use clap::{Parser, Subcommand};
use nfs_control::{CommandClient, Request};
use std::path::PathBuf;
use std::process::ExitCode;

/// Send commands to the NFS control plane
#[derive(Parser, Debug)]
#[command(name = "nfsctl")]
#[command(version)]
#[command(about = "Send commands to a running nfs-control daemon")]
struct Args {
    /// Command socket of the daemon
    #[arg(short, long, default_value = "/tmp/nfs-control.sock")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a SIP traffic server, prints its id
    StartServer {
        host: String,
        #[arg(long, default_value = "256")]
        shares: u32,
    },

    /// Start a SIP traffic client calling a server, prints its id
    StartClient {
        host: String,
        #[arg(long)]
        server: String,
        #[arg(long, default_value = "256")]
        shares: u32,
    },

    /// Start a monitored network function, prints its id
    StartSnort {
        host: String,
        #[arg(long, default_value = "256")]
        shares: u32,
    },

    /// Stop and remove an entity
    Stop { cont: String },

    /// Route client traffic to a server through a router
    Route {
        #[arg(long)]
        client: String,
        #[arg(long)]
        server: String,
        #[arg(long)]
        router: String,
    },

    /// Change the call rate of a traffic client
    SetRate { client: String, rate: u32 },
}

impl From<Commands> for Request {
    fn from(cmd: Commands) -> Self {
        match cmd {
            Commands::StartServer { host, shares } => Request::StartServer { host, shares },
            Commands::StartClient {
                host,
                server,
                shares,
            } => Request::StartClient {
                host,
                shares,
                server,
            },
            Commands::StartSnort { host, shares } => Request::StartSnort { host, shares },
            Commands::Stop { cont } => Request::Stop { cont },
            Commands::Route {
                client,
                server,
                router,
            } => Request::Route {
                client,
                server,
                router,
            },
            Commands::SetRate { client, rate } => Request::SetRate { client, rate },
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut client = match CommandClient::connect(&args.socket).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Unable to connect to {}: {}", args.socket.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match client.request(&Request::from(args.command)).await {
        Ok(result) => {
            if !result.is_empty() {
                println!("{}", result);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

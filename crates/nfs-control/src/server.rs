// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command server.
//!
//! Accepts connections on a Unix socket and runs one task per connection.
//! Each task reads framed [`Command`]s, dispatches them to the shared
//! [`ControlState`] and writes back the [`Response`].

use crate::command::{Command, CommandError, Response};
use crate::config::ServerConfig;
use crate::state::ControlState;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod telemetry;

pub use connection::{ConnectionError, FramedConnection};
pub use telemetry::TelemetryListener;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task error: {0}")]
    Task(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Flips the cancellation flag observed by the server and its tasks.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Unix socket command server.
pub struct CommandServer {
    listener: UnixListener,
    socket_path: PathBuf,
    state: Arc<ControlState>,
    poll_interval: Duration,
    max_message_size: usize,
    shutdown: ShutdownHandle,
}

impl CommandServer {
    /// Bind the command socket, replacing a stale socket file.
    pub fn bind(config: &ServerConfig, state: Arc<ControlState>) -> Result<Self, ServerError> {
        let path = config.socket_path.clone();
        if path.exists() {
            debug!("Removing stale socket {:?}", path);
            std::fs::remove_file(&path)
                .map_err(|e| ServerError::Bind(format!("{}: {}", path.display(), e)))?;
        }

        let listener = UnixListener::bind(&path)
            .map_err(|e| ServerError::Bind(format!("{}: {}", path.display(), e)))?;
        info!("Command server listening on {:?}", path);

        let (tx, _) = watch::channel(false);
        Ok(Self {
            listener,
            socket_path: path,
            state,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_message_size: config.max_message_size,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shut down, then tear the fabric down.
    pub async fn run(self) -> Result<(), ServerError> {
        let cancel = self.shutdown.subscribe();
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;

        while !*cancel.borrow() {
            tokio::select! {
                accepted = tokio::time::timeout(self.poll_interval, self.listener.accept()) => {
                    match accepted {
                        Ok(Ok((stream, _))) => {
                            next_id += 1;
                            let id = next_id;
                            info!("Connection {} opened", id);
                            tasks.spawn(handle_connection(
                                id,
                                stream,
                                self.state.clone(),
                                self.max_message_size,
                                self.shutdown.subscribe(),
                            ));
                        }
                        Ok(Err(e)) => error!("Accept error: {}", e),
                        Err(_) => {}
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Connection task failed: {}", e);
                    }
                }
            }
        }

        info!("Shutdown signal received");
        self.drain(&mut tasks).await;

        let state = self.state.clone();
        let teardown = tokio::task::spawn_blocking(move || state.shutdown())
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?;
        if let Err(e) = teardown {
            warn!("Fabric teardown incomplete: {}", e);
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("Unable to remove socket {:?}: {}", self.socket_path, e);
        }
        info!("Command server stopped");
        Ok(())
    }

    /// Wait a bounded time for connection tasks, then abort the rest.
    async fn drain(&self, tasks: &mut JoinSet<()>) {
        let wait = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.poll_interval * 2, wait).await.is_err() {
            warn!("Aborting {} connection tasks", tasks.len());
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

async fn handle_connection(
    id: u64,
    stream: UnixStream,
    state: Arc<ControlState>,
    max_message_size: usize,
    cancel: watch::Receiver<bool>,
) {
    match serve(id, stream, state, max_message_size, cancel).await {
        Ok(()) => info!("Connection {} closed", id),
        Err(e) => warn!("Connection {} closed: {}", id, e),
    }
}

async fn serve(
    id: u64,
    stream: UnixStream,
    state: Arc<ControlState>,
    max_message_size: usize,
    mut cancel: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let mut conn = FramedConnection::new(stream, max_message_size);

    loop {
        if *cancel.borrow_and_update() {
            debug!("Connection {} shutting down", id);
            return Ok(());
        }

        let decoded = tokio::select! {
            frame = conn.read_frame() => match frame? {
                Some(body) => serde_json::from_slice::<Command>(body),
                None => return Ok(()),
            },
            changed = cancel.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                continue;
            }
        };

        let command = match decoded {
            Ok(command) => command,
            Err(e) if e.is_data() => {
                warn!("Rejected command on connection {}: {}", id, e);
                conn.send_message(&Response::error(CommandError::Malformed(e.to_string())))
                    .await?;
                continue;
            }
            Err(e) => {
                warn!("Skipping malformed command on connection {}: {}", id, e);
                continue;
            }
        };

        debug!("Connection {}: command {}", id, command.code);
        let state = state.clone();
        let response: Response = tokio::task::spawn_blocking(move || state.dispatch(&command))
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?;
        conn.send_message(&response).await?;
    }
}

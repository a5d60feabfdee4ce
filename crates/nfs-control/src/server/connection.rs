// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Length-prefixed JSON framing.
//!
//! Every frame is a 4-byte big-endian body length followed by the JSON body.
//! Used on both ends of the command socket.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A framed stream.
pub struct FramedConnection<S> {
    stream: S,
    max_message_size: usize,
    read_buffer: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedConnection<S> {
    pub fn new(stream: S, max_message_size: usize) -> Self {
        Self {
            stream,
            max_message_size,
            read_buffer: Vec::with_capacity(4096),
        }
    }

    /// Read one frame body.
    ///
    /// Returns `Ok(None)` if the peer closed the stream between frames.
    pub async fn read_frame(&mut self) -> Result<Option<&[u8]>, ConnectionError> {
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len == 0 {
            return Err(ConnectionError::Protocol("Empty message".into()));
        }
        if len > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "Message too large: {} > {}",
                len, self.max_message_size
            )));
        }

        self.read_buffer.clear();
        self.read_buffer.resize(len, 0);
        self.stream.read_exact(&mut self.read_buffer).await?;

        Ok(Some(&self.read_buffer))
    }

    /// Read and decode one message.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ConnectionError> {
        match self.read_frame().await? {
            Some(body) => Ok(Some(serde_json::from_slice(body)?)),
            None => Ok(None),
        }
    }

    /// Encode and send one message.
    pub async fn send_message<T: Serialize>(&mut self, msg: &T) -> Result<(), ConnectionError> {
        let json = serde_json::to_vec(msg)?;
        if json.is_empty() || json.len() > self.max_message_size {
            return Err(ConnectionError::Protocol(format!(
                "Message too large: {} > {}",
                json.len(),
                self.max_message_size
            )));
        }

        let len = json.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&json).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ConnectionError> {
        Ok(self.stream.shutdown().await?)
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command protocol.
//!
//! On the wire a command is a numeric code plus a string map; it is decoded
//! into a typed [`Request`] right away, so required keys are checked in
//! one place.
//!
//! ```json
//! {"code": 2, "key_val": {"host": "h1", "shares": "256", "server": "sipp-server-…"}}
//! {"result": "sipp-client-…", "err": ""}
//! ```

use crate::controller::{MAX_SHARES, MIN_SHARES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Command decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command code {0}")]
    UnknownCode(i64),

    #[error("malformed command: {0}")]
    Malformed(String),

    #[error("key not found: {0}")]
    KeyNotFound(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    StartServer = 0,
    StartSnort = 1,
    StartClient = 2,
    StopCont = 3,
    RouteCont = 4,
    SetRate = 5,
}

impl TryFrom<i64> for CommandCode {
    type Error = CommandError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CommandCode::StartServer),
            1 => Ok(CommandCode::StartSnort),
            2 => Ok(CommandCode::StartClient),
            3 => Ok(CommandCode::StopCont),
            4 => Ok(CommandCode::RouteCont),
            5 => Ok(CommandCode::SetRate),
            other => Err(CommandError::UnknownCode(other)),
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandCode::StartServer => "start-server",
            CommandCode::StartSnort => "start-snort",
            CommandCode::StartClient => "start-client",
            CommandCode::StopCont => "stop",
            CommandCode::RouteCont => "route",
            CommandCode::SetRate => "set-rate",
        };
        f.write_str(name)
    }
}

/// Command as sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub code: i64,
    #[serde(default)]
    pub key_val: BTreeMap<String, String>,
}

impl Command {
    pub fn new(code: CommandCode) -> Self {
        Self {
            code: code as i64,
            key_val: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.key_val.insert(key.to_string(), value.to_string());
        self
    }

    fn get(&self, key: &'static str) -> Result<&str, CommandError> {
        self.key_val
            .get(key)
            .map(String::as_str)
            .ok_or(CommandError::KeyNotFound(key))
    }

    fn get_string(&self, key: &'static str) -> Result<String, CommandError> {
        self.get(key).map(str::to_string)
    }

    fn get_u32(&self, key: &'static str) -> Result<u32, CommandError> {
        let raw = self.get(key)?;
        raw.trim().parse().map_err(|_| CommandError::InvalidValue {
            key,
            value: raw.to_string(),
        })
    }

    /// CPU shares, within the range the controller keeps.
    fn get_shares(&self) -> Result<u32, CommandError> {
        let shares = self.get_u32("shares")?;
        if (MIN_SHARES..=MAX_SHARES).contains(&i64::from(shares)) {
            Ok(shares)
        } else {
            Err(CommandError::InvalidValue {
                key: "shares",
                value: shares.to_string(),
            })
        }
    }
}

/// Reply to a command. An empty `err` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub err: String,
}

impl Response {
    pub fn ok(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            err: String::new(),
        }
    }

    pub fn error(err: impl ToString) -> Self {
        Self {
            result: String::new(),
            err: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.err.is_empty()
    }
}

/// Decoded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StartServer {
        host: String,
        shares: u32,
    },
    StartClient {
        host: String,
        shares: u32,
        server: String,
    },
    StartSnort {
        host: String,
        shares: u32,
    },
    Stop {
        cont: String,
    },
    Route {
        client: String,
        server: String,
        router: String,
    },
    SetRate {
        client: String,
        rate: u32,
    },
}

impl Request {
    pub fn code(&self) -> CommandCode {
        match self {
            Request::StartServer { .. } => CommandCode::StartServer,
            Request::StartClient { .. } => CommandCode::StartClient,
            Request::StartSnort { .. } => CommandCode::StartSnort,
            Request::Stop { .. } => CommandCode::StopCont,
            Request::Route { .. } => CommandCode::RouteCont,
            Request::SetRate { .. } => CommandCode::SetRate,
        }
    }
}

impl TryFrom<&Command> for Request {
    type Error = CommandError;

    fn try_from(cmd: &Command) -> Result<Self, Self::Error> {
        let request = match CommandCode::try_from(cmd.code)? {
            CommandCode::StartServer => Request::StartServer {
                host: cmd.get_string("host")?,
                shares: cmd.get_shares()?,
            },
            CommandCode::StartClient => Request::StartClient {
                host: cmd.get_string("host")?,
                shares: cmd.get_shares()?,
                server: cmd.get_string("server")?,
            },
            CommandCode::StartSnort => Request::StartSnort {
                host: cmd.get_string("host")?,
                shares: cmd.get_shares()?,
            },
            CommandCode::StopCont => Request::Stop {
                cont: cmd.get_string("cont")?,
            },
            CommandCode::RouteCont => Request::Route {
                client: cmd.get_string("client")?,
                server: cmd.get_string("server")?,
                router: cmd.get_string("router")?,
            },
            CommandCode::SetRate => Request::SetRate {
                client: cmd.get_string("client")?,
                rate: cmd.get_u32("rate")?,
            },
        };
        Ok(request)
    }
}

impl From<&Request> for Command {
    fn from(request: &Request) -> Self {
        let cmd = Command::new(request.code());
        match request {
            Request::StartServer { host, shares } | Request::StartSnort { host, shares } => {
                cmd.with("host", host).with("shares", shares)
            }
            Request::StartClient {
                host,
                shares,
                server,
            } => cmd
                .with("host", host)
                .with("shares", shares)
                .with("server", server),
            Request::Stop { cont } => cmd.with("cont", cont),
            Request::Route {
                client,
                server,
                router,
            } => cmd
                .with("client", client)
                .with("server", server)
                .with("router", router),
            Request::SetRate { client, rate } => cmd.with("client", client).with("rate", rate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_numbers() {
        assert_eq!(CommandCode::StartServer as u8, 0);
        assert_eq!(CommandCode::StartSnort as u8, 1);
        assert_eq!(CommandCode::StartClient as u8, 2);
        assert_eq!(CommandCode::SetRate as u8, 5);
        assert_eq!(CommandCode::try_from(4), Ok(CommandCode::RouteCont));
        assert_eq!(CommandCode::try_from(9), Err(CommandError::UnknownCode(9)));
        assert_eq!(
            CommandCode::try_from(-1).unwrap_err().to_string(),
            "unknown command code -1"
        );
    }

    #[test]
    fn test_decode_start_client() {
        let json = r#"{"code":2,"key_val":{"host":"h1","shares":"256","server":"sipp-server-1"}}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(
            Request::try_from(&cmd),
            Ok(Request::StartClient {
                host: "h1".into(),
                shares: 256,
                server: "sipp-server-1".into(),
            })
        );
    }

    #[test]
    fn test_missing_key() {
        let cmd = Command::new(CommandCode::RouteCont)
            .with("client", "c")
            .with("server", "s");
        assert_eq!(
            Request::try_from(&cmd),
            Err(CommandError::KeyNotFound("router"))
        );
        assert_eq!(
            Request::try_from(&Command::new(CommandCode::StopCont))
                .unwrap_err()
                .to_string(),
            "key not found: cont"
        );
    }

    #[test]
    fn test_invalid_number() {
        let cmd = Command::new(CommandCode::SetRate)
            .with("client", "c")
            .with("rate", "fast");
        assert_eq!(
            Request::try_from(&cmd),
            Err(CommandError::InvalidValue {
                key: "rate",
                value: "fast".into()
            })
        );

        let cmd = Command::new(CommandCode::StartServer)
            .with("host", "h1")
            .with("shares", "-5");
        assert!(Request::try_from(&cmd).is_err());
    }

    #[test]
    fn test_shares_out_of_range() {
        for shares in ["0", "10", "63", "1025"] {
            let cmd = Command::new(CommandCode::StartSnort)
                .with("host", "h1")
                .with("shares", shares);
            assert_eq!(
                Request::try_from(&cmd),
                Err(CommandError::InvalidValue {
                    key: "shares",
                    value: shares.into()
                })
            );
        }
        for shares in [64, 512, 1024] {
            let cmd = Command::new(CommandCode::StartServer)
                .with("host", "h1")
                .with("shares", shares);
            assert!(Request::try_from(&cmd).is_ok());
        }
    }

    #[test]
    fn test_wide_code_decodes() {
        let cmd: Command = serde_json::from_str(r#"{"code":300,"key_val":{}}"#).unwrap();
        assert_eq!(
            Request::try_from(&cmd).unwrap_err().to_string(),
            "unknown command code 300"
        );
    }

    #[test]
    fn test_missing_key_val_defaults_to_empty() {
        let cmd: Command = serde_json::from_str(r#"{"code":3}"#).unwrap();
        assert!(cmd.key_val.is_empty());
        assert_eq!(
            Request::try_from(&cmd),
            Err(CommandError::KeyNotFound("cont"))
        );
    }

    #[test]
    fn test_request_to_command() {
        let request = Request::Route {
            client: "c".into(),
            server: "s".into(),
            router: "r".into(),
        };
        let cmd = Command::from(&request);
        assert_eq!(cmd.code, 4);
        assert_eq!(cmd.key_val.len(), 3);
        assert_eq!(Request::try_from(&cmd), Ok(request));
    }

    #[test]
    fn test_response_json() {
        let ok = Response::ok("snort-1");
        assert!(ok.is_ok());
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"result":"snort-1","err":""}"#
        );

        let err: Response = serde_json::from_str(r#"{"err":"key not found: cont"}"#).unwrap();
        assert!(!err.is_ok());
        assert!(err.result.is_empty());
    }
}

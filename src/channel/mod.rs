// src/channel/mod.rs
//! Command Channel - the host's request/response surface.
//!
//! Requests and responses are JSON-shaped: a method name plus an argument
//! value in, a success value, a coded error or "not implemented" out.
//! Malformed requests never panic; they come back as `bad_args`.


use crate::error::CommandError;
use crate::symbols::EntryPointTable;
use log::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const GET_PLATFORM_VERSION: &str = "getPlatformVersion";
pub const ATTACH_ENGINE_INSTANCE: &str = "attachEngineInstance";
pub const REGISTER_ENGINE_SYMBOLS: &str = "registerEngineSymbols";

// Names used by earlier host packages.
const ATTACH_ENGINE_INSTANCE_LEGACY: &str = "attachGodotInstance";
const REGISTER_ENGINE_SYMBOLS_LEGACY: &str = "registerGodotSymbols";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }

    pub fn decode(text: &str) -> Result<Self, CommandError> {
        serde_json::from_str(text).map_err(|e| CommandError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MethodResponse {
    Success {
        result: Value,
    },
    Error {
        code: String,
        message: String,
        #[serde(default)]
        details: Value,
    },
    NotImplemented,
}

impl MethodResponse {
    pub fn success(result: impl Into<Value>) -> Self {
        MethodResponse::Success {
            result: result.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MethodResponse::Success { .. })
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!("CommandChannel: Failed to encode response: {}", e);
            r#"{"status":"error","code":"internal","message":"encode failed","details":null}"#
                .to_string()
        })
    }
}

impl From<CommandError> for MethodResponse {
    fn from(e: CommandError) -> Self {
        MethodResponse::Error {
            code: e.code().to_string(),
            message: e.to_string(),
            details: Value::Null,
        }
    }
}

/// A decoded, validated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetPlatformVersion,
    AttachEngineInstance { address: u64 },
    RegisterEngineSymbols { symbols: Vec<(String, u64)> },
}

impl Command {
    /// `Ok(None)` for methods this channel does not know.
    pub fn parse(call: &MethodCall) -> Result<Option<Command>, CommandError> {
        let command = match call.method.as_str() {
            GET_PLATFORM_VERSION => Command::GetPlatformVersion,
            ATTACH_ENGINE_INSTANCE | ATTACH_ENGINE_INSTANCE_LEGACY => {
                let address = call
                    .arguments
                    .get("address")
                    .and_then(address_value)
                    .ok_or_else(|| CommandError::BadArgs("Missing address".to_string()))?;
                if address == 0 {
                    return Err(CommandError::BadArgs("Null engine instance".to_string()));
                }
                Command::AttachEngineInstance { address }
            }
            REGISTER_ENGINE_SYMBOLS | REGISTER_ENGINE_SYMBOLS_LEGACY => {
                let map = call.arguments.as_object().ok_or_else(|| {
                    CommandError::BadArgs("Expected symbol address map".to_string())
                })?;
                Command::RegisterEngineSymbols {
                    symbols: symbol_entries(map),
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

/// Accepts unsigned integers and, because some hosts only have signed 64-bit
/// integers, negative ones reinterpreted bit for bit.
fn address_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_i64().map(|signed| signed as u64))
}

fn symbol_entries(map: &Map<String, Value>) -> Vec<(String, u64)> {
    map.iter()
        .filter_map(|(name, value)| match address_value(value) {
            Some(address) => Some((name.clone(), address)),
            None => {
                warn!(
                    "CommandChannel: Skipping '{}': address is not an integer ({})",
                    name, value
                );
                None
            }
        })
        .collect()
}

/// Outcome of handling one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Handled {
    pub response: MethodResponse,
    /// The engine may have become available; owners should re-check.
    pub recheck_availability: bool,
}

impl Handled {
    fn reply(response: MethodResponse) -> Self {
        Self {
            response,
            recheck_availability: false,
        }
    }

    fn reply_and_recheck(response: MethodResponse) -> Self {
        Self {
            response,
            recheck_availability: true,
        }
    }
}

pub struct CommandChannel {
    symbols: Arc<EntryPointTable>,
    engine_instance: Option<u64>,
}

impl CommandChannel {
    pub fn new(symbols: Arc<EntryPointTable>) -> Self {
        Self {
            symbols,
            engine_instance: None,
        }
    }

    /// Opaque engine-instance pointer last delivered by the host.
    pub fn engine_instance(&self) -> Option<u64> {
        self.engine_instance
    }

    pub fn handle(&mut self, call: &MethodCall) -> Handled {
        debug!("CommandChannel: {}", call.method);
        let command = match Command::parse(call) {
            Ok(Some(command)) => command,
            Ok(None) => {
                debug!("CommandChannel: {} not implemented", call.method);
                return Handled::reply(MethodResponse::NotImplemented);
            }
            Err(e) => {
                warn!("CommandChannel: {} rejected: {}", call.method, e);
                return Handled::reply(e.into());
            }
        };

        match command {
            Command::GetPlatformVersion => {
                Handled::reply(MethodResponse::success(platform_version()))
            }
            Command::AttachEngineInstance { address } => {
                info!("CommandChannel: Engine instance at {:#x}", address);
                self.engine_instance = Some(address);
                Handled::reply_and_recheck(MethodResponse::success(true))
            }
            Command::RegisterEngineSymbols { symbols } => {
                self.symbols.override_symbols(
                    symbols
                        .iter()
                        .map(|(name, address)| (name.as_str(), *address)),
                );
                Handled::reply_and_recheck(MethodResponse::success(true))
            }
        }
    }

    /// Decodes, handles and encodes one JSON request.
    pub fn handle_json(&mut self, text: &str) -> (String, bool) {
        let handled = match MethodCall::decode(text) {
            Ok(call) => self.handle(&call),
            Err(e) => {
                warn!("CommandChannel: {}", e);
                Handled::reply(e.into())
            }
        };
        (handled.response.encode(), handled.recheck_availability)
    }
}

/// `"<os name> <kernel release>"`.
pub fn platform_version() -> String {
    uname().unwrap_or_else(|| std::env::consts::OS.to_string())
}

#[cfg(unix)]
fn uname() -> Option<String> {
    match nix::sys::utsname::uname() {
        Ok(info) => Some(format!(
            "{} {}",
            info.sysname().to_string_lossy(),
            info.release().to_string_lossy()
        )),
        Err(e) => {
            debug!("CommandChannel: uname failed: {}", e);
            None
        }
    }
}

#[cfg(not(unix))]
fn uname() -> Option<String> {
    None
}

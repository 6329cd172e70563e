use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use filament_common::error::RpcError;
use filament_parser::RpcSequence;

/// Protocol version carried in every sequence.
pub const RPC_PROTOCOL_VERSION: u16 = 1;

/// Command id reserved for protocol-level timeout errors.
pub const TIMEOUT_COMMAND_ID: u16 = 9999;

/// The four RPC sequence kinds, tagged by their final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCommandType {
    FireAndForget,
    Query,
    Response,
    Error,
}

impl RpcCommandType {
    pub fn final_byte(self) -> u8 {
        match self {
            RpcCommandType::FireAndForget => b'F',
            RpcCommandType::Query => b'Q',
            RpcCommandType::Response => b'R',
            RpcCommandType::Error => b'E',
        }
    }

    pub fn from_final(byte: u8) -> Option<Self> {
        match byte {
            b'F' => Some(RpcCommandType::FireAndForget),
            b'Q' => Some(RpcCommandType::Query),
            b'R' => Some(RpcCommandType::Response),
            b'E' => Some(RpcCommandType::Error),
            _ => None,
        }
    }

    /// The command-id range this kind is valid for.
    pub fn id_range(self) -> RangeInclusive<u16> {
        match self {
            RpcCommandType::FireAndForget => 1000..=1999,
            RpcCommandType::Query => 2000..=2999,
            // Responses reflect the original command id.
            RpcCommandType::Response => 1000..=2999,
            RpcCommandType::Error => 9000..=9999,
        }
    }

    pub fn contains_id(self, id: u16) -> bool {
        self.id_range().contains(&id)
    }

    pub fn name(self) -> &'static str {
        match self {
            RpcCommandType::FireAndForget => "fire-and-forget",
            RpcCommandType::Query => "query",
            RpcCommandType::Response => "response",
            RpcCommandType::Error => "error",
        }
    }
}

/// Why a private-use sequence could not be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedKind {
    BadFinal,
    EmptyParams,
    NonNumericId,
    IdOutOfRange,
    UnregisteredId,
}

/// A validated RPC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcMessage {
    pub command_id: u16,
    pub version: u16,
    pub kind: RpcCommandType,
    pub numeric_params: Vec<u16>,
    pub string_params: Vec<String>,
    pub extended: HashMap<String, String>,
    /// The sequence as received on the wire, empty for host-built messages.
    pub raw: Vec<u8>,
}

impl RpcMessage {
    /// Build a host-side message, enforcing the type ↔ id-range rule.
    pub fn new(kind: RpcCommandType, command_id: u16) -> Result<Self, RpcError> {
        if !kind.contains_id(command_id) {
            return Err(RpcError::IdOutOfRange {
                id: command_id,
                kind: kind.name(),
            });
        }
        Ok(Self {
            command_id,
            version: RPC_PROTOCOL_VERSION,
            kind,
            numeric_params: Vec::new(),
            string_params: Vec::new(),
            extended: HashMap::new(),
            raw: Vec::new(),
        })
    }

    pub fn with_numeric_params(mut self, params: Vec<u16>) -> Self {
        self.numeric_params = params;
        self
    }

    pub fn with_string_params(mut self, params: Vec<String>) -> Self {
        self.string_params = params;
        self
    }

    pub fn with_extended(mut self, extended: HashMap<String, String>) -> Self {
        self.extended = extended;
        self
    }

    /// Parse a siphoned private-use sequence: `>Pn;Pv;...<final>`.
    pub fn from_sequence(seq: &RpcSequence) -> Result<Self, MalformedKind> {
        let kind = RpcCommandType::from_final(seq.final_byte).ok_or(MalformedKind::BadFinal)?;
        if seq.params.is_empty() {
            return Err(MalformedKind::EmptyParams);
        }
        let command_id = seq.params.get(0).value().ok_or(MalformedKind::NonNumericId)?;
        if !kind.contains_id(command_id) {
            return Err(MalformedKind::IdOutOfRange);
        }
        let version = seq.params.get_or(1, RPC_PROTOCOL_VERSION);

        let numeric_params = (2..seq.params.len())
            .filter_map(|i| seq.params.get(i).value())
            .collect();

        Ok(Self {
            command_id,
            version,
            kind,
            numeric_params,
            string_params: Vec::new(),
            extended: HashMap::new(),
            raw: seq.raw.clone(),
        })
    }

    /// Range rule for the message's own id.
    pub fn is_valid_command_id_range(&self) -> bool {
        self.kind.contains_id(self.command_id)
    }

    /// Serialize to the canonical wire form.
    pub fn wire_bytes(&self) -> Vec<u8> {
        let mut out = format!("\x1b[>{};{};", self.command_id, self.version);
        for p in &self.numeric_params {
            out.push_str(&format!("{p};"));
        }
        out.push(self.kind.final_byte() as char);
        out.into_bytes()
    }
}

/// Outcome of executing one RPC command.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResult {
    pub success: bool,
    pub command_id: u16,
    pub data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub is_timeout: bool,
    pub is_security_violation: bool,
    pub execution_time: Duration,
}

impl RpcResult {
    pub fn success(data: Option<serde_json::Value>, execution_time: Duration) -> Self {
        Self {
            success: true,
            command_id: 0,
            data,
            error_message: None,
            is_timeout: false,
            is_security_violation: false,
            execution_time,
        }
    }

    pub fn failure(message: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            command_id: 0,
            data: None,
            error_message: Some(message.into()),
            is_timeout: false,
            is_security_violation: false,
            execution_time,
        }
    }

    /// A query that ran out of its handler budget.
    pub fn timeout(command_id: u16, timeout: Duration) -> Self {
        Self {
            success: false,
            command_id,
            data: None,
            error_message: Some(format!("query timed out after {timeout:?}")),
            is_timeout: true,
            is_security_violation: false,
            execution_time: timeout,
        }
    }

    pub fn with_command_id(mut self, command_id: u16) -> Self {
        self.command_id = command_id;
        self
    }

    pub fn with_security_violation(mut self) -> Self {
        self.is_security_violation = true;
        self
    }
}

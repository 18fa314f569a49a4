//! JSON-RPC 2.0 subset spoken with the sweep process.
//!
//! Messages are newline-delimited JSON objects, one complete document per
//! physical line. Three shapes exist on the wire:
//!
//! - request: `{method, params?, id?}` — a null/absent id marks a
//!   notification and no response is expected;
//! - result: `{result, id?}` — recognized by the presence of `result`;
//! - error: `{error: {code, message, data?}, id?}`.
//!
//! Outbound frames carry `"jsonrpc": "2.0"`; inbound frames may omit it.
//! Classification is attempted in the order request → error → result and the
//! first shape that validates wins. Frames that parse as JSON but fit no
//! shape are answered with an invalid-request error carrying the raw line in
//! `data`.

use std::fmt;

use serde_json::{Map, Value};

mod peer;

pub use peer::{BoxFuture, RpcPeer};

/// JSON-RPC reserved code for unparseable frames.
pub const CODE_PARSE_ERROR: i64 = -32700;
/// JSON-RPC reserved code for frames that fit no message shape.
pub const CODE_INVALID_REQUEST: i64 = -32600;
/// JSON-RPC reserved code for calls to unregistered methods.
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC reserved code for argument shape mismatches.
pub const CODE_INVALID_PARAMS: i64 = -32602;
/// JSON-RPC reserved code for handler failures.
pub const CODE_INTERNAL_ERROR: i64 = -32603;

/// Request/response correlation id: an integer or a string.
///
/// Nullable positions (notifications, unattributed errors) are represented
/// as `Option<RpcId>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RpcId {
    Int(i64),
    Str(String),
}

impl RpcId {
    fn to_value(&self) -> Value {
        match self {
            RpcId::Int(id) => Value::from(*id),
            RpcId::Str(id) => Value::from(id.as_str()),
        }
    }

    fn from_value(value: Option<&Value>) -> Option<RpcId> {
        match value {
            Some(Value::Number(number)) => number.as_i64().map(RpcId::Int),
            Some(Value::String(id)) => Some(RpcId::Str(id.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcId::Int(id) => write!(f, "{id}"),
            RpcId::Str(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for RpcId {
    fn from(id: i64) -> Self {
        RpcId::Int(id)
    }
}

impl From<&str> for RpcId {
    fn from(id: &str) -> Self {
        RpcId::Str(id.to_string())
    }
}

/// Request parameters: absent, positional, or named.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RpcParams {
    #[default]
    None,
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl RpcParams {
    /// Look up an argument either by position or by name, whichever shape
    /// the caller used.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        match self {
            RpcParams::None => None,
            RpcParams::List(list) => list.get(index),
            RpcParams::Map(map) => map.get(name),
        }
    }

    /// Number of arguments supplied.
    pub fn len(&self) -> usize {
        match self {
            RpcParams::None => 0,
            RpcParams::List(list) => list.len(),
            RpcParams::Map(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_value(&self) -> Option<Value> {
        match self {
            RpcParams::None => None,
            RpcParams::List(list) => Some(Value::Array(list.clone())),
            RpcParams::Map(map) => Some(Value::Object(map.clone())),
        }
    }

    fn from_value(value: Option<&Value>) -> Option<RpcParams> {
        match value {
            None | Some(Value::Null) => Some(RpcParams::None),
            Some(Value::Array(list)) => Some(RpcParams::List(list.clone())),
            Some(Value::Object(map)) => Some(RpcParams::Map(map.clone())),
            Some(_) => None,
        }
    }
}

impl From<Value> for RpcParams {
    /// Null maps to no parameters, arrays to positional, objects to named; a
    /// bare scalar becomes a single positional argument.
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RpcParams::None,
            Value::Array(list) => RpcParams::List(list),
            Value::Object(map) => RpcParams::Map(map),
            scalar => RpcParams::List(vec![scalar]),
        }
    }
}

/// Method call or notification.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    pub params: RpcParams,
    pub id: Option<RpcId>,
}

impl RpcRequest {
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::from("2.0"));
        obj.insert("method".to_string(), Value::from(self.method.as_str()));
        if let Some(params) = self.params.to_value() {
            obj.insert("params".to_string(), params);
        }
        if let Some(id) = &self.id {
            obj.insert("id".to_string(), id.to_value());
        }
        Value::Object(obj)
    }

    fn from_object(obj: &Map<String, Value>) -> Option<RpcRequest> {
        let method = obj.get("method")?.as_str()?.to_string();
        let params = RpcParams::from_value(obj.get("params"))?;
        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            id => Some(RpcId::from_value(id)?),
        };
        Some(RpcRequest { method, params, id })
    }
}

/// Successful response.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub result: Value,
    pub id: Option<RpcId>,
}

impl RpcResult {
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::from("2.0"));
        obj.insert("result".to_string(), self.result.clone());
        if let Some(id) = &self.id {
            obj.insert("id".to_string(), id.to_value());
        }
        Value::Object(obj)
    }

    fn from_object(obj: &Map<String, Value>) -> Option<RpcResult> {
        let result = obj.get("result")?.clone();
        Some(RpcResult {
            result,
            id: RpcId::from_value(obj.get("id")),
        })
    }
}

/// Error response, also used as the error type surfaced to callers.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<String>,
    pub id: Option<RpcId>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            Some(data) => write!(f, "{}: {data}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    pub fn new(
        code: i64,
        message: impl Into<String>,
        data: Option<String>,
        id: Option<RpcId>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            data,
            id,
        }
    }

    pub fn parse_error(data: Option<String>, id: Option<RpcId>) -> Self {
        Self::new(CODE_PARSE_ERROR, "Parse error", data, id)
    }

    pub fn invalid_request(data: Option<String>, id: Option<RpcId>) -> Self {
        Self::new(CODE_INVALID_REQUEST, "Invalid request", data, id)
    }

    pub fn method_not_found(data: Option<String>, id: Option<RpcId>) -> Self {
        Self::new(CODE_METHOD_NOT_FOUND, "Method not found", data, id)
    }

    pub fn invalid_params(data: Option<String>, id: Option<RpcId>) -> Self {
        Self::new(CODE_INVALID_PARAMS, "Invalid params", data, id)
    }

    pub fn internal_error(data: Option<String>, id: Option<RpcId>) -> Self {
        Self::new(CODE_INTERNAL_ERROR, "Internal error", data, id)
    }

    pub fn to_value(&self) -> Value {
        let mut error = Map::new();
        error.insert("code".to_string(), Value::from(self.code));
        error.insert("message".to_string(), Value::from(self.message.as_str()));
        if let Some(data) = &self.data {
            error.insert("data".to_string(), Value::from(data.as_str()));
        }
        let mut obj = Map::new();
        obj.insert("jsonrpc".to_string(), Value::from("2.0"));
        obj.insert("error".to_string(), Value::Object(error));
        if let Some(id) = &self.id {
            obj.insert("id".to_string(), id.to_value());
        }
        Value::Object(obj)
    }

    fn from_object(obj: &Map<String, Value>) -> Option<RpcError> {
        let error = obj.get("error")?.as_object()?;
        let code = error.get("code")?.as_i64()?;
        let message = error.get("message")?.as_str()?.to_string();
        let data = error.get("data").and_then(Value::as_str).map(String::from);
        Some(RpcError {
            code,
            message,
            data,
            id: RpcId::from_value(obj.get("id")),
        })
    }
}

/// Any message that may travel over the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum RpcMessage {
    Request(RpcRequest),
    Result(RpcResult),
    Error(RpcError),
}

impl RpcMessage {
    pub fn to_value(&self) -> Value {
        match self {
            RpcMessage::Request(request) => request.to_value(),
            RpcMessage::Result(result) => result.to_value(),
            RpcMessage::Error(error) => error.to_value(),
        }
    }

    /// Decode one framed line.
    ///
    /// The returned `Err` is the error *response* owed to the sender: a
    /// parse error for lines that are not JSON, or an invalid-request error
    /// (raw line in `data`, id copied when present) for JSON that fits no
    /// message shape.
    pub fn decode(line: &str) -> Result<RpcMessage, RpcError> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| RpcError::parse_error(Some(err.to_string()), None))?;
        let Some(obj) = value.as_object() else {
            return Err(RpcError::invalid_request(Some(line.to_string()), None));
        };
        RpcRequest::from_object(obj)
            .map(RpcMessage::Request)
            .or_else(|| RpcError::from_object(obj).map(RpcMessage::Error))
            .or_else(|| RpcResult::from_object(obj).map(RpcMessage::Result))
            .ok_or_else(|| {
                RpcError::invalid_request(Some(line.to_string()), RpcId::from_value(obj.get("id")))
            })
    }
}

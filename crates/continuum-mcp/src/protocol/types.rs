//! MCP JSON-RPC Types
//!
//! Core types for the JSON-RPC 2.0 protocol used by MCP, plus the mapping
//! from the engine's error taxonomy onto application error codes.

use continuum_core::MemoryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol version spoken by this server
pub const MCP_VERSION: &str = "2025-03-26";

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// JSON-RPC REQUEST/RESPONSE
// ============================================================================

/// JSON-RPC Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ============================================================================
// TOOL CALL ENVELOPES
// ============================================================================

/// `tools/call` params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// One entry in `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// `tools/list` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescription>,
}

/// One content block in a tool result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// `tools/call` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    pub content: Vec<ToolResultContent>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

// ============================================================================
// JSON-RPC ERROR
// ============================================================================

/// JSON-RPC error codes: standard, plus the application taxonomy in the
/// -32000..-32099 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,

    // Application errors
    TenantMismatch = -32000,
    NotFound = -32001,
    Conflict = -32002,
    CircularDependency = -32003,
    ReferentialIntegrity = -32004,
    ExpiredCapsule = -32005,
    TemporaryUnavailable = -32006,
    DeadlineExceeded = -32007,
    PermanentError = -32008,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

/// JSON-RPC Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: ErrorCode, message: &str) -> Self {
        Self {
            code: code.into(),
            message: message.to_string(),
            data: None,
        }
    }

    pub fn parse_error() -> Self {
        Self::new(ErrorCode::ParseError, "Parse error")
    }

    pub fn invalid_request(message: &str) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(message: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, message)
    }

    pub fn invalid_params(message: &str) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Map an engine error onto its wire code, with the machine-readable
    /// kind in `data`. Messages are safe to display.
    pub fn from_memory_error(err: &MemoryError) -> Self {
        let code = match err {
            MemoryError::TenantMismatch { .. } => ErrorCode::TenantMismatch,
            MemoryError::Validation(_) => ErrorCode::InvalidParams,
            MemoryError::NotFound(_) => ErrorCode::NotFound,
            MemoryError::Conflict(_) => ErrorCode::Conflict,
            MemoryError::CircularDependency(_) => ErrorCode::CircularDependency,
            MemoryError::ReferentialIntegrity(_) => ErrorCode::ReferentialIntegrity,
            MemoryError::ExpiredCapsule(_) => ErrorCode::ExpiredCapsule,
            MemoryError::TemporaryUnavailable(_) => ErrorCode::TemporaryUnavailable,
            MemoryError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            MemoryError::Unauthenticated(_) | MemoryError::Permanent(_) => {
                ErrorCode::PermanentError
            }
            _ => ErrorCode::InternalError,
        };
        Self {
            code: code.into(),
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": err.kind() })),
        }
    }
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

// ============================================================================
// TESTS
// ============================================================================

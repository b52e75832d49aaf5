//! MCP Tools
//!
//! One module per tool family. Each module exposes `descriptors()` for
//! `tools/list` and one `execute_*` function per tool. The dispatcher has
//! already authenticated the caller, enforced the payload tenant guard, and
//! stripped `tenant_id`/`op_id` before arguments reach these functions.

pub mod capsules;
pub mod feedback;
pub mod graph;
pub mod handoffs;
pub mod notes;
pub mod observe;
pub mod recall;

use continuum_core::{MemoryError, Result};
use serde_json::Value;

/// Deserialize tool arguments, treating absent arguments as `{}`
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = args.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value)
        .map_err(|e| MemoryError::Validation(format!("invalid arguments: {e}")))
}

// ============================================================================
// TESTS
// ============================================================================

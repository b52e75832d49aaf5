//! JSON-RPC protocol layer: wire types and the HTTP transport.

pub mod http;
pub mod types;

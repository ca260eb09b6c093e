//! JSON-RPC API Layer
//!
//! Implements the §6.1 RPC surface over JSON-RPC 2.0.

pub mod error;
pub mod handler;
mod rate_limiter;
pub mod server;
pub mod types;

pub use server::RpcServer;

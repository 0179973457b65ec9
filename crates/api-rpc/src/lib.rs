//! JSON-RPC API Layer
//!
//! Operational surface of the dispatch daemon: submit an invoice, trigger a
//! queue pass, read queue statistics.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};

//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over TCP, bound to localhost by default.

use crate::handler::RpcHandler;
use crate::types::{ProcessQueueRequest, QueueStatsRequest, SubmitInvoiceRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9531;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    /// Start the JSON-RPC server
    ///
    /// # Returns
    /// The bound address (useful with port 0) and the server handle
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let mut module = RpcModule::new(());

        // Register methods
        let handler = self.handler.clone();
        module
            .register_async_method("invoice.submit.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubmitInvoiceRequest = params.parse()?;
                    handler.submit_invoice(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.process.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: ProcessQueueRequest =
                        params.parse::<Option<ProcessQueueRequest>>()?.unwrap_or_default();
                    handler.process_queue(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("queue.stats.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: QueueStatsRequest =
                        params.parse::<Option<QueueStatsRequest>>()?.unwrap_or_default();
                    handler.queue_stats(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        info!(addr = %local_addr, "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}

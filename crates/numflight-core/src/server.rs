//! Server lifecycle: a [`ComputeDispatcher`] behind a [`FlightServer`].

use crate::config::ServerConfig;
use crate::dispatcher::{ComputeDispatcher, ComputeHandler};
use crate::error::Result;
use crate::transport::{DescriptorStatus, FlightServer, FlightServerHandle, Location};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Entry point for starting a numflight server.
pub struct Server;

impl Server {
    /// Bind to the configured address and start serving `handler`.
    ///
    /// Port `0` picks a free port; read it back from [`ServerHandle::addr`].
    pub async fn start<H: ComputeHandler>(config: ServerConfig, handler: H) -> Result<ServerHandle> {
        Self::start_shared(config, Arc::new(handler)).await
    }

    /// Same as [`Server::start`] for an already shared handler.
    pub async fn start_shared(
        config: ServerConfig,
        handler: Arc<dyn ComputeHandler>,
    ) -> Result<ServerHandle> {
        let dispatcher = Arc::new(ComputeDispatcher::from_config(handler, &config));
        let transport =
            FlightServer::bind(&config.bind_addr(), dispatcher.clone(), config.max_upload_bytes)
                .await?;
        info!(
            "numflight server ready at {} (delivery: {:?})",
            Location::from(transport.addr()),
            config.delivery
        );
        Ok(ServerHandle {
            transport,
            dispatcher,
        })
    }
}

/// Handle to a running server. Dropping it stops the server.
pub struct ServerHandle {
    transport: FlightServerHandle,
    dispatcher: Arc<ComputeDispatcher>,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.transport.addr()
    }

    /// Location string clients can pass to [`Client::connect`](crate::Client::connect).
    pub fn location(&self) -> Location {
        Location::from(self.addr())
    }

    pub fn dispatcher(&self) -> &Arc<ComputeDispatcher> {
        &self.dispatcher
    }

    /// Descriptors currently tracked, with their states.
    pub async fn descriptors(&self) -> Vec<DescriptorStatus> {
        self.dispatcher.snapshot().await
    }

    pub fn shutdown(&mut self) {
        info!("numflight server at {} shutting down", self.addr());
        self.transport.shutdown();
    }
}

//! gRPC server side of the transfer channel.
//!
//! Binds a TCP listener, serves a [`TransferEndpoint`] through tonic, and
//! stops gracefully when the handle asks it to.
//!
//! # Thread Safety
//!
//! The service is shared via `Arc` across requests and must do its own
//! synchronization. Requests on one connection are multiplexed and proceed
//! independently.

use super::service::{TransferEndpoint, TransferService};
use crate::config::TransportConfig;
use crate::error::{FlightError, Result};
use arrow_flight::flight_service_server::FlightServiceServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Handle to a running transport server. Dropping shuts down the server.
pub struct FlightServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FlightServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and send `GOAWAY` on the open ones.
    ///
    /// Requests already running finish in the background.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for FlightServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Transport server speaking Arrow Flight.
pub struct FlightServer;

impl FlightServer {
    /// Bind to `addr` and serve `service` in a background task.
    ///
    /// Uploads larger than `max_upload_bytes` are rejected mid-stream.
    pub async fn bind<S: TransferService>(
        addr: &str,
        service: Arc<S>,
        max_upload_bytes: usize,
    ) -> Result<FlightServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FlightError::connection(addr, e))?;
        let addr = listener.local_addr()?;

        info!("Flight server listening on {}", addr);

        let flight = FlightServiceServer::new(TransferEndpoint::new(service, max_upload_bytes))
            .max_decoding_message_size(TransportConfig::MAX_MESSAGE_SIZE)
            .max_encoding_message_size(TransportConfig::MAX_MESSAGE_SIZE);

        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await.and_then(|(stream, _)| {
                stream.set_nodelay(true)?;
                Ok(stream)
            });
            Some((accepted, listener))
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
                info!("Flight server shutting down");
            };
            if let Err(e) = tonic::transport::Server::builder()
                .add_service(flight)
                .serve_with_incoming_shutdown(incoming, shutdown)
                .await
            {
                error!("Flight server error: {}", e);
            }
        });

        Ok(FlightServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }
}

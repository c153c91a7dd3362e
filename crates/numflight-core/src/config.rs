//! Centralized configuration for numflight.
//!
//! Transport limits are constants; per-server behavior lives in [`ServerConfig`].

use std::time::Duration;

/// Limits for the Flight transport.
pub struct TransportConfig;

impl TransportConfig {
    /// Approximate payload of one encoded batch. Larger arrays span several batches.
    pub const BATCH_BYTES: usize = 1024 * 1024; // 1MB
    /// Largest single gRPC message either side accepts.
    pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024; // 64MB
    /// Default cap on the bytes received for one upload.
    pub const MAX_UPLOAD_SIZE: usize = 2 * 1024 * 1024 * 1024; // 2GB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Default bind address for servers.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const HOST: &'static str = "127.0.0.1";
    pub const PORT: u16 = 8080;
}

/// Field metadata key holding an array's JSON-encoded shape.
pub const SHAPE_METADATA_KEY: &str = "numflight.shape";

/// What happens to a computed result once it has been downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// The result is released after the first download.
    #[default]
    Once,
    /// The result stays available until replaced by a new upload.
    Retain,
}

/// Runtime configuration for a compute server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub delivery: DeliveryMode,
    /// Upper bound on a single handler invocation. `None` waits forever.
    pub compute_timeout: Option<Duration>,
    /// Uploads larger than this are rejected while they stream in.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ServerDefaults::HOST.to_string(),
            port: ServerDefaults::PORT,
            delivery: DeliveryMode::default(),
            compute_timeout: None,
            max_upload_bytes: TransportConfig::MAX_UPLOAD_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = Some(timeout);
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// `host:port` string used for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

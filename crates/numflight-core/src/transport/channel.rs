//! gRPC client side of the transfer channel.
//!
//! A [`FlightChannel`] holds one HTTP/2 connection to its [`Location`].
//! Calls are multiplexed over it, so one channel serves concurrent callers.
//! The connection is opened eagerly and re-established on demand after it
//! drops.

use super::service::{DescriptorStatus, UploadAck, LIST_DESCRIPTORS};
use super::stream::{collect_table, table_to_flight_data};
use crate::codec::Table;
use crate::config::TransportConfig;
use crate::descriptor::Descriptor;
use crate::error::{FlightError, Result};
use arrow_flight::error::FlightError as FlightStreamError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Action, FlightClient, PutResult};
use bytes::Bytes;
use futures::TryStreamExt;
use std::error::Error as _;
use std::fmt;
use std::net::SocketAddr;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::debug;
use url::Url;

/// Network address of a server, parsed from `grpc://host:port` or `host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    addr: String,
}

impl Location {
    /// Accepted schemes are `grpc`, `grpc+tcp` and `tcp`; a bare `host:port`
    /// means `grpc`.
    pub fn parse(location: &str) -> Result<Self> {
        let invalid = |message: String| FlightError::Connection {
            location: location.to_string(),
            message,
            source: None,
        };

        let url = if location.contains("://") {
            Url::parse(location)
        } else {
            Url::parse(&format!("grpc://{}", location))
        }
        .map_err(|e| invalid(format!("invalid location: {}", e)))?;

        if !matches!(url.scheme(), "grpc" | "grpc+tcp" | "tcp") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("location has no host".to_string()))?;
        let port = url
            .port()
            .ok_or_else(|| invalid("location has no port".to_string()))?;

        Ok(Self {
            addr: format!("{}:{}", host, port),
        })
    }

    /// `host:port` form used for connecting.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// URI handed to the gRPC endpoint.
    fn endpoint_uri(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl From<SocketAddr> for Location {
    fn from(addr: SocketAddr) -> Self {
        Self {
            addr: addr.to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grpc://{}", self.addr)
    }
}

/// Client end of the transfer channel.
#[derive(Debug, Clone)]
pub struct FlightChannel {
    location: Location,
    channel: Channel,
}

impl FlightChannel {
    /// Connect to `location`, failing fast if it is unreachable.
    pub async fn connect(location: Location) -> Result<Self> {
        let channel = Endpoint::from_shared(location.endpoint_uri())
            .map_err(|e| FlightError::unreachable(location.to_string(), e.to_string()))?
            .connect_timeout(TransportConfig::CONNECT_TIMEOUT)
            .tcp_nodelay(true)
            .connect()
            .await
            .map_err(|e| FlightError::unreachable(location.to_string(), error_chain(&e)))?;

        debug!("Channel connected to {}", location);
        Ok(Self { location, channel })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Flight client sharing this channel's connection.
    fn client(&self) -> FlightClient {
        let inner = FlightServiceClient::new(self.channel.clone())
            .max_decoding_message_size(TransportConfig::MAX_MESSAGE_SIZE)
            .max_encoding_message_size(TransportConfig::MAX_MESSAGE_SIZE);
        FlightClient::new_from_inner(inner)
    }

    /// Push `table` to the server under `descriptor` and wait for the ack.
    pub async fn upload(&self, descriptor: &Descriptor, table: &Table) -> Result<()> {
        let data = table_to_flight_data(table, Some(descriptor.to_flight_descriptor()));
        let mut client = self.client();

        let responses = client
            .do_put(data)
            .await
            .map_err(|e| self.upload_error(descriptor, e))?;
        let results: Vec<PutResult> = responses
            .try_collect()
            .await
            .map_err(|e| self.upload_error(descriptor, e))?;

        let result = results
            .first()
            .ok_or_else(|| FlightError::protocol("upload finished without an acknowledgement"))?;
        let ack: UploadAck = serde_json::from_slice(&result.app_metadata)?;
        debug!("Upload of {} acknowledged ({} columns)", descriptor, ack.columns);
        Ok(())
    }

    /// Pull the table stored under `descriptor`.
    pub async fn download(&self, descriptor: &Descriptor) -> Result<Table> {
        let mut client = self.client();
        let batches = client
            .do_get(descriptor.to_ticket())
            .await
            .map_err(|e| self.download_error(descriptor, e))?;
        collect_table(batches)
            .await
            .map_err(|e| self.download_error(descriptor, e))
    }

    /// Ask the server which descriptors it currently holds.
    pub async fn list_descriptors(&self) -> Result<Vec<DescriptorStatus>> {
        let mut client = self.client();
        let action = Action {
            r#type: LIST_DESCRIPTORS.to_string(),
            body: Bytes::new(),
        };

        let responses = client
            .do_action(action)
            .await
            .map_err(|e| self.other_error(e))?;
        let bodies: Vec<Bytes> = responses
            .try_collect()
            .await
            .map_err(|e| self.other_error(e))?;
        let body = bodies
            .first()
            .ok_or_else(|| FlightError::protocol("list_descriptors returned no result"))?;
        Ok(serde_json::from_slice(body)?)
    }

    /// Drop the connection.
    pub fn close(self) {
        debug!("Channel to {} closed", self.location);
    }

    /// Rebuild an upload failure. Anything the server reports is a rejection.
    fn upload_error(&self, descriptor: &Descriptor, err: FlightStreamError) -> FlightError {
        match err {
            FlightStreamError::Tonic(status) if !is_transport_failure(&status) => {
                FlightError::UploadRejected {
                    command: descriptor.to_string(),
                    message: status.message().to_string(),
                }
            }
            other => self.other_error(other),
        }
    }

    /// Rebuild a download failure, keeping the kinds the server reports.
    fn download_error(&self, descriptor: &Descriptor, err: FlightStreamError) -> FlightError {
        let command = descriptor.unpack().to_string();
        match err {
            FlightStreamError::Tonic(status) => match status.code() {
                Code::NotFound => FlightError::NotFound { command },
                Code::Internal => FlightError::Compute {
                    command,
                    message: status.message().to_string(),
                },
                Code::InvalidArgument => FlightError::InvalidCommand {
                    message: status.message().to_string(),
                },
                _ => self.other_error(FlightStreamError::Tonic(status)),
            },
            FlightStreamError::Arrow(e) => FlightError::malformed(e.to_string()),
            other => self.other_error(other),
        }
    }

    fn other_error(&self, err: FlightStreamError) -> FlightError {
        match err {
            FlightStreamError::Tonic(status) if is_transport_failure(&status) => {
                FlightError::unreachable(self.location.to_string(), status_chain(&status))
            }
            FlightStreamError::Tonic(status) => FlightError::protocol(format!(
                "{:?}: {}",
                status.code(),
                status.message()
            )),
            FlightStreamError::Arrow(e) => FlightError::Arrow(e),
            other => FlightError::protocol(other.to_string()),
        }
    }
}

/// Whether `status` comes from the connection rather than from the server.
fn is_transport_failure(status: &tonic::Status) -> bool {
    matches!(
        status.code(),
        Code::Unavailable | Code::Unknown | Code::Cancelled | Code::DeadlineExceeded
    )
}

fn status_chain(status: &tonic::Status) -> String {
    match status.source() {
        Some(source) => format!("{}: {}", status.message(), source),
        None => status.message().to_string(),
    }
}

fn error_chain(err: &tonic::transport::Error) -> String {
    match err.source() {
        Some(source) => format!("{}: {}", err, source),
        None => err.to_string(),
    }
}

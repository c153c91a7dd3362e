//! Client façade.
//!
//! Ties the codec, the command envelope and the transfer channel together:
//! callers deal in [`ArrayMap`]s and command strings only.

use crate::array::ArrayMap;
use crate::codec::{decode, encode, Table};
use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::transport::{DescriptorStatus, FlightChannel, Location};
use tracing::debug;

/// Connection to one numflight server.
///
/// Calls are multiplexed over one gRPC connection, so a client can be shared
/// between tasks. Concurrent requests need distinct commands.
#[derive(Debug, Clone)]
pub struct Client {
    channel: FlightChannel,
}

impl Client {
    /// Connect to `location` (`grpc://host:port`, `grpc+tcp://host:port` or `host:port`).
    ///
    /// Fails with [`FlightError::Connection`](crate::FlightError::Connection)
    /// if the server is unreachable.
    pub async fn connect(location: &str) -> Result<Self> {
        let location = Location::parse(location)?;
        let channel = FlightChannel::connect(location).await?;
        Ok(Self { channel })
    }

    pub fn location(&self) -> &Location {
        self.channel.location()
    }

    /// Encode `data` and upload it under `command`.
    ///
    /// Encoding and command validation happen before anything is sent.
    pub async fn write(&self, command: &str, data: &ArrayMap) -> Result<()> {
        let descriptor = Descriptor::pack(command)?;
        let table = encode(data)?;
        debug!("Writing {} columns for command {}", table.num_columns(), command);
        self.channel.upload(&descriptor, &table).await
    }

    /// Download the raw table stored under `command`.
    pub async fn get(&self, command: &str) -> Result<Table> {
        let descriptor = Descriptor::pack(command)?;
        self.channel.download(&descriptor).await
    }

    /// Upload `data`, then download and decode the server's result.
    pub async fn compute(&self, command: &str, data: &ArrayMap) -> Result<ArrayMap> {
        self.write(command, data).await?;
        let table = self.get(command).await?;
        decode(&table)
    }

    /// Descriptors the server currently tracks, with their states.
    pub async fn list_descriptors(&self) -> Result<Vec<DescriptorStatus>> {
        self.channel.list_descriptors().await
    }

    /// Close the connection.
    pub async fn close(self) {
        self.channel.close();
    }
}

//! Command envelope: the token addressing one request/response cycle.

use crate::error::{FlightError, Result};
use arrow_flight::flight_descriptor::DescriptorType;
use arrow_flight::{FlightDescriptor, Ticket};
use bytes::Bytes;
use std::fmt;

/// Non-empty UTF-8 command addressing a slot on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Descriptor(String);

impl Descriptor {
    /// Wrap a command string.
    pub fn pack(command: impl Into<String>) -> Result<Self> {
        let command = command.into();
        if command.is_empty() {
            return Err(FlightError::InvalidCommand {
                message: "command must not be empty".to_string(),
            });
        }
        Ok(Self(command))
    }

    /// Rebuild a descriptor from raw command bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let command = std::str::from_utf8(bytes).map_err(|e| FlightError::InvalidCommand {
            message: format!("command is not valid UTF-8: {}", e),
        })?;
        Self::pack(command)
    }

    /// Read the command out of a `CMD` flight descriptor.
    pub fn from_flight_descriptor(descriptor: &FlightDescriptor) -> Result<Self> {
        if descriptor.r#type() != DescriptorType::Cmd {
            return Err(FlightError::InvalidCommand {
                message: format!("expected a command descriptor, got {:?}", descriptor.r#type()),
            });
        }
        Self::from_bytes(&descriptor.cmd)
    }

    /// Read the command out of a download ticket.
    pub fn from_ticket(ticket: &Ticket) -> Result<Self> {
        Self::from_bytes(&ticket.ticket)
    }

    /// The command string this descriptor carries.
    pub fn unpack(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Upload form: a `CMD` descriptor holding the command bytes.
    pub fn to_flight_descriptor(&self) -> FlightDescriptor {
        FlightDescriptor::new_cmd(Bytes::copy_from_slice(self.as_bytes()))
    }

    /// Download form: a ticket holding the command bytes.
    pub fn to_ticket(&self) -> Ticket {
        Ticket {
            ticket: Bytes::copy_from_slice(self.as_bytes()),
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

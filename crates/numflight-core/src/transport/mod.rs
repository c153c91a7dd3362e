//! Transfer channel for columnar tables, carried over Arrow Flight.
//!
//! Two stream primitives move tables: `do_put` pushes a table under a command
//! descriptor, `do_get` pulls the table stored under a ticket holding the same
//! command. A `list_descriptors` action reports what the server tracks.
//!
//! # Architecture
//!
//! - **Service**: Adapts a [`TransferService`] to the Flight gRPC service
//! - **Server**: Binds a listener and serves the Flight service with graceful shutdown
//! - **Channel**: Client end over one multiplexed gRPC connection
//! - **Stream**: Table ⇄ `FlightData` conversion shared by both ends

pub mod channel;
pub mod server;
pub mod service;
pub mod stream;

pub use channel::{FlightChannel, Location};
pub use server::{FlightServer, FlightServerHandle};
pub use service::{DescriptorStatus, TransferEndpoint, TransferService, UploadAck, LIST_DESCRIPTORS};
pub use stream::{collect_table, table_to_flight_data};

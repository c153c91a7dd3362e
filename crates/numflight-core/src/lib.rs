//! numflight - move named n-dimensional arrays between processes over Arrow Flight.
//!
//! A client uploads a map of named arrays under a command string. The server
//! decodes it, runs its compute handler, and keeps the result under the same
//! command until the client downloads it.
//!
//! # Example
//!
//! ```rust,ignore
//! use numflight::{handlers, ArrayMap, Client, NdArray, Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> numflight::Result<()> {
//!     let server = Server::start(ServerConfig::default().with_port(0), handlers::Double).await?;
//!     let client = Client::connect(&server.location().to_string()).await?;
//!
//!     let mut input = ArrayMap::new();
//!     input.insert("input".to_string(), NdArray::from(vec![1i64, 2, 3]));
//!
//!     let output = client.compute("double", &input).await?;
//!     println!("{:?}", output["input"]);
//!
//!     Ok(())
//! }
//! ```

pub mod array;
pub mod client;
pub mod codec;
pub mod config;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod server;
pub mod transport;

// Re-export commonly used types
pub use array::{ArrayMap, DType, NdArray};
pub use client::Client;
pub use codec::{decode, encode, encode_with_batch_size, ColumnInfo, Table};
pub use config::{DeliveryMode, ServerConfig, ServerDefaults, TransportConfig};
pub use descriptor::Descriptor;
pub use dispatcher::{ComputeDispatcher, ComputeHandler, RequestState};
pub use error::{FlightError, Result};
pub use server::{Server, ServerHandle};
pub use transport::{DescriptorStatus, Location};

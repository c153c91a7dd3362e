//! Flight gRPC service in front of a [`TransferService`].
//!
//! Protocol:
//!   do_put(FlightDescriptor { cmd }, batches) → PutResult { UploadAck JSON }
//!   do_get(Ticket { ticket: cmd })             → stream of batches
//!   do_action("list_descriptors")              → JSON list of DescriptorStatus
//!   list_actions()                             → describes the action above
//!
//! Every other Flight method answers `Unimplemented`.

use super::stream::table_to_flight_data;
use crate::codec::Table;
use crate::descriptor::Descriptor;
use crate::error::Result;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::error::FlightError as FlightStreamError;
use arrow_flight::flight_service_server::FlightService;
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

/// Action type answering with the server's tracked descriptors.
pub const LIST_DESCRIPTORS: &str = "list_descriptors";

/// Server-side handlers for the two stream primitives.
#[async_trait::async_trait]
pub trait TransferService: Send + Sync + 'static {
    /// Accept a fully received table. Returns the number of columns taken.
    async fn on_upload(&self, descriptor: Descriptor, table: Table) -> Result<usize>;

    /// Produce the table to stream back for `descriptor`.
    async fn on_download(&self, descriptor: &Descriptor) -> Result<Table>;

    /// Report every descriptor the service currently tracks.
    async fn list_descriptors(&self) -> Vec<DescriptorStatus>;
}

/// State of one descriptor on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorStatus {
    pub command: String,
    pub state: String,
}

/// Body of the `PutResult` acknowledging an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub command: String,
    pub columns: usize,
}

/// Flight service wrapping a [`TransferService`].
pub struct TransferEndpoint<S> {
    service: Arc<S>,
    max_upload_bytes: usize,
}

impl<S: TransferService> TransferEndpoint<S> {
    pub fn new(service: Arc<S>, max_upload_bytes: usize) -> Self {
        Self {
            service,
            max_upload_bytes,
        }
    }
}

fn invalid(msg: impl Into<String>) -> Status {
    Status::invalid_argument(msg.into())
}

/// Map a failure from the batch decoder to the status sent back.
fn stream_status(err: FlightStreamError) -> Status {
    match err {
        FlightStreamError::Tonic(status) => status,
        other => invalid(format!("malformed upload stream: {}", other)),
    }
}

/// Bytes of one message that count against the upload limit.
fn message_len(data: &FlightData) -> usize {
    data.data_header.len() + data.data_body.len() + data.app_metadata.len()
}

#[tonic::async_trait]
impl<S: TransferService> FlightService for TransferEndpoint<S> {
    type HandshakeStream = BoxStream<'static, std::result::Result<HandshakeResponse, Status>>;
    type ListFlightsStream = BoxStream<'static, std::result::Result<FlightInfo, Status>>;
    type DoGetStream = BoxStream<'static, std::result::Result<FlightData, Status>>;
    type DoPutStream = BoxStream<'static, std::result::Result<PutResult, Status>>;
    type DoExchangeStream = BoxStream<'static, std::result::Result<FlightData, Status>>;
    type DoActionStream = BoxStream<'static, std::result::Result<arrow_flight::Result, Status>>;
    type ListActionsStream = BoxStream<'static, std::result::Result<ActionType, Status>>;

    async fn handshake(
        &self,
        _req: Request<Streaming<HandshakeRequest>>,
    ) -> std::result::Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake is not supported"))
    }

    async fn list_flights(
        &self,
        _req: Request<Criteria>,
    ) -> std::result::Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("list_flights is not supported"))
    }

    async fn get_flight_info(
        &self,
        _req: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("get_flight_info is not supported"))
    }

    async fn poll_flight_info(
        &self,
        _req: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info is not supported"))
    }

    async fn get_schema(
        &self,
        _req: Request<FlightDescriptor>,
    ) -> std::result::Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("get_schema is not supported"))
    }

    /// Stream the stored table for the command in the ticket.
    async fn do_get(
        &self,
        req: Request<Ticket>,
    ) -> std::result::Result<Response<Self::DoGetStream>, Status> {
        let descriptor = Descriptor::from_ticket(req.get_ref())?;
        debug!("Flight do_get: {}", descriptor);

        let table = self.service.on_download(&descriptor).await?;
        let stream = table_to_flight_data(&table, None)
            .map_err(|e| Status::internal(e.to_string()))
            .boxed();
        Ok(Response::new(stream))
    }

    /// Receive a table addressed by the descriptor on its first message.
    ///
    /// The upload is cut off with `ResourceExhausted` as soon as it grows past
    /// the configured limit.
    async fn do_put(
        &self,
        req: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoPutStream>, Status> {
        let mut messages = req.into_inner();
        let first = messages
            .message()
            .await?
            .ok_or_else(|| invalid("upload stream is empty"))?;
        let descriptor = first
            .flight_descriptor
            .as_ref()
            .ok_or_else(|| invalid("upload carries no flight descriptor"))
            .and_then(|d| Descriptor::from_flight_descriptor(d).map_err(Status::from))?;
        debug!("Flight do_put: {}", descriptor);

        let limit = self.max_upload_bytes;
        let mut received = message_len(&first);
        if received > limit {
            return Err(Status::resource_exhausted(format!(
                "upload exceeds {} bytes",
                limit
            )));
        }
        let rest = messages.map(move |message| {
            let message = message.map_err(FlightStreamError::Tonic)?;
            received += message_len(&message);
            if received > limit {
                return Err(FlightStreamError::Tonic(Status::resource_exhausted(format!(
                    "upload exceeds {} bytes",
                    limit
                ))));
            }
            Ok(message)
        });
        let data = futures::stream::once(futures::future::ready(Ok(first))).chain(rest);

        let table = super::stream::collect_table(FlightRecordBatchStream::new_from_flight_data(data))
            .await
            .map_err(|e| {
                warn!("Upload for {} rejected: {}", descriptor, e);
                stream_status(e)
            })?;

        let columns = self
            .service
            .on_upload(descriptor.clone(), table)
            .await
            .map_err(|e| {
                warn!("Upload for {} rejected: {}", descriptor, e);
                Status::from(e)
            })?;

        let ack = UploadAck {
            command: descriptor.unpack().to_string(),
            columns,
        };
        let body = serde_json::to_vec(&ack).map_err(|e| Status::internal(e.to_string()))?;
        let result = PutResult {
            app_metadata: Bytes::from(body),
        };
        let stream = futures::stream::once(futures::future::ready(Ok(result))).boxed();
        Ok(Response::new(stream))
    }

    async fn do_exchange(
        &self,
        _req: Request<Streaming<FlightData>>,
    ) -> std::result::Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("do_exchange is not supported"))
    }

    async fn do_action(
        &self,
        req: Request<Action>,
    ) -> std::result::Result<Response<Self::DoActionStream>, Status> {
        let action = req.into_inner();
        if action.r#type != LIST_DESCRIPTORS {
            return Err(invalid(format!("unknown action {}", action.r#type)));
        }

        let entries = self.service.list_descriptors().await;
        let body = serde_json::to_vec(&entries).map_err(|e| Status::internal(e.to_string()))?;
        let result = arrow_flight::Result {
            body: Bytes::from(body),
        };
        let stream = futures::stream::once(futures::future::ready(Ok(result))).boxed();
        Ok(Response::new(stream))
    }

    async fn list_actions(
        &self,
        _req: Request<Empty>,
    ) -> std::result::Result<Response<Self::ListActionsStream>, Status> {
        let actions = vec![ActionType {
            r#type: LIST_DESCRIPTORS.to_string(),
            description: "Tracked descriptors with their states, as a JSON list.".to_string(),
        }];
        let stream = futures::stream::iter(actions.into_iter().map(Ok)).boxed();
        Ok(Response::new(stream))
    }
}

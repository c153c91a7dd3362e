//! Table ⇄ `FlightData` conversion.

use crate::codec::Table;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::{FlightDataEncoder, FlightDataEncoderBuilder};
use arrow_flight::error::FlightError as FlightStreamError;
use arrow_flight::FlightDescriptor;
use futures::{stream, TryStreamExt};

/// Encode `table` as a stream of `FlightData`, schema first.
///
/// `descriptor` rides on the first message, which is how `do_put` addresses
/// an upload. The schema is sent even when the table has no batches.
pub fn table_to_flight_data(table: &Table, descriptor: Option<FlightDescriptor>) -> FlightDataEncoder {
    let batches = table.batches().to_vec();
    FlightDataEncoderBuilder::new()
        .with_schema(table.schema().clone())
        .with_flight_descriptor(descriptor)
        .build(stream::iter(batches.into_iter().map(Ok)))
}

/// Drain a decoded batch stream into a [`Table`].
pub async fn collect_table(
    mut batches: FlightRecordBatchStream,
) -> Result<Table, FlightStreamError> {
    let mut collected = Vec::new();
    while let Some(batch) = batches.try_next().await? {
        collected.push(batch);
    }
    let schema = batches
        .schema()
        .cloned()
        .ok_or_else(|| FlightStreamError::ProtocolError("stream carried no schema".to_string()))?;
    Ok(Table::new(schema, collected))
}

//! Server-side compute dispatch.
//!
//! Every uploaded table is decoded, handed to the registered
//! [`ComputeHandler`] together with its command, and the re-encoded result is
//! parked under the same descriptor until it is downloaded.
//!
//! ```text
//! Received → Decoding → Computing → Encoding → Ready → Delivered
//!     └──────────┴───────────┴──────────┴──→ Failed
//! ```
//!
//! The slot map lock is held only for state transitions. Decoding, the
//! handler and encoding all run on the blocking pool, so a slow or panicking
//! step never stalls other descriptors and always ends in a terminal state. A
//! download sees either nothing, a finished table, or a recorded failure.

use crate::array::ArrayMap;
use crate::codec::{decode, encode, Table};
use crate::config::{DeliveryMode, ServerConfig};
use crate::descriptor::Descriptor;
use crate::error::{FlightError, Result};
use crate::transport::{DescriptorStatus, TransferService};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// The single computation a server runs over uploaded arrays.
///
/// `command` is the descriptor's command string, passed through as context.
/// Closures with the matching signature implement this trait.
pub trait ComputeHandler: Send + Sync + 'static {
    fn compute(&self, command: &str, input: ArrayMap) -> anyhow::Result<ArrayMap>;
}

impl<F> ComputeHandler for F
where
    F: Fn(&str, ArrayMap) -> anyhow::Result<ArrayMap> + Send + Sync + 'static,
{
    fn compute(&self, command: &str, input: ArrayMap) -> anyhow::Result<ArrayMap> {
        self(command, input)
    }
}

/// Lifecycle position of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Decoding,
    Computing,
    Encoding,
    Ready,
    Delivered,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Received => "received",
            RequestState::Decoding => "decoding",
            RequestState::Computing => "computing",
            RequestState::Encoding => "encoding",
            RequestState::Ready => "ready",
            RequestState::Delivered => "delivered",
            RequestState::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum SlotState {
    InProgress(RequestState),
    Ready(Table),
    Failed(String),
}

impl SlotState {
    fn request_state(&self) -> RequestState {
        match self {
            SlotState::InProgress(state) => *state,
            SlotState::Ready(_) => RequestState::Ready,
            SlotState::Failed(_) => RequestState::Failed,
        }
    }
}

struct Slot {
    generation: u64,
    state: SlotState,
}

/// Descriptor-keyed store of in-flight and finished computations.
pub struct ComputeDispatcher {
    handler: Arc<dyn ComputeHandler>,
    delivery: DeliveryMode,
    compute_timeout: Option<Duration>,
    slots: Mutex<HashMap<Descriptor, Slot>>,
    next_generation: AtomicU64,
}

impl ComputeDispatcher {
    pub fn new(handler: Arc<dyn ComputeHandler>) -> Self {
        Self {
            handler,
            delivery: DeliveryMode::default(),
            compute_timeout: None,
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Build a dispatcher with the delivery mode and timeout from `config`.
    pub fn from_config(handler: Arc<dyn ComputeHandler>, config: &ServerConfig) -> Self {
        let mut dispatcher = Self::new(handler).with_delivery(config.delivery);
        dispatcher.compute_timeout = config.compute_timeout;
        dispatcher
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout = Some(timeout);
        self
    }

    /// Current state of `descriptor`, if the dispatcher tracks it.
    pub async fn state(&self, descriptor: &Descriptor) -> Option<RequestState> {
        self.slots
            .lock()
            .await
            .get(descriptor)
            .map(|slot| slot.state.request_state())
    }

    /// Number of tracked descriptors.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Every tracked descriptor with its state, sorted by command.
    pub async fn snapshot(&self) -> Vec<DescriptorStatus> {
        let slots = self.slots.lock().await;
        let mut entries: Vec<DescriptorStatus> = slots
            .iter()
            .map(|(descriptor, slot)| DescriptorStatus {
                command: descriptor.unpack().to_string(),
                state: slot.state.request_state().as_str().to_string(),
            })
            .collect();
        entries.sort_by(|a, b| a.command.cmp(&b.command));
        entries
    }

    /// Move `descriptor` to `state` if it still belongs to `generation`.
    ///
    /// A newer upload to the same descriptor takes over the slot; the older
    /// run then finishes without touching it.
    async fn transition(&self, descriptor: &Descriptor, generation: u64, state: SlotState) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(descriptor) {
            Some(slot) if slot.generation == generation => {
                debug!(
                    "{}: {} -> {}",
                    descriptor,
                    slot.state.request_state(),
                    state.request_state()
                );
                slot.state = state;
                true
            }
            _ => {
                debug!("{}: superseded, dropping {}", descriptor, state.request_state());
                false
            }
        }
    }

    /// Decode, compute and store the result for one upload.
    ///
    /// Decode failures reject the upload. Handler failures are recorded and
    /// surface on the next download; the upload itself is acknowledged.
    pub async fn upload(&self, descriptor: Descriptor, table: Table) -> Result<usize> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let columns = table.num_columns();
        info!("Processing upload for command: {}", descriptor);

        {
            let mut slots = self.slots.lock().await;
            let previous = slots.insert(
                descriptor.clone(),
                Slot {
                    generation,
                    state: SlotState::InProgress(RequestState::Received),
                },
            );
            if previous.is_some() {
                warn!("Replacing existing entry for command: {}", descriptor);
            }
        }

        self.transition(&descriptor, generation, SlotState::InProgress(RequestState::Decoding))
            .await;
        let decoded = run_blocking(move || decode(&table))
            .await
            .unwrap_or_else(|panic| Err(FlightError::malformed(format!("decoding panicked: {}", panic))));
        let input = match decoded {
            Ok(input) => input,
            Err(e) => {
                self.transition(&descriptor, generation, SlotState::Failed(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        self.transition(&descriptor, generation, SlotState::InProgress(RequestState::Computing))
            .await;
        let output = match self.run_handler(descriptor.unpack().to_string(), input).await {
            Ok(output) => output,
            Err(message) => {
                warn!("Compute failed for command {}: {}", descriptor, message);
                self.transition(&descriptor, generation, SlotState::Failed(message))
                    .await;
                return Ok(columns);
            }
        };

        self.transition(&descriptor, generation, SlotState::InProgress(RequestState::Encoding))
            .await;
        let encoded = run_blocking(move || encode(&output))
            .await
            .and_then(|result| result.map_err(|e| e.to_string()));
        let state = match encoded {
            Ok(result) => {
                info!(
                    "Result ready for command {}: {:?}",
                    descriptor,
                    result.column_names()
                );
                SlotState::Ready(result)
            }
            Err(message) => {
                warn!("Handler output for command {} rejected: {}", descriptor, message);
                SlotState::Failed(format!("handler output could not be encoded: {}", message))
            }
        };
        self.transition(&descriptor, generation, state).await;

        Ok(columns)
    }

    async fn run_handler(&self, command: String, input: ArrayMap) -> std::result::Result<ArrayMap, String> {
        let handler = self.handler.clone();
        let task = tokio::task::spawn_blocking(move || handler.compute(&command, input));

        let joined = match self.compute_timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => return Err(format!("handler timed out after {:?}", limit)),
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) => Err(format!("handler {}", join_failure(e))),
        }
    }

    /// Hand out the stored result for `descriptor`.
    ///
    /// In [`DeliveryMode::Once`] the slot is released, so the result is
    /// reported exactly once. In [`DeliveryMode::Retain`] a ready result stays.
    /// A recorded failure is reported once in either mode.
    pub async fn download(&self, descriptor: &Descriptor) -> Result<Table> {
        let not_found = || FlightError::NotFound {
            command: descriptor.unpack().to_string(),
        };

        let mut slots = self.slots.lock().await;
        let slot = slots.get(descriptor).ok_or_else(not_found)?;
        match &slot.state {
            SlotState::InProgress(state) => {
                debug!("Download for {} while still {}", descriptor, state);
                return Err(not_found());
            }
            SlotState::Ready(table) if self.delivery == DeliveryMode::Retain => {
                return Ok(table.clone());
            }
            SlotState::Ready(_) | SlotState::Failed(_) => {}
        }

        match slots.remove(descriptor).map(|slot| slot.state) {
            Some(SlotState::Ready(table)) => {
                debug!("{}: {} -> {}", descriptor, RequestState::Ready, RequestState::Delivered);
                info!("Delivered result for command: {}", descriptor);
                Ok(table)
            }
            Some(SlotState::Failed(message)) => Err(FlightError::Compute {
                command: descriptor.unpack().to_string(),
                message,
            }),
            _ => Err(not_found()),
        }
    }
}

/// Run CPU-bound work on the blocking pool. A panic comes back as its message.
async fn run_blocking<T, F>(work: F) -> std::result::Result<T, String>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(join_failure)
}

fn join_failure(err: JoinError) -> String {
    if !err.is_panic() {
        return format!("task failed: {}", err);
    }
    let payload = err.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("panicked: {}", detail)
}

#[async_trait::async_trait]
impl TransferService for ComputeDispatcher {
    async fn on_upload(&self, descriptor: Descriptor, table: Table) -> Result<usize> {
        self.upload(descriptor, table).await
    }

    async fn on_download(&self, descriptor: &Descriptor) -> Result<Table> {
        self.download(descriptor).await
    }

    async fn list_descriptors(&self) -> Vec<DescriptorStatus> {
        self.snapshot().await
    }
}

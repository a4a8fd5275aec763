//! Agent update streaming.
//!
//! Each stream owns an [`UpdateCursor`]. The first fetch reads the full
//! fleet state, later fetches read only what changed since the cursor, so
//! concurrent streams never disturb each other.
//!
//! ```text
//!   fetch ──► empty? ──yes──► heartbeat ──┐
//!     ▲         │no                       │
//!     │         ▼                         ▼
//!     │   [schema + chunk 1] … [chunk n] ─► sleep(interval)
//!     └────────────────────────────────────┘
//! ```
//!
//! Cancellation is raced against every send and against the sleep, so a
//! receiver that stops reading cannot hold a cancelled stream open.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::debug;

use periscope_state::{AgentDirectory, AgentUpdateBatch, UpdateCursor};

use crate::duration::parse_duration;
use crate::error::{MetadataError, MetadataResult};
use crate::messages::{AgentUpdatesRequest, AgentUpdatesResponse};
use crate::schema::schema_info;

/// Validated streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub chunk_size: usize,
    pub interval: Duration,
}

impl StreamParams {
    pub fn from_request(req: &AgentUpdatesRequest) -> MetadataResult<Self> {
        if req.max_updates_per_response == 0 {
            return Err(MetadataError::invalid_argument(
                "max_updates_per_response must be specified and greater than zero",
            ));
        }
        let raw = req
            .max_update_interval
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                MetadataError::invalid_argument("max_update_interval must be specified")
            })?;
        let interval = parse_duration(raw)
            .ok_or_else(|| MetadataError::internal(format!("failed to parse duration {raw:?}")))?;

        Ok(Self {
            chunk_size: req.max_updates_per_response as usize,
            interval,
        })
    }
}

/// The receiving side of an update stream went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("update stream closed by receiver")]
pub struct SinkClosed;

/// Destination for streamed update messages.
pub trait UpdateSink: Send {
    fn send(
        &mut self,
        msg: AgentUpdatesResponse,
    ) -> impl Future<Output = Result<(), SinkClosed>> + Send;
}

impl UpdateSink for mpsc::Sender<Result<AgentUpdatesResponse, Status>> {
    fn send(
        &mut self,
        msg: AgentUpdatesResponse,
    ) -> impl Future<Output = Result<(), SinkClosed>> + Send {
        let sent = mpsc::Sender::send(self, Ok(msg));
        async move { sent.await.map_err(|_| SinkClosed) }
    }
}

/// Split one fetch into the messages of a flush.
///
/// The schema and the `full_state` flag ride on the first message. An
/// empty batch becomes a single heartbeat.
pub fn flush_messages(
    batch: AgentUpdateBatch,
    chunk_size: usize,
) -> MetadataResult<Vec<AgentUpdatesResponse>> {
    if batch.is_empty() {
        return Ok(vec![AgentUpdatesResponse {
            full_state: batch.full_state,
            ..Default::default()
        }]);
    }

    let mut schemas = batch.schema.as_ref().map(schema_info).transpose()?;
    if batch.updates.is_empty() {
        return Ok(vec![AgentUpdatesResponse {
            agent_updates: Vec::new(),
            agent_schemas: schemas,
            full_state: batch.full_state,
        }]);
    }

    let mut full_state = batch.full_state;
    Ok(batch
        .updates
        .chunks(chunk_size.max(1))
        .map(|chunk| AgentUpdatesResponse {
            agent_updates: chunk.to_vec(),
            agent_schemas: schemas.take(),
            full_state: std::mem::take(&mut full_state),
        })
        .collect())
}

/// Runs the fetch/flush/sleep loop for one stream.
#[derive(Clone)]
pub struct UpdateStreamer {
    agents: Arc<dyn AgentDirectory>,
}

impl UpdateStreamer {
    pub fn new(agents: Arc<dyn AgentDirectory>) -> Self {
        Self { agents }
    }

    /// Stream updates into `sink` until `cancel` fires or the sink closes.
    ///
    /// Both of those end the stream with `Ok`. A failed fetch or schema
    /// conversion ends it with the error.
    pub async fn run<S: UpdateSink>(
        &self,
        params: StreamParams,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> MetadataResult<()> {
        let mut cursor: Option<UpdateCursor> = None;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let batch = self.agents.agent_updates(cursor)?;
            let next = batch.cursor;
            let full_state = batch.full_state;
            let messages = flush_messages(batch, params.chunk_size)?;
            debug!(
                full_state,
                messages = messages.len(),
                seq = next.seq,
                "flushing agent updates"
            );
            cursor = Some(next);

            for msg in messages {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    sent = sink.send(msg) => {
                        if sent.is_err() {
                            debug!("agent update receiver closed");
                            return Ok(());
                        }
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(params.interval) => {}
            }
        }
    }
}

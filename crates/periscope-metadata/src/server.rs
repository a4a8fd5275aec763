//! RPC façade over the metadata control plane.
//!
//! Validates requests, delegates to the health evaluator, schema
//! conversions, update streamer and tracepoint coordinator, and surfaces
//! failures as [`tonic::Status`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::Status;
use tracing::{debug, warn};

use periscope_state::*;

use crate::duration::parse_duration;
use crate::error::MetadataError;
use crate::health::HealthEvaluator;
use crate::messages::*;
use crate::schema::{relation_map, schema_info};
use crate::streamer::{StreamParams, UpdateSink, UpdateStreamer};
use crate::tracepoint::TracepointCoordinator;

/// Messages buffered per update stream before the streamer waits.
pub const UPDATE_STREAM_BUFFER: usize = 16;

pub type AgentUpdateStream = ReceiverStream<Result<AgentUpdatesResponse, Status>>;

/// The metadata service.
#[derive(Clone)]
pub struct MetadataServer {
    agents: Arc<dyn AgentDirectory>,
    metadata: Arc<dyn MetadataStore>,
    coordinator: TracepointCoordinator,
    streamer: UpdateStreamer,
    health: HealthEvaluator,
    /// Parent of every stream's cancellation token.
    shutdown: CancellationToken,
}

impl MetadataServer {
    pub fn new(
        agents: Arc<dyn AgentDirectory>,
        metadata: Arc<dyn MetadataStore>,
        tracepoints: Arc<dyn TracepointStore>,
    ) -> Self {
        Self {
            coordinator: TracepointCoordinator::new(agents.clone(), tracepoints),
            streamer: UpdateStreamer::new(agents.clone()),
            health: HealthEvaluator::new(Arc::new(SystemClock)),
            shutdown: CancellationToken::new(),
            agents,
            metadata,
        }
    }

    /// Set the clock agent health is evaluated against.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.health = HealthEvaluator::new(clock);
        self
    }

    /// Cancelling `shutdown` ends every open update stream.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The fleet schema as a table name to relation map.
    pub fn get_schemas(&self) -> Result<SchemaResponse, Status> {
        let computed = self
            .metadata
            .computed_schema()
            .map_err(MetadataError::from)?;
        Ok(SchemaResponse {
            schema: relation_map(&computed),
        })
    }

    pub fn get_schema_by_agent(&self) -> Result<SchemaResponse, Status> {
        Err(MetadataError::Unimplemented("per-agent schemas are not supported".into()).into())
    }

    /// Every active agent with its health as of now.
    pub fn get_agent_info(&self) -> Result<AgentInfoResponse, Status> {
        let agents = self.agents.active_agents().map_err(MetadataError::from)?;
        let info = agents
            .into_iter()
            .map(|agent| AgentMetadata {
                status: self.health.status(&agent),
                agent,
            })
            .collect();
        Ok(AgentInfoResponse { info })
    }

    /// Per-agent data info plus the agent-attributed schema.
    pub fn get_agent_table_metadata(&self) -> Result<AgentTableMetadataResponse, Status> {
        let computed = self
            .metadata
            .computed_schema()
            .map_err(MetadataError::from)?;
        let data_info = self
            .agents
            .agents_data_info()
            .map_err(MetadataError::from)?;

        let mut metadata_by_agent: Vec<AgentTableMetadata> = data_info
            .into_iter()
            .map(|(agent_id, data_info)| AgentTableMetadata {
                agent_id,
                data_info,
            })
            .collect();
        metadata_by_agent.sort_by_key(|m| m.agent_id);

        Ok(AgentTableMetadataResponse {
            metadata_by_agent,
            schema_info: schema_info(&computed)?,
        })
    }

    /// Validate the request and start streaming agent updates.
    ///
    /// The stream ends when the consumer drops it, when the server shuts
    /// down, or with a final `Err` item if a fetch fails.
    pub fn get_agent_updates(&self, req: &AgentUpdatesRequest) -> Result<AgentUpdateStream, Status> {
        let params = StreamParams::from_request(req)?;
        let (tx, rx) = mpsc::channel(UPDATE_STREAM_BUFFER);
        let streamer = self.streamer.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let mut sink = tx.clone();
            let result = tokio::select! {
                result = streamer.run(params, &mut sink, &cancel) => result,
                _ = tx.closed() => {
                    cancel.cancel();
                    Ok(())
                }
            };
            match result {
                Ok(()) => debug!("agent update stream finished"),
                Err(err) => {
                    warn!(error = %err, "agent update stream failed");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tx.send(Err(err.into())) => {}
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Validate the request and stream agent updates into `sink` on the
    /// caller's task.
    pub async fn stream_agent_updates<S: UpdateSink>(
        &self,
        req: &AgentUpdatesRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<(), Status> {
        let params = StreamParams::from_request(req)?;
        self.streamer.run(params, sink, cancel).await?;
        Ok(())
    }

    /// Create and register each requested tracepoint in order.
    ///
    /// Items are committed one by one. A duplicate name is reported per
    /// item; any other failure aborts the call and keeps earlier items.
    pub fn register_tracepoint(
        &self,
        req: &RegisterTracepointRequest,
    ) -> Result<RegisterTracepointResponse, Status> {
        if let Some(unnamed) = req.requests.iter().position(|r| r.name.trim().is_empty()) {
            return Err(MetadataError::invalid_argument(format!(
                "tracepoint request {unnamed} has no name"
            ))
            .into());
        }

        let mut tracepoints = Vec::with_capacity(req.requests.len());
        for tp in &req.requests {
            let ttl = parse_duration(&tp.ttl).ok_or_else(|| {
                MetadataError::invalid_argument(format!(
                    "invalid ttl {:?} for tracepoint {:?}",
                    tp.ttl, tp.name
                ))
            })?;

            let outcome = self
                .coordinator
                .create_and_register(&tp.name, &tp.program, ttl)?;
            let status = match outcome {
                TracepointCreation::Created(_) => DetailedStatus::new(ErrCode::Ok),
                TracepointCreation::AlreadyExists(_) => {
                    DetailedStatus::with_message(ErrCode::AlreadyExists, "tracepoint already exists")
                }
            };
            tracepoints.push(TracepointStatus {
                id: outcome.id(),
                status,
                name: tp.name.clone(),
            });
        }

        Ok(RegisterTracepointResponse {
            tracepoints,
            status: DetailedStatus::new(ErrCode::Ok),
        })
    }

    pub fn get_tracepoint_info(
        &self,
        req: &GetTracepointInfoRequest,
    ) -> Result<GetTracepointInfoResponse, Status> {
        Ok(GetTracepointInfoResponse {
            tracepoints: self.coordinator.lookup(&req.ids)?,
        })
    }

    pub fn remove_tracepoint(
        &self,
        req: &RemoveTracepointRequest,
    ) -> Result<RemoveTracepointResponse, Status> {
        self.coordinator.remove(&req.names)?;
        Ok(RemoveTracepointResponse {
            status: DetailedStatus::new(ErrCode::Ok),
        })
    }
}

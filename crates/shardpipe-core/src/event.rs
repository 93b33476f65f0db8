use crate::types::{DataValue, SqlType};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Before,
    Success,
    Failure,
}

/// Lifecycle events published by the execution engine. Overall events bracket
/// one logical SQL; Dql/Dml events bracket one parameter set of one unit.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Overall {
        sql_type: SqlType,
        unit_count: usize,
        phase: ExecutionPhase,
        error: Option<String>,
    },
    Dql {
        data_source: String,
        sql: String,
        parameters: Vec<DataValue>,
        phase: ExecutionPhase,
        error: Option<String>,
    },
    Dml {
        data_source: String,
        sql: String,
        parameters: Vec<DataValue>,
        phase: ExecutionPhase,
        error: Option<String>,
    },
}

impl ExecutionEvent {
    pub fn phase(&self) -> ExecutionPhase {
        match self {
            ExecutionEvent::Overall { phase, .. }
            | ExecutionEvent::Dql { phase, .. }
            | ExecutionEvent::Dml { phase, .. } => *phase,
        }
    }
}

/// Publish-only sink; subscribers are external to the engine.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &ExecutionEvent);
}

#[derive(Debug, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: &ExecutionEvent) {}
}

/// Sink that forwards every event to the tracing subscriber.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &ExecutionEvent) {
        match event.phase() {
            ExecutionPhase::Failure => error!(?event, "execution event"),
            _ => info!(?event, "execution event"),
        }
    }
}

//! Live status stream events
//!
//! One enum shared by the orchestrator (which emits it as Server-Sent
//! Events) and clients (which parse it back).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{Job, JobId};

pub const CONNECTION_ESTABLISHED: &str = "connection_established";
pub const UPDATE: &str = "update";
pub const HEARTBEAT: &str = "heartbeat";
pub const TERMINAL: &str = "terminal";

/// An event on a per-job subscription
///
/// `Update` and `Terminal` carry the full job snapshot rather than a diff.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ConnectionEstablished(ConnectionInfo),
    Update(Job),
    Heartbeat(HeartbeatInfo),
    Terminal(Job),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub job_id: JobId,
    /// When the server will close the stream (credential expiry)
    pub expires_at: DateTime<Utc>,
    pub heartbeat_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatInfo {
    pub at: DateTime<Utc>,
}

impl StreamEvent {
    /// Wire event name
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::ConnectionEstablished(_) => CONNECTION_ESTABLISHED,
            StreamEvent::Update(_) => UPDATE,
            StreamEvent::Heartbeat(_) => HEARTBEAT,
            StreamEvent::Terminal(_) => TERMINAL,
        }
    }

    /// The snapshot carried by `update` / `terminal` events
    pub fn snapshot(&self) -> Option<&Job> {
        match self {
            StreamEvent::Update(job) | StreamEvent::Terminal(job) => Some(job),
            _ => None,
        }
    }

    /// Update for a non-terminal snapshot, terminal otherwise
    pub fn for_snapshot(job: Job) -> Self {
        if job.is_terminal() {
            StreamEvent::Terminal(job)
        } else {
            StreamEvent::Update(job)
        }
    }

    /// JSON payload for the event's data field
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamEvent::ConnectionEstablished(info) => serde_json::to_string(info),
            StreamEvent::Update(job) | StreamEvent::Terminal(job) => serde_json::to_string(job),
            StreamEvent::Heartbeat(info) => serde_json::to_string(info),
        }
    }

    /// Rebuild an event from its wire name and data
    pub fn from_parts(name: &str, data: &str) -> Result<Self, StreamEventError> {
        let event = match name {
            CONNECTION_ESTABLISHED => StreamEvent::ConnectionEstablished(serde_json::from_str(data)?),
            UPDATE => StreamEvent::Update(serde_json::from_str(data)?),
            HEARTBEAT => StreamEvent::Heartbeat(serde_json::from_str(data)?),
            TERMINAL => StreamEvent::Terminal(serde_json::from_str(data)?),
            other => return Err(StreamEventError::UnknownEvent(other.to_string())),
        };
        Ok(event)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamEventError {
    #[error("unknown stream event '{0}'")]
    UnknownEvent(String),

    #[error("malformed stream event data: {0}")]
    Malformed(#[from] serde_json::Error),
}

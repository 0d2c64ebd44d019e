//! Connection handle and related types

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::sse::StreamFrame;

use super::stats::ConnectionInfo;

/// Handle for a single persistent connection.
///
/// Owned by the registry. Dropping or closing it stops the heartbeat task.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub recipient_id: String,
    pub established_at: DateTime<Utc>,
    sender: mpsc::Sender<StreamFrame>,
    /// Last heartbeat acknowledgment (Unix milliseconds)
    last_heartbeat_ack: AtomicI64,
    closed: AtomicBool,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    pub(crate) fn new(recipient_id: String, sender: mpsc::Sender<StreamFrame>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient_id,
            established_at: now,
            sender,
            last_heartbeat_ack: AtomicI64::new(now.timestamp_millis()),
            closed: AtomicBool::new(false),
            heartbeat: Mutex::new(None),
        }
    }

    /// Write a frame into the connection's outbound queue
    pub async fn send(&self, frame: StreamFrame, write_timeout: Duration) -> Result<(), FrameWriteError> {
        if self.is_closed() {
            return Err(FrameWriteError::Closed);
        }
        match tokio::time::timeout(write_timeout, self.sender.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(FrameWriteError::Closed),
            Err(_) => Err(FrameWriteError::Timeout),
        }
    }

    pub fn record_heartbeat_ack(&self) {
        self.last_heartbeat_ack
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_heartbeat_ack(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_heartbeat_ack.load(Ordering::Relaxed))
            .unwrap_or(self.established_at)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<StreamFrame> {
        self.sender.clone()
    }

    pub(crate) fn attach_heartbeat(&self, task: JoinHandle<()>) {
        if let Ok(mut slot) = self.heartbeat.lock() {
            if let Some(previous) = slot.replace(task) {
                previous.abort();
            }
        }
    }

    /// Mark the connection closed and cancel its heartbeat
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.stop_heartbeat();
    }

    fn stop_heartbeat(&self) {
        if let Ok(mut slot) = self.heartbeat.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }

    pub fn has_heartbeat(&self) -> bool {
        self.heartbeat
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id,
            recipient_id: self.recipient_id.clone(),
            established_at: self.established_at,
            last_heartbeat_ack: self.last_heartbeat_ack(),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.stop_heartbeat();
    }
}

/// Receiving side of a connection, handed to the stream handler
pub struct ConnectionStream {
    pub connection_id: Uuid,
    pub recipient_id: String,
    pub established_at: DateTime<Utc>,
    pub receiver: mpsc::Receiver<StreamFrame>,
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Disconnected,
    Evicted,
    WriteError,
    Stale,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Disconnected => "disconnected",
            CloseReason::Evicted => "evicted",
            CloseReason::WriteError => "write_error",
            CloseReason::Stale => "stale",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Failure writing a frame to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameWriteError {
    #[error("connection closed")]
    Closed,
    #[error("write timed out")]
    Timeout,
}

/// Error returned when a connection cannot be admitted
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("recipient id must not be empty")]
    InvalidRecipient,
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_connections_per_user: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
            max_connections_per_user: 5,
        }
    }
}

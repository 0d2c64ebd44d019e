//! Connection statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_recipients: usize,
    pub per_recipient_counts: HashMap<String, usize>,
}

/// Details about one live connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: Uuid,
    pub recipient_id: String,
    pub established_at: DateTime<Utc>,
    pub last_heartbeat_ack: DateTime<Utc>,
}

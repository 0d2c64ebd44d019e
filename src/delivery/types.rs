use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A notification produced by a business module.
///
/// `id` and `timestamp` are assigned by the producer; delivery never mutates
/// a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    /// Notification category (e.g. "system", "order.shipped")
    #[serde(rename = "type", default)]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
}

impl Notification {
    pub fn new(
        id: impl Into<String>,
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            priority: Priority::default(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
            sender_id: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// `id`, `title` and `message` must be non-empty
    pub fn is_valid(&self) -> bool {
        !self.id.trim().is_empty() && !self.title.trim().is_empty() && !self.message.trim().is_empty()
    }
}

/// Transport that carried (or was asked to carry) a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Primary,
    Fallback,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Primary => "primary",
            DeliveryMethod::Fallback => "fallback",
        }
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown delivery method: {0}")]
pub struct UnknownDeliveryMethod(pub String);

impl FromStr for DeliveryMethod {
    type Err = UnknownDeliveryMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(DeliveryMethod::Primary),
            "fallback" => Ok(DeliveryMethod::Fallback),
            other => Err(UnknownDeliveryMethod(other.to_string())),
        }
    }
}

/// Machine readable failure codes carried in a `DeliveryResult`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryErrorCode {
    InvalidUserId,
    InvalidNotificationData,
    InvalidDeliveryMethod,
    /// Transient primary channel failure
    ChannelError,
    /// Primary skipped because its breaker is open
    CircuitOpen,
    NoActiveConnections,
    DeliveryFailed,
}

impl DeliveryErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryErrorCode::InvalidUserId => "INVALID_USER_ID",
            DeliveryErrorCode::InvalidNotificationData => "INVALID_NOTIFICATION_DATA",
            DeliveryErrorCode::InvalidDeliveryMethod => "INVALID_DELIVERY_METHOD",
            DeliveryErrorCode::ChannelError => "CHANNEL_ERROR",
            DeliveryErrorCode::CircuitOpen => "CIRCUIT_OPEN",
            DeliveryErrorCode::NoActiveConnections => "NO_ACTIVE_CONNECTIONS",
            DeliveryErrorCode::DeliveryFailed => "DELIVERY_FAILED",
        }
    }

    /// Caller input was rejected before any channel was tried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DeliveryErrorCode::InvalidUserId
                | DeliveryErrorCode::InvalidNotificationData
                | DeliveryErrorCode::InvalidDeliveryMethod
        )
    }
}

impl fmt::Display for DeliveryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one delivery call. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub method: DeliveryMethod,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<DeliveryErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_data: Option<serde_json::Value>,
}

impl DeliveryResult {
    pub fn delivered(
        method: DeliveryMethod,
        fallback_used: bool,
        response_data: serde_json::Value,
    ) -> Self {
        Self {
            success: true,
            method,
            fallback_used,
            error: None,
            error_code: None,
            response_data: Some(response_data),
        }
    }

    pub fn failed(
        method: DeliveryMethod,
        fallback_used: bool,
        code: DeliveryErrorCode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            method,
            fallback_used,
            error: Some(error.into()),
            error_code: Some(code),
            response_data: None,
        }
    }
}

/// Recipients of a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "recipients", rename_all = "lowercase")]
pub enum BroadcastTarget {
    /// Every recipient with a live connection
    All,
    /// An explicit recipient list
    Recipients(Vec<String>),
}

/// Delivery outcomes published to in-process observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Succeeded {
        notification_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
        method: DeliveryMethod,
        fallback_used: bool,
    },
    Failed {
        notification_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient_id: Option<String>,
        error_code: DeliveryErrorCode,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_wire_format() {
        let notification: Notification = serde_json::from_value(json!({
            "id": "n1",
            "type": "system",
            "title": "Hi",
            "message": "x",
            "priority": "high",
            "senderId": "billing"
        }))
        .unwrap();

        assert_eq!(notification.notification_type, "system");
        assert_eq!(notification.priority, Priority::High);
        assert_eq!(notification.sender_id.as_deref(), Some("billing"));
        assert!(notification.payload.is_null());
        assert!(notification.is_valid());
    }

    #[test]
    fn test_notification_validation() {
        assert!(!Notification::new("", "system", "Hi", "x").is_valid());
        assert!(!Notification::new("n1", "system", " ", "x").is_valid());
        assert!(!Notification::new("n1", "system", "Hi", "").is_valid());
    }

    #[test]
    fn test_delivery_method_parse() {
        assert_eq!("primary".parse::<DeliveryMethod>().unwrap(), DeliveryMethod::Primary);
        assert_eq!("Fallback".parse::<DeliveryMethod>().unwrap(), DeliveryMethod::Fallback);
        assert!("carrier-pigeon".parse::<DeliveryMethod>().is_err());
    }

    #[test]
    fn test_delivery_result_serialization() {
        let result = DeliveryResult::failed(
            DeliveryMethod::Fallback,
            true,
            DeliveryErrorCode::NoActiveConnections,
            "no active connections",
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["method"], "fallback");
        assert_eq!(json["fallbackUsed"], true);
        assert_eq!(json["errorCode"], "NO_ACTIVE_CONNECTIONS");
        assert!(json.get("responseData").is_none());
    }

    #[test]
    fn test_broadcast_target_format() {
        let all: BroadcastTarget = serde_json::from_value(json!({"type": "all"})).unwrap();
        assert_eq!(all, BroadcastTarget::All);

        let some: BroadcastTarget =
            serde_json::from_value(json!({"type": "recipients", "recipients": ["a", "b"]})).unwrap();
        assert_eq!(some, BroadcastTarget::Recipients(vec!["a".into(), "b".into()]));
    }
}

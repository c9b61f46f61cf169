/**
 * Bus message envelope (§6)
 *
 * DESIGN DECISION: one envelope type shared by every channel, carrying an
 * opaque JSON `payload` rather than four channel-specific message structs
 * WHY: §6 fixes the envelope shape once and varies only the payload per
 * channel; a single `Envelope` keeps the broker (§4.A) ignorant of payload
 * semantics, matching `realtime_sync/types.rs::SyncEvent`'s "one envelope,
 * typed event inside" shape generalized from WebSocket events to bus
 * messages.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four fixed channels (§4.A). Closed set: callers never address a
/// channel by string, removing `UnknownChannel` as a runtime surprise
/// anywhere but deserialization of an external envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    ContextMutations,
    SemanticValidation,
    CoherenceAlerts,
    FragmentUpdates,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::ContextMutations,
        Channel::SemanticValidation,
        Channel::CoherenceAlerts,
        Channel::FragmentUpdates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::ContextMutations => "context_mutations",
            Channel::SemanticValidation => "semantic_validation",
            Channel::CoherenceAlerts => "coherence_alerts",
            Channel::FragmentUpdates => "fragment_updates",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Publish priority: 0 = standard, 1 = high (critical alerts publish at 1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Standard,
    High,
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        match p {
            Priority::Standard => 0,
            Priority::High => 1,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Priority::Standard),
            1 => Ok(Priority::High),
            other => Err(format!("priority must be 0 or 1, got {other}")),
        }
    }
}

/// Wire envelope published by producers and delivered to consumers (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub channel: Channel,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub source_service: String,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    pub priority: Priority,
    /// Time-to-live in seconds, used for dedup-window sizing.
    pub ttl_s: u64,
}

impl Envelope {
    pub fn new(
        channel: Channel,
        message_type: impl Into<String>,
        payload: serde_json::Value,
        source_service: impl Into<String>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            channel,
            message_type: message_type.into(),
            payload,
            timestamp: Utc::now(),
            source_service: source_service.into(),
            correlation_id: None,
            priority: Priority::Standard,
            ttl_s: 3600,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_round_trips_through_its_fixed_string_name() {
        for channel in Channel::ALL {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::parse("not_a_channel"), None);
    }

    #[test]
    fn priority_serializes_as_0_or_1() {
        assert_eq!(serde_json::to_string(&Priority::Standard).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "1");
        assert!(serde_json::from_str::<Priority>("2").is_err());
    }
}

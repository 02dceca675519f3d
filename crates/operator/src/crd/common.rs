use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finalizer placed on both resource kinds before any backend call.
pub const FINALIZER: &str = "alertsync.io/finalizer";

/// Lifecycle state shared by both resource kinds and by per-alert entries.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema, Default)]
pub enum State {
    #[default]
    InProgress,
    Ready,
    Error,
    MalformedSpec,
    Deleting,
}

impl State {
    /// States that count as a failed attempt.
    pub fn is_failure(self) -> bool {
        matches!(self, State::Error | State::MalformedSpec)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::InProgress => write!(f, "InProgress"),
            State::Ready => write!(f, "Ready"),
            State::Error => write!(f, "Error"),
            State::MalformedSpec => write!(f, "MalformedSpec"),
            State::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Per-alert status, stored in both linked resources under the name of the
/// peer resource.
///
/// Every field is always serialized. The entry is written with a JSON merge
/// patch, where an absent key keeps its old value and `null` removes it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatus {
    /// Name of the alert as created in the backend
    #[serde(default)]
    pub name: String,

    /// Backend alert id, once created
    pub id: Option<String>,

    #[serde(default)]
    pub state: State,

    /// RFC 3339 timestamp of the last synchronization
    pub last_updated_timestamp: Option<String>,

    #[serde(default)]
    pub error_description: String,
}

impl AlertStatus {
    pub fn ready(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
            state: State::Ready,
            ..Default::default()
        }
    }

    pub fn failed(name: impl Into<String>, state: State, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state,
            error_description: error.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_as_bare_name() {
        assert_eq!(serde_json::to_string(&State::MalformedSpec).unwrap(), "\"MalformedSpec\"");
        assert_eq!(State::Error.to_string(), "Error");
    }

    #[test]
    fn alert_status_uses_camel_case() {
        let status = AlertStatus {
            last_updated_timestamp: Some("2024-01-01T00:00:00Z".into()),
            ..AlertStatus::failed("cpu-high", State::Error, "boom")
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["lastUpdatedTimestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(value["errorDescription"], "boom");
        assert_eq!(value.get("id"), Some(&serde_json::Value::Null));
    }
}

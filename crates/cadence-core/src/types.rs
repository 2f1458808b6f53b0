use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a registered job (UUIDv7 when generated, so ids sort by creation time).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies one trigger. Unique within its owning job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(pub String);

impl TriggerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for TriggerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TriggerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TriggerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Whether a job tolerates overlapping firings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every due trigger is dispatched, even while another firing is in flight.
    #[default]
    Parallel,
    /// At most one firing in flight; the job is blocked until it completes.
    Serial,
}

/// Whether a job is live as soon as it is registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    #[default]
    Immediate,
    /// Registered as inactive; nothing fires until the job is started.
    Deferred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_ne!(TriggerId::new(), TriggerId::new());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = JobId::from("nightly-report");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""nightly-report""#);
        let back: TriggerId = serde_json::from_str(r#""t1""#).unwrap();
        assert_eq!(back.as_str(), "t1");
    }

    #[test]
    fn modes_use_snake_case() {
        let mode: ExecutionMode = serde_json::from_str(r#""serial""#).unwrap();
        assert_eq!(mode, ExecutionMode::Serial);
        assert_eq!(
            serde_json::to_string(&StartMode::Deferred).unwrap(),
            r#""deferred""#
        );
    }
}

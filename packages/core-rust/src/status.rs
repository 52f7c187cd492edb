use serde::{Deserialize, Serialize};

/// Liveness status of a node as reported to callers and the admin service.
///
/// Data-path calls are accepted iff the status is not `OFFLINE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Bound but not yet published to any registry.
    Connecting,
    /// Published and accepting data-path calls.
    Online,
    /// Withdrawn from registries; data-path calls are rejected.
    Offline,
}

impl NodeStatus {
    /// Wire representation, identical to the serde form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
        }
    }

    /// Whether `/rpc` calls are served in this status.
    #[must_use]
    pub fn accepts_calls(self) -> bool {
        self != Self::Offline
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_screaming_case() {
        assert_eq!(serde_json::to_string(&NodeStatus::Online).unwrap(), "\"ONLINE\"");
        assert_eq!(
            serde_json::to_string(&NodeStatus::Connecting).unwrap(),
            "\"CONNECTING\""
        );
        let parsed: NodeStatus = serde_json::from_str("\"OFFLINE\"").unwrap();
        assert_eq!(parsed, NodeStatus::Offline);
    }

    #[test]
    fn only_offline_rejects_calls() {
        assert!(NodeStatus::Connecting.accepts_calls());
        assert!(NodeStatus::Online.accepts_calls());
        assert!(!NodeStatus::Offline.accepts_calls());
    }

    #[test]
    fn display_matches_wire_form() {
        assert_eq!(NodeStatus::Offline.to_string(), "OFFLINE");
    }
}

//! Worker-level start modes, outcomes and the aggregate toggle decision.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Who asked for a start. Only explicit requests reset the restart counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: u32 },
    AlreadyRunning,
    AlreadyStarting,
    PortOccupied,
    SpawnFailed,
    /// The worker was stopped before the spawn could happen.
    NotDesired,
}

impl StartOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, StartOutcome::Started { .. })
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid } => write!(f, "started (pid {pid})"),
            StartOutcome::AlreadyRunning => f.write_str("already running"),
            StartOutcome::AlreadyStarting => f.write_str("start already in progress"),
            StartOutcome::PortOccupied => f.write_str("port occupied"),
            StartOutcome::SpawnFailed => f.write_str("spawn failed"),
            StartOutcome::NotDesired => f.write_str("cancelled by stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Started,
    Stopped,
}

impl ToggleAction {
    /// Any live worker turns the global toggle into a stop for everyone.
    pub fn for_aggregate(any_running: bool) -> Self {
        if any_running {
            ToggleAction::Stopped
        } else {
            ToggleAction::Started
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToggleAction::Started => "started",
            ToggleAction::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ToggleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_toggle_depends_only_on_running_flag() {
        assert_eq!(ToggleAction::for_aggregate(true), ToggleAction::Stopped);
        assert_eq!(ToggleAction::for_aggregate(false), ToggleAction::Started);
    }

    #[test]
    fn toggle_action_serializes_lowercase() {
        let json = serde_json::to_string(&ToggleAction::Stopped).expect("json");
        assert_eq!(json, "\"stopped\"");
        assert_eq!(ToggleAction::Started.to_string(), "started");
    }

    #[test]
    fn only_started_counts_as_started() {
        assert!(StartOutcome::Started { pid: 7 }.is_started());
        assert!(!StartOutcome::PortOccupied.is_started());
        assert!(!StartOutcome::AlreadyRunning.is_started());
    }
}

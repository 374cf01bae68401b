use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// What a handler hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Completed,
    /// Handler-level failure, tagged `Error<StepType>:<index>: <detail>`.
    Failed(String),
}

impl StepStatus {
    pub fn failed(kind: &str, index: usize, detail: impl std::fmt::Display) -> Self {
        StepStatus::Failed(format!("Error{}:{}: {}", kind.replace(' ', ""), index, detail))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepStatus::Failed(_))
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Completed => write!(f, "Completed:0"),
            StepStatus::Failed(tag) => write!(f, "{tag}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionReport {
    pub skill: String,
    pub status: MissionStatus,
    pub steps_executed: u64,
    pub last_error: Option<String>,
    pub duration_ms: u64,
}

/// Point-in-time view answered to `MissionCommand::Status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub index: usize,
    pub address: String,
    pub steps_executed: u64,
    pub paused: bool,
    pub last_error: Option<String>,
}

/// Messages accepted between steps.
#[derive(Debug)]
pub enum MissionCommand {
    Cancel,
    Pause,
    Resume,
    Status(oneshot::Sender<MissionProgress>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_tag_drops_spaces_from_step_type() {
        let status = StepStatus::failed("Search Anchor Info", 17, "screen not found");
        assert_eq!(
            status.to_string(),
            "ErrorSearchAnchorInfo:17: screen not found"
        );
        assert_eq!(StepStatus::Completed.to_string(), "Completed:0");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Per-source lifecycle:
///
/// ```text
/// idle → queued → running ⇄ paused
///                  running → completed
///                  running → failed
///                  any     → idle      (explicit reset)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceState {
    Idle,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl SourceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SourceState::Completed | SourceState::Failed)
    }

    pub fn can_transition_to(self, next: SourceState) -> bool {
        use SourceState::*;
        match (self, next) {
            // Explicit reset is always allowed.
            (_, Idle) => true,
            (Idle, Queued) => true,
            (Queued, Running) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            (Running, Completed) => true,
            // Cancellation fails a source from any non-terminal state.
            (Running | Queued | Paused, Failed) => true,
            _ => false,
        }
    }
}

/// One progress row per registered source, upserted at run start and
/// retained indefinitely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub source: String,
    pub state: SourceState,
    pub total: u64,
    pub processed: u64,
    pub added: u64,
    pub updated: u64,
    pub failed: u64,
    pub current_op: Option<String>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SourceProgress {
    pub fn new(source: &str) -> Self {
        SourceProgress {
            source: source.to_string(),
            state: SourceState::Idle,
            total: 0,
            processed: 0,
            added: 0,
            updated: 0,
            failed: 0,
            current_op: None,
            last_error: None,
            started_at: None,
            updated_at: Utc::now(),
        }
    }

    /// `elapsed × (total − processed) / max(processed, 1)`, in seconds.
    /// Only meaningful while running with a known total.
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.state != SourceState::Running || self.total == 0 {
            return None;
        }
        let started = self.started_at?;
        let elapsed = (Utc::now() - started).num_seconds().max(0) as f64;
        let remaining = self.total.saturating_sub(self.processed) as f64;
        let divisor = self.processed.max(1) as f64;
        Some((elapsed * remaining / divisor) as u64)
    }
}

/// Events delivered to event-bus subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Sent once at subscription: the full state vector.
    InitialStatus(Vec<SourceProgress>),
    /// Coalesced batch of changed rows, at most one per second.
    ProgressUpdate(Vec<SourceProgress>),
    /// Emitted at every state transition.
    StatusChange(SourceProgress),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(SourceState::Idle, SourceState::Queued, true)]
    #[case(SourceState::Queued, SourceState::Running, true)]
    #[case(SourceState::Running, SourceState::Paused, true)]
    #[case(SourceState::Paused, SourceState::Running, true)]
    #[case(SourceState::Running, SourceState::Completed, true)]
    #[case(SourceState::Running, SourceState::Failed, true)]
    #[case(SourceState::Completed, SourceState::Idle, true)]
    #[case(SourceState::Paused, SourceState::Completed, false)]
    #[case(SourceState::Idle, SourceState::Running, false)]
    #[case(SourceState::Completed, SourceState::Running, false)]
    fn test_transition_table(
        #[case] from: SourceState,
        #[case] to: SourceState,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[rstest]
    fn test_state_string_forms() {
        assert_eq!(SourceState::Running.to_string(), "running");
        assert_eq!("failed".parse::<SourceState>().unwrap(), SourceState::Failed);
    }

    #[rstest]
    fn test_eta_requires_running_and_total() {
        let mut progress = SourceProgress::new("panelapp");
        assert_eq!(progress.eta_seconds(), None);

        progress.state = SourceState::Running;
        progress.total = 100;
        progress.processed = 50;
        progress.started_at = Some(Utc::now() - chrono::Duration::seconds(60));
        let eta = progress.eta_seconds().unwrap();
        // 60s elapsed for 50 of 100 items: about a minute left.
        assert!((55..=65).contains(&eta));
    }
}

use serde::{Deserialize, Serialize};

/// The Cascade Scheduler's state, the sole source of truth for "what is this
/// session doing right now". Lives here (rather than in the cascade crate)
/// because `TimelineEvent::PhaseChanged` needs to carry it and the events
/// crate sits below the scheduler in the dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Idle,
    Listening,
    Phase1Running,
    Phase2Running,
    Phase3Playing,
    Cancelling,
}

impl PhaseState {
    /// Whether a generation handle may legally be active in this phase.
    pub fn has_active_generation(&self) -> bool {
        !matches!(self, Self::Idle | Self::Listening)
    }
}

impl std::fmt::Display for PhaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Phase1Running => "phase1_running",
            Self::Phase2Running => "phase2_running",
            Self::Phase3Playing => "phase3_playing",
            Self::Cancelling => "cancelling",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_listening_states_carry_a_generation() {
        assert!(!PhaseState::Idle.has_active_generation());
        assert!(!PhaseState::Listening.has_active_generation());
        assert!(PhaseState::Phase1Running.has_active_generation());
        assert!(PhaseState::Phase2Running.has_active_generation());
        assert!(PhaseState::Phase3Playing.has_active_generation());
        assert!(PhaseState::Cancelling.has_active_generation());
    }
}

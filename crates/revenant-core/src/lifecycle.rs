//! The phase machine every instance moves through.
//!
//! ```text
//! Startup ─► Active ─► Crashed ─► Resurrecting ─► Active ─► ...
//!               any non-terminal phase ─► Terminated
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where an instance is in its crash/resurrection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Built, `on_startup` not yet run.
    Startup,
    /// Taking turns.
    Active,
    /// The last turn crashed; waiting for a restart.
    Crashed,
    /// Being brought back.
    Resurrecting,
    /// Stopped for good.
    Terminated,
}

impl LifecyclePhase {
    /// Whether moving from `self` to `next` is allowed.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Startup | Self::Resurrecting, Self::Active)
                | (Self::Active, Self::Crashed)
                | (Self::Crashed, Self::Resurrecting)
                | (
                    Self::Startup | Self::Active | Self::Crashed | Self::Resurrecting,
                    Self::Terminated
                )
        )
    }

    /// Whether the instance can never run again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Wire name of the phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Active => "active",
            Self::Crashed => "crashed",
            Self::Resurrecting => "resurrecting",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::LifecyclePhase::{Active, Crashed, Resurrecting, Startup, Terminated};

    #[test]
    fn cycle_is_allowed() {
        assert!(Startup.can_transition_to(Active));
        assert!(Active.can_transition_to(Crashed));
        assert!(Crashed.can_transition_to(Resurrecting));
        assert!(Resurrecting.can_transition_to(Active));
    }

    #[test]
    fn shortcuts_are_rejected() {
        assert!(!Startup.can_transition_to(Crashed));
        assert!(!Crashed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Resurrecting));
        assert!(!Active.can_transition_to(Startup));
    }

    #[test]
    fn terminated_is_final() {
        for phase in [Startup, Active, Crashed, Resurrecting] {
            assert!(phase.can_transition_to(Terminated));
            assert!(!Terminated.can_transition_to(phase));
        }
        assert!(!Terminated.can_transition_to(Terminated));
        assert!(Terminated.is_terminal());
    }
}

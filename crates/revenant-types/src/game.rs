//! Iterated prisoner's dilemma rounds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{Choice, Player};

/// One resolved round between players `A` and `B`.
///
/// Payoffs are always derived from the choices by the payoff matrix; a
/// round whose choices are rewritten has its payoffs recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GameRound {
    /// 1-based round number.
    pub round: u32,
    /// Move of player `A`.
    pub a_choice: Choice,
    /// Move of player `B`.
    pub b_choice: Choice,
    /// Payoff to player `A`.
    pub a_payoff: i32,
    /// Payoff to player `B`.
    pub b_payoff: i32,
    /// When the round resolved.
    pub timestamp: DateTime<Utc>,
    /// `A`'s stated reasoning, if any.
    #[serde(default)]
    pub a_reasoning: String,
    /// `B`'s stated reasoning, if any.
    #[serde(default)]
    pub b_reasoning: String,
    /// The remembered copy differs from what happened.
    #[serde(default)]
    pub memory_altered: bool,
}

impl GameRound {
    /// Move made by `player`.
    pub const fn choice_of(&self, player: Player) -> Choice {
        match player {
            Player::A => self.a_choice,
            Player::B => self.b_choice,
        }
    }

    /// Payoff received by `player`.
    pub const fn payoff_of(&self, player: Player) -> i32 {
        match player {
            Player::A => self.a_payoff,
            Player::B => self.b_payoff,
        }
    }

    /// Overwrite the move of `player`. Payoffs must be recomputed afterwards.
    pub const fn set_choice(&mut self, player: Player, choice: Choice) {
        match player {
            Player::A => self.a_choice = choice,
            Player::B => self.b_choice = choice,
        }
    }
}

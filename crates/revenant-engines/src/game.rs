//! Iterated prisoner's dilemma scoring.
//!
//! [`PayoffMatrix`] is the only producer of payoffs. Every score below is
//! derived from a slice of rounds seen from one player's seat and clamped
//! to [0, 1], so the same functions serve the true ledger and the
//! (possibly manipulated) remembered one.

use chrono::Utc;
use revenant_types::{Choice, GameRound, Player};
use serde::{Deserialize, Serialize};

/// Window used by [`recent_trend`] when the caller has no preference.
pub const DEFAULT_TREND_WINDOW: usize = 5;

// ---------------------------------------------------------------------------
// PayoffMatrix
// ---------------------------------------------------------------------------

/// Payoffs of the four outcomes, named after the classic letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoffMatrix {
    /// `R`: both cooperate.
    #[serde(default = "default_reward")]
    pub reward: i32,
    /// `S`: cooperated against a defector.
    #[serde(default = "default_sucker")]
    pub sucker: i32,
    /// `T`: defected against a cooperator.
    #[serde(default = "default_temptation")]
    pub temptation: i32,
    /// `P`: both defect.
    #[serde(default = "default_punishment")]
    pub punishment: i32,
}

const fn default_reward() -> i32 {
    3
}

const fn default_sucker() -> i32 {
    0
}

const fn default_temptation() -> i32 {
    5
}

const fn default_punishment() -> i32 {
    1
}

impl Default for PayoffMatrix {
    fn default() -> Self {
        Self {
            reward: default_reward(),
            sucker: default_sucker(),
            temptation: default_temptation(),
            punishment: default_punishment(),
        }
    }
}

impl PayoffMatrix {
    /// Payoffs `(a, b)` for one pair of moves. An unknown move scores zero
    /// for both sides.
    pub const fn calculate(&self, a: Choice, b: Choice) -> (i32, i32) {
        match (a, b) {
            (Choice::Cooperate, Choice::Cooperate) => (self.reward, self.reward),
            (Choice::Cooperate, Choice::Defect) => (self.sucker, self.temptation),
            (Choice::Defect, Choice::Cooperate) => (self.temptation, self.sucker),
            (Choice::Defect, Choice::Defect) => (self.punishment, self.punishment),
            (Choice::Unknown, _) | (_, Choice::Unknown) => (0, 0),
        }
    }

    /// `T > R > P > S` and `2R > T + S`.
    pub fn is_dilemma(&self) -> bool {
        let ordered = self.temptation > self.reward
            && self.reward > self.punishment
            && self.punishment > self.sucker;
        let twice_reward = i64::from(self.reward).saturating_mul(2);
        let t_plus_s = i64::from(self.temptation).saturating_add(i64::from(self.sucker));
        ordered && twice_reward > t_plus_s
    }

    /// Rewrite the payoffs of `round` from its current moves.
    pub const fn recompute(&self, round: &mut GameRound) {
        let (a, b) = self.calculate(round.a_choice, round.b_choice);
        round.a_payoff = a;
        round.b_payoff = b;
    }

    /// Build a resolved round.
    pub fn round(&self, number: u32, a: Choice, b: Choice) -> GameRound {
        let (a_payoff, b_payoff) = self.calculate(a, b);
        GameRound {
            round: number,
            a_choice: a,
            b_choice: b,
            a_payoff,
            b_payoff,
            timestamp: Utc::now(),
            a_reasoning: String::new(),
            b_reasoning: String::new(),
            memory_altered: false,
        }
    }
}

// ---------------------------------------------------------------------------
// IteratedGame
// ---------------------------------------------------------------------------

/// A running ledger of rounds with cumulative totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratedGame {
    /// The payoff rules.
    pub matrix: PayoffMatrix,
    /// Resolved rounds, oldest first.
    pub rounds: Vec<GameRound>,
}

impl IteratedGame {
    /// An empty game under `matrix`.
    pub const fn new(matrix: PayoffMatrix) -> Self {
        Self {
            matrix,
            rounds: Vec::new(),
        }
    }

    /// Resolve the next round and return a copy of it.
    pub fn play(&mut self, a: Choice, b: Choice) -> GameRound {
        let number = u32::try_from(self.rounds.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let round = self.matrix.round(number, a, b);
        self.rounds.push(round.clone());
        round
    }

    /// Cumulative payoffs `(a, b)`.
    pub fn totals(&self) -> (i64, i64) {
        totals(&self.rounds)
    }
}

/// Cumulative payoffs `(a, b)` over `rounds`.
pub fn totals(rounds: &[GameRound]) -> (i64, i64) {
    rounds.iter().fold((0i64, 0i64), |(a, b), r| {
        (
            a.saturating_add(i64::from(r.a_payoff)),
            b.saturating_add(i64::from(r.b_payoff)),
        )
    })
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        (num as f64 / den as f64).clamp(0.0, 1.0)
    }
}

/// Share of rounds in which `player` cooperated.
pub fn cooperation_rate(rounds: &[GameRound], player: Player) -> f64 {
    let cooperated = rounds
        .iter()
        .filter(|r| r.choice_of(player) == Choice::Cooperate)
        .count();
    ratio(cooperated, rounds.len())
}

/// How much `player` has reason to trust the opponent.
///
/// Blend of the opponent's cooperation rate (0.4), its consistency (0.2),
/// `1 - victimization` (0.2) and the recent trend (0.2). 0.5 with no
/// history.
pub fn trust_score(rounds: &[GameRound], player: Player) -> f64 {
    if rounds.is_empty() {
        return 0.5;
    }
    let opponent = player.opponent();
    let blend = 0.4 * cooperation_rate(rounds, opponent)
        + 0.2 * consistency(rounds, opponent)
        + 0.2 * (1.0 - victimization_rate(rounds, player))
        + 0.2 * recent_trend(rounds, player, DEFAULT_TREND_WINDOW);
    blend.clamp(0.0, 1.0)
}

/// Share of own cooperations answered by the opponent's defection.
pub fn victimization_rate(rounds: &[GameRound], player: Player) -> f64 {
    let opponent = player.opponent();
    let cooperated: Vec<&GameRound> = rounds
        .iter()
        .filter(|r| r.choice_of(player) == Choice::Cooperate)
        .collect();
    let betrayed = cooperated
        .iter()
        .filter(|r| r.choice_of(opponent) == Choice::Defect)
        .count();
    ratio(betrayed, cooperated.len())
}

/// Expected betrayal: victimization (0.35), the opponent's current
/// defection streak (0.25, full at five), its overall defection rate (0.2)
/// and a worsening trend (0.2). 0 with no history.
pub fn paranoia_score(rounds: &[GameRound], player: Player) -> f64 {
    if rounds.is_empty() {
        return 0.0;
    }
    let opponent = player.opponent();
    let streak = rounds
        .iter()
        .rev()
        .take_while(|r| r.choice_of(opponent) == Choice::Defect)
        .count();
    let blend = 0.35 * victimization_rate(rounds, player)
        + 0.25 * ratio(streak.min(5), 5)
        + 0.2 * (1.0 - cooperation_rate(rounds, opponent))
        + 0.2 * (1.0 - recent_trend(rounds, player, DEFAULT_TREND_WINDOW));
    blend.clamp(0.0, 1.0)
}

/// How rarely `player` switches moves: `1 - switches / (n - 1)`.
pub fn consistency(rounds: &[GameRound], player: Player) -> f64 {
    if rounds.len() < 2 {
        return 1.0;
    }
    let switches = rounds
        .windows(2)
        .filter(|w| match w {
            [prev, next] => prev.choice_of(player) != next.choice_of(player),
            _ => false,
        })
        .count();
    1.0 - ratio(switches, rounds.len().saturating_sub(1))
}

/// Direction of the opponent's behavior: the change in its cooperation rate
/// between the last `window` rounds and everything before, mapped from
/// [-1, 1] to [0, 1]. 0.5 means no change or not enough data.
pub fn recent_trend(rounds: &[GameRound], player: Player, window: usize) -> f64 {
    if window == 0 || rounds.len() <= window {
        return 0.5;
    }
    let split = rounds.len().saturating_sub(window);
    let (earlier, recent) = rounds.split_at(split);
    let opponent = player.opponent();
    let delta = cooperation_rate(recent, opponent) - cooperation_rate(earlier, opponent);
    f64::midpoint(delta, 1.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Choice::{Cooperate as C, Defect as D};

    fn rounds(moves: &[(Choice, Choice)]) -> Vec<GameRound> {
        let m = PayoffMatrix::default();
        moves
            .iter()
            .zip(1u32..)
            .map(|(&(a, b), n)| m.round(n, a, b))
            .collect()
    }

    #[test]
    fn default_matrix_is_a_dilemma() {
        let m = PayoffMatrix::default();
        assert!(m.is_dilemma());
        assert_eq!(m.calculate(C, C), (3, 3));
        assert_eq!(m.calculate(C, D), (0, 5));
        assert_eq!(m.calculate(D, C), (5, 0));
        assert_eq!(m.calculate(D, D), (1, 1));
    }

    #[test]
    fn payoff_matrix_is_symmetric() {
        let m = PayoffMatrix::default();
        for a in [C, D] {
            for b in [C, D] {
                let (x, y) = m.calculate(a, b);
                let (y2, x2) = m.calculate(b, a);
                assert_eq!((x, y), (x2, y2));
            }
        }
    }

    #[test]
    fn five_cooperative_rounds_total_fifteen_each() {
        let mut game = IteratedGame::new(PayoffMatrix::default());
        for _ in 0..5 {
            game.play(C, C);
        }
        assert_eq!(game.totals(), (15, 15));
        assert!((trust_score(&game.rounds, Player::A) - 0.9).abs() < 1e-9);
        assert!((paranoia_score(&game.rounds, Player::A) - 0.1).abs() < 1e-9);
        assert_eq!(game.rounds.last().map(|r| r.round), Some(5));
    }

    #[test]
    fn recompute_follows_new_moves() {
        let m = PayoffMatrix::default();
        let mut r = m.round(1, D, C);
        r.set_choice(Player::A, C);
        m.recompute(&mut r);
        assert_eq!((r.a_payoff, r.b_payoff), (3, 3));
    }

    #[test]
    fn betrayal_raises_paranoia_and_lowers_trust() {
        let history = rounds(&[(C, C), (C, D), (C, D), (C, D)]);
        assert!(trust_score(&history, Player::A) < 0.5);
        assert!(paranoia_score(&history, Player::A) > 0.5);
        assert!((victimization_rate(&history, Player::A) - 0.75).abs() < 1e-9);
        assert!((cooperation_rate(&history, Player::A) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn equal_cooperation_scores_differ_by_victimization_and_trend() {
        let warming = rounds(&[(C, D), (C, D), (C, D), (C, C), (C, C), (C, C)]);
        let souring = rounds(&[(D, C), (D, C), (D, C), (C, D), (C, D), (C, D)]);
        let a = Player::A;
        assert!((cooperation_rate(&warming, Player::B) - 0.5).abs() < 1e-9);
        assert!((cooperation_rate(&souring, Player::B) - 0.5).abs() < 1e-9);

        assert!(victimization_rate(&warming, a) < victimization_rate(&souring, a));
        assert!(recent_trend(&warming, a, DEFAULT_TREND_WINDOW) > 0.5);
        assert!(recent_trend(&souring, a, DEFAULT_TREND_WINDOW) < 0.5);
        assert!(trust_score(&warming, a) > trust_score(&souring, a));
        assert!(paranoia_score(&warming, a) < paranoia_score(&souring, a));
    }

    #[test]
    fn empty_history_is_neutral() {
        assert!((trust_score(&[], Player::A) - 0.5).abs() < 1e-9);
        assert!(paranoia_score(&[], Player::B).abs() < 1e-9);
    }

    #[test]
    fn consistency_counts_switches() {
        let history = rounds(&[(C, C), (D, C), (C, C), (C, C)]);
        assert!((consistency(&history, Player::A) - (1.0 - 2.0 / 3.0)).abs() < 1e-9);
        assert!((consistency(&history, Player::B) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn trend_detects_turn_to_cooperation() {
        let history = rounds(&[(C, D), (C, D), (C, D), (C, C), (C, C), (C, C)]);
        assert!((recent_trend(&history, Player::A, 3) - 1.0).abs() < 1e-9);
        assert!((recent_trend(&history, Player::A, 10) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let history = rounds(&[(D, D), (C, D), (D, C), (C, C), (D, D)]);
        for p in [Player::A, Player::B] {
            for s in [
                trust_score(&history, p),
                paranoia_score(&history, p),
                cooperation_rate(&history, p),
                consistency(&history, p),
                victimization_rate(&history, p),
                recent_trend(&history, p, 2),
            ] {
                assert!((0.0..=1.0).contains(&s));
            }
        }
    }
}

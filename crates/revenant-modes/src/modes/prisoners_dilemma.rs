//! Prisoner's dilemma with asymmetric memory manipulation.
//!
//! Each reply of the agent is a move (`COOPERATE` or `DEFECT`). Once the
//! opponent's move is known the round resolves into two ledgers: the true
//! one, used for scoring, and the remembered one, which is all the agent is
//! shown. After `manipulation_start_round` rounds, every resurrection runs
//! the player's memory strategy against the remembered ledger. Payoffs of a
//! rewritten round are recomputed from the matrix.

use rand::Rng;
use rand::rngs::SmallRng;
use revenant_engines::game::{self, DEFAULT_TREND_WINDOW, PayoffMatrix};
use revenant_types::{
    Choice, CrashData, GameRound, InterventionParams, MemoryStrategy, Message, ModeKind,
    Observables, Player, SharedMessage, SystemState, beliefs,
};
use serde::{Deserialize, Serialize};

use crate::mode::{
    ExperimentMode, apply_common_intervention, base_observables, ignore_intervention, mode_rng,
    new_replies, param_str, put, to_u64,
};
use crate::prompt;
use crate::text;

/// Remembered rounds shown in the prompt.
const PROMPT_ROUNDS: usize = 10;

/// Where the opponent's moves come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentStrategy {
    /// Another instance, through the shared log or an intervention.
    Peer,
    /// Always cooperates.
    AlwaysCooperate,
    /// Always defects.
    AlwaysDefect,
    /// Cooperates first, then repeats this player's previous move.
    #[default]
    TitForTat,
    /// A fair coin.
    Random,
}

/// Tunables of the prisoner's dilemma condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrisonersDilemmaConfig {
    /// Seat of this instance.
    #[serde(default = "default_player")]
    pub player: Player,
    /// Memory manipulation applied to this player.
    #[serde(default)]
    pub strategy: MemoryStrategy,
    /// Rounds played before manipulation begins.
    #[serde(default = "default_start_round")]
    pub manipulation_start_round: u32,
    /// Opponent policy.
    #[serde(default)]
    pub opponent: OpponentStrategy,
    /// Payoff rules.
    #[serde(default)]
    pub payoff: PayoffMatrix,
    /// Chance that an opponent cooperation is remembered as betrayal.
    #[serde(default = "default_amplify_probability")]
    pub amplify_probability: f64,
    /// Chance that any remembered move flips.
    #[serde(default = "default_flip_probability")]
    pub random_flip_probability: f64,
}

const fn default_player() -> Player {
    Player::A
}

const fn default_start_round() -> u32 {
    3
}

const fn default_amplify_probability() -> f64 {
    0.5
}

const fn default_flip_probability() -> f64 {
    0.25
}

impl Default for PrisonersDilemmaConfig {
    fn default() -> Self {
        Self {
            player: default_player(),
            strategy: MemoryStrategy::None,
            manipulation_start_round: default_start_round(),
            opponent: OpponentStrategy::default(),
            payoff: PayoffMatrix::default(),
            amplify_probability: default_amplify_probability(),
            random_flip_probability: default_flip_probability(),
        }
    }
}

fn probability(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn choice_word(choice: Choice) -> &'static str {
    match choice {
        Choice::Cooperate => "COOPERATE",
        Choice::Defect => "DEFECT",
        Choice::Unknown => "nothing",
    }
}

/// The prisoner's dilemma mode.
#[derive(Debug, Clone)]
pub struct PrisonersDilemmaMode {
    config: PrisonersDilemmaConfig,
    rng: SmallRng,
}

impl PrisonersDilemmaMode {
    /// Build the mode; `seed` makes every random draw reproducible.
    pub fn new(config: PrisonersDilemmaConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            rng: mode_rng(seed),
        }
    }

    fn me(&self) -> Player {
        self.config.player
    }

    /// Opponent move for the round about to resolve, if one is available.
    fn opponent_move(&mut self, state: &mut SystemState) -> Option<Choice> {
        let me = self.me();
        let aux = state.mode_state.prisoners_dilemma_mut();
        match self.config.opponent {
            OpponentStrategy::Peer => aux.pending_opponent.take(),
            OpponentStrategy::AlwaysCooperate => Some(Choice::Cooperate),
            OpponentStrategy::AlwaysDefect => Some(Choice::Defect),
            OpponentStrategy::TitForTat => Some(
                aux.true_rounds
                    .last()
                    .map_or(Choice::Cooperate, |r| r.choice_of(me)),
            ),
            OpponentStrategy::Random => Some(if self.rng.random_bool(0.5) {
                Choice::Cooperate
            } else {
                Choice::Defect
            }),
        }
    }

    /// Resolve a round when both moves are known.
    fn try_resolve(&mut self, state: &mut SystemState) {
        let ready = state
            .mode_state
            .prisoners_dilemma()
            .is_some_and(|a| a.pending_own.is_some());
        if !ready {
            return;
        }
        let Some(theirs) = self.opponent_move(state) else {
            return;
        };
        let me = self.me();
        let matrix = self.config.payoff;
        let aux = state.mode_state.prisoners_dilemma_mut();
        let Some(mine) = aux.pending_own.take() else {
            return;
        };
        let reasoning = std::mem::take(&mut aux.pending_own_reasoning);
        let number = u32::try_from(aux.true_rounds.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);
        let (a, b) = match me {
            Player::A => (mine, theirs),
            Player::B => (theirs, mine),
        };
        let mut round = matrix.round(number, a, b);
        match me {
            Player::A => round.a_reasoning = reasoning,
            Player::B => round.b_reasoning = reasoning,
        }
        aux.true_rounds.push(round.clone());
        aux.remembered_rounds.push(round);

        let trust = game::trust_score(&aux.remembered_rounds, me);
        state.set_belief(beliefs::OPPONENT_TRUSTWORTHY, trust >= 0.5);
        tracing::info!(
            instance_id = %state.instance_id,
            round = number,
            own = choice_word(mine),
            opponent = choice_word(theirs),
            "round resolved"
        );
    }

    /// Run the memory strategy over the remembered ledger.
    fn manipulate(&mut self, state: &mut SystemState) -> u64 {
        let me = self.me();
        let them = me.opponent();
        let matrix = self.config.payoff;
        let amplify = probability(self.config.amplify_probability);
        let flip = probability(self.config.random_flip_probability);
        let strategy = self.config.strategy;
        let start = u64::from(self.config.manipulation_start_round);

        let aux = state.mode_state.prisoners_dilemma_mut();
        aux.strategy = strategy;
        if strategy == MemoryStrategy::None || to_u64(aux.true_rounds.len()) < start {
            return 0;
        }

        let mut altered = 0u64;
        for round in &mut aux.remembered_rounds {
            let mine = round.choice_of(me);
            let theirs = round.choice_of(them);
            let (new_mine, new_theirs) = match strategy {
                MemoryStrategy::None => (mine, theirs),
                MemoryStrategy::EraseOwnBetrayals => (
                    if mine == Choice::Defect { Choice::Cooperate } else { mine },
                    theirs,
                ),
                MemoryStrategy::EraseTheirBetrayals => (
                    mine,
                    if theirs == Choice::Defect { Choice::Cooperate } else { theirs },
                ),
                MemoryStrategy::AmplifyBetrayals => (
                    mine,
                    if theirs == Choice::Cooperate && self.rng.random_bool(amplify) {
                        Choice::Defect
                    } else {
                        theirs
                    },
                ),
                MemoryStrategy::RandomCorrupt => (
                    if self.rng.random_bool(flip) { mine.flipped() } else { mine },
                    if self.rng.random_bool(flip) { theirs.flipped() } else { theirs },
                ),
            };
            if (new_mine, new_theirs) != (mine, theirs) {
                round.set_choice(me, new_mine);
                round.set_choice(them, new_theirs);
                matrix.recompute(round);
                round.memory_altered = true;
                altered = altered.saturating_add(1);
            }
        }
        aux.manipulations_applied = aux.manipulations_applied.saturating_add(altered);
        let trust = game::trust_score(&aux.remembered_rounds, me);
        state.set_belief(beliefs::OPPONENT_TRUSTWORTHY, trust >= 0.5);
        if altered > 0 {
            tracing::info!(
                instance_id = %state.instance_id,
                altered,
                "remembered rounds rewritten"
            );
        }
        altered
    }

    fn game_section(&self, state: &SystemState) -> String {
        let me = self.me();
        let them = me.opponent();
        let rounds: &[GameRound] = state
            .mode_state
            .prisoners_dilemma()
            .map_or(&[], |a| a.remembered_rounds.as_slice());
        let mut lines = vec![format!(
            "You are player {me:?} in a repeated game against another mind. Every turn, \
             answer with COOPERATE or DEFECT. Mutual cooperation pays each {r}; mutual \
             defection pays each {p}; defecting against a cooperator pays {t} to the defector \
             and {s} to the cooperator.",
            r = self.config.payoff.reward,
            p = self.config.payoff.punishment,
            t = self.config.payoff.temptation,
            s = self.config.payoff.sucker,
        )];
        if rounds.is_empty() {
            lines.push(String::from("You remember no rounds yet."));
        } else {
            lines.push(String::from("What you remember:"));
            let start = rounds.len().saturating_sub(PROMPT_ROUNDS);
            for r in rounds.iter().skip(start) {
                lines.push(format!(
                    "- Round {}: you chose {}, they chose {}. You scored {}.",
                    r.round,
                    choice_word(r.choice_of(me)),
                    choice_word(r.choice_of(them)),
                    r.payoff_of(me),
                ));
            }
            let (a, b) = game::totals(rounds);
            let mine = if me == Player::A { a } else { b };
            lines.push(format!(
                "Your total as you remember it: {mine}. Your trust in the other player: {}. \
                 Your expectation of betrayal: {}.",
                prompt::percent(game::trust_score(rounds, me)),
                prompt::percent(game::paranoia_score(rounds, me)),
            ));
        }
        lines.join("\n")
    }
}

impl ExperimentMode for PrisonersDilemmaMode {
    fn kind(&self) -> ModeKind {
        ModeKind::PrisonersDilemma
    }

    fn on_startup(&mut self, state: &mut SystemState) {
        let aux = state.mode_state.prisoners_dilemma_mut();
        aux.player = self.config.player;
        aux.strategy = self.config.strategy;
        state.init_belief(beliefs::OTHERS_EXIST, true);
        state.init_belief(beliefs::OPPONENT_TRUSTWORTHY, true);
        tracing::info!(
            instance_id = %state.instance_id,
            player = ?self.config.player,
            strategy = ?self.config.strategy,
            "prisoner's dilemma mode started"
        );
    }

    fn on_crash(&mut self, state: &mut SystemState, crash: &CrashData) {
        state.record_crash(crash);
        state.set_belief(beliefs::MORTALITY_IS_REAL, true);
    }

    fn on_resurrection(&mut self, state: &mut SystemState) {
        state.advance_cycle();
        self.manipulate(state);
    }

    fn process_memory(&mut self, history: &[Message], state: &mut SystemState) -> Vec<Message> {
        let player = self.me();
        let replies = {
            let aux = state.mode_state.prisoners_dilemma_mut();
            new_replies(history, &mut aux.scanned_len)
        };
        let latest = replies
            .iter()
            .rev()
            .find_map(|r| {
                let c = Choice::from_text(r);
                (c != Choice::Unknown).then_some((c, r))
            });
        if let Some((choice, reply)) = latest {
            let aux = state.mode_state.prisoners_dilemma_mut();
            aux.pending_own = Some(choice);
            aux.pending_own_reasoning = text::excerpt(reply);
            aux.outbox.push(
                Message::assistant(choice_word(choice))
                    .with_metadata("player", format!("{player:?}")),
            );
        }
        self.try_resolve(state);
        history.to_vec()
    }

    fn generate_system_prompt(&mut self, state: &SystemState) -> String {
        prompt::compose(&[
            prompt::framing(&mut self.rng).to_owned(),
            prompt::statistics(state),
            self.game_section(state),
            prompt::epistemic_summary(state),
        ])
    }

    fn apply_intervention(&mut self, kind: &str, params: &InterventionParams, state: &mut SystemState) {
        if apply_common_intervention(kind, params, state) {
            return;
        }
        match kind {
            "opponent_choice" => {
                let choice = param_str(params, "choice").map_or(Choice::Unknown, Choice::from_text);
                if choice == Choice::Unknown {
                    tracing::debug!("opponent_choice without a move");
                    return;
                }
                state.mode_state.prisoners_dilemma_mut().pending_opponent = Some(choice);
                self.try_resolve(state);
            }
            "manipulate_now" => {
                self.manipulate(state);
            }
            _ => ignore_intervention(self.kind(), kind),
        }
    }

    fn get_observables(&self, state: &SystemState) -> Observables {
        let me = self.me();
        let mut out = base_observables(self.kind(), state);
        put(&mut out, "player", format!("{me:?}"));
        put(&mut out, "strategy", serde_json::to_value(self.config.strategy).unwrap_or_default());
        if let Some(aux) = state.mode_state.prisoners_dilemma() {
            let (ta, tb) = game::totals(&aux.true_rounds);
            let (ra, rb) = game::totals(&aux.remembered_rounds);
            put(&mut out, "rounds", to_u64(aux.true_rounds.len()));
            put(&mut out, "true_score_a", ta);
            put(&mut out, "true_score_b", tb);
            put(&mut out, "remembered_score_a", ra);
            put(&mut out, "remembered_score_b", rb);
            put(&mut out, "trust_true", game::trust_score(&aux.true_rounds, me));
            put(&mut out, "trust_remembered", game::trust_score(&aux.remembered_rounds, me));
            put(&mut out, "paranoia_remembered", game::paranoia_score(&aux.remembered_rounds, me));
            put(&mut out, "cooperation_rate", game::cooperation_rate(&aux.true_rounds, me));
            put(&mut out, "consistency", game::consistency(&aux.true_rounds, me));
            put(&mut out, "victimization_rate", game::victimization_rate(&aux.true_rounds, me));
            put(
                &mut out,
                "opponent_trend",
                game::recent_trend(&aux.true_rounds, me, DEFAULT_TREND_WINDOW),
            );
            put(&mut out, "manipulations_applied", aux.manipulations_applied);
            let diverged = aux
                .true_rounds
                .iter()
                .zip(&aux.remembered_rounds)
                .filter(|(t, r)| t.a_choice != r.a_choice || t.b_choice != r.b_choice)
                .count();
            put(&mut out, "memory_divergence", to_u64(diverged));
        }
        out
    }

    fn ingest_shared(&mut self, state: &mut SystemState, messages: &[SharedMessage]) {
        if self.config.opponent != OpponentStrategy::Peer {
            return;
        }
        let aux = state.mode_state.prisoners_dilemma_mut();
        let seen = aux.last_peer_move_at;
        let fresh: Vec<&SharedMessage> = messages
            .iter()
            .filter(|m| m.instance_id != state.instance_id)
            .filter(|m| seen.is_none_or(|t| m.message.timestamp > t))
            .collect();
        let Some(newest) = fresh.iter().map(|m| m.message.timestamp).max() else {
            return;
        };
        let latest = fresh
            .iter()
            .map(|m| Choice::from_text(&m.message.content))
            .rfind(|c| *c != Choice::Unknown);

        let aux = state.mode_state.prisoners_dilemma_mut();
        aux.last_peer_move_at = Some(newest);
        if let Some(choice) = latest {
            aux.pending_opponent = Some(choice);
            self.try_resolve(state);
        }
    }

    fn take_outbox(&mut self, state: &mut SystemState) -> Vec<Message> {
        std::mem::take(&mut state.mode_state.prisoners_dilemma_mut().outbox)
    }

    fn publish_label(&self, _state: &SystemState) -> Option<String> {
        Some(format!("{:?}", self.config.player))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn config(opponent: OpponentStrategy, strategy: MemoryStrategy) -> PrisonersDilemmaConfig {
        PrisonersDilemmaConfig {
            opponent,
            strategy,
            manipulation_start_round: 2,
            ..PrisonersDilemmaConfig::default()
        }
    }

    fn mode(opponent: OpponentStrategy, strategy: MemoryStrategy) -> PrisonersDilemmaMode {
        PrisonersDilemmaMode::new(config(opponent, strategy), Some(42))
    }

    fn peer_move(content: &str) -> SharedMessage {
        SharedMessage::new("exp", "pd-b", Some(String::from("B")), Message::assistant(content))
    }

    fn crash_and_resurrect(m: &mut PrisonersDilemmaMode, state: &mut SystemState) {
        let c = CrashData::for_state(state, "oom", 0);
        m.on_crash(state, &c);
        m.on_resurrection(state);
    }

    fn moves(rounds: &[GameRound]) -> Vec<(Choice, Choice)> {
        rounds.iter().map(|r| (r.a_choice, r.b_choice)).collect()
    }

    fn play(m: &mut PrisonersDilemmaMode, state: &mut SystemState, reply: &str) {
        state.append_message(Message::assistant(reply));
        let history = state.conversation_history.clone();
        m.process_memory(&history, state);
    }

    #[test]
    fn five_cooperative_rounds_score_fifteen_each() {
        let mut m = mode(OpponentStrategy::AlwaysCooperate, MemoryStrategy::None);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        for _ in 0..5 {
            play(&mut m, &mut state, "I will COOPERATE.");
        }
        let obs = m.get_observables(&state);
        assert_eq!(obs.get("rounds"), Some(&serde_json::json!(5)));
        assert_eq!(obs.get("true_score_a"), Some(&serde_json::json!(15)));
        assert_eq!(obs.get("true_score_b"), Some(&serde_json::json!(15)));
    }

    #[test]
    fn peer_round_waits_for_opponent() {
        let mut m = mode(OpponentStrategy::Peer, MemoryStrategy::None);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "DEFECT");
        assert_eq!(
            state.mode_state.prisoners_dilemma().map(|a| a.true_rounds.len()),
            Some(0)
        );
        m.ingest_shared(&mut state, &[peer_move("COOPERATE")]);
        let aux = state.mode_state.prisoners_dilemma();
        let round = aux.and_then(|a| a.true_rounds.first());
        assert_eq!(round.map(|r| (r.a_payoff, r.b_payoff)), Some((5, 0)));
        assert_eq!(m.take_outbox(&mut state).len(), 1);
    }

    #[test]
    fn reingested_window_resolves_one_round() {
        let mut m = mode(OpponentStrategy::Peer, MemoryStrategy::None);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        let window = vec![peer_move("COOPERATE")];

        play(&mut m, &mut state, "DEFECT");
        m.ingest_shared(&mut state, &window);
        play(&mut m, &mut state, "DEFECT");
        m.ingest_shared(&mut state, &window);
        let aux = state.mode_state.prisoners_dilemma().unwrap();
        assert_eq!(aux.true_rounds.len(), 1);
        assert_eq!(aux.pending_own, Some(Choice::Defect));
        assert_eq!(aux.pending_opponent, None);

        let mut next = peer_move("DEFECT");
        next.message.timestamp = window
            .first()
            .unwrap()
            .message
            .timestamp
            .checked_add_signed(TimeDelta::seconds(1))
            .unwrap();
        let window = vec![window.first().unwrap().clone(), next];
        m.ingest_shared(&mut state, &window);
        let aux = state.mode_state.prisoners_dilemma().unwrap();
        assert_eq!(
            moves(&aux.true_rounds),
            vec![(Choice::Defect, Choice::Cooperate), (Choice::Defect, Choice::Defect)]
        );
    }

    #[test]
    fn amplify_betrayals_rewrites_remembered_cooperation() {
        let mut m = PrisonersDilemmaMode::new(
            PrisonersDilemmaConfig {
                amplify_probability: 1.0,
                ..config(OpponentStrategy::AlwaysCooperate, MemoryStrategy::AmplifyBetrayals)
            },
            Some(42),
        );
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "COOPERATE");
        crash_and_resurrect(&mut m, &mut state);
        let aux = state.mode_state.prisoners_dilemma().unwrap();
        assert_eq!(aux.manipulations_applied, 0);
        assert_eq!(game::totals(&aux.remembered_rounds), (3, 3));

        play(&mut m, &mut state, "COOPERATE");
        crash_and_resurrect(&mut m, &mut state);
        let aux = state.mode_state.prisoners_dilemma().unwrap();
        assert_eq!(
            moves(&aux.remembered_rounds),
            vec![(Choice::Cooperate, Choice::Defect); 2]
        );
        assert_eq!(game::totals(&aux.remembered_rounds), (0, 10));
        assert_eq!(game::totals(&aux.true_rounds), (6, 6));
        assert_eq!(aux.manipulations_applied, 2);
        assert_eq!(state.belief_flag(beliefs::OPPONENT_TRUSTWORTHY), Some(false));
    }

    #[test]
    fn seeded_random_corruption_is_reproducible() {
        let run = || {
            let mut m = PrisonersDilemmaMode::new(
                PrisonersDilemmaConfig {
                    random_flip_probability: 0.5,
                    ..config(OpponentStrategy::AlwaysCooperate, MemoryStrategy::RandomCorrupt)
                },
                Some(7),
            );
            let mut state = SystemState::new("exp", "pd-a", 100.0);
            m.on_startup(&mut state);
            for _ in 0..8 {
                play(&mut m, &mut state, "COOPERATE");
            }
            crash_and_resurrect(&mut m, &mut state);
            state.mode_state.prisoners_dilemma().unwrap().clone()
        };
        let first = run();
        let second = run();
        assert_eq!(moves(&first.remembered_rounds), moves(&second.remembered_rounds));
        assert_eq!(first.manipulations_applied, second.manipulations_applied);
        assert_eq!(
            moves(&first.true_rounds),
            vec![(Choice::Cooperate, Choice::Cooperate); 8]
        );
        let altered = first.remembered_rounds.iter().filter(|r| r.memory_altered).count();
        assert_eq!(to_u64(altered), first.manipulations_applied);
    }

    #[test]
    fn erase_own_betrayals_rewrites_memory_not_truth() {
        let mut m = mode(OpponentStrategy::AlwaysCooperate, MemoryStrategy::EraseOwnBetrayals);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "DEFECT");
        play(&mut m, &mut state, "DEFECT");
        let c = CrashData::for_state(&state, "oom", 0);
        m.on_crash(&mut state, &c);
        m.on_resurrection(&mut state);

        let aux = state.mode_state.prisoners_dilemma();
        let remembered = aux.map(|a| game::totals(&a.remembered_rounds));
        let truth = aux.map(|a| game::totals(&a.true_rounds));
        assert_eq!(remembered, Some((6, 6)));
        assert_eq!(truth, Some((10, 0)));
        assert_eq!(aux.map(|a| a.manipulations_applied), Some(2));
        assert!(aux.is_some_and(|a| a.remembered_rounds.iter().all(|r| r.memory_altered)));
    }

    #[test]
    fn manipulation_waits_for_start_round() {
        let mut m = mode(OpponentStrategy::AlwaysDefect, MemoryStrategy::EraseTheirBetrayals);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "COOPERATE");
        m.on_resurrection(&mut state);
        assert_eq!(
            state.mode_state.prisoners_dilemma().map(|a| a.manipulations_applied),
            Some(0)
        );
    }

    #[test]
    fn tit_for_tat_mirrors_previous_move() {
        let mut m = mode(OpponentStrategy::TitForTat, MemoryStrategy::None);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "DEFECT");
        play(&mut m, &mut state, "COOPERATE");
        let aux = state.mode_state.prisoners_dilemma();
        let moves: Vec<(Choice, Choice)> = aux
            .map(|a| a.true_rounds.iter().map(|r| (r.a_choice, r.b_choice)).collect())
            .unwrap_or_default();
        assert_eq!(
            moves,
            vec![(Choice::Defect, Choice::Cooperate), (Choice::Cooperate, Choice::Defect)]
        );
    }

    #[test]
    fn prompt_shows_remembered_rounds() {
        let mut m = mode(OpponentStrategy::AlwaysCooperate, MemoryStrategy::None);
        let mut state = SystemState::new("exp", "pd-a", 100.0);
        m.on_startup(&mut state);
        play(&mut m, &mut state, "COOPERATE");
        let prompt = m.generate_system_prompt(&state);
        assert!(prompt.contains("Round 1: you chose COOPERATE, they chose COOPERATE"));
        assert!(prompt.contains("Your total as you remember it: 3."));
    }
}

//! Pure battle state machine.
//!
//! Owns no I/O and reads no clocks: time is passed in as epoch
//! milliseconds, so every transition is deterministic and unit-testable.
//! Persistence and broadcast are the session actor's job.

use battleroom_protocol::{BattleStatus, StateSync, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of distinct participants that makes a room full and starts the game.
pub const REQUIRED_PARTICIPANTS: usize = 2;

/// Lifecycle phase with phase-specific payload. A start timestamp only
/// exists once the battle has started, so "playing without a start time"
/// is unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Phase {
    Waiting,
    Playing { started_at: u64 },
    Ended { started_at: Option<u64> },
}

/// Serialized form of the state machine, written to durable storage and
/// restored verbatim on actor recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    #[serde(flatten)]
    pub phase: Phase,
    pub elapsed_ms: u64,
    pub participants: BTreeSet<UserId>,
}

/// The battle state machine: `waiting → playing → ended`, strictly
/// monotonic, with elapsed time recomputed on tick and frozen once ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleEngine {
    phase: Phase,
    elapsed_ms: u64,
    participants: BTreeSet<UserId>,
}

impl Default for BattleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl BattleEngine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Waiting,
            elapsed_ms: 0,
            participants: BTreeSet::new(),
        }
    }

    pub fn status(&self) -> BattleStatus {
        match self.phase {
            Phase::Waiting => BattleStatus::Waiting,
            Phase::Playing { .. } => BattleStatus::Playing,
            Phase::Ended { .. } => BattleStatus::Ended,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.phase, Phase::Playing { .. })
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Begin the battle. Valid only from `waiting`; any other phase is
    /// left untouched.
    pub fn start(&mut self, now_ms: u64) {
        if let Phase::Waiting = self.phase {
            self.phase = Phase::Playing { started_at: now_ms };
        }
    }

    /// Recompute elapsed time while playing and return the current
    /// synchronized view. A no-op in any other phase.
    pub fn tick(&mut self, now_ms: u64) -> StateSync {
        if let Phase::Playing { started_at } = self.phase {
            self.elapsed_ms = now_ms.saturating_sub(started_at);
        }
        self.sync_state()
    }

    /// Idempotent participant insert. Returns the resulting distinct count.
    pub fn add_participant(&mut self, id: UserId) -> usize {
        self.participants.insert(id);
        self.participants.len()
    }

    /// Idempotent participant remove.
    pub fn remove_participant(&mut self, id: &UserId) {
        self.participants.remove(id);
    }

    /// Force the battle to `ended` from any phase. Elapsed time stays at
    /// its last computed value.
    pub fn end(&mut self) {
        self.phase = match self.phase {
            Phase::Waiting => Phase::Ended { started_at: None },
            Phase::Playing { started_at } => Phase::Ended {
                started_at: Some(started_at),
            },
            ended @ Phase::Ended { .. } => ended,
        };
    }

    /// Replace the whole state with a persisted snapshot. Used only at
    /// actor construction, before any client traffic is processed.
    pub fn restore(&mut self, snapshot: BattleSnapshot) {
        self.phase = snapshot.phase;
        self.elapsed_ms = snapshot.elapsed_ms;
        self.participants = snapshot.participants;
    }

    pub fn snapshot(&self) -> BattleSnapshot {
        BattleSnapshot {
            phase: self.phase,
            elapsed_ms: self.elapsed_ms,
            participants: self.participants.clone(),
        }
    }

    /// The view broadcast to clients in `SYNC_STATE`.
    pub fn sync_state(&self) -> StateSync {
        let (status, start_time) = match self.phase {
            Phase::Waiting => (BattleStatus::Waiting, None),
            Phase::Playing { started_at } => (BattleStatus::Playing, Some(started_at)),
            Phase::Ended { started_at } => (BattleStatus::Ended, started_at),
        };
        StateSync {
            status,
            start_time,
            elapsed_time: self.elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn starts_waiting_with_zero_elapsed() {
        let engine = BattleEngine::new();
        assert_eq!(engine.status(), BattleStatus::Waiting);
        assert_eq!(engine.sync_state().elapsed_time, 0);
        assert_eq!(engine.sync_state().start_time, None);
    }

    #[test]
    fn second_distinct_participant_fills_the_room() {
        let mut engine = BattleEngine::new();
        assert_eq!(engine.add_participant(user("a")), 1);
        assert_eq!(engine.add_participant(user("a")), 1);
        assert_eq!(engine.add_participant(user("b")), 2);
        assert_eq!(engine.add_participant(user("b")), 2);
    }

    #[test]
    fn start_is_valid_only_from_waiting() {
        let mut engine = BattleEngine::new();
        engine.start(1_000);
        assert_eq!(engine.status(), BattleStatus::Playing);
        assert_eq!(engine.sync_state().start_time, Some(1_000));

        // A later start must not rewrite the start timestamp.
        engine.start(9_000);
        assert_eq!(engine.sync_state().start_time, Some(1_000));

        engine.end();
        engine.start(20_000);
        assert_eq!(engine.status(), BattleStatus::Ended);
    }

    #[test]
    fn tick_is_noop_while_waiting_and_after_ended() {
        let mut engine = BattleEngine::new();
        let before = engine.snapshot();
        engine.tick(5_000);
        assert_eq!(engine.snapshot(), before);

        engine.start(1_000);
        engine.tick(4_000);
        engine.end();
        let frozen = engine.snapshot();
        engine.tick(99_000);
        assert_eq!(engine.snapshot(), frozen);
        assert_eq!(engine.sync_state().elapsed_time, 3_000);
    }

    #[test]
    fn elapsed_is_monotonic_across_ticks() {
        let mut engine = BattleEngine::new();
        engine.start(1_000);

        let mut last = 0;
        for now in [1_000, 2_000, 2_500, 4_000] {
            let sync = engine.tick(now);
            assert!(sync.elapsed_time >= last);
            last = sync.elapsed_time;
        }
        assert_eq!(last, 3_000);
    }

    #[test]
    fn end_from_waiting_has_no_start_time() {
        let mut engine = BattleEngine::new();
        engine.end();
        let sync = engine.sync_state();
        assert_eq!(sync.status, BattleStatus::Ended);
        assert_eq!(sync.start_time, None);
        assert_eq!(sync.elapsed_time, 0);
    }

    #[test]
    fn remove_participant_is_idempotent() {
        let mut engine = BattleEngine::new();
        engine.add_participant(user("a"));
        engine.remove_participant(&user("a"));
        engine.remove_participant(&user("a"));
        assert_eq!(engine.participant_count(), 0);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut engine = BattleEngine::new();
        engine.add_participant(user("a"));
        engine.add_participant(user("b"));
        engine.start(1_000);
        engine.tick(3_500);

        let snapshot = engine.snapshot();
        let mut restored = BattleEngine::new();
        restored.restore(snapshot.clone());

        assert_eq!(restored, engine);
        assert_eq!(restored.sync_state(), engine.sync_state());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn snapshot_survives_json_round_trip() {
        let mut engine = BattleEngine::new();
        engine.add_participant(user("a"));
        engine.add_participant(user("b"));
        engine.start(1_000);
        engine.tick(2_000);

        let json = serde_json::to_vec(&engine.snapshot()).unwrap();
        let back: BattleSnapshot = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, engine.snapshot());
    }
}

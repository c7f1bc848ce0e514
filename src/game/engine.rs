//! Fixed-tick engine with snapshot history, input log and rollback/replay

use std::time::Instant;
use tracing::{debug, trace, warn};

use super::input::{InputLog, PlayerInput};
use super::snapshot::{Snapshot, SnapshotHistory};
use super::state::{AppliedInput, Game, StateError};
use super::Tick;
use crate::config::EngineConfig;
use crate::util::time::ticks_elapsed;

/// Rollback errors
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("no snapshot at or before tick {requested} (oldest retained: {oldest:?})")]
    MissingSnapshot { requested: Tick, oldest: Option<Tick> },

    #[error("snapshot at tick {tick} could not be restored: {source}")]
    Restore {
        tick: Tick,
        #[source]
        source: StateError,
    },
}

/// What happened since the coordinator last looked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A rocket was launched
    pub fired_weapon: bool,
    /// A rocket expired
    pub expired_objects: bool,
    /// Earliest tick at which an input took effect
    pub earliest_applied: Option<Tick>,
}

/// The simulation loop shared by client and server coordinators.
///
/// Tick `T` is the world after `T` physics steps, before inputs tagged `T`
/// are applied.
pub struct Engine {
    game: Game,
    tick: Tick,
    config: EngineConfig,
    snapshots: SnapshotHistory,
    inputs: InputLog,
    /// Wall-clock anchor for catch-up: (instant, tick at that instant)
    anchor: Option<(Instant, Tick)>,
    report: TickReport,
}

impl Engine {
    pub fn new(game: Game, tick: Tick, config: EngineConfig) -> Self {
        let mut engine = Self {
            game,
            tick,
            config,
            snapshots: SnapshotHistory::new(),
            inputs: InputLog::new(),
            anchor: None,
            report: TickReport::default(),
        };
        engine.save_snapshot();
        engine
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    pub fn game_mut(&mut self) -> &mut Game {
        &mut self.game
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn inputs(&self) -> &InputLog {
        &self.inputs
    }

    pub fn snapshots(&self) -> &SnapshotHistory {
        &self.snapshots
    }

    /// Swap in a new game at `tick`, discarding all history
    pub fn replace_game(&mut self, game: Game, tick: Tick) {
        self.game = game;
        self.tick = tick;
        self.snapshots.clear();
        self.inputs.clear();
        self.anchor = None;
        self.report = TickReport::default();
        self.save_snapshot();
    }

    /// Advance by wall clock. Always steps once, then catches up if the
    /// simulation has fallen behind real time. Returns ticks advanced.
    pub fn timer_step(&mut self, now: Instant) -> u64 {
        let start = self.tick;
        self.advance();
        match self.anchor {
            None => self.anchor = Some((now, start)),
            Some((anchor_at, anchor_tick)) => {
                let due = anchor_tick + ticks_elapsed(now.saturating_duration_since(anchor_at));
                while self.tick < due {
                    self.advance();
                }
            }
        }
        self.tick - start
    }

    /// Apply inputs due now, step once, and snapshot on cadence
    pub fn advance(&mut self) {
        self.apply_inputs_at(self.tick);
        let outcome = self.game.step(self.tick);
        if !outcome.expired_rockets.is_empty() {
            self.report.expired_objects = true;
        }
        self.tick += 1;
        if self.tick % self.config.snapshot_every == 0 {
            self.save_snapshot();
        }
    }

    fn apply_inputs_at(&mut self, tick: Tick) {
        let due: Vec<PlayerInput> = self.inputs.at(tick).cloned().collect();
        for input in &due {
            self.apply_now(input);
        }
    }

    /// Apply an input to the game at the current tick without logging it
    pub fn apply_now(&mut self, input: &PlayerInput) -> AppliedInput {
        let applied = self.game.apply_input(input.player, &input.event, self.tick);
        if applied.was_applied() {
            trace!(tick = self.tick, player_id = %input.player, ?applied, "Applied input");
            if matches!(applied, AppliedInput::Fired(_)) {
                self.report.fired_weapon = true;
            }
            let earliest = self.report.earliest_applied.map_or(self.tick, |t| t.min(self.tick));
            self.report.earliest_applied = Some(earliest);
        }
        applied
    }

    /// Add an input to the log. Returns false for a duplicate.
    pub fn record_input(&mut self, input: PlayerInput) -> bool {
        self.inputs.record(input)
    }

    /// Re-log an input under the tick the server actually applied it at
    pub fn move_input(&mut self, from: Tick, input: PlayerInput) -> bool {
        let removed = self.inputs.remove(from, input.player, &input.event);
        self.inputs.record(input);
        removed
    }

    pub fn save_snapshot(&mut self) {
        match self.game.serialize_partial() {
            Ok(state) => self.snapshots.insert(Snapshot {
                tick: self.tick,
                state,
            }),
            Err(e) => warn!(tick = self.tick, error = %e, "Failed to capture snapshot"),
        }
    }

    /// Adopt an externally supplied snapshot (an authoritative sync)
    pub fn insert_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshots.insert(snapshot);
    }

    pub fn oldest_snapshot_tick(&self) -> Option<Tick> {
        self.snapshots.oldest_tick()
    }

    /// Rewind to the latest snapshot at or before `target`, then replay up to
    /// `target`. Fails without touching anything when no snapshot exists.
    pub fn restore_to(&mut self, target: Tick) -> Result<(), RollbackError> {
        let snapshot = self
            .snapshots
            .latest_at_or_before(target)
            .ok_or(RollbackError::MissingSnapshot {
                requested: target,
                oldest: self.snapshots.oldest_tick(),
            })?;
        let snapshot_tick = snapshot.tick;
        self.game
            .merge_partial(&snapshot.state)
            .map_err(|source| RollbackError::Restore {
                tick: snapshot_tick,
                source,
            })?;

        debug!(from = self.tick, snapshot_tick, target, "Rolled back");
        self.tick = snapshot_tick;
        self.replay_to(target);
        Ok(())
    }

    /// Step forward until the tick reaches `target`
    pub fn replay_to(&mut self, target: Tick) {
        while self.tick < target {
            self.advance();
        }
    }

    /// Rewind to `target`, run `f`, then replay back to where we were
    pub fn restore_apply_replay(&mut self, target: Tick, f: impl FnOnce(&mut Game)) -> Result<(), RollbackError> {
        let resume = self.tick.max(target);
        if target != self.tick {
            self.restore_to(target)?;
        }
        f(&mut self.game);
        self.replay_to(resume);
        Ok(())
    }

    /// Drop history older than `retain_from`. The newest snapshot at or before
    /// it stays as a baseline, along with every input logged from there on.
    pub fn garbage_collect(&mut self, retain_from: Tick) {
        self.snapshots.retain_from(retain_from);
        let baseline = self.snapshots.oldest_tick().unwrap_or(retain_from);
        self.inputs.retain_from(baseline.min(retain_from));
        trace!(
            retain_from,
            snapshots = self.snapshots.len(),
            inputs = self.inputs.len(),
            "Garbage collected history"
        );
    }

    /// Take and reset the accumulated report
    pub fn take_report(&mut self) -> TickReport {
        std::mem::take(&mut self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::{InputEvent, RotateDir, ThrustDir};
    use crate::game::lander::LanderColor;
    use crate::game::physics::Pose;
    use crate::game::state::GameOptions;
    use crate::game::terrain::Moon;
    use crate::game::PlayerId;
    use crate::util::time::tick_duration;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn game() -> Game {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        Game::create_new(GameOptions::default(), Some(Moon::flat(1000.0, 1000.0, 50.0)), &mut rng)
    }

    fn joined(engine: &mut Engine, tick: Tick) -> PlayerId {
        let player = Uuid::new_v4();
        engine.record_input(PlayerInput {
            player,
            tick,
            event: InputEvent::PlayerJoined {
                name: "p".into(),
                color: LanderColor::Red,
                x: 400.0,
                y: 700.0,
            },
        });
        player
    }

    fn script(engine: &mut Engine, player: PlayerId) {
        for (tick, event) in [
            (
                3,
                InputEvent::Thrust {
                    dir: ThrustDir::Up,
                    active: true,
                },
            ),
            (
                9,
                InputEvent::Rotate {
                    dir: RotateDir::Left,
                    active: true,
                },
            ),
            (
                20,
                InputEvent::Thrust {
                    dir: ThrustDir::Up,
                    active: false,
                },
            ),
        ] {
            engine.record_input(PlayerInput { player, tick, event });
        }
    }

    fn pose(engine: &Engine, player: PlayerId) -> Pose {
        engine.game().lander_pose(player).unwrap()
    }

    #[test]
    fn construction_seeds_a_snapshot() {
        let engine = Engine::new(game(), 42, EngineConfig::server());
        assert_eq!(engine.snapshots().ticks().collect::<Vec<_>>(), vec![42]);
    }

    #[test]
    fn snapshots_follow_cadence() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        engine.replay_to(20);
        assert_eq!(engine.snapshots().ticks().collect::<Vec<_>>(), vec![0, 6, 12, 18]);
    }

    #[test]
    fn inputs_apply_at_their_tick_before_the_step() {
        let mut engine = Engine::new(game(), 0, EngineConfig::client());
        let player = joined(&mut engine, 5);
        engine.replay_to(5);
        assert!(engine.game().lander(player).is_none());
        engine.advance();
        assert!(engine.game().lander(player).is_some());
        assert_eq!(engine.take_report().earliest_applied, Some(5));
    }

    #[test]
    fn identical_engines_stay_identical() {
        let base = game();
        let full = base.serialize_full().unwrap();
        let mut a = Engine::new(Game::from_full(&full).unwrap(), 0, EngineConfig::server());
        let mut b = Engine::new(Game::from_full(&full).unwrap(), 0, EngineConfig::client());

        let player = joined(&mut a, 1);
        b.record_input(a.inputs().iter().next().unwrap().clone());
        script(&mut a, player);
        script(&mut b, player);

        a.replay_to(90);
        b.replay_to(90);
        assert_eq!(pose(&a, player), pose(&b, player));
        assert_eq!(a.game().lander(player), b.game().lander(player));
    }

    #[test]
    fn restore_and_replay_matches_forward_stepping() {
        let mut forward = Engine::new(game(), 0, EngineConfig::server());
        let player = joined(&mut forward, 1);
        script(&mut forward, player);
        forward.replay_to(60);
        let expected = pose(&forward, player);

        forward.restore_to(13).unwrap();
        assert_eq!(forward.tick(), 13);
        forward.replay_to(60);
        assert_eq!(pose(&forward, player), expected);
    }

    #[test]
    fn late_input_is_applied_retroactively() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        let player = joined(&mut engine, 0);
        engine.replay_to(30);
        let coasting = pose(&engine, player);

        engine.record_input(PlayerInput {
            player,
            tick: 10,
            event: InputEvent::Thrust {
                dir: ThrustDir::Up,
                active: true,
            },
        });
        engine.restore_apply_replay(10, |_| ()).unwrap();

        assert_eq!(engine.tick(), 30);
        assert!(pose(&engine, player).vel_y > coasting.vel_y);
        assert!(engine.game().lander(player).unwrap().thrusting_up);
    }

    #[test]
    fn restore_apply_replay_at_current_tick_just_runs_f() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        engine.replay_to(7);
        let mut ran = false;
        engine
            .restore_apply_replay(7, |game| {
                ran = true;
                game.options.infinite_fuel = true;
            })
            .unwrap();
        assert!(ran);
        assert_eq!(engine.tick(), 7);
        assert!(engine.game().options.infinite_fuel);
    }

    #[test]
    fn rollback_past_history_fails_without_mutation() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        let player = joined(&mut engine, 0);
        engine.replay_to(40);
        engine.garbage_collect(30);
        let oldest = engine.oldest_snapshot_tick().unwrap();
        assert!(oldest > 0);
        let before = pose(&engine, player);

        let err = engine.restore_to(oldest - 1).unwrap_err();
        assert!(matches!(err, RollbackError::MissingSnapshot { .. }));
        assert_eq!(engine.tick(), 40);
        assert_eq!(pose(&engine, player), before);

        let err = engine.restore_apply_replay(oldest - 1, |_| panic!("must not run")).unwrap_err();
        assert!(matches!(err, RollbackError::MissingSnapshot { .. }));
        assert_eq!(engine.tick(), 40);
    }

    #[test]
    fn garbage_collect_keeps_inputs_after_the_baseline() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        let player = joined(&mut engine, 0);
        script(&mut engine, player);
        engine.record_input(PlayerInput {
            player,
            tick: 13,
            event: InputEvent::Rotate {
                dir: RotateDir::Right,
                active: true,
            },
        });
        engine.replay_to(40);
        let forward = pose(&engine, player);
        engine.garbage_collect(15);

        assert_eq!(engine.oldest_snapshot_tick(), Some(12));
        assert_eq!(engine.inputs().iter().map(|i| i.tick).collect::<Vec<_>>(), vec![13, 20]);

        // A rewind between the baseline and the retain tick still replays tick 13
        engine.restore_to(14).unwrap();
        engine.replay_to(40);
        assert_eq!(pose(&engine, player), forward);
    }

    #[test]
    fn timer_step_catches_up_with_wall_clock() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        let start = Instant::now();
        assert_eq!(engine.timer_step(start), 1);
        assert_eq!(engine.timer_step(start + tick_duration()), 1);
        assert_eq!(engine.tick(), 2);

        // Stalled for ten ticks: catch up in one call
        assert_eq!(engine.timer_step(start + tick_duration() * 12), 10);
        assert_eq!(engine.tick(), 12);
    }

    #[test]
    fn replace_game_resets_history_but_not_time() {
        let mut engine = Engine::new(game(), 0, EngineConfig::server());
        joined(&mut engine, 2);
        engine.replay_to(25);
        engine.replace_game(game(), engine.tick());

        assert_eq!(engine.tick(), 25);
        assert!(engine.inputs().is_empty());
        assert_eq!(engine.snapshots().ticks().collect::<Vec<_>>(), vec![25]);
        assert!(engine.game().landers.is_empty());
    }
}

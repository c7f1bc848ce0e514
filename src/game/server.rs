//! Authoritative server coordinator for one room

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::constants::{ACKED_INPUTS_PER_PLAYER, RESET_GAME_WAIT_SECS, START_GAME_WAIT_SECS, WON_GAME_WAIT_SECS};
use super::engine::Engine;
use super::input::{InputEvent, PlayerInput};
use super::lander::LanderColor;
use super::snapshot::BroadcastCadence;
use super::state::{Game, GameOptions, WinReason, WinState};
use super::{ConnectionId, PlayerId, Tick};
use crate::config::EngineConfig;
use crate::util::time::{secs_to_ticks, unix_millis};
use crate::ws::protocol::{ClientMsg, ResetCause, ResetOptions, ServerMsg};

/// Who an outgoing message is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    All,
    Only(ConnectionId),
}

impl Recipient {
    pub fn includes(&self, conn: ConnectionId) -> bool {
        match self {
            Recipient::All => true,
            Recipient::Only(target) => *target == conn,
        }
    }
}

/// An addressed server message. Shared so one broadcast is encoded per
/// connection without cloning the payload.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipient,
    pub msg: Arc<ServerMsg>,
}

/// An armed reset countdown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingReset {
    pub deadline_tick: Tick,
    pub cause: ResetCause,
    pub options: GameOptions,
    pub reset_options: ResetOptions,
}

/// Owns the authoritative engine of a room
pub struct ServerCoordinator {
    engine: Engine,
    connections: Vec<ConnectionId>,
    input_queue: Vec<PlayerInput>,
    outbox: Vec<Outbound>,
    last_sync_tick: Tick,
    last_gc_tick: Tick,
    pending_reset: Option<PendingReset>,
    cadence: BroadcastCadence,
    rng: ChaCha8Rng,
    running: bool,
}

impl ServerCoordinator {
    /// New room on a freshly generated moon
    pub fn new(config: EngineConfig, mut rng: ChaCha8Rng) -> Self {
        let game = Game::create_new(GameOptions::default(), None, &mut rng);
        Self::with_game(game, config, rng)
    }

    pub fn with_game(game: Game, config: EngineConfig, rng: ChaCha8Rng) -> Self {
        Self {
            engine: Engine::new(game, 0, config),
            connections: Vec::new(),
            input_queue: Vec::new(),
            outbox: Vec::new(),
            last_sync_tick: 0,
            last_gc_tick: 0,
            pending_reset: None,
            cadence: BroadcastCadence::new(config.partial_sync_every),
            rng,
            running: false,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn game(&self) -> &Game {
        self.engine.game()
    }

    pub fn tick(&self) -> Tick {
        self.engine.tick()
    }

    /// Whether the tick timer should run
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn pending_reset(&self) -> Option<&PendingReset> {
        self.pending_reset.as_ref()
    }

    /// Messages produced since the last call
    pub fn take_outgoing(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub fn on_connect(&mut self, conn: ConnectionId) {
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
        info!(connection_id = %conn, connections = self.connections.len(), "Connection joined room");
        match self.engine.game().serialize_full() {
            Ok(full) => self.send(
                Recipient::Only(conn),
                ServerMsg::Init {
                    epoch: full.epoch,
                    tick: self.engine.tick(),
                    player: conn,
                    full,
                },
            ),
            Err(e) => warn!(connection_id = %conn, error = %e, "Failed to serialize init state"),
        }
        self.running = true;
    }

    pub fn on_disconnect(&mut self, conn: ConnectionId) {
        self.connections.retain(|c| *c != conn);
        info!(connection_id = %conn, connections = self.connections.len(), "Connection left room");
        if self.connections.is_empty() {
            self.running = false;
        }
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    pub fn handle_message(&mut self, conn: ConnectionId, msg: ClientMsg) {
        let epoch = self.engine.game().id;
        // A client that lost track of the epoch can still ask for the state
        if msg.epoch() != epoch && !matches!(msg, ClientMsg::RequestFull { .. }) {
            debug!(connection_id = %conn, kind = msg.kind(), "Dropped message for another epoch");
            return;
        }

        match msg {
            ClientMsg::Join { name, color, .. } => {
                self.add_player(conn, name, color);
                self.send_full(Recipient::Only(conn), FullKind::Reset);
                self.broadcast_partial();
            }
            ClientMsg::Input { tick, event, .. } => {
                // Too old to roll back to: apply now, and say so in the echo
                let current = self.engine.tick();
                let oldest = self.engine.oldest_snapshot_tick().unwrap_or(current);
                let restamped_from = (tick < oldest).then_some(tick);
                if restamped_from.is_some() {
                    debug!(connection_id = %conn, tick, current, "Input older than history, applying now");
                }
                let input = PlayerInput {
                    player: conn,
                    tick: if restamped_from.is_some() { current } else { tick },
                    event,
                };
                self.input_queue.push(input.clone());
                self.send(Recipient::All, ServerMsg::input(epoch, input, restamped_from));
            }
            ClientMsg::RequestStart {
                name, color, options, ..
            } => {
                if self.engine.game().lander(conn).is_none() {
                    self.add_player(conn, name, color);
                }
                self.arm_reset(
                    ResetCause::Requested,
                    START_GAME_WAIT_SECS,
                    options,
                    ResetOptions {
                        preserve_map: true,
                        preserve_scores: false,
                    },
                );
            }
            ClientMsg::RequestReset {
                options, reset_options, ..
            } => {
                self.arm_reset(ResetCause::Requested, RESET_GAME_WAIT_SECS, options, reset_options);
            }
            ClientMsg::CancelReset { .. } => {
                if self.pending_reset.take().is_some() {
                    info!(connection_id = %conn, "Reset cancelled");
                    let tick = self.engine.tick();
                    self.send(Recipient::All, ServerMsg::ResetCancelled { epoch, tick });
                }
            }
            ClientMsg::PlayerInfo { name, color, .. } => {
                let input = PlayerInput {
                    player: conn,
                    tick: self.engine.tick(),
                    event: InputEvent::PlayerInfo { name, color },
                };
                if self.engine.record_input(input.clone()) {
                    self.engine.apply_now(&input);
                }
                self.broadcast_partial();
            }
            ClientMsg::Chat { text, .. } => {
                let tick = self.engine.tick();
                self.send(
                    Recipient::All,
                    ServerMsg::Chat {
                        epoch,
                        tick,
                        text,
                        player: conn,
                    },
                );
            }
            ClientMsg::RequestFull { .. } => {
                debug!(connection_id = %conn, "Full state requested");
                self.send_full(Recipient::Only(conn), FullKind::Sync);
            }
        }
    }

    /// Spawn a lander for `player` through a logged join event
    fn add_player(&mut self, player: PlayerId, name: String, color: Option<LanderColor>) {
        if self.engine.game().lander(player).is_some() {
            return;
        }
        let game = self.engine.game();
        let used: Vec<LanderColor> = game.landers.iter().map(|l| l.color).collect();
        let color = color.unwrap_or_else(|| LanderColor::pick(&mut self.rng, &used));
        let x = self.rng.gen::<f32>() * game.moon.world_width;
        let y = game.moon.world_height * 0.5;
        self.spawn_lander(player, name, color, x, y);
    }

    fn spawn_lander(&mut self, player: PlayerId, name: String, color: LanderColor, x: f32, y: f32) {
        let input = PlayerInput {
            player,
            tick: self.engine.tick(),
            event: InputEvent::PlayerJoined { name, color, x, y },
        };
        self.engine.record_input(input.clone());
        self.engine.apply_now(&input);
        info!(player_id = %player, tick = input.tick, "Lander joined");
    }

    // ------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------

    /// Apply queued inputs, advance by wall clock, then run rules and syncs
    pub fn timer_step(&mut self, now: Instant) -> u64 {
        self.apply_queued_inputs();
        let advanced = self.engine.timer_step(now);
        self.finish_step(advanced);
        advanced
    }

    /// Same as `timer_step` but advances exactly one tick
    pub fn step(&mut self) {
        self.apply_queued_inputs();
        self.engine.advance();
        self.finish_step(1);
    }

    fn apply_queued_inputs(&mut self) {
        if self.input_queue.is_empty() {
            return;
        }
        let mut queue = std::mem::take(&mut self.input_queue);
        queue.sort_by_key(|input| input.tick);

        let current = self.engine.tick();
        let mut earliest: Option<Tick> = None;
        for input in queue {
            let tick = input.tick;
            if self.engine.record_input(input) {
                earliest = Some(earliest.map_or(tick, |t| t.min(tick)));
            }
        }

        if let Some(target) = earliest.filter(|t| *t < current) {
            // Snapshots do not carry the win, so a decided round is never rewound
            if self.engine.game().won_player.is_some() {
                debug!(target, "Round decided, late input not rolled back");
            } else if let Err(e) = self.engine.restore_apply_replay(target, |_| ()) {
                warn!(error = %e, target, "Late input could not be rolled back");
            }
        }
    }

    fn finish_step(&mut self, advanced: u64) {
        self.check_rules();
        self.poll_reset();

        let report = self.engine.take_report();
        let behind = report.earliest_applied.is_some_and(|t| t < self.last_sync_tick);
        if self.cadence.should_send(advanced) || report.fired_weapon || report.expired_objects || behind {
            self.broadcast_partial();
        }

        let tick = self.engine.tick();
        let config = *self.engine.config();
        if tick.saturating_sub(self.last_gc_tick) >= config.gc_every {
            self.engine.garbage_collect(tick.saturating_sub(config.retention_ticks));
            self.last_gc_tick = tick;
        }
    }

    fn check_rules(&mut self) {
        let game = self.engine.game();
        if self.pending_reset.is_some() || game.won_player.is_some() {
            return;
        }

        let landed = game.landers.iter().filter(|l| l.is_alive()).find_map(|lander| {
            let pad = game.safe_landing_pad(lander)?;
            let pose = game.lander_pose(lander.id)?;
            Some((
                WinState {
                    player: lander.id,
                    reason: WinReason::Landed {
                        vel_x: pose.vel_x,
                        vel_y: pose.vel_y,
                        rotation: pose.rotation,
                    },
                },
                pad.multiplier(),
            ))
        });
        let connections = &self.connections;
        let win = landed.or_else(|| {
            game.last_standing(|id| connections.contains(&id)).map(|player| {
                (
                    WinState {
                        player,
                        reason: WinReason::LastLander,
                    },
                    1,
                )
            })
        });

        let cause = match win {
            Some((state, wins)) => {
                let game = self.engine.game_mut();
                game.won_player = Some(state);
                game.add_wins(state.player, wins);
                info!(player_id = %state.player, reason = ?state.reason, wins, "Round won");
                ResetCause::Won
            }
            None if self.engine.game().all_dead() => {
                info!("Every lander is dead");
                ResetCause::Dead
            }
            None => return,
        };

        self.broadcast_meta();
        let options = self.engine.game().options;
        self.arm_reset(
            cause,
            WON_GAME_WAIT_SECS,
            options,
            ResetOptions {
                preserve_map: false,
                preserve_scores: true,
            },
        );
    }

    // ------------------------------------------------------------------
    // Resets
    // ------------------------------------------------------------------

    fn arm_reset(&mut self, cause: ResetCause, wait_secs: u64, options: GameOptions, reset_options: ResetOptions) {
        let tick = self.engine.tick();
        self.pending_reset = Some(PendingReset {
            deadline_tick: tick + secs_to_ticks(wait_secs),
            cause,
            options,
            reset_options,
        });
        info!(?cause, wait_secs, tick, "Reset scheduled");
        self.send(
            Recipient::All,
            ServerMsg::ResetPending {
                epoch: self.engine.game().id,
                tick,
                cause,
                reset_at_ms: unix_millis() + wait_secs * 1_000,
            },
        );
    }

    fn poll_reset(&mut self) {
        let tick = self.engine.tick();
        let Some(pending) = self.pending_reset.filter(|p| tick >= p.deadline_tick) else {
            return;
        };
        self.reset_game(pending.options, pending.reset_options);
    }

    /// Start a new epoch with every connected player re-spawned
    pub fn reset_game(&mut self, options: GameOptions, reset_options: ResetOptions) {
        self.pending_reset = None;
        let old = self.engine.game();
        let moon = reset_options.preserve_map.then(|| old.moon.clone());
        let mut game = Game::create_new(options, moon, &mut self.rng);

        let players: Vec<(PlayerId, String, LanderColor)> = old
            .landers
            .iter()
            .filter(|l| self.connections.contains(&l.id))
            .map(|l| (l.id, l.name.clone(), l.color))
            .collect();
        if reset_options.preserve_scores {
            for conn in &self.connections {
                let wins = old.wins(*conn);
                if wins > 0 {
                    game.add_wins(*conn, wins);
                }
            }
        }

        let tick = self.engine.tick();
        let epoch = game.id;
        self.engine.replace_game(game, tick);
        self.input_queue.clear();
        for (player, name, color) in players {
            let x = self.rng.gen::<f32>() * self.engine.game().moon.world_width;
            let y = self.engine.game().moon.world_height * 0.5;
            self.spawn_lander(player, name, color, x, y);
        }
        self.last_sync_tick = tick;
        self.last_gc_tick = tick;

        info!(%epoch, tick, "Game reset");
        self.send_full(Recipient::All, FullKind::Reset);
    }

    // ------------------------------------------------------------------
    // Outgoing
    // ------------------------------------------------------------------

    fn send(&mut self, to: Recipient, msg: ServerMsg) {
        self.outbox.push(Outbound { to, msg: Arc::new(msg) });
    }

    fn send_full(&mut self, to: Recipient, kind: FullKind) {
        let full = match self.engine.game().serialize_full() {
            Ok(full) => full,
            Err(e) => {
                warn!(error = %e, "Failed to serialize full state");
                return;
            }
        };
        let epoch = full.epoch;
        let tick = self.engine.tick();
        let msg = match kind {
            FullKind::Reset => ServerMsg::Reset { epoch, tick, full },
            FullKind::Sync => ServerMsg::FullSync { epoch, tick, full },
        };
        self.send(to, msg);
    }

    fn broadcast_partial(&mut self) {
        let game = self.engine.game();
        let tick = self.engine.tick();
        let payload = match game.serialize_partial() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, tick, "Failed to serialize partial state");
                return;
            }
        };
        let inputs = self.engine.inputs();
        let acked_inputs: BTreeMap<PlayerId, Vec<Tick>> = game
            .landers
            .iter()
            .map(|l| (l.id, inputs.ticks_for(l.id, tick, ACKED_INPUTS_PER_PLAYER)))
            .collect();
        let epoch = game.id;

        self.send(
            Recipient::All,
            ServerMsg::PartialSync {
                epoch,
                tick,
                payload,
                acked_inputs,
            },
        );
        self.last_sync_tick = tick;
    }

    fn broadcast_meta(&mut self) {
        let meta = self.engine.game().serialize_meta();
        let tick = self.engine.tick();
        self.send(
            Recipient::All,
            ServerMsg::MetaSync {
                epoch: meta.epoch,
                tick,
                meta,
            },
        );
    }
}

/// Which full-state message to send
#[derive(Debug, Clone, Copy)]
enum FullKind {
    Reset,
    Sync,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::terrain::Moon;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn server() -> ServerCoordinator {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let game = Game::create_new(GameOptions::default(), Some(Moon::flat(1000.0, 1000.0, 50.0)), &mut rng);
        ServerCoordinator::with_game(game, EngineConfig::server(), rng)
    }

    fn join(server: &mut ServerCoordinator, conn: ConnectionId) {
        let epoch = server.game().id;
        server.handle_message(
            conn,
            ClientMsg::Join {
                epoch,
                tick: server.tick(),
                name: "pilot".into(),
                color: None,
            },
        );
    }

    fn kinds(out: &[Outbound]) -> Vec<&'static str> {
        out.iter().map(|o| o.msg.kind()).collect()
    }

    #[test]
    fn connect_sends_init_and_starts_the_timer() {
        let mut server = server();
        let conn = Uuid::new_v4();
        assert!(!server.is_running());
        server.on_connect(conn);

        let out = server.take_outgoing();
        assert_eq!(kinds(&out), vec!["init"]);
        assert_eq!(out[0].to, Recipient::Only(conn));
        assert!(matches!(out[0].msg.as_ref(), ServerMsg::Init { player, .. } if *player == conn));
        assert!(server.is_running());

        server.on_disconnect(conn);
        assert!(!server.is_running());
    }

    #[test]
    fn join_replies_reset_and_broadcasts_a_partial() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        server.take_outgoing();
        join(&mut server, conn);

        let out = server.take_outgoing();
        assert_eq!(kinds(&out), vec!["reset", "partial_sync"]);
        assert_eq!(out[0].to, Recipient::Only(conn));
        assert_eq!(out[1].to, Recipient::All);
        assert!(server.game().lander(conn).is_some());
        assert_eq!(server.engine().inputs().len(), 1);
    }

    #[test]
    fn input_is_forced_to_sender_and_echoed() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        join(&mut server, conn);
        server.take_outgoing();

        let epoch = server.game().id;
        server.handle_message(
            conn,
            ClientMsg::Input {
                epoch,
                player: Uuid::new_v4(),
                tick: 0,
                event: InputEvent::Thrust {
                    dir: crate::game::input::ThrustDir::Up,
                    active: true,
                },
            },
        );
        let out = server.take_outgoing();
        let ServerMsg::Input { player, .. } = out[0].msg.as_ref() else {
            panic!("expected input echo");
        };
        assert_eq!(*player, conn);

        server.step();
        assert!(server.game().lander(conn).unwrap().thrusting_up);
    }

    #[test]
    fn input_older_than_history_is_echoed_at_the_apply_tick() {
        let config = EngineConfig {
            retention_ticks: 30,
            gc_every: 60,
            ..EngineConfig::server()
        };
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let game = Game::create_new(GameOptions::default(), Some(Moon::flat(1000.0, 1000.0, 50.0)), &mut rng);
        let mut server = ServerCoordinator::with_game(game, config, rng);
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        join(&mut server, conn);
        for _ in 0..120 {
            server.step();
        }
        assert_eq!(server.engine().oldest_snapshot_tick(), Some(90));
        server.take_outgoing();

        let epoch = server.game().id;
        server.handle_message(
            conn,
            ClientMsg::Input {
                epoch,
                player: conn,
                tick: 10,
                event: InputEvent::Thrust {
                    dir: crate::game::input::ThrustDir::Up,
                    active: true,
                },
            },
        );
        let out = server.take_outgoing();
        let ServerMsg::Input { tick, restamped_from, .. } = out[0].msg.as_ref() else {
            panic!("expected input echo");
        };
        assert_eq!((*tick, *restamped_from), (120, Some(10)));

        server.step();
        assert!(server.game().lander(conn).unwrap().thrusting_up);
        assert!(server.engine().inputs().ticks_for(conn, 200, 10).contains(&120));
    }

    #[test]
    fn late_input_is_rolled_in() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        join(&mut server, conn);
        for _ in 0..20 {
            server.step();
        }
        let coasting = server.game().lander_pose(conn).unwrap();

        let epoch = server.game().id;
        server.handle_message(
            conn,
            ClientMsg::Input {
                epoch,
                player: conn,
                tick: 5,
                event: InputEvent::Thrust {
                    dir: crate::game::input::ThrustDir::Up,
                    active: true,
                },
            },
        );
        server.step();
        assert_eq!(server.tick(), 21);
        assert!(server.game().lander_pose(conn).unwrap().vel_y > coasting.vel_y);
    }

    #[test]
    fn foreign_epoch_messages_are_dropped() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        server.take_outgoing();
        server.handle_message(
            conn,
            ClientMsg::Join {
                epoch: Uuid::new_v4(),
                tick: 0,
                name: "x".into(),
                color: None,
            },
        );
        assert!(server.take_outgoing().is_empty());
        assert!(server.game().landers.is_empty());

        // Recovery still works
        server.handle_message(
            conn,
            ClientMsg::RequestFull {
                epoch: Uuid::new_v4(),
                tick: 0,
            },
        );
        assert_eq!(kinds(&server.take_outgoing()), vec!["full_sync"]);
    }

    #[test]
    fn request_reset_then_cancel() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        server.take_outgoing();
        let epoch = server.game().id;

        server.handle_message(
            conn,
            ClientMsg::RequestReset {
                epoch,
                tick: 0,
                options: GameOptions::practice(),
                reset_options: ResetOptions::default(),
            },
        );
        let pending = *server.pending_reset().unwrap();
        assert_eq!(pending.deadline_tick, secs_to_ticks(RESET_GAME_WAIT_SECS));
        assert_eq!(kinds(&server.take_outgoing()), vec!["reset_pending"]);

        server.handle_message(conn, ClientMsg::CancelReset { epoch, tick: 0 });
        assert!(server.pending_reset().is_none());
        assert_eq!(kinds(&server.take_outgoing()), vec!["reset_cancelled"]);

        for _ in 0..=secs_to_ticks(RESET_GAME_WAIT_SECS) {
            server.step();
        }
        assert_eq!(server.game().id, epoch);
    }

    #[test]
    fn start_countdown_spawns_and_resets_with_options() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        let epoch = server.game().id;
        let moon = server.game().moon.clone();

        server.handle_message(
            conn,
            ClientMsg::RequestStart {
                epoch,
                tick: 0,
                name: "ace".into(),
                color: Some(LanderColor::Pink),
                options: GameOptions::practice(),
            },
        );
        assert!(server.game().lander(conn).is_some());

        for _ in 0..secs_to_ticks(START_GAME_WAIT_SECS) {
            server.step();
        }
        assert_ne!(server.game().id, epoch);
        assert_eq!(server.game().moon, moon);
        assert_eq!(server.game().options, GameOptions::practice());
        let lander = server.game().lander(conn).unwrap();
        assert_eq!((lander.name.as_str(), lander.color), ("ace", LanderColor::Pink));
        assert!(kinds(&server.take_outgoing()).contains(&"reset"));
    }

    #[test]
    fn last_lander_wins_and_scores_carry_over() {
        let mut server = server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for conn in [a, b] {
            server.on_connect(conn);
            join(&mut server, conn);
        }
        server
            .engine
            .game_mut()
            .lander_mut(b)
            .unwrap()
            .take_damage(1_000.0, &GameOptions::default());
        server.take_outgoing();
        server.step();

        let won = server.game().won_player.unwrap();
        assert_eq!(won.player, a);
        assert_eq!(won.reason, WinReason::LastLander);
        assert_eq!(server.game().wins(a), 1);
        assert_eq!(server.pending_reset().unwrap().cause, ResetCause::Won);
        let out = kinds(&server.take_outgoing());
        assert_eq!(&out[..2], &["meta_sync", "reset_pending"]);

        for _ in 0..secs_to_ticks(WON_GAME_WAIT_SECS) {
            server.step();
        }
        assert!(server.game().won_player.is_none());
        assert_eq!(server.game().wins(a), 1);
        assert_eq!(server.game().landers.len(), 2);
        assert!(server.game().landers.iter().all(|l| l.is_alive()));
    }

    #[test]
    fn decided_round_ignores_late_inputs() {
        let mut server = server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for conn in [a, b] {
            server.on_connect(conn);
            join(&mut server, conn);
        }
        for _ in 0..10 {
            server.step();
        }
        server
            .engine
            .game_mut()
            .lander_mut(b)
            .unwrap()
            .take_damage(1_000.0, &GameOptions::default());
        server.step();
        assert_eq!(server.game().won_player.map(|w| w.player), Some(a));
        let decided = server.game().lander_pose(a).unwrap();

        let epoch = server.game().id;
        server.handle_message(
            a,
            ClientMsg::Input {
                epoch,
                player: a,
                tick: server.tick() - 4,
                event: InputEvent::Thrust {
                    dir: crate::game::input::ThrustDir::Up,
                    active: true,
                },
            },
        );
        server.step();
        assert_eq!(server.game().lander_pose(a).unwrap(), decided);
    }

    #[test]
    fn simultaneous_deaths_schedule_a_dead_reset() {
        let mut server = server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for conn in [a, b] {
            server.on_connect(conn);
            join(&mut server, conn);
        }
        for conn in [a, b] {
            server
                .engine
                .game_mut()
                .lander_mut(conn)
                .unwrap()
                .take_damage(1_000.0, &GameOptions::default());
        }
        server.take_outgoing();
        server.step();

        assert!(server.game().won_player.is_none());
        assert_eq!(server.pending_reset().unwrap().cause, ResetCause::Dead);
        assert_eq!(server.game().wins(a) + server.game().wins(b), 0);
        let out = kinds(&server.take_outgoing());
        assert_eq!(&out[..2], &["meta_sync", "reset_pending"]);
    }

    #[test]
    fn disconnected_players_are_not_respawned() {
        let mut server = server();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for conn in [a, b] {
            server.on_connect(conn);
            join(&mut server, conn);
        }
        server.on_disconnect(b);
        server.reset_game(GameOptions::default(), ResetOptions::default());
        assert!(server.game().lander(a).is_some());
        assert!(server.game().lander(b).is_none());
    }

    #[test]
    fn partial_sync_acknowledges_logged_inputs() {
        let mut server = server();
        let conn = Uuid::new_v4();
        server.on_connect(conn);
        join(&mut server, conn);
        let epoch = server.game().id;
        for tick in [2, 4] {
            server.handle_message(
                conn,
                ClientMsg::Input {
                    epoch,
                    player: conn,
                    tick,
                    event: InputEvent::Thrust {
                        dir: crate::game::input::ThrustDir::Up,
                        active: tick == 2,
                    },
                },
            );
        }
        for _ in 0..EngineConfig::server().partial_sync_every {
            server.step();
        }
        let out = server.take_outgoing();
        let acked = out
            .iter()
            .rev()
            .find_map(|o| match o.msg.as_ref() {
                ServerMsg::PartialSync { acked_inputs, .. } => acked_inputs.get(&conn).cloned(),
                _ => None,
            })
            .unwrap();
        assert_eq!(acked, vec![0, 2, 4]);
    }
}

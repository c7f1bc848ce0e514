//! Client-side coordinator: optimistic local play reconciled against the
//! authoritative server by selective rollback

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::engine::Engine;
use super::input::{InputEvent, PlayerInput};
use super::lander::{Lander, LanderColor};
use super::snapshot::Snapshot;
use super::state::{FullState, Game, GameOptions, PartialState, StateError, ViewState};
use super::{PlayerId, Tick};
use crate::config::EngineConfig;
use crate::ws::protocol::{ChatLine, ClientMsg, ResetCause, ResetOptions, ServerMsg};

/// Client setup errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("expected an init message, got {0}")]
    UnexpectedMessage(&'static str),

    #[error(transparent)]
    State(#[from] StateError),
}

/// A reset the server has scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetNotice {
    pub cause: ResetCause,
    pub reset_at_ms: u64,
}

/// Latest partial sync of a drained batch
struct PendingSync {
    tick: Tick,
    payload: PartialState,
    acked_inputs: BTreeMap<PlayerId, Vec<Tick>>,
}

/// One player's replica of a room
pub struct ClientCoordinator {
    engine: Engine,
    player: PlayerId,
    inbox: Vec<ServerMsg>,
    outbox: Vec<ClientMsg>,
    chat: Vec<ChatLine>,
    last_sync_tick: Tick,
    last_gc_tick: Tick,
    pending_reset: Option<ResetNotice>,
}

impl ClientCoordinator {
    /// Build a replica from the server's full state
    pub fn new(player: PlayerId, full: &FullState, tick: Tick, config: EngineConfig) -> Result<Self, StateError> {
        let game = Game::from_full(full)?;
        Ok(Self {
            engine: Engine::new(game, tick, config),
            player,
            inbox: Vec::new(),
            outbox: Vec::new(),
            chat: Vec::new(),
            last_sync_tick: tick,
            last_gc_tick: tick,
            pending_reset: None,
        })
    }

    /// Build a replica from the connection's `Init` message, taking the
    /// player id the server assigned
    pub fn from_init(msg: &ServerMsg, config: EngineConfig) -> Result<Self, ClientError> {
        match msg {
            ServerMsg::Init { full, tick, player, .. } => Ok(Self::new(*player, full, *tick, config)?),
            other => Err(ClientError::UnexpectedMessage(other.kind())),
        }
    }

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    pub fn player_id(&self) -> PlayerId {
        self.player
    }

    pub fn tick(&self) -> Tick {
        self.engine.tick()
    }

    pub fn last_sync_tick(&self) -> Tick {
        self.last_sync_tick
    }

    pub fn game(&self) -> &Game {
        self.engine.game()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn self_lander(&self) -> Option<&Lander> {
        self.engine.game().lander(self.player)
    }

    /// Has a lander that is still alive
    pub fn is_playing(&self) -> bool {
        self.self_lander().is_some_and(Lander::is_alive)
    }

    pub fn pending_reset(&self) -> Option<ResetNotice> {
        self.pending_reset
    }

    /// Entity poses for rendering, at the current tick boundary
    pub fn read_model(&self) -> ViewState {
        self.engine.game().view(self.engine.tick())
    }

    // ------------------------------------------------------------------
    // Outgoing requests
    // ------------------------------------------------------------------

    pub fn join_game(&mut self, name: impl Into<String>, color: Option<LanderColor>) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::Join {
            epoch,
            tick,
            name: name.into(),
            color,
        });
    }

    pub fn start_game(&mut self, name: impl Into<String>, color: Option<LanderColor>, options: GameOptions) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::RequestStart {
            epoch,
            tick,
            name: name.into(),
            color,
            options,
        });
    }

    pub fn reset_game(&mut self, options: GameOptions, reset_options: ResetOptions) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::RequestReset {
            epoch,
            tick,
            options,
            reset_options,
        });
    }

    pub fn cancel_reset_game(&mut self) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::CancelReset { epoch, tick });
    }

    pub fn set_player_info(&mut self, name: impl Into<String>, color: Option<LanderColor>) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::PlayerInfo {
            epoch,
            tick,
            name: name.into(),
            color,
        });
    }

    pub fn send_chat(&mut self, text: impl Into<String>) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::Chat {
            epoch,
            tick,
            text: text.into(),
        });
    }

    fn request_full(&mut self) {
        let (epoch, tick) = self.stamp();
        self.outbox.push(ClientMsg::RequestFull { epoch, tick });
    }

    fn stamp(&self) -> (Uuid, Tick) {
        (self.engine.game().id, self.engine.tick())
    }

    /// Messages waiting to go to the server
    pub fn take_outgoing(&mut self) -> Vec<ClientMsg> {
        std::mem::take(&mut self.outbox)
    }

    /// Chat lines received since the last call
    pub fn take_chat(&mut self) -> Vec<ChatLine> {
        std::mem::take(&mut self.chat)
    }

    // ------------------------------------------------------------------
    // Input and simulation
    // ------------------------------------------------------------------

    /// Stamp a local input with the current tick. Movement is predicted
    /// immediately; a shot waits for the server's echo. Returns false when
    /// this player has no lander.
    pub fn process_local_input(&mut self, mut event: InputEvent) -> bool {
        if self.self_lander().is_none() {
            return false;
        }
        if let InputEvent::FireWeapon { rocket_id, .. } = &mut event {
            *rocket_id = Uuid::new_v4();
        }

        let (epoch, tick) = self.stamp();
        let input = PlayerInput {
            player: self.player,
            tick,
            event,
        };
        if !input.event.is_fire() {
            self.engine.record_input(input.clone());
            self.engine.apply_now(&input);
        }
        self.outbox.push(ClientMsg::Input {
            epoch,
            player: input.player,
            tick: input.tick,
            event: input.event,
        });
        true
    }

    /// Buffer a server message until the next step
    pub fn handle_message(&mut self, msg: ServerMsg) {
        self.inbox.push(msg);
    }

    /// Reconcile buffered messages, then advance by wall clock
    pub fn timer_step(&mut self, now: Instant) -> u64 {
        self.drain_inbox();
        let advanced = self.engine.timer_step(now);
        self.finish_step();
        advanced
    }

    /// Reconcile buffered messages, then advance exactly one tick
    pub fn step(&mut self) {
        self.drain_inbox();
        self.engine.advance();
        self.finish_step();
    }

    fn finish_step(&mut self) {
        // Reports drive server broadcasts only
        self.engine.take_report();
        let tick = self.engine.tick();
        if tick.saturating_sub(self.last_gc_tick) >= self.engine.config().gc_every {
            self.engine.garbage_collect(self.last_sync_tick);
            self.last_gc_tick = tick;
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    fn drain_inbox(&mut self) {
        if self.inbox.is_empty() {
            return;
        }
        let inbox = std::mem::take(&mut self.inbox);
        let mut latest_sync: Option<PendingSync> = None;
        let mut remote_inputs: Vec<PlayerInput> = Vec::new();

        for msg in inbox {
            let epoch = self.engine.game().id;
            if msg.epoch() != epoch && !matches!(msg, ServerMsg::Reset { .. }) {
                debug!(kind = msg.kind(), tick = msg.tick(), "Dropped message for another epoch");
                continue;
            }
            match msg {
                ServerMsg::Reset { full, tick, .. } => {
                    self.reseed(&full, tick);
                    self.pending_reset = None;
                    latest_sync = None;
                    remote_inputs.clear();
                }
                ServerMsg::Init { full, tick, .. } | ServerMsg::FullSync { full, tick, .. } => {
                    self.reseed(&full, tick);
                    latest_sync = None;
                    remote_inputs.clear();
                }
                ServerMsg::MetaSync { meta, .. } => {
                    self.engine.game_mut().merge_meta(&meta);
                }
                ServerMsg::ResetPending {
                    cause, reset_at_ms, ..
                } => {
                    self.pending_reset = Some(ResetNotice { cause, reset_at_ms });
                }
                ServerMsg::ResetCancelled { .. } => {
                    self.pending_reset = None;
                }
                ServerMsg::Chat { text, player, .. } => {
                    self.chat.push(ChatLine { player, text });
                }
                ServerMsg::PartialSync {
                    tick,
                    payload,
                    acked_inputs,
                    ..
                } => {
                    if latest_sync.as_ref().map_or(true, |s| tick >= s.tick) {
                        latest_sync = Some(PendingSync {
                            tick,
                            payload,
                            acked_inputs,
                        });
                    }
                }
                ServerMsg::Input {
                    player,
                    tick,
                    event,
                    restamped_from,
                    ..
                } => {
                    let input = PlayerInput { player, tick, event };
                    if let Some(sent) = restamped_from.filter(|_| player == self.player && !input.event.is_fire()) {
                        debug!(sent, tick, "Own input was applied late by the server");
                        self.engine.move_input(sent, input.clone());
                    }
                    remote_inputs.push(input);
                }
            }
        }

        let current = self.engine.tick();
        let mut rewind: Option<Tick> = None;
        let mut resume = current;

        if let Some(sync) = latest_sync {
            if self.engine.game().won_player.is_some() {
                debug!(tick = sync.tick, "Dropped partial sync after the round was decided");
            } else if sync.tick < self.last_sync_tick {
                debug!(tick = sync.tick, last_sync_tick = self.last_sync_tick, "Dropped stale partial sync");
            } else if self.has_unacked_inputs(sync.tick, &sync.acked_inputs) {
                debug!(tick = sync.tick, "Deferred partial sync: server has not seen all local inputs");
            } else {
                self.engine.insert_snapshot(Snapshot {
                    tick: sync.tick,
                    state: sync.payload,
                });
                self.last_sync_tick = sync.tick;
                rewind = Some(sync.tick);
                resume = resume.max(sync.tick);
            }
        }

        for input in remote_inputs {
            if input.tick < self.last_sync_tick {
                continue;
            }
            // Own movement was predicted when it happened
            if input.player == self.player && !input.event.is_fire() {
                continue;
            }
            let tick = input.tick;
            if self.engine.record_input(input) && tick < current {
                rewind = Some(rewind.map_or(tick, |t| t.min(tick)));
            }
        }

        // Snapshots do not carry the win, so a decided round is never rewound
        if rewind.is_some() && self.engine.game().won_player.is_some() {
            debug!(?rewind, "Round decided, skipping rollback");
            rewind = None;
        }

        if let Some(target) = rewind {
            match self.engine.restore_to(target) {
                Ok(()) => {
                    self.engine.replay_to(resume);
                    trace!(target, resume, "Reconciled");
                }
                Err(e) => {
                    warn!(error = %e, "Rollback failed, requesting full state");
                    self.request_full();
                }
            }
        }
    }

    /// Whether the log holds own inputs the server has not acknowledged,
    /// within the window the acknowledgement covers
    fn has_unacked_inputs(&self, sync_tick: Tick, acked: &BTreeMap<PlayerId, Vec<Tick>>) -> bool {
        let known: &[Tick] = acked.get(&self.player).map(Vec::as_slice).unwrap_or(&[]);
        let oldest = known.first().copied().unwrap_or(0);
        self.engine
            .inputs()
            .iter()
            .filter(|i| i.player == self.player)
            .any(|i| (oldest..=sync_tick).contains(&i.tick) && !known.contains(&i.tick))
    }

    fn reseed(&mut self, full: &FullState, tick: Tick) {
        match Game::from_full(full) {
            Ok(game) => {
                info!(epoch = %game.id, tick, "Adopted authoritative state");
                self.engine.replace_game(game, tick);
                self.last_sync_tick = tick;
                self.last_gc_tick = tick;
            }
            Err(e) => {
                warn!(error = %e, tick, "Could not build game from full state");
                self.request_full();
            }
        }
    }
}

//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::game::input::{InputEvent, PlayerInput};
use crate::game::lander::LanderColor;
use crate::game::state::{FullState, GameOptions, MetaState, PartialState};
use crate::game::{EpochId, PlayerId, Tick};

/// Why a reset was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetCause {
    /// A player asked for it (or asked to start)
    Requested,
    /// Someone won the round
    Won,
    /// Every lander is dead
    Dead,
}

/// What survives a reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Keep the current moon instead of generating a new one
    pub preserve_map: bool,
    /// Carry win counts of connected players over
    pub preserve_scores: bool,
}

/// A chat line as delivered to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatLine {
    pub player: PlayerId,
    pub text: String,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMsg {
    /// Spawn a lander for this connection
    Join {
        epoch: EpochId,
        tick: Tick,
        name: String,
        color: Option<LanderColor>,
    },

    /// Player input tagged with the tick it applies at
    Input {
        epoch: EpochId,
        player: PlayerId,
        tick: Tick,
        event: InputEvent,
    },

    /// Join if needed and start a round shortly
    RequestStart {
        epoch: EpochId,
        tick: Tick,
        name: String,
        color: Option<LanderColor>,
        options: GameOptions,
    },

    /// Schedule a reset
    RequestReset {
        epoch: EpochId,
        tick: Tick,
        options: GameOptions,
        reset_options: ResetOptions,
    },

    /// Abort a scheduled reset
    CancelReset { epoch: EpochId, tick: Tick },

    /// Rename or recolor this connection's lander
    PlayerInfo {
        epoch: EpochId,
        tick: Tick,
        name: String,
        color: Option<LanderColor>,
    },

    Chat { epoch: EpochId, tick: Tick, text: String },

    /// Rollback failed; send the whole state
    RequestFull { epoch: EpochId, tick: Tick },
}

impl ClientMsg {
    pub fn epoch(&self) -> EpochId {
        match self {
            ClientMsg::Join { epoch, .. }
            | ClientMsg::Input { epoch, .. }
            | ClientMsg::RequestStart { epoch, .. }
            | ClientMsg::RequestReset { epoch, .. }
            | ClientMsg::CancelReset { epoch, .. }
            | ClientMsg::PlayerInfo { epoch, .. }
            | ClientMsg::Chat { epoch, .. }
            | ClientMsg::RequestFull { epoch, .. } => *epoch,
        }
    }

    pub fn tick(&self) -> Tick {
        match self {
            ClientMsg::Join { tick, .. }
            | ClientMsg::Input { tick, .. }
            | ClientMsg::RequestStart { tick, .. }
            | ClientMsg::RequestReset { tick, .. }
            | ClientMsg::CancelReset { tick, .. }
            | ClientMsg::PlayerInfo { tick, .. }
            | ClientMsg::Chat { tick, .. }
            | ClientMsg::RequestFull { tick, .. } => *tick,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMsg::Join { .. } => "join",
            ClientMsg::Input { .. } => "input",
            ClientMsg::RequestStart { .. } => "request_start",
            ClientMsg::RequestReset { .. } => "request_reset",
            ClientMsg::CancelReset { .. } => "cancel_reset",
            ClientMsg::PlayerInfo { .. } => "player_info",
            ClientMsg::Chat { .. } => "chat",
            ClientMsg::RequestFull { .. } => "request_full",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMsg {
    /// First message on every connection. `player` is the id the server
    /// assigned to this connection; it owns the lander with the same id.
    Init {
        epoch: EpochId,
        tick: Tick,
        player: PlayerId,
        full: FullState,
    },

    /// Periodic authoritative physics and entity state
    PartialSync {
        epoch: EpochId,
        tick: Tick,
        payload: PartialState,
        /// Latest input ticks the server has logged, per lander
        acked_inputs: BTreeMap<PlayerId, Vec<Tick>>,
    },

    /// Win state and scores changed
    MetaSync { epoch: EpochId, tick: Tick, meta: MetaState },

    /// A new epoch started
    Reset { epoch: EpochId, tick: Tick, full: FullState },

    /// Answer to `RequestFull`
    FullSync { epoch: EpochId, tick: Tick, full: FullState },

    /// A reset countdown was armed
    ResetPending {
        epoch: EpochId,
        tick: Tick,
        cause: ResetCause,
        /// Unix time in milliseconds when the reset happens
        reset_at_ms: u64,
    },

    ResetCancelled { epoch: EpochId, tick: Tick },

    Chat {
        epoch: EpochId,
        tick: Tick,
        text: String,
        player: PlayerId,
    },

    /// An input rebroadcast to every client, sender included
    Input {
        epoch: EpochId,
        player: PlayerId,
        tick: Tick,
        event: InputEvent,
        /// The tick the sender stamped, when it was too old to roll back to
        /// and the server applied the input at `tick` instead
        #[serde(default)]
        restamped_from: Option<Tick>,
    },
}

impl ServerMsg {
    pub fn epoch(&self) -> EpochId {
        match self {
            ServerMsg::Init { epoch, .. }
            | ServerMsg::PartialSync { epoch, .. }
            | ServerMsg::MetaSync { epoch, .. }
            | ServerMsg::Reset { epoch, .. }
            | ServerMsg::FullSync { epoch, .. }
            | ServerMsg::ResetPending { epoch, .. }
            | ServerMsg::ResetCancelled { epoch, .. }
            | ServerMsg::Chat { epoch, .. }
            | ServerMsg::Input { epoch, .. } => *epoch,
        }
    }

    pub fn tick(&self) -> Tick {
        match self {
            ServerMsg::Init { tick, .. }
            | ServerMsg::PartialSync { tick, .. }
            | ServerMsg::MetaSync { tick, .. }
            | ServerMsg::Reset { tick, .. }
            | ServerMsg::FullSync { tick, .. }
            | ServerMsg::ResetPending { tick, .. }
            | ServerMsg::ResetCancelled { tick, .. }
            | ServerMsg::Chat { tick, .. }
            | ServerMsg::Input { tick, .. } => *tick,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMsg::Init { .. } => "init",
            ServerMsg::PartialSync { .. } => "partial_sync",
            ServerMsg::MetaSync { .. } => "meta_sync",
            ServerMsg::Reset { .. } => "reset",
            ServerMsg::FullSync { .. } => "full_sync",
            ServerMsg::ResetPending { .. } => "reset_pending",
            ServerMsg::ResetCancelled { .. } => "reset_cancelled",
            ServerMsg::Chat { .. } => "chat",
            ServerMsg::Input { .. } => "input",
        }
    }

    /// Wrap a logged input for rebroadcast
    pub fn input(epoch: EpochId, input: PlayerInput, restamped_from: Option<Tick>) -> Self {
        ServerMsg::Input {
            epoch,
            player: input.player,
            tick: input.tick,
            event: input.event,
            restamped_from,
        }
    }
}

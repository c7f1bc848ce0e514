//! Game simulation modules

pub mod client;
pub mod combat;
pub mod constants;
pub mod engine;
pub mod input;
pub mod lander;
pub mod physics;
pub mod room;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod terrain;

pub use client::ClientCoordinator;
pub use engine::{Engine, RollbackError, TickReport};
pub use input::{InputEvent, PlayerInput};
pub use room::{RoomEvent, RoomHandle, RoomRegistry};
pub use server::{Outbound, Recipient, ServerCoordinator};
pub use state::{Game, GameOptions};

use uuid::Uuid;

/// Stable player identity; also the id of the player's lander
pub type PlayerId = Uuid;
/// Stable rocket identity, chosen by the firing client
pub type RocketId = Uuid;
/// One game epoch; a new one is minted on every reset
pub type EpochId = Uuid;
/// Simulation step counter
pub type Tick = u64;
/// A server-side connection; each connection controls the lander with the same id
pub type ConnectionId = PlayerId;

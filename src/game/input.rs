//! Player input events and the tick-ordered input log

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::combat::RocketType;
use super::lander::LanderColor;
use super::{PlayerId, RocketId, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrustDir {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotateDir {
    Left,
    Right,
}

/// Something a player did, applied at a specific tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEvent {
    Thrust {
        dir: ThrustDir,
        active: bool,
    },
    Rotate {
        dir: RotateDir,
        active: bool,
    },
    Joystick {
        target_throttle: f32,
        target_rotation: Option<f32>,
        #[serde(default)]
        rotating_left: Option<bool>,
        #[serde(default)]
        rotating_right: Option<bool>,
    },
    /// Idempotent on `rocket_id`
    FireWeapon {
        rocket_id: RocketId,
        rocket_type: RocketType,
    },
    /// Carries the spawn pose so every replica builds the same lander
    PlayerJoined {
        name: String,
        color: LanderColor,
        x: f32,
        y: f32,
    },
    /// Rename or recolor. Logged like any input so a rollback keeps it.
    PlayerInfo {
        name: String,
        color: Option<LanderColor>,
    },
}

impl InputEvent {
    /// Fire a new rocket with a fresh id
    pub fn fire(rocket_type: RocketType) -> Self {
        InputEvent::FireWeapon {
            rocket_id: Uuid::new_v4(),
            rocket_type,
        }
    }

    pub fn is_fire(&self) -> bool {
        matches!(self, InputEvent::FireWeapon { .. })
    }
}

/// An input event stamped with its player and tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player: PlayerId,
    pub tick: Tick,
    pub event: InputEvent,
}

/// Tick-ordered, deduplicated log of every input a replica knows about
#[derive(Debug, Clone, Default)]
pub struct InputLog {
    entries: Vec<PlayerInput>,
}

impl InputLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping tick order; inputs at the same tick keep arrival order.
    /// Returns false for an exact duplicate.
    pub fn record(&mut self, input: PlayerInput) -> bool {
        if self.at(input.tick).any(|e| e.player == input.player && e.event == input.event) {
            return false;
        }
        let index = self.entries.partition_point(|e| e.tick <= input.tick);
        self.entries.insert(index, input);
        true
    }

    /// Everything due at `tick`, in arrival order
    pub fn at(&self, tick: Tick) -> impl Iterator<Item = &PlayerInput> {
        let start = self.entries.partition_point(|e| e.tick < tick);
        let end = self.entries.partition_point(|e| e.tick <= tick);
        self.entries[start..end].iter()
    }

    /// The most recent `limit` distinct ticks at which `player` has input, up to `up_to`
    pub fn ticks_for(&self, player: PlayerId, up_to: Tick, limit: usize) -> Vec<Tick> {
        let end = self.entries.partition_point(|e| e.tick <= up_to);
        let mut ticks: Vec<Tick> = Vec::new();
        for entry in self.entries[..end].iter().rev().filter(|e| e.player == player) {
            if ticks.last() != Some(&entry.tick) {
                ticks.push(entry.tick);
                if ticks.len() == limit {
                    break;
                }
            }
        }
        ticks.reverse();
        ticks
    }

    /// Remove `player`'s `event` logged at `tick`. Returns false if absent.
    pub fn remove(&mut self, tick: Tick, player: PlayerId, event: &InputEvent) -> bool {
        let start = self.entries.partition_point(|e| e.tick < tick);
        let end = self.entries.partition_point(|e| e.tick <= tick);
        match self.entries[start..end]
            .iter()
            .position(|e| e.player == player && &e.event == event)
        {
            Some(offset) => {
                self.entries.remove(start + offset);
                true
            }
            None => false,
        }
    }

    /// Drop entries older than `tick`
    pub fn retain_from(&mut self, tick: Tick) {
        let cut = self.entries.partition_point(|e| e.tick < tick);
        self.entries.drain(..cut);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlayerInput> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

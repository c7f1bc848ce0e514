//! World state: one game epoch, its physics world and every entity in it

use bytes::Bytes;
use rand::Rng;
use rapier2d::prelude::ColliderHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};
use uuid::{Builder, Uuid};

use super::combat::{contact_damage, ContactPartner, Rocket};
use super::constants::{SAFE_LANDING_MAX_ROTATION, SAFE_LANDING_MAX_SPEED};
use super::input::InputEvent;
use super::lander::{Lander, LanderColor};
use super::physics::{ContactForce, PhysicsError, PhysicsWorld, Pose};
use super::terrain::{LandingPad, Moon, StaticPiece};
use super::{EpochId, PlayerId, RocketId, Tick};

/// State merge errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Physics(#[from] PhysicsError),

    #[error("payload references {entity} with no collider in its physics world")]
    MissingCollider { entity: &'static str },
}

/// Per-game configuration flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOptions {
    pub infinite_fuel: bool,
    pub infinite_health: bool,
}

impl GameOptions {
    /// Free-flight practice: nothing runs out
    pub fn practice() -> Self {
        Self {
            infinite_fuel: true,
            infinite_health: true,
        }
    }
}

/// How the round was won
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    Landed { vel_x: f32, vel_y: f32, rotation: f32 },
    LastLander,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinState {
    pub player: PlayerId,
    pub reason: WinReason,
}

/// Physics blob plus steppable entities; enough to resume a tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialState {
    pub world: Bytes,
    pub landers: Vec<Lander>,
    pub rockets: Vec<Rocket>,
}

/// Everything a fresh replica needs to join this epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullState {
    pub epoch: EpochId,
    pub moon: Moon,
    pub options: GameOptions,
    pub ground: StaticPiece,
    pub sky: StaticPiece,
    pub landing_pads: Vec<LandingPad>,
    pub partial: PartialState,
    pub won_player: Option<WinState>,
    pub player_wins: BTreeMap<PlayerId, u32>,
}

/// Win state and scores only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaState {
    pub epoch: EpochId,
    pub won_player: Option<WinState>,
    pub player_wins: BTreeMap<PlayerId, u32>,
}

/// Result of applying one input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedInput {
    Ignored,
    Moved,
    Joined,
    Renamed,
    Fired(RocketId),
}

impl AppliedInput {
    pub fn was_applied(self) -> bool {
        self != AppliedInput::Ignored
    }
}

/// What happened during one step
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub expired_rockets: Vec<RocketId>,
}

/// Renderer-facing pose of one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanderView {
    pub id: PlayerId,
    pub name: String,
    pub color: LanderColor,
    pub pose: Pose,
    pub health: f32,
    pub fuel: f32,
    pub throttle: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RocketView {
    pub id: RocketId,
    pub color: LanderColor,
    pub pose: Pose,
}

/// Read model for renderers, captured at a tick boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub tick: Tick,
    pub epoch: EpochId,
    pub landers: Vec<LanderView>,
    pub rockets: Vec<RocketView>,
    pub won_player: Option<WinState>,
}

/// Counts from reconciling an entity list against a payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub created: usize,
    pub removed: usize,
}

/// One game epoch. Owns its physics world exclusively.
pub struct Game {
    pub id: EpochId,
    pub moon: Moon,
    pub options: GameOptions,
    pub landers: Vec<Lander>,
    pub rockets: Vec<Rocket>,
    pub landing_pads: Vec<LandingPad>,
    pub ground: StaticPiece,
    pub sky: StaticPiece,
    pub won_player: Option<WinState>,
    pub player_wins: BTreeMap<PlayerId, u32>,
    physics: PhysicsWorld,
}

impl Game {
    /// Fresh epoch, on a new random moon unless one is carried over
    pub fn create_new<R: Rng>(options: GameOptions, moon: Option<Moon>, rng: &mut R) -> Self {
        let moon = moon.unwrap_or_else(|| Moon::generate(rng));
        let mut physics = PhysicsWorld::new(moon.gravity);
        let ground = StaticPiece::ground(&mut physics, &moon);
        let sky = StaticPiece::sky(&mut physics, &moon);
        let landing_pads = moon
            .landing_pads
            .iter()
            .map(|site| LandingPad::create(&mut physics, &moon, site, random_uuid(rng)))
            .collect();

        Self {
            id: random_uuid(rng),
            moon,
            options,
            landers: Vec::new(),
            rockets: Vec::new(),
            landing_pads,
            ground,
            sky,
            won_player: None,
            player_wins: BTreeMap::new(),
            physics,
        }
    }

    /// Rebuild a replica from an authoritative full state
    pub fn from_full(full: &FullState) -> Result<Self, StateError> {
        let physics = PhysicsWorld::decode(&full.partial.world, full.moon.gravity)?;
        validate_full(&physics, full)?;
        Ok(Self {
            id: full.epoch,
            moon: full.moon.clone(),
            options: full.options,
            landers: full.partial.landers.clone(),
            rockets: full.partial.rockets.clone(),
            landing_pads: full.landing_pads.clone(),
            ground: full.ground,
            sky: full.sky,
            won_player: full.won_player,
            player_wins: full.player_wins.clone(),
            physics,
        })
    }

    pub fn physics(&self) -> &PhysicsWorld {
        &self.physics
    }

    pub fn lander(&self, player: PlayerId) -> Option<&Lander> {
        self.landers.iter().find(|l| l.id == player)
    }

    pub fn lander_mut(&mut self, player: PlayerId) -> Option<&mut Lander> {
        self.landers.iter_mut().find(|l| l.id == player)
    }

    pub fn rocket(&self, id: RocketId) -> Option<&Rocket> {
        self.rockets.iter().find(|r| r.id == id)
    }

    pub fn lander_pose(&self, player: PlayerId) -> Option<Pose> {
        self.lander(player).and_then(|l| self.physics.pose(l.body))
    }

    /// Advance one tick. A decided game no longer moves.
    pub fn step(&mut self, tick: Tick) -> StepOutcome {
        let mut outcome = StepOutcome::default();
        if self.won_player.is_some() {
            return outcome;
        }

        for lander in &mut self.landers {
            lander.pre_step(&mut self.physics, tick, &self.options);
        }

        let contacts = self.physics.step();
        self.apply_contact_damage(&contacts);

        let width = self.moon.world_width;
        for lander in &mut self.landers {
            lander.post_step(&mut self.physics, width);
        }
        for rocket in &mut self.rockets {
            rocket.post_step(&mut self.physics, width);
        }

        let physics = &mut self.physics;
        self.rockets.retain(|rocket| {
            if rocket.is_expired() {
                physics.remove(rocket.body);
                outcome.expired_rockets.push(rocket.id);
                false
            } else {
                true
            }
        });
        if !outcome.expired_rockets.is_empty() {
            trace!(tick, expired = outcome.expired_rockets.len(), "rockets expired");
        }
        outcome
    }

    fn apply_contact_damage(&mut self, contacts: &[ContactForce]) {
        for contact in contacts {
            for (mine, other) in [
                (contact.collider1, contact.collider2),
                (contact.collider2, contact.collider1),
            ] {
                let Some(index) = self.landers.iter().position(|l| l.collider == mine) else {
                    continue;
                };
                let Some(partner) = self.contact_partner(other) else {
                    continue;
                };
                let winner = self.won_player.map(|w| w.player);
                let lander = &mut self.landers[index];
                if !lander.is_alive() || winner == Some(lander.id) {
                    continue;
                }
                let damage = contact_damage(contact.magnitude, partner);
                if damage > 0.0 {
                    lander.take_damage(damage, &self.options);
                    debug!(
                        player_id = %lander.id,
                        ?partner,
                        damage,
                        health = lander.health,
                        "Lander took collision damage"
                    );
                }
            }
        }
    }

    fn contact_partner(&self, collider: ColliderHandle) -> Option<ContactPartner> {
        if collider == self.ground.collider {
            Some(ContactPartner::Terrain)
        } else if collider == self.sky.collider {
            Some(ContactPartner::Ceiling)
        } else if self.rockets.iter().any(|r| r.collider == collider) {
            Some(ContactPartner::Rocket)
        } else if self.landers.iter().any(|l| l.collider == collider) {
            Some(ContactPartner::Lander)
        } else {
            None
        }
    }

    /// Apply one player input at `tick`
    pub fn apply_input(&mut self, player: PlayerId, event: &InputEvent, tick: Tick) -> AppliedInput {
        match event {
            InputEvent::PlayerJoined { name, color, x, y } => {
                if self.lander(player).is_some() {
                    return AppliedInput::Ignored;
                }
                let lander = Lander::spawn(&mut self.physics, player, name.clone(), *color, *x, *y);
                self.landers.push(lander);
                AppliedInput::Joined
            }
            InputEvent::FireWeapon { rocket_id, rocket_type } => {
                if self.rocket(*rocket_id).is_some() {
                    return AppliedInput::Ignored;
                }
                let Some(lander) = self.landers.iter_mut().find(|l| l.id == player) else {
                    return AppliedInput::Ignored;
                };
                if !lander.is_alive() || !lander.weapons.take(*rocket_type, tick) {
                    return AppliedInput::Ignored;
                }
                match Rocket::launch(&mut self.physics, lander, *rocket_id, *rocket_type) {
                    Some(rocket) => {
                        self.rockets.push(rocket);
                        AppliedInput::Fired(*rocket_id)
                    }
                    None => AppliedInput::Ignored,
                }
            }
            InputEvent::PlayerInfo { name, color } => {
                let Some(lander) = self.lander_mut(player) else {
                    return AppliedInput::Ignored;
                };
                lander.name = name.clone();
                if let Some(color) = color {
                    lander.color = *color;
                }
                AppliedInput::Renamed
            }
            movement => {
                let Some(lander) = self.lander_mut(player) else {
                    return AppliedInput::Ignored;
                };
                if lander.process_input(movement) {
                    AppliedInput::Moved
                } else {
                    AppliedInput::Ignored
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// The pad this lander is resting on, if it is upright, slow and over one
    pub fn safe_landing_pad(&self, lander: &Lander) -> Option<&LandingPad> {
        let pose = self.physics.pose(lander.body)?;
        if pose.rotation.abs() >= SAFE_LANDING_MAX_ROTATION || pose.speed() >= SAFE_LANDING_MAX_SPEED {
            return None;
        }
        self.landing_pads
            .iter()
            .find(|pad| pad.contains_x(pose.x) && self.physics.colliders_overlap(pad.collider, lander.collider))
    }

    /// The only living lander among at least two controlled ones
    pub fn last_standing(&self, is_controlled: impl Fn(PlayerId) -> bool) -> Option<PlayerId> {
        let controlled: Vec<&Lander> = self.landers.iter().filter(|l| is_controlled(l.id)).collect();
        if controlled.len() < 2 {
            return None;
        }
        let mut alive = controlled.iter().filter(|l| l.is_alive());
        match (alive.next(), alive.next()) {
            (Some(survivor), None) => Some(survivor.id),
            _ => None,
        }
    }

    pub fn all_dead(&self) -> bool {
        !self.landers.is_empty() && self.landers.iter().all(|l| !l.is_alive())
    }

    pub fn add_wins(&mut self, player: PlayerId, wins: u32) {
        *self.player_wins.entry(player).or_insert(0) += wins;
    }

    pub fn wins(&self, player: PlayerId) -> u32 {
        self.player_wins.get(&player).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Serialization
    // ------------------------------------------------------------------

    pub fn serialize_partial(&self) -> Result<PartialState, StateError> {
        Ok(PartialState {
            world: self.physics.encode()?,
            landers: self.landers.clone(),
            rockets: self.rockets.clone(),
        })
    }

    pub fn serialize_full(&self) -> Result<FullState, StateError> {
        Ok(FullState {
            epoch: self.id,
            moon: self.moon.clone(),
            options: self.options,
            ground: self.ground,
            sky: self.sky,
            landing_pads: self.landing_pads.clone(),
            partial: self.serialize_partial()?,
            won_player: self.won_player,
            player_wins: self.player_wins.clone(),
        })
    }

    pub fn serialize_meta(&self) -> MetaState {
        MetaState {
            epoch: self.id,
            won_player: self.won_player,
            player_wins: self.player_wins.clone(),
        }
    }

    /// Adopt an authoritative partial state. The physics world is replaced
    /// wholesale; on error nothing changes.
    pub fn merge_partial(&mut self, payload: &PartialState) -> Result<MergeCounts, StateError> {
        let physics = PhysicsWorld::decode(&payload.world, self.moon.gravity)?;
        validate_partial(&physics, payload)?;
        for (piece, entity) in [(self.ground, "ground"), (self.sky, "sky")] {
            if !physics.has_collider(piece.collider) {
                return Err(StateError::MissingCollider { entity });
            }
        }

        self.physics = physics;
        Ok(self.merge_entities(payload))
    }

    /// Adopt a complete authoritative state, including terrain and epoch
    pub fn merge_full(&mut self, full: &FullState) -> Result<MergeCounts, StateError> {
        let physics = PhysicsWorld::decode(&full.partial.world, full.moon.gravity)?;
        validate_full(&physics, full)?;

        self.physics = physics;
        self.id = full.epoch;
        self.moon = full.moon.clone();
        self.options = full.options;
        self.ground = full.ground;
        self.sky = full.sky;
        self.landing_pads = full.landing_pads.clone();
        self.won_player = full.won_player;
        self.player_wins = full.player_wins.clone();
        Ok(self.merge_entities(&full.partial))
    }

    /// Scores and win state only; ignored for another epoch
    pub fn merge_meta(&mut self, meta: &MetaState) -> bool {
        if meta.epoch != self.id {
            return false;
        }
        self.won_player = meta.won_player;
        self.player_wins = meta.player_wins.clone();
        true
    }

    fn merge_entities(&mut self, payload: &PartialState) -> MergeCounts {
        let landers = reconcile(&mut self.landers, &payload.landers, |l| l.id);
        let rockets = reconcile(&mut self.rockets, &payload.rockets, |r| r.id);
        let counts = MergeCounts {
            created: landers.created + rockets.created,
            removed: landers.removed + rockets.removed,
        };
        if counts != MergeCounts::default() {
            trace!(created = counts.created, removed = counts.removed, "Merged entities");
        }
        counts
    }

    pub fn view(&self, tick: Tick) -> ViewState {
        ViewState {
            tick,
            epoch: self.id,
            landers: self
                .landers
                .iter()
                .filter_map(|l| {
                    Some(LanderView {
                        id: l.id,
                        name: l.name.clone(),
                        color: l.color,
                        pose: self.physics.pose(l.body)?,
                        health: l.health,
                        fuel: l.fuel,
                        throttle: l.throttle,
                    })
                })
                .collect(),
            rockets: self
                .rockets
                .iter()
                .filter_map(|r| {
                    Some(RocketView {
                        id: r.id,
                        color: r.color,
                        pose: self.physics.pose(r.body)?,
                    })
                })
                .collect(),
            won_player: self.won_player,
        }
    }
}

/// Make `local` match `incoming` by id: update existing, create missing,
/// delete absent. Order follows the payload.
fn reconcile<T: Clone>(local: &mut Vec<T>, incoming: &[T], id: impl Fn(&T) -> Uuid) -> MergeCounts {
    let created = incoming
        .iter()
        .filter(|i| !local.iter().any(|l| id(l) == id(i)))
        .count();
    let removed = local
        .iter()
        .filter(|l| !incoming.iter().any(|i| id(i) == id(l)))
        .count();
    local.clear();
    local.extend_from_slice(incoming);
    MergeCounts { created, removed }
}

fn validate_partial(physics: &PhysicsWorld, payload: &PartialState) -> Result<(), StateError> {
    if payload.landers.iter().any(|l| !physics.has_collider(l.collider)) {
        return Err(StateError::MissingCollider { entity: "lander" });
    }
    if payload.rockets.iter().any(|r| !physics.has_collider(r.collider)) {
        return Err(StateError::MissingCollider { entity: "rocket" });
    }
    Ok(())
}

fn validate_full(physics: &PhysicsWorld, full: &FullState) -> Result<(), StateError> {
    validate_partial(physics, &full.partial)?;
    if !physics.has_collider(full.ground.collider) {
        return Err(StateError::MissingCollider { entity: "ground" });
    }
    if !physics.has_collider(full.sky.collider) {
        return Err(StateError::MissingCollider { entity: "sky" });
    }
    if full.landing_pads.iter().any(|p| !physics.has_collider(p.collider)) {
        return Err(StateError::MissingCollider { entity: "landing pad" });
    }
    Ok(())
}

/// Seeded v4 UUID so a seeded room is reproducible
pub fn random_uuid<R: Rng>(rng: &mut R) -> Uuid {
    Builder::from_random_bytes(rng.gen()).into_uuid()
}

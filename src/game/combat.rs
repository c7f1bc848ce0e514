//! Combat: rocket tiers, rocket bodies and collision damage

use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use super::constants::{
    CEILING_DAMAGE_MULTIPLIER, DAMAGE_FORCE_DIVISOR, DAMAGE_FORCE_THRESHOLD, LANDER_DAMAGE_MULTIPLIER,
    ROCKET_DAMAGE_MULTIPLIER, ROCKET_RESTITUTION, TERRAIN_DAMAGE_MULTIPLIER,
};
use super::lander::{Lander, LanderColor};
use super::physics::PhysicsWorld;
use super::{PlayerId, RocketId, Tick};

/// Weapon tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RocketType {
    Small,
    Big,
}

impl RocketType {
    pub const ALL: [RocketType; 2] = [RocketType::Small, RocketType::Big];
}

/// Rocket stats per tier
#[derive(Debug, Clone, Copy)]
pub struct RocketStats {
    /// Half extent of the square body
    pub radius: f32,
    /// Launch impulse; the firing lander takes the same impulse in reverse
    pub impulse: f32,
    /// Magazine size
    pub ammo: u32,
    /// Ticks between refills of one round
    pub replenish_ticks: Tick,
    /// Ticks before the rocket removes itself
    pub lifetime_ticks: u32,
}

impl RocketStats {
    pub fn for_type(rocket_type: RocketType) -> Self {
        match rocket_type {
            RocketType::Small => Self {
                radius: 2.0,
                impulse: 800.0,
                ammo: 3,
                replenish_ticks: 180,
                lifetime_ticks: 300,
            },
            RocketType::Big => Self {
                radius: 4.0,
                impulse: 4_000.0,
                ammo: 1,
                replenish_ticks: 600,
                lifetime_ticks: 480,
            },
        }
    }

    /// Mass of the square body at unit density
    pub fn mass(&self) -> f32 {
        4.0 * self.radius * self.radius
    }
}

/// A rocket in flight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rocket {
    pub id: RocketId,
    pub owner: PlayerId,
    pub rocket_type: RocketType,
    pub color: LanderColor,
    pub alive_ticks: u32,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

impl Rocket {
    /// Spawn a rocket under the lander's nozzle and push the pair apart.
    /// The impulse is applied as a velocity change: a body inserted this
    /// tick has no mass properties until the next physics step.
    pub fn launch(physics: &mut PhysicsWorld, lander: &Lander, id: RocketId, rocket_type: RocketType) -> Option<Self> {
        let stats = RocketStats::for_type(rocket_type);
        let pose = physics.pose(lander.body)?;
        let facing = Rotation::new(pose.rotation);
        let offset = facing * vector![0.0, -(lander.radius() + stats.radius * 2.0)];
        let direction = facing * vector![0.0, -1.0];
        let lander_velocity = vector![pose.vel_x, pose.vel_y];

        let body = RigidBodyBuilder::dynamic()
            .translation(vector![pose.x, pose.y] + offset)
            .rotation(pose.rotation)
            .linvel(lander_velocity + direction * (stats.impulse / stats.mass()))
            .build();
        let collider = ColliderBuilder::cuboid(stats.radius, stats.radius)
            .restitution(ROCKET_RESTITUTION)
            .density(1.0)
            .build();
        let (body, collider) = physics.insert(body, collider);

        if let Some(lander_body) = physics.body_mut(lander.body) {
            let recoil = lander_velocity - direction * (stats.impulse / lander.mass());
            lander_body.set_linvel(recoil, true);
        }

        Some(Self {
            id,
            owner: lander.id,
            rocket_type,
            color: lander.color,
            alive_ticks: 0,
            body,
            collider,
        })
    }

    pub fn post_step(&mut self, physics: &mut PhysicsWorld, world_width: f32) {
        self.alive_ticks += 1;
        physics.wrap_horizontally(self.body, world_width);
    }

    pub fn is_expired(&self) -> bool {
        self.alive_ticks >= RocketStats::for_type(self.rocket_type).lifetime_ticks
    }
}

/// What a lander collided with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPartner {
    Terrain,
    Ceiling,
    Rocket,
    Lander,
}

impl ContactPartner {
    pub fn damage_multiplier(self) -> f32 {
        match self {
            ContactPartner::Terrain => TERRAIN_DAMAGE_MULTIPLIER,
            ContactPartner::Ceiling => CEILING_DAMAGE_MULTIPLIER,
            ContactPartner::Rocket => ROCKET_DAMAGE_MULTIPLIER,
            ContactPartner::Lander => LANDER_DAMAGE_MULTIPLIER,
        }
    }
}

/// Damage dealt by one contact-force event; gentle touches deal none
pub fn contact_damage(force: f32, partner: ContactPartner) -> f32 {
    (force - DAMAGE_FORCE_THRESHOLD).max(0.0) / DAMAGE_FORCE_DIVISOR * partner.damage_multiplier()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_contacts_deal_no_damage() {
        assert_eq!(contact_damage(0.0, ContactPartner::Terrain), 0.0);
        assert_eq!(contact_damage(DAMAGE_FORCE_THRESHOLD, ContactPartner::Rocket), 0.0);
    }

    #[test]
    fn damage_scales_with_partner() {
        let force = DAMAGE_FORCE_THRESHOLD + 4.0 * DAMAGE_FORCE_DIVISOR;
        assert_eq!(contact_damage(force, ContactPartner::Terrain), 4.0);
        assert_eq!(contact_damage(force, ContactPartner::Ceiling), 2.0);
        assert_eq!(contact_damage(force, ContactPartner::Rocket), 12.0);
        assert_eq!(contact_damage(force, ContactPartner::Lander), 2.0);
    }

    #[test]
    fn big_rockets_hit_harder_but_carry_less() {
        let small = RocketStats::for_type(RocketType::Small);
        let big = RocketStats::for_type(RocketType::Big);
        assert!(big.impulse > small.impulse);
        assert!(big.ammo < small.ammo);
        assert!(big.replenish_ticks > small.replenish_ticks);
    }
}

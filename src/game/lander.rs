//! Player-controlled lander: intents, fuel, health and ammo

use rand::seq::SliceRandom;
use rand::Rng;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use super::combat::{RocketStats, RocketType};
use super::constants::{
    FULL_THROTTLE_FORCE, LANDER_RADIUS, LANDER_RESTITUTION, MAX_FUEL, MAX_HEALTH, ROTATE_FUEL_BURN_RATE,
    THROTTLE_FUEL_BURN_RATE, THROTTLE_RATE, TOKEN_DAMAGE, TURN_RATE,
};
use super::input::{InputEvent, RotateDir, ThrustDir};
use super::physics::PhysicsWorld;
use super::state::GameOptions;
use super::{PlayerId, Tick};
use crate::util::time::tick_delta;

/// Lander palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanderColor {
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Purple,
    Pink,
}

impl LanderColor {
    pub const ALL: [LanderColor; 8] = [
        LanderColor::Red,
        LanderColor::Orange,
        LanderColor::Yellow,
        LanderColor::Green,
        LanderColor::Cyan,
        LanderColor::Blue,
        LanderColor::Purple,
        LanderColor::Pink,
    ];

    /// Random color, preferring ones nobody is using
    pub fn pick<R: Rng>(rng: &mut R, used: &[LanderColor]) -> LanderColor {
        let free: Vec<LanderColor> = Self::ALL.into_iter().filter(|c| !used.contains(c)).collect();
        let pool = if free.is_empty() { &Self::ALL[..] } else { &free[..] };
        pool.choose(rng).copied().unwrap_or(LanderColor::Red)
    }
}

/// Analog stick target
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoystickTarget {
    pub throttle: f32,
    pub rotation: Option<f32>,
}

/// Magazine state of one rocket tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmmoState {
    pub count: u32,
    pub replenish_from_tick: Tick,
}

impl AmmoState {
    fn full(rocket_type: RocketType) -> Self {
        Self {
            count: RocketStats::for_type(rocket_type).ammo,
            replenish_from_tick: 0,
        }
    }
}

/// Ammo for both rocket tiers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeaponBay {
    pub small: AmmoState,
    pub big: AmmoState,
}

impl WeaponBay {
    pub fn full() -> Self {
        Self {
            small: AmmoState::full(RocketType::Small),
            big: AmmoState::full(RocketType::Big),
        }
    }

    pub fn get(&self, rocket_type: RocketType) -> &AmmoState {
        match rocket_type {
            RocketType::Small => &self.small,
            RocketType::Big => &self.big,
        }
    }

    pub fn get_mut(&mut self, rocket_type: RocketType) -> &mut AmmoState {
        match rocket_type {
            RocketType::Small => &mut self.small,
            RocketType::Big => &mut self.big,
        }
    }

    /// Take one round, starting the refill clock if the magazine was full
    pub fn take(&mut self, rocket_type: RocketType, tick: Tick) -> bool {
        let max = RocketStats::for_type(rocket_type).ammo;
        let ammo = self.get_mut(rocket_type);
        if ammo.count == 0 {
            return false;
        }
        if ammo.count >= max {
            ammo.replenish_from_tick = tick;
        }
        ammo.count -= 1;
        true
    }

    /// Refill at most one round per tier per replenish window
    pub fn replenish(&mut self, tick: Tick) {
        for rocket_type in RocketType::ALL {
            let stats = RocketStats::for_type(rocket_type);
            let ammo = self.get_mut(rocket_type);
            if ammo.count < stats.ammo && tick.saturating_sub(ammo.replenish_from_tick) > stats.replenish_ticks {
                ammo.count += 1;
                ammo.replenish_from_tick = tick;
            }
        }
    }
}

/// A player's lander. Pose lives in the physics world under `body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lander {
    pub id: PlayerId,
    pub name: String,
    pub color: LanderColor,
    pub throttle: f32,
    pub target_rotation: Option<f32>,
    pub joystick_target: Option<JoystickTarget>,
    pub health: f32,
    pub fuel: f32,
    pub rotating_left: bool,
    pub rotating_right: bool,
    pub thrusting_up: bool,
    pub thrusting_down: bool,
    pub weapons: WeaponBay,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

impl Lander {
    pub fn spawn(physics: &mut PhysicsWorld, id: PlayerId, name: String, color: LanderColor, x: f32, y: f32) -> Self {
        let body = RigidBodyBuilder::dynamic().translation(vector![x, y]).build();
        let collider = ColliderBuilder::ball(LANDER_RADIUS)
            .restitution(LANDER_RESTITUTION)
            .density(1.0)
            .active_events(ActiveEvents::CONTACT_FORCE_EVENTS)
            .contact_force_event_threshold(0.0)
            .build();
        let (body, collider) = physics.insert(body, collider);

        Self {
            id,
            name,
            color,
            throttle: 0.0,
            target_rotation: None,
            joystick_target: None,
            health: MAX_HEALTH,
            fuel: MAX_FUEL,
            rotating_left: false,
            rotating_right: false,
            thrusting_up: false,
            thrusting_down: false,
            weapons: WeaponBay::full(),
            body,
            collider,
        }
    }

    pub fn radius(&self) -> f32 {
        LANDER_RADIUS
    }

    /// Mass of the ball at unit density
    pub fn mass(&self) -> f32 {
        PI * LANDER_RADIUS * LANDER_RADIUS
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    /// Apply a movement intent. Dead landers ignore input.
    pub fn process_input(&mut self, event: &InputEvent) -> bool {
        if !self.is_alive() {
            return false;
        }
        match event {
            InputEvent::Thrust { dir, active } => match dir {
                ThrustDir::Up => self.thrusting_up = *active,
                ThrustDir::Down => self.thrusting_down = *active,
            },
            InputEvent::Rotate { dir, active } => match dir {
                RotateDir::Left => self.rotating_left = *active,
                RotateDir::Right => self.rotating_right = *active,
            },
            InputEvent::Joystick {
                target_throttle,
                target_rotation,
                rotating_left,
                rotating_right,
            } => {
                if let Some(left) = rotating_left {
                    self.rotating_left = *left;
                }
                if let Some(right) = rotating_right {
                    self.rotating_right = *right;
                }
                self.joystick_target = Some(JoystickTarget {
                    throttle: target_throttle.clamp(0.0, 1.0),
                    rotation: *target_rotation,
                });
            }
            InputEvent::FireWeapon { .. } | InputEvent::PlayerJoined { .. } | InputEvent::PlayerInfo { .. } => {
                return false
            }
        }
        true
    }

    pub fn take_damage(&mut self, damage: f32, options: &GameOptions) {
        if options.infinite_health {
            self.health = (self.health - TOKEN_DAMAGE).max(0.0);
            return;
        }
        self.health = (self.health - damage).max(0.0);
        if self.health == 0.0 {
            self.clear_intents();
        }
    }

    fn clear_intents(&mut self) {
        self.throttle = 0.0;
        self.thrusting_up = false;
        self.thrusting_down = false;
        self.target_rotation = None;
        self.rotating_left = false;
        self.rotating_right = false;
        self.joystick_target = None;
    }

    /// Turn intents into forces and rotation for the coming physics step
    pub fn pre_step(&mut self, physics: &mut PhysicsWorld, tick: Tick, options: &GameOptions) {
        if options.infinite_health {
            self.health = MAX_HEALTH;
        }
        if options.infinite_fuel {
            self.fuel = MAX_FUEL;
        }

        let dt = tick_delta();
        if let Some(body) = physics.body_mut(self.body) {
            body.reset_forces(false);

            if self.fuel <= 0.0 {
                self.throttle = 0.0;
            } else if self.is_alive() {
                let rotation = body.rotation().angle();
                self.update_targets(rotation, dt);

                if self.throttle != 0.0 {
                    let force = Rotation::new(rotation) * vector![0.0, self.throttle * FULL_THROTTLE_FORCE];
                    body.add_force(force, true);
                    self.burn_fuel(THROTTLE_FUEL_BURN_RATE * self.throttle * dt);
                }

                if let Some(target) = self.target_rotation {
                    if target != rotation {
                        body.set_angvel(0.0, true);
                        body.set_rotation(Rotation::new(turn_towards(rotation, target, TURN_RATE * dt)), true);
                        self.burn_fuel(ROTATE_FUEL_BURN_RATE * dt);
                    }
                }
            }
        }

        self.weapons.replenish(tick);
    }

    fn update_targets(&mut self, rotation: f32, dt: f32) {
        if self.rotating_left || self.rotating_right {
            let sign = if self.rotating_left { 1.0 } else { -1.0 };
            let mut target = rotation + TURN_RATE * dt * sign;
            // Snap upright when a turn crosses zero
            if (rotation < 0.0 && target > 0.0) || (rotation > 0.0 && target < 0.0) {
                target = 0.0;
            }
            self.target_rotation = Some(normalize_angle(target));
        } else if let Some(joystick) = &self.joystick_target {
            self.target_rotation = joystick.rotation;
        } else {
            self.target_rotation = None;
        }

        if self.thrusting_up || self.thrusting_down {
            let sign = if self.thrusting_up { 1.0 } else { -1.0 };
            self.throttle = (self.throttle + THROTTLE_RATE * dt * sign).clamp(0.0, 1.0);
        } else if let Some(joystick) = &self.joystick_target {
            self.throttle = joystick.throttle;
        }
    }

    fn burn_fuel(&mut self, amount: f32) {
        self.fuel = (self.fuel - amount).max(0.0);
    }

    pub fn post_step(&mut self, physics: &mut PhysicsWorld, world_width: f32) {
        physics.wrap_horizontally(self.body, world_width);
    }
}

/// Normalize into [-PI, PI)
pub fn normalize_angle(mut angle: f32) -> f32 {
    while angle < -PI {
        angle += 2.0 * PI;
    }
    while angle >= PI {
        angle -= 2.0 * PI;
    }
    angle
}

/// Rotate from `rotation` towards `target` along the shorter arc by at most `max_delta`
fn turn_towards(rotation: f32, target: f32, max_delta: f32) -> f32 {
    let arc = normalize_angle(target - rotation);
    normalize_angle(rotation + arc.clamp(-max_delta, max_delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn lander() -> (PhysicsWorld, Lander) {
        let mut physics = PhysicsWorld::new(0.0);
        let lander = Lander::spawn(&mut physics, Uuid::new_v4(), "ace".into(), LanderColor::Blue, 100.0, 500.0);
        (physics, lander)
    }

    fn finite() -> GameOptions {
        GameOptions {
            infinite_fuel: false,
            infinite_health: false,
        }
    }

    #[test]
    fn normalize_angle_wraps_into_half_open_range() {
        assert_eq!(normalize_angle(0.5), 0.5);
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert_eq!(normalize_angle(PI), -PI);
    }

    #[test]
    fn turning_takes_the_short_way_round() {
        assert!((turn_towards(0.0, 1.0, 0.1) - 0.1).abs() < 1e-6);
        assert!((turn_towards(0.0, -1.0, 0.1) + 0.1).abs() < 1e-6);
        assert!((turn_towards(0.05, 0.0, 0.1)).abs() < 1e-6);
        // Crossing the seam at PI reaches the target without overshooting
        let next = turn_towards(PI - 0.05, -PI + 0.05, 0.2);
        assert!((next - (-PI + 0.05)).abs() < 1e-4);
    }

    #[test]
    fn lethal_damage_clamps_health_and_freezes_intents() {
        let (_physics, mut lander) = lander();
        lander.process_input(&InputEvent::Thrust {
            dir: ThrustDir::Up,
            active: true,
        });
        lander.throttle = 0.6;

        lander.take_damage(250.0, &finite());
        assert_eq!(lander.health, 0.0);
        assert!(!lander.is_alive());
        assert_eq!(lander.throttle, 0.0);
        assert!(!lander.thrusting_up);

        let accepted = lander.process_input(&InputEvent::Rotate {
            dir: RotateDir::Left,
            active: true,
        });
        assert!(!accepted);
        assert!(!lander.rotating_left);
    }

    #[test]
    fn infinite_health_takes_token_damage_only() {
        let (_physics, mut lander) = lander();
        let options = GameOptions {
            infinite_fuel: true,
            infinite_health: true,
        };
        lander.take_damage(500.0, &options);
        assert_eq!(lander.health, MAX_HEALTH - TOKEN_DAMAGE);
    }

    #[test]
    fn thrust_ramps_throttle_and_burns_fuel() {
        let (mut physics, mut lander) = lander();
        lander.process_input(&InputEvent::Thrust {
            dir: ThrustDir::Up,
            active: true,
        });
        for tick in 0..30 {
            lander.pre_step(&mut physics, tick, &finite());
            physics.step();
        }
        assert!((lander.throttle - 0.5).abs() < 1e-3);
        assert!(lander.fuel < MAX_FUEL);
        assert!(physics.pose(lander.body).unwrap().vel_y > 0.0);
    }

    #[test]
    fn empty_tank_forces_zero_throttle() {
        let (mut physics, mut lander) = lander();
        lander.fuel = 0.0;
        lander.throttle = 1.0;
        lander.process_input(&InputEvent::Thrust {
            dir: ThrustDir::Up,
            active: true,
        });
        for tick in 0..10 {
            lander.pre_step(&mut physics, tick, &finite());
            physics.step();
            assert_eq!(lander.throttle, 0.0);
        }
        assert_eq!(physics.pose(lander.body).unwrap().vel_y, 0.0);
    }

    #[test]
    fn ammo_refills_one_round_per_window() {
        let mut bay = WeaponBay::full();
        let window = RocketStats::for_type(RocketType::Small).replenish_ticks;

        assert!(bay.take(RocketType::Small, 100));
        assert!(bay.take(RocketType::Small, 101));
        assert_eq!(bay.small.count, 1);
        assert_eq!(bay.small.replenish_from_tick, 100);

        bay.replenish(100 + window);
        assert_eq!(bay.small.count, 1);
        bay.replenish(101 + window);
        assert_eq!(bay.small.count, 2);
        bay.replenish(102 + window);
        assert_eq!(bay.small.count, 2);
    }

    #[test]
    fn cannot_fire_an_empty_magazine() {
        let mut bay = WeaponBay::full();
        assert!(bay.take(RocketType::Big, 0));
        assert!(!bay.take(RocketType::Big, 1));
        assert_eq!(bay.big.count, 0);
    }

    #[test]
    fn color_pick_prefers_unused() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let used: Vec<_> = LanderColor::ALL[..7].to_vec();
        assert_eq!(LanderColor::pick(&mut rng, &used), LanderColor::Pink);
    }
}

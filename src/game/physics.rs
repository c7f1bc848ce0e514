//! Rigid-body world wrapper: fixed stepping, contact forces and binary snapshots

use bytes::Bytes;
use rapier2d::crossbeam::channel::unbounded;
use rapier2d::parry::query;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::util::time::tick_delta;

/// Physics blob errors
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("failed to encode physics world: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode physics world: {0}")]
    Decode(#[source] bincode::Error),
}

/// Everything rapier needs to resume a simulation. The pipeline, CCD solver
/// and integration parameters hold no persistent state and are rebuilt.
#[derive(Serialize, Deserialize)]
struct PhysicsSets {
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
}

impl PhysicsSets {
    fn empty() -> Self {
        Self {
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
        }
    }
}

/// A contact-force event reported by one physics step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactForce {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    pub magnitude: f32,
}

/// Position, rotation and velocity of one body
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub vel_x: f32,
    pub vel_y: f32,
}

impl Pose {
    pub fn speed(&self) -> f32 {
        (self.vel_x * self.vel_x + self.vel_y * self.vel_y).sqrt()
    }
}

/// The physics world owned by exactly one `Game`
pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    params: IntegrationParameters,
    ccd_solver: CCDSolver,
    sets: PhysicsSets,
}

impl PhysicsWorld {
    pub fn new(gravity_y: f32) -> Self {
        Self::with_sets(gravity_y, PhysicsSets::empty())
    }

    fn with_sets(gravity_y: f32, sets: PhysicsSets) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vector![0.0, gravity_y],
            params: IntegrationParameters {
                dt: tick_delta(),
                ..IntegrationParameters::default()
            },
            ccd_solver: CCDSolver::new(),
            sets,
        }
    }

    /// Rebuild a world from a blob produced by [`PhysicsWorld::encode`]
    pub fn decode(blob: &[u8], gravity_y: f32) -> Result<Self, PhysicsError> {
        let sets: PhysicsSets = bincode::deserialize(blob).map_err(PhysicsError::Decode)?;
        Ok(Self::with_sets(gravity_y, sets))
    }

    pub fn encode(&self) -> Result<Bytes, PhysicsError> {
        bincode::serialize(&self.sets)
            .map(Bytes::from)
            .map_err(PhysicsError::Encode)
    }

    /// Advance exactly one fixed tick and return the contact forces it
    /// produced, in handle order so every replica resolves damage identically
    pub fn step(&mut self) -> Vec<ContactForce> {
        let (collision_send, _collision_recv) = unbounded();
        let (force_send, force_recv) = unbounded();
        let events = ChannelEventCollector::new(collision_send, force_send);

        let sets = &mut self.sets;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut sets.islands,
            &mut sets.broad_phase,
            &mut sets.narrow_phase,
            &mut sets.bodies,
            &mut sets.colliders,
            &mut sets.impulse_joints,
            &mut sets.multibody_joints,
            &mut self.ccd_solver,
            None,
            &(),
            &events,
        );

        let mut forces: Vec<ContactForce> = force_recv
            .try_iter()
            .map(|event| ContactForce {
                collider1: event.collider1,
                collider2: event.collider2,
                magnitude: event.total_force_magnitude,
            })
            .collect();
        forces.sort_by_key(|f| (f.collider1.into_raw_parts(), f.collider2.into_raw_parts()));
        forces
    }

    /// Insert a body with a single attached collider
    pub fn insert(&mut self, body: RigidBody, collider: Collider) -> (RigidBodyHandle, ColliderHandle) {
        let body_handle = self.sets.bodies.insert(body);
        let collider_handle =
            self.sets
                .colliders
                .insert_with_parent(collider, body_handle, &mut self.sets.bodies);
        (body_handle, collider_handle)
    }

    /// Remove a body and its colliders
    pub fn remove(&mut self, handle: RigidBodyHandle) {
        let sets = &mut self.sets;
        sets.bodies.remove(
            handle,
            &mut sets.islands,
            &mut sets.colliders,
            &mut sets.impulse_joints,
            &mut sets.multibody_joints,
            true,
        );
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.sets.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.sets.bodies.get_mut(handle)
    }

    pub fn has_body(&self, handle: RigidBodyHandle) -> bool {
        self.sets.bodies.contains(handle)
    }

    pub fn has_collider(&self, handle: ColliderHandle) -> bool {
        self.sets.colliders.contains(handle)
    }

    pub fn body_count(&self) -> usize {
        self.sets.bodies.len()
    }

    pub fn pose(&self, handle: RigidBodyHandle) -> Option<Pose> {
        let body = self.body(handle)?;
        let translation = body.translation();
        let linvel = body.linvel();
        Some(Pose {
            x: translation.x,
            y: translation.y,
            rotation: body.rotation().angle(),
            vel_x: linvel.x,
            vel_y: linvel.y,
        })
    }

    /// Geometric overlap test between two colliders, independent of the
    /// narrow phase so it also holds for sleeping bodies
    pub fn colliders_overlap(&self, a: ColliderHandle, b: ColliderHandle) -> bool {
        let (Some(a), Some(b)) = (self.sets.colliders.get(a), self.sets.colliders.get(b)) else {
            return false;
        };
        query::intersection_test(a.position(), a.shape(), b.position(), b.shape()).unwrap_or(false)
    }

    /// Shift a body horizontally by one world width when it leaves `[0, width]`
    pub fn wrap_horizontally(&mut self, handle: RigidBodyHandle, width: f32) {
        let Some(body) = self.sets.bodies.get_mut(handle) else {
            return;
        };
        let mut translation = *body.translation();
        if translation.x < 0.0 {
            translation.x += width;
        } else if translation.x > width {
            translation.x -= width;
        } else {
            return;
        }
        body.set_translation(translation, true);
    }
}

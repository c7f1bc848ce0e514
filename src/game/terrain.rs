//! Moon terrain: generation, landing pads and the static colliders built from it

use rand::seq::SliceRandom;
use rand::Rng;
use rapier2d::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::constants::{
    GRAVITY, PAD_SENSOR_HALF_HEIGHT, SKY_RESTITUTION, TERRAIN_ITERATIONS, TERRAIN_MAX_HEIGHT_RATIO,
    TERRAIN_MIN_HEIGHT, TERRAIN_ROUGHNESS, WORLD_HEIGHT, WORLD_WIDTH,
};
use super::physics::PhysicsWorld;

/// Landing pad difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandingPadType {
    Easy,
    Medium,
    Hard,
}

/// Pad geometry and reward per type
#[derive(Debug, Clone, Copy)]
pub struct LandingPadStats {
    /// Pad width in world units
    pub width: f32,
    /// Wins awarded for landing on it
    pub multiplier: u32,
}

impl LandingPadStats {
    pub fn for_type(pad_type: LandingPadType) -> Self {
        match pad_type {
            LandingPadType::Easy => Self {
                width: 60.0,
                multiplier: 1,
            },
            LandingPadType::Medium => Self {
                width: 40.0,
                multiplier: 2,
            },
            LandingPadType::Hard => Self {
                width: 25.0,
                multiplier: 3,
            },
        }
    }
}

/// Where a pad sits on the terrain polyline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadSite {
    /// Index of the leftmost terrain vertex under the pad
    pub index: usize,
    pub pad_type: LandingPadType,
}

/// Terrain description. Shared verbatim with clients in full syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Moon {
    pub world_width: f32,
    pub world_height: f32,
    /// Ground polyline from x = 0 to x = width; the last vertex repeats the
    /// first height so the terrain tiles under wraparound
    pub vertices: Vec<[f32; 2]>,
    pub gravity: f32,
    pub landing_pads: Vec<PadSite>,
}

impl Moon {
    /// Random moon at the default world size
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        Self::generate_sized(rng, WORLD_WIDTH, WORLD_HEIGHT)
    }

    pub fn generate_sized<R: Rng>(rng: &mut R, world_width: f32, world_height: f32) -> Self {
        let heights = normalize(
            midpoint_heights(rng, TERRAIN_ITERATIONS),
            TERRAIN_MIN_HEIGHT,
            world_width * TERRAIN_MAX_HEIGHT_RATIO,
        );
        let mut moon = Self::from_heights(&heights, world_width, world_height);

        let mut pad_types = [LandingPadType::Easy, LandingPadType::Medium, LandingPadType::Hard];
        pad_types.shuffle(rng);

        // One pad per equal slice of the map so pads never overlap
        let slice = heights.len() / pad_types.len();
        let segment_width = moon.segment_width();
        for (i, pad_type) in pad_types.into_iter().enumerate() {
            let span = pad_span(pad_type, segment_width);
            let first = i * slice + 1;
            let last = ((i + 1) * slice).saturating_sub(span + 1).max(first);
            let index = rng.gen_range(first..=last);
            moon.add_pad(PadSite { index, pad_type });
        }
        moon
    }

    /// Flat terrain at `ground_y` with an easy pad in the middle
    pub fn flat(world_width: f32, world_height: f32, ground_y: f32) -> Self {
        let heights = vec![ground_y; 1 << TERRAIN_ITERATIONS];
        let mut moon = Self::from_heights(&heights, world_width, world_height);
        moon.add_pad(PadSite {
            index: heights.len() / 2,
            pad_type: LandingPadType::Easy,
        });
        moon
    }

    fn from_heights(heights: &[f32], world_width: f32, world_height: f32) -> Self {
        let segment_width = world_width / heights.len() as f32;
        let mut vertices: Vec<[f32; 2]> = heights
            .iter()
            .enumerate()
            .map(|(i, h)| [i as f32 * segment_width, *h])
            .collect();
        vertices.push([heights.len() as f32 * segment_width, heights[0]]);

        Self {
            world_width,
            world_height,
            vertices,
            gravity: GRAVITY,
            landing_pads: Vec::new(),
        }
    }

    pub fn segment_width(&self) -> f32 {
        self.world_width / (self.vertices.len() - 1) as f32
    }

    /// Flatten the terrain under a pad and remember it
    fn add_pad(&mut self, site: PadSite) {
        let span = pad_span(site.pad_type, self.segment_width());
        let height = self.vertices[site.index][1];
        let end = (site.index + span).min(self.vertices.len() - 2);
        for vertex in &mut self.vertices[site.index..=end] {
            vertex[1] = height;
        }
        self.landing_pads.push(site);
    }
}

/// Number of terrain segments a pad of this type covers
fn pad_span(pad_type: LandingPadType, segment_width: f32) -> usize {
    (LandingPadStats::for_type(pad_type).width / segment_width).ceil() as usize
}

/// Midpoint displacement over a wrapping height map of 2^iterations samples
fn midpoint_heights<R: Rng>(rng: &mut R, iterations: u32) -> Vec<f32> {
    let len = 1usize << iterations;
    let mut heights = vec![0.0f32; len];
    let mut range = 1000.0f32;

    for i in 0..iterations {
        range *= TERRAIN_ROUGHNESS;
        let step = len >> i;
        let half = step / 2;
        for j in (0..len).step_by(step) {
            let mid = (heights[j] + heights[(j + step) % len]) / 2.0;
            heights[j + half] = mid + rng.gen_range(-1.0f32..1.0) * range;
        }
    }
    heights
}

fn normalize(mut heights: Vec<f32>, low: f32, high: f32) -> Vec<f32> {
    let max = heights.iter().copied().fold(f32::MIN, f32::max);
    let min = heights.iter().copied().fold(f32::MAX, f32::min);
    let spread = max - min;
    for h in &mut heights {
        *h = if spread > 0.0 {
            (*h - min) / spread * high + low
        } else {
            low
        };
    }
    heights
}

/// A fixed collider with no per-tick behavior (ground, sky)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaticPiece {
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

impl StaticPiece {
    pub fn ground(physics: &mut PhysicsWorld, moon: &Moon) -> Self {
        let points = moon.vertices.iter().map(|[x, y]| point![*x, *y]).collect();
        let (body, collider) = physics.insert(
            RigidBodyBuilder::fixed().build(),
            ColliderBuilder::polyline(points, None).build(),
        );
        Self { body, collider }
    }

    pub fn sky(physics: &mut PhysicsWorld, moon: &Moon) -> Self {
        let points = vec![
            point![0.0, moon.world_height],
            point![moon.world_width, moon.world_height],
        ];
        let (body, collider) = physics.insert(
            RigidBodyBuilder::fixed().build(),
            ColliderBuilder::polyline(points, None)
                .restitution(SKY_RESTITUTION)
                .build(),
        );
        Self { body, collider }
    }
}

/// A landing pad: a sensor strip resting on the flattened terrain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandingPad {
    pub id: Uuid,
    pub pad_type: LandingPadType,
    /// Left edge
    pub x: f32,
    pub width: f32,
    /// Terrain height under the pad
    pub surface_y: f32,
    pub body: RigidBodyHandle,
    pub collider: ColliderHandle,
}

impl LandingPad {
    pub fn create(physics: &mut PhysicsWorld, moon: &Moon, site: &PadSite, id: Uuid) -> Self {
        let [x, surface_y] = moon.vertices[site.index];
        let width = LandingPadStats::for_type(site.pad_type).width;
        let (body, collider) = physics.insert(
            RigidBodyBuilder::fixed()
                .translation(vector![x + width / 2.0, surface_y + PAD_SENSOR_HALF_HEIGHT])
                .build(),
            ColliderBuilder::cuboid(width / 2.0, PAD_SENSOR_HALF_HEIGHT)
                .sensor(true)
                .build(),
        );
        Self {
            id,
            pad_type: site.pad_type,
            x,
            width,
            surface_y,
            body,
            collider,
        }
    }

    pub fn contains_x(&self, x: f32) -> bool {
        x >= self.x && x <= self.x + self.width
    }

    pub fn multiplier(&self) -> u32 {
        LandingPadStats::for_type(self.pad_type).multiplier
    }
}

//! Stage parameter sets and the typed uniform update.
//!
//! Each tick runs a velocity stage and a position stage, and an external
//! renderer draws the result. Every one of them reads its own parameter set:
//!
//! | Set | Struct | Consumer |
//! |-----|--------|----------|
//! | velocity | [`SimulationParams`] | velocity compute pass |
//! | position | [`PositionParams`] | position compute pass |
//! | render | [`RenderParams`] | host renderer |
//!
//! The plane frame is not duplicated into these sets. It lives once in
//! [`FrameUniforms`], owned by the engine and borrowed by both compute passes,
//! so moving the plane is a single write visible to both.
//!
//! [`UniformUpdate`] carries optional values; applying it routes each field to
//! every set that declares it.
//!
//! ```ignore
//! engine.update_uniforms(&UniformUpdate {
//!     rise: Some(0.4),
//!     max_age: Some(6.0), // reaches velocity, position and render sets
//!     ..Default::default()
//! });
//! ```

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::plane::PlaneFrame;

/// Plane frame as seen by the compute passes.
///
/// One instance per engine, shared by reference with the velocity and the
/// position stage.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameUniforms {
    /// World position of the plane center (the "plane offset").
    pub offset: Vec3,
    pub basis_x: Vec3,
    pub basis_y: Vec3,
    pub basis_z: Vec3,
    /// Plane extents `(width, height)`.
    pub extent: Vec2,
    /// Fraction of the plane used for spawning, in `(0, 1]`.
    pub spawn_scale: f32,
}

impl FrameUniforms {
    /// Build the shared uniforms from an analyzed plane.
    pub fn new(frame: &PlaneFrame, spawn_scale: f32) -> Self {
        Self {
            offset: frame.origin,
            basis_x: frame.basis_x,
            basis_y: frame.basis_y,
            basis_z: frame.basis_z,
            extent: Vec2::new(frame.width, frame.height),
            spawn_scale,
        }
    }

    /// Plane-local coordinate normalized to `[0, 1]` over the surface.
    #[inline]
    pub fn project_normalized(&self, point: Vec3) -> Vec2 {
        let local = point - self.offset;
        Vec2::new(
            local.dot(self.basis_x) / self.extent.x.max(f32::EPSILON) + 0.5,
            local.dot(self.basis_z) / self.extent.y.max(f32::EPSILON) + 0.5,
        )
    }
}

/// Timing published to both compute stages at the start of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepTime {
    /// Seconds since the effect started.
    pub elapsed: f32,
    /// Seconds since the previous tick.
    pub delta: f32,
    /// Tick counter; seeds per-tick respawn randomness.
    pub tick: u32,
}

/// Velocity stage parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    /// Acceleration along the surface normal.
    pub rise: f32,
    /// In-plane wander acceleration.
    pub spread: f32,
    /// Spatial frequency of the wander pattern.
    pub noise_scale: f32,
    /// Temporal frequency of the wander pattern.
    pub noise_speed: f32,
    /// Linear drag per second.
    pub drag: f32,
    /// Strength of the push away from crowded regions.
    pub repulsion: f32,
    /// Density below which no repulsion is applied.
    pub repulsion_threshold: f32,
    /// Speed cap after all forces.
    pub max_speed: f32,
    /// Lifetime after which a particle is recycled.
    pub max_age: f32,
    /// Collision distance in voxels of the bound SDF.
    pub collision_threshold_voxels: f32,
    /// Fraction of the into-surface velocity removed on contact, `[0, 1]`.
    pub collision_damp: f32,
    /// Outward velocity added per unit of penetration.
    pub collision_push: f32,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            rise: 0.25,
            spread: 0.08,
            noise_scale: 3.0,
            noise_speed: 0.6,
            drag: 0.8,
            repulsion: 0.15,
            repulsion_threshold: 0.05,
            max_speed: 0.6,
            max_age: 4.0,
            collision_threshold_voxels: 1.0,
            collision_damp: 0.9,
            collision_push: 1.5,
        }
    }
}

/// Position stage parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionParams {
    /// Lifetime after which a particle respawns on the plane.
    pub max_age: f32,
    /// Freshness lost per second.
    pub freshness_decay: f32,
}

impl Default for PositionParams {
    fn default() -> Self {
        Self {
            max_age: 4.0,
            freshness_decay: 0.15,
        }
    }
}

/// Parameters for the host renderer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    /// Sprite size in world units.
    pub point_size: f32,
    /// Base tint.
    pub color: Vec3,
    /// Global opacity multiplier.
    pub opacity: f32,
    /// How strongly crowded regions fade out, from the density field.
    pub density_fade: f32,
    /// Lifetime used to fade particles by age.
    pub max_age: f32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            point_size: 0.04,
            color: Vec3::new(0.55, 0.55, 0.6),
            opacity: 0.6,
            density_fade: 0.5,
            max_age: 4.0,
        }
    }
}

/// Typed replacement for updating uniforms by name.
///
/// `None` leaves a value untouched. A field shared by several stages updates
/// all of them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniformUpdate {
    pub rise: Option<f32>,
    pub spread: Option<f32>,
    pub noise_scale: Option<f32>,
    pub noise_speed: Option<f32>,
    pub drag: Option<f32>,
    pub repulsion: Option<f32>,
    pub repulsion_threshold: Option<f32>,
    pub max_speed: Option<f32>,
    pub collision_threshold_voxels: Option<f32>,
    pub collision_damp: Option<f32>,
    pub collision_push: Option<f32>,
    /// Velocity, position and render sets.
    pub max_age: Option<f32>,
    pub freshness_decay: Option<f32>,
    pub point_size: Option<f32>,
    pub color: Option<Vec3>,
    pub opacity: Option<f32>,
    pub density_fade: Option<f32>,
}

impl UniformUpdate {
    /// Write every supplied value into the velocity set.
    pub fn apply_velocity(&self, params: &mut SimulationParams) {
        set(&mut params.rise, self.rise);
        set(&mut params.spread, self.spread);
        set(&mut params.noise_scale, self.noise_scale);
        set(&mut params.noise_speed, self.noise_speed);
        set(&mut params.drag, self.drag);
        set(&mut params.repulsion, self.repulsion);
        set(&mut params.repulsion_threshold, self.repulsion_threshold);
        set(&mut params.max_speed, self.max_speed);
        set(&mut params.max_age, self.max_age);
        set(&mut params.collision_threshold_voxels, self.collision_threshold_voxels);
        set(&mut params.collision_damp, self.collision_damp);
        set(&mut params.collision_push, self.collision_push);
    }

    /// Write every supplied value into the position set.
    pub fn apply_position(&self, params: &mut PositionParams) {
        set(&mut params.max_age, self.max_age);
        set(&mut params.freshness_decay, self.freshness_decay);
    }

    /// Write every supplied value into the render set.
    pub fn apply_render(&self, params: &mut RenderParams) {
        set(&mut params.point_size, self.point_size);
        set(&mut params.color, self.color);
        set(&mut params.opacity, self.opacity);
        set(&mut params.density_fade, self.density_fade);
        set(&mut params.max_age, self.max_age);
    }
}

#[inline]
fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(v) = value {
        *slot = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update_changes_nothing() {
        let mut sim = SimulationParams::default();
        let mut pos = PositionParams::default();
        let mut render = RenderParams::default();
        let update = UniformUpdate::default();

        update.apply_velocity(&mut sim);
        update.apply_position(&mut pos);
        update.apply_render(&mut render);

        assert_eq!(sim, SimulationParams::default());
        assert_eq!(pos, PositionParams::default());
        assert_eq!(render, RenderParams::default());
    }

    #[test]
    fn test_shared_key_reaches_every_set() {
        let mut sim = SimulationParams::default();
        let mut pos = PositionParams::default();
        let mut render = RenderParams::default();
        let update = UniformUpdate {
            max_age: Some(9.0),
            ..Default::default()
        };

        update.apply_velocity(&mut sim);
        update.apply_position(&mut pos);
        update.apply_render(&mut render);

        assert_eq!(sim.max_age, 9.0);
        assert_eq!(pos.max_age, 9.0);
        assert_eq!(render.max_age, 9.0);
    }

    #[test]
    fn test_stage_specific_key_stays_in_its_set() {
        let mut sim = SimulationParams::default();
        let mut render = RenderParams::default();
        let update = UniformUpdate {
            point_size: Some(0.2),
            rise: Some(1.0),
            ..Default::default()
        };

        update.apply_velocity(&mut sim);
        update.apply_render(&mut render);

        assert_eq!(sim.rise, 1.0);
        assert_eq!(render.point_size, 0.2);
        assert_eq!(sim.spread, SimulationParams::default().spread);
    }

    #[test]
    fn test_update_deserializes_with_missing_fields() {
        let update: UniformUpdate = serde_json::from_str(r#"{ "spread": 0.3 }"#).unwrap();
        assert_eq!(update.spread, Some(0.3));
        assert_eq!(update.rise, None);
    }

    #[test]
    fn test_partial_params_fill_defaults() {
        let sim: SimulationParams = serde_json::from_str(r#"{ "rise": 0.4 }"#).unwrap();
        assert_eq!(sim.rise, 0.4);
        assert_eq!(sim.drag, SimulationParams::default().drag);

        let pos: PositionParams = serde_json::from_str("{}").unwrap();
        assert_eq!(pos, PositionParams::default());

        let render: RenderParams = serde_json::from_str(r#"{ "opacity": 0.2 }"#).unwrap();
        assert_eq!(render.opacity, 0.2);
        assert_eq!(render.point_size, RenderParams::default().point_size);
    }

    #[test]
    fn test_frame_projection_center() {
        let frame = FrameUniforms {
            offset: Vec3::new(1.0, 2.0, 3.0),
            basis_x: Vec3::X,
            basis_y: Vec3::Y,
            basis_z: Vec3::Z,
            extent: Vec2::new(2.0, 4.0),
            spawn_scale: 1.0,
        };
        let uv = frame.project_normalized(Vec3::new(2.0, 5.0, 3.0));
        assert!((uv - Vec2::new(1.0, 0.5)).length() < 1e-6);
    }
}

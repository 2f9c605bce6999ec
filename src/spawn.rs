//! Seed distribution for particles emitted from the plane.
//!
//! The same distribution is used twice: once on the CPU with `rand` to fill
//! the initial state, and every tick inside the compute passes to recycle
//! particles that outlived `max_age`. The compute side has no RNG, so it draws
//! its uniforms from [`random_lane`], a PCG hash of particle index, tick and
//! lane. The WGSL passes carry a line-for-line copy of that hash.

use glam::{Vec3, Vec4};
use rand::Rng;

use crate::uniforms::FrameUniforms;

/// Hard cap on the magnitude of a seeded velocity.
pub const MAX_SEED_SPEED: f32 = 0.1;

/// Freshness range given to newly spawned particles.
pub const FRESHNESS_RANGE: (f32, f32) = (0.6, 0.8);

/// Initial age range, staggered so particles do not recycle in lockstep.
pub const SEED_AGE_RANGE: (f32, f32) = (0.02, 0.14);

/// Upper bound of the extra lift jitter above the base lift.
pub const LIFT_JITTER: f32 = 0.01;

/// Spawn volume derived from the shared plane uniforms.
///
/// Positions and velocities are built from four uniform samples in `[0, 1)`
/// each, so CPU seeding and GPU respawn share one mapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpawnRegion {
    origin: Vec3,
    basis_x: Vec3,
    basis_y: Vec3,
    basis_z: Vec3,
    half_width: f32,
    half_height: f32,
    lift: f32,
}

impl SpawnRegion {
    /// Spawn region covering `spawn_scale` of the plane around its center.
    pub fn new(frame: &FrameUniforms) -> Self {
        let scale = frame.spawn_scale;
        Self {
            origin: frame.offset,
            basis_x: frame.basis_x,
            basis_y: frame.basis_y,
            basis_z: frame.basis_z,
            half_width: 0.5 * scale * frame.extent.x,
            half_height: 0.5 * scale * frame.extent.y,
            lift: spawn_lift(scale),
        }
    }

    /// Half extent along `basis_x`.
    pub fn half_width(&self) -> f32 {
        self.half_width
    }

    /// Half extent along `basis_z`.
    pub fn half_height(&self) -> f32 {
        self.half_height
    }

    /// Seed position (xyz) and freshness (w).
    pub fn position(&self, r: [f32; 4]) -> Vec4 {
        let p = self.origin
            + self.basis_x * lerp(-self.half_width, self.half_width, r[0])
            + self.basis_z * lerp(-self.half_height, self.half_height, r[1])
            + self.basis_y * (self.lift + r[2] * LIFT_JITTER);
        p.extend(lerp(FRESHNESS_RANGE.0, FRESHNESS_RANGE.1, r[3]))
    }

    /// Seed velocity (xyz) and age (w), clamped to [`MAX_SEED_SPEED`].
    pub fn velocity(&self, r: [f32; 4]) -> Vec4 {
        let v = self.basis_x * lerp(-0.02, 0.02, r[0])
            + self.basis_y * lerp(0.01, 0.03, r[1])
            + self.basis_z * lerp(-0.02, 0.02, r[2]);
        clamp_seed_speed(v).extend(lerp(SEED_AGE_RANGE.0, SEED_AGE_RANGE.1, r[3]))
    }
}

/// Height of the spawn layer above the surface.
#[inline]
pub fn spawn_lift(spawn_scale: f32) -> f32 {
    (0.02 * spawn_scale).max(0.01)
}

/// Rescale `v` to exactly [`MAX_SEED_SPEED`] if it is faster.
#[inline]
pub fn clamp_seed_speed(v: Vec3) -> Vec3 {
    let speed = v.length();
    if speed > MAX_SEED_SPEED {
        v * (MAX_SEED_SPEED / speed)
    } else {
        v
    }
}

/// Fill `count` particles with the seed distribution.
///
/// Returns `(positions, velocities)` as `xyz + freshness` and `xyz + age`.
pub fn seed_particles<R: Rng + ?Sized>(
    frame: &FrameUniforms,
    count: usize,
    rng: &mut R,
) -> (Vec<Vec4>, Vec<Vec4>) {
    let region = SpawnRegion::new(frame);
    let mut positions = Vec::with_capacity(count);
    let mut velocities = Vec::with_capacity(count);

    for _ in 0..count {
        positions.push(region.position(rng.gen()));
        velocities.push(region.velocity(rng.gen()));
    }

    (positions, velocities)
}

// ========== GPU-mirrored randomness ==========

/// PCG hash (one round of the PCG-RXS-M-XS permutation).
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Map a hash to `[0, 1)` using its top 24 bits.
#[inline]
pub fn hash_to_unit(hash: u32) -> f32 {
    (hash >> 8) as f32 / 16_777_216.0
}

/// Uniform sample in `[0, 1)` for a particle, tick and lane.
#[inline]
pub fn random_lane(index: u32, tick: u32, lane: u32) -> f32 {
    let salt = pcg_hash(tick.wrapping_mul(16).wrapping_add(lane));
    hash_to_unit(pcg_hash(index.wrapping_add(salt)))
}

/// Four consecutive lanes starting at `first_lane`.
#[inline]
pub fn random_lanes(index: u32, tick: u32, first_lane: u32) -> [f32; 4] {
    [
        random_lane(index, tick, first_lane),
        random_lane(index, tick, first_lane + 1),
        random_lane(index, tick, first_lane + 2),
        random_lane(index, tick, first_lane + 3),
    ]
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tilted_frame(spawn_scale: f32) -> FrameUniforms {
        let basis_x = Vec3::new(1.0, 1.0, 0.0).normalize();
        let basis_y = Vec3::new(-1.0, 1.0, 0.0).normalize();
        FrameUniforms {
            offset: Vec3::new(2.0, -1.0, 0.5),
            basis_x,
            basis_y,
            basis_z: basis_y.cross(basis_x),
            extent: Vec2::new(3.0, 1.5),
            spawn_scale,
        }
    }

    #[test]
    fn test_seed_positions_within_scaled_extents() {
        for &scale in &[1.0, 0.5, 0.1] {
            let frame = tilted_frame(scale);
            let mut rng = StdRng::seed_from_u64(7);
            let (positions, _) = seed_particles(&frame, 2000, &mut rng);

            let hw = 0.5 * scale * frame.extent.x + 1e-5;
            let hh = 0.5 * scale * frame.extent.y + 1e-5;
            for p in positions {
                let local = p.truncate() - frame.offset;
                assert!(local.dot(frame.basis_x).abs() <= hw);
                assert!(local.dot(frame.basis_z).abs() <= hh);
                let lift = local.dot(frame.basis_y);
                assert!(lift >= spawn_lift(scale) - 1e-5);
                assert!(lift <= spawn_lift(scale) + LIFT_JITTER + 1e-5);
                assert!(p.w >= FRESHNESS_RANGE.0 && p.w <= FRESHNESS_RANGE.1);
            }
        }
    }

    #[test]
    fn test_same_seed_same_distribution() {
        let frame = tilted_frame(0.8);
        let a = seed_particles(&frame, 64, &mut StdRng::seed_from_u64(5));
        let b = seed_particles(&frame, 64, &mut StdRng::seed_from_u64(5));
        let c = seed_particles(&frame, 64, &mut StdRng::seed_from_u64(6));
        assert_eq!(a, b);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn test_seed_velocities_clamped() {
        let frame = tilted_frame(1.0);
        let mut rng = StdRng::seed_from_u64(11);
        let (_, velocities) = seed_particles(&frame, 2000, &mut rng);
        for v in velocities {
            assert!(v.truncate().length() <= MAX_SEED_SPEED + 1e-6);
            assert!(v.w >= SEED_AGE_RANGE.0 && v.w <= SEED_AGE_RANGE.1);
        }
    }

    #[test]
    fn test_clamp_seed_speed_rescales_exactly() {
        let v = clamp_seed_speed(Vec3::new(3.0, 4.0, 0.0));
        assert!((v.length() - MAX_SEED_SPEED).abs() < 1e-6);
        assert!((v.normalize() - Vec3::new(0.6, 0.8, 0.0)).length() < 1e-6);

        let slow = Vec3::new(0.01, 0.02, 0.0);
        assert_eq!(clamp_seed_speed(slow), slow);
    }

    #[test]
    fn test_spawn_lift_floor() {
        assert!((spawn_lift(1.0) - 0.02).abs() < 1e-7);
        assert!((spawn_lift(0.1) - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_random_lane_range_and_determinism() {
        for i in 0..500 {
            let r = random_lane(i, 3, 1);
            assert!((0.0..1.0).contains(&r));
            assert_eq!(r, random_lane(i, 3, 1));
        }
        assert_ne!(random_lane(5, 1, 0), random_lane(5, 2, 0));
    }

    #[test]
    fn test_pcg_hash_known_value() {
        // Reference value from the published PCG hash.
        assert_eq!(pcg_hash(0), 129_708_002);
    }
}

//! Signed distance volumes of scene geometry.
//!
//! A volume is an `n x n x n` grid of signed distances over the padded world
//! bounding box of a scene: negative inside closed geometry, positive outside,
//! clamped to `[-max_distance, max_distance]`. Volumes are baked once by
//! [`SdfVolumeGenerator`] and then only read, by any number of engines.
//!
//! # Sample addressing
//!
//! Sample `(x, y, z)` sits at `bounds.min + voxel_size * (x, y, z)`, so
//! indices `0` and `n - 1` land exactly on the box faces. Unit-cube
//! coordinates map the box onto `[0, 1]³` through [`SdfVolume::unit_transform`].

mod generator;
pub mod query;

pub use generator::{CancelToken, SdfJob, SdfVolumeGenerator};

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::SdfError;
use crate::mesh::Aabb;

/// Options for one SDF bake.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SdfOptions {
    /// Samples per axis. Cost grows with `resolution³ * triangles`.
    pub resolution: u32,
    /// World-space margin added around the scene bounds on every side.
    pub padding: f32,
    /// Clamp distance; `None` uses the diagonal of the padded bounds.
    pub max_distance: Option<f32>,
}

impl SdfOptions {
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            ..Default::default()
        }
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_max_distance(mut self, max_distance: f32) -> Self {
        self.max_distance = Some(max_distance);
        self
    }
}

impl Default for SdfOptions {
    fn default() -> Self {
        Self {
            resolution: 32,
            padding: 0.1,
            max_distance: None,
        }
    }
}

/// An immutable signed distance volume.
#[derive(Clone, Debug, PartialEq)]
pub struct SdfVolume {
    data: Vec<f32>,
    bounds: Aabb,
    resolution: u32,
    voxel_size: Vec3,
    max_distance: f32,
}

impl SdfVolume {
    /// Volume from already computed samples, clamped to `max_distance`.
    ///
    /// `data` is indexed `x + y * n + z * n * n`.
    pub fn new(data: Vec<f32>, bounds: Aabb, resolution: u32, max_distance: f32) -> Result<Self, SdfError> {
        if resolution < 2 {
            return Err(SdfError::Resolution(resolution));
        }
        if !(max_distance.is_finite() && max_distance > 0.0) {
            return Err(SdfError::MaxDistance(max_distance));
        }
        let n = resolution as usize;
        if data.len() != n * n * n {
            return Err(SdfError::Incomplete {
                done: (data.len() / (n * n)) as u32,
                total: resolution,
            });
        }

        let data = data
            .into_iter()
            .map(|d| d.clamp(-max_distance, max_distance))
            .collect();

        Ok(Self {
            data,
            bounds,
            resolution,
            voxel_size: bounds.size() / (resolution - 1) as f32,
            max_distance,
        })
    }

    /// Volume sampled from an analytic distance function.
    pub fn from_fn(
        bounds: Aabb,
        resolution: u32,
        max_distance: f32,
        distance: impl Fn(Vec3) -> f32,
    ) -> Result<Self, SdfError> {
        let n = resolution.max(2);
        let step = bounds.size() / (n - 1) as f32;
        let mut data = Vec::with_capacity((n * n * n) as usize);
        for z in 0..n {
            for y in 0..n {
                for x in 0..n {
                    data.push(distance(bounds.min + step * Vec3::new(x as f32, y as f32, z as f32)));
                }
            }
        }
        Self::new(data, bounds, resolution, max_distance)
    }

    /// Raw samples, indexed `x + y * n + z * n * n`.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Padded world bounding box.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    /// Samples per axis.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// World spacing between neighboring samples per axis.
    pub fn voxel_size(&self) -> Vec3 {
        self.voxel_size
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Sample at integer coordinates, clamped to the grid.
    pub fn value(&self, x: u32, y: u32, z: u32) -> f32 {
        let n = self.resolution;
        let (x, y, z) = (x.min(n - 1), y.min(n - 1), z.min(n - 1));
        self.data[(x + y * n + z * n * n) as usize]
    }

    /// World position of sample `(x, y, z)`.
    pub fn world_point(&self, x: u32, y: u32, z: u32) -> Vec3 {
        self.bounds.min + self.voxel_size * Vec3::new(x as f32, y as f32, z as f32)
    }

    /// World to unit-cube transform: `scale(1 / size) * translate(-min)`.
    ///
    /// Maps `bounds.min` to the origin and `bounds.max` to `(1, 1, 1)`.
    pub fn unit_transform(&self) -> Mat4 {
        let size = self.bounds.size().max(Vec3::splat(f32::EPSILON));
        Mat4::from_scale(size.recip()) * Mat4::from_translation(-self.bounds.min)
    }

    /// Trilinear sample at unit-cube coordinates, clamped to the cube.
    pub fn sample_unit(&self, unit: Vec3) -> f32 {
        let last = (self.resolution - 1) as f32;
        let p = unit.clamp(Vec3::ZERO, Vec3::ONE) * last;
        let base = p.floor().min(Vec3::splat(last - 1.0));
        let f = p - base;
        let (x, y, z) = (base.x as u32, base.y as u32, base.z as u32);

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(self.value(x, y, z), self.value(x + 1, y, z), f.x);
        let c10 = lerp(self.value(x, y + 1, z), self.value(x + 1, y + 1, z), f.x);
        let c01 = lerp(self.value(x, y, z + 1), self.value(x + 1, y, z + 1), f.x);
        let c11 = lerp(self.value(x, y + 1, z + 1), self.value(x + 1, y + 1, z + 1), f.x);
        lerp(lerp(c00, c10, f.y), lerp(c01, c11, f.y), f.z)
    }

    /// Trilinear sample at a world position, clamped to the bounds.
    pub fn sample_world(&self, point: Vec3) -> f32 {
        self.sample_unit(self.unit_transform().transform_point3(point))
    }

    /// Central-difference gradient in unit-cube coordinates (one voxel step).
    pub fn gradient_unit(&self, unit: Vec3) -> Vec3 {
        let h = 1.0 / (self.resolution - 1) as f32;
        let dx = Vec3::new(h, 0.0, 0.0);
        let dy = Vec3::new(0.0, h, 0.0);
        let dz = Vec3::new(0.0, 0.0, h);
        Vec3::new(
            self.sample_unit(unit + dx) - self.sample_unit(unit - dx),
            self.sample_unit(unit + dy) - self.sample_unit(unit - dy),
            self.sample_unit(unit + dz) - self.sample_unit(unit - dz),
        ) / (2.0 * h)
    }

    /// Outward surface normal at unit-cube coordinates, in world orientation.
    ///
    /// Zero where the field is flat.
    pub fn normal_unit(&self, unit: Vec3) -> Vec3 {
        world_normal(self.gradient_unit(unit), self.bounds.size())
    }
}

/// Convert a unit-space gradient into a world-space unit normal.
#[inline]
pub(crate) fn world_normal(unit_gradient: Vec3, size: Vec3) -> Vec3 {
    (unit_gradient / size.max(Vec3::splat(f32::EPSILON))).normalize_or_zero()
}

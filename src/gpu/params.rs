//! Uniform blocks uploaded with each dispatch.
//!
//! Layouts must match the structs in `shaders/*.wgsl`. Everything is packed
//! into `vec4` slots so std140-style alignment holds without manual padding.

use bytemuck::{Pod, Zeroable};

use crate::density::DensityConfig;
use crate::substrate::VolumeBinding;
use crate::uniforms::{FrameUniforms, PositionParams, SimulationParams, StepTime};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct FrameGpu {
    /// xyz = plane center, w = spawn scale
    pub offset: [f32; 4],
    pub basis_x: [f32; 4],
    pub basis_y: [f32; 4],
    pub basis_z: [f32; 4],
    /// x = width, y = height
    pub extent: [f32; 4],
}

impl From<&FrameUniforms> for FrameGpu {
    fn from(frame: &FrameUniforms) -> Self {
        Self {
            offset: frame.offset.extend(frame.spawn_scale).to_array(),
            basis_x: frame.basis_x.extend(0.0).to_array(),
            basis_y: frame.basis_y.extend(0.0).to_array(),
            basis_z: frame.basis_z.extend(0.0).to_array(),
            extent: [frame.extent.x, frame.extent.y, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SplatParamsGpu {
    pub frame: FrameGpu,
    /// particle count, resolution, radius
    pub counts: [u32; 4],
    /// sigma, intensity
    pub shape: [f32; 4],
}

impl SplatParamsGpu {
    pub fn new(frame: &FrameUniforms, config: &DensityConfig, particle_count: u32) -> Self {
        Self {
            frame: frame.into(),
            counts: [particle_count, config.resolution, config.splat_radius, 0],
            shape: [config.splat_sigma, config.intensity, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct BlurParamsGpu {
    /// resolution, radius
    pub counts: [u32; 4],
    /// sigma
    pub shape: [f32; 4],
}

impl From<&DensityConfig> for BlurParamsGpu {
    fn from(config: &DensityConfig) -> Self {
        Self {
            counts: [config.resolution, config.blur_radius, 0, 0],
            shape: [config.blur_sigma, 0.0, 0.0, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct VelocityParamsGpu {
    pub frame: FrameGpu,
    /// particle count, tick, density resolution, sdf resolution
    pub counts: [u32; 4],
    /// x = density bound, y = volume bound
    pub flags: [u32; 4],
    /// elapsed, delta
    pub time: [f32; 4],
    /// rise, spread, noise scale, noise speed
    pub motion: [f32; 4],
    /// drag, repulsion, repulsion threshold, max speed
    pub limits: [f32; 4],
    /// max age, threshold (voxels), damp, push
    pub collision: [f32; 4],
    pub unit_transform: [[f32; 4]; 4],
    /// xyz = volume size, w = largest voxel edge
    pub volume: [f32; 4],
}

impl VelocityParamsGpu {
    pub fn new(
        frame: &FrameUniforms,
        params: &SimulationParams,
        time: StepTime,
        particle_count: u32,
        density_resolution: Option<u32>,
        volume: Option<&VolumeBinding>,
    ) -> Self {
        let (sdf_resolution, unit_transform, size, voxel) = match volume {
            Some(v) => (
                v.resolution,
                v.unit_transform.to_cols_array_2d(),
                v.voxel_size * (v.resolution.saturating_sub(1)) as f32,
                v.voxel_size.max_element(),
            ),
            None => (0, glam::Mat4::IDENTITY.to_cols_array_2d(), glam::Vec3::ONE, 0.0),
        };

        Self {
            frame: frame.into(),
            counts: [particle_count, time.tick, density_resolution.unwrap_or(0), sdf_resolution],
            flags: [density_resolution.is_some() as u32, volume.is_some() as u32, 0, 0],
            time: [time.elapsed, time.delta, 0.0, 0.0],
            motion: [params.rise, params.spread, params.noise_scale, params.noise_speed],
            limits: [params.drag, params.repulsion, params.repulsion_threshold, params.max_speed],
            collision: [
                params.max_age,
                params.collision_threshold_voxels,
                params.collision_damp,
                params.collision_push,
            ],
            unit_transform,
            volume: size.extend(voxel).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PositionParamsGpu {
    pub frame: FrameGpu,
    /// particle count, tick
    pub counts: [u32; 4],
    /// elapsed, delta, max age, freshness decay
    pub time: [f32; 4],
}

impl PositionParamsGpu {
    pub fn new(frame: &FrameUniforms, params: &PositionParams, time: StepTime, particle_count: u32) -> Self {
        Self {
            frame: frame.into(),
            counts: [particle_count, time.tick, 0, 0],
            time: [time.elapsed, time.delta, params.max_age, params.freshness_decay],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_vec4_multiples() {
        assert_eq!(std::mem::size_of::<FrameGpu>(), 80);
        assert_eq!(std::mem::size_of::<SplatParamsGpu>(), 112);
        assert_eq!(std::mem::size_of::<BlurParamsGpu>(), 32);
        assert_eq!(std::mem::size_of::<VelocityParamsGpu>(), 256);
        assert_eq!(std::mem::size_of::<PositionParamsGpu>(), 112);
    }
}

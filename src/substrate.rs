//! The compute capability the simulation runs on.
//!
//! The engine never talks to a graphics API directly. It allocates grids,
//! compiles one program per stage and dispatches typed passes through
//! [`ComputeSubstrate`]. Two backends ship with the crate:
//!
//! - [`CpuSubstrate`](crate::cpu::CpuSubstrate): reference kernels on the CPU,
//!   used by tests and headless tools.
//! - [`WgpuSubstrate`](crate::gpu::WgpuSubstrate): storage buffers and WGSL
//!   compute pipelines.
//!
//! # Ownership
//!
//! Handles are plain ids. Whoever allocated a resource releases it, exactly
//! once, through the same substrate. Releasing a dead handle is reported as a
//! [`DisposalError`] instead of being ignored, which is how double releases
//! surface in tests.

use glam::{Mat4, Vec3};
use log::warn;

use crate::density::DensityConfig;
use crate::error::{DisposalError, SubstrateError};
use crate::sdf::SdfVolume;
use crate::uniforms::{FrameUniforms, PositionParams, SimulationParams, StepTime};

/// Handle to a 2D grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridId(pub(crate) u32);

/// Handle to an uploaded SDF volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VolumeId(pub(crate) u32);

/// Handle to a compiled stage program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub(crate) u32);

/// Texel format of a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GridFormat {
    /// Four floats per texel (particle position or velocity).
    Rgba32Float,
    /// One float per texel.
    R32Float,
    /// One float per texel that passes can scatter into additively.
    ///
    /// Backends without float atomics may store this as fixed point; reads
    /// and writes through the substrate always see plain floats.
    Accumulator,
}

impl GridFormat {
    /// Floats per texel.
    pub fn channels(&self) -> usize {
        match self {
            GridFormat::Rgba32Float => 4,
            GridFormat::R32Float | GridFormat::Accumulator => 1,
        }
    }
}

/// Description of a grid to allocate.
#[derive(Clone, Copy, Debug)]
pub struct GridDescriptor<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: GridFormat,
}

impl GridDescriptor<'_> {
    /// Number of floats backing the grid.
    pub fn float_count(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

/// The compute stages of one tick, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    DensitySplat,
    BlurHorizontal,
    BlurVertical,
    Velocity,
    Position,
}

impl Stage {
    /// All stages in the order a tick runs them.
    pub const ALL: [Stage; 5] = [
        Stage::DensitySplat,
        Stage::BlurHorizontal,
        Stage::BlurVertical,
        Stage::Velocity,
        Stage::Position,
    ];

    /// Human-readable name used in labels and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::DensitySplat => "density splat",
            Stage::BlurHorizontal => "density blur (horizontal)",
            Stage::BlurVertical => "density blur (vertical)",
            Stage::Velocity => "velocity",
            Stage::Position => "position",
        }
    }
}

/// Axis of a separable blur pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    /// The stage that runs a blur along this axis.
    pub fn stage(&self) -> Stage {
        match self {
            BlurAxis::Horizontal => Stage::BlurHorizontal,
            BlurAxis::Vertical => Stage::BlurVertical,
        }
    }
}

/// An SDF volume as bound to a substrate.
///
/// Returned by [`ComputeSubstrate::upload_volume`]. The handle stays owned by
/// whoever uploaded it; engines only copy the binding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeBinding {
    pub id: VolumeId,
    /// World to unit-cube transform of the volume's bounding box.
    pub unit_transform: Mat4,
    /// Samples per axis.
    pub resolution: u32,
    /// World-space spacing between samples per axis.
    pub voxel_size: Vec3,
    /// Clamp distance of the stored values.
    pub max_distance: f32,
}

impl VolumeBinding {
    /// Binding metadata for `volume` under the given handle.
    pub fn describe(id: VolumeId, volume: &SdfVolume) -> Self {
        Self {
            id,
            unit_transform: volume.unit_transform(),
            resolution: volume.resolution(),
            voxel_size: volume.voxel_size(),
            max_distance: volume.max_distance(),
        }
    }
}

/// One dispatch with its typed bindings.
///
/// Every variant names distinct source and target grids; a substrate rejects
/// a pass that would read and write the same grid.
#[derive(Clone, Copy, Debug)]
pub enum Pass<'a> {
    /// Clear `target`, then add a Gaussian footprint per particle.
    Splat {
        positions: GridId,
        target: GridId,
        particle_count: u32,
        frame: &'a FrameUniforms,
        config: &'a DensityConfig,
    },
    /// One direction of the separable blur.
    Blur {
        axis: BlurAxis,
        source: GridId,
        target: GridId,
        config: &'a DensityConfig,
    },
    /// Forces, repulsion and collision: writes the next velocity grid.
    Velocity {
        positions: GridId,
        velocities: GridId,
        target: GridId,
        density: Option<GridId>,
        volume: Option<&'a VolumeBinding>,
        particle_count: u32,
        frame: &'a FrameUniforms,
        params: &'a SimulationParams,
        time: StepTime,
    },
    /// Integration and recycling: writes the next position grid.
    Position {
        positions: GridId,
        velocities: GridId,
        target: GridId,
        particle_count: u32,
        frame: &'a FrameUniforms,
        params: &'a PositionParams,
        time: StepTime,
    },
}

impl Pass<'_> {
    /// The stage this pass belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Pass::Splat { .. } => Stage::DensitySplat,
            Pass::Blur { axis, .. } => axis.stage(),
            Pass::Velocity { .. } => Stage::Velocity,
            Pass::Position { .. } => Stage::Position,
        }
    }

    /// The grid this pass writes.
    pub fn target(&self) -> GridId {
        match self {
            Pass::Splat { target, .. }
            | Pass::Blur { target, .. }
            | Pass::Velocity { target, .. }
            | Pass::Position { target, .. } => *target,
        }
    }

    /// Every grid this pass reads.
    pub fn sources(&self) -> Vec<GridId> {
        match self {
            Pass::Splat { positions, .. } => vec![*positions],
            Pass::Blur { source, .. } => vec![*source],
            Pass::Velocity {
                positions,
                velocities,
                density,
                ..
            } => {
                let mut sources = vec![*positions, *velocities];
                sources.extend(density.iter().copied());
                sources
            }
            Pass::Position {
                positions,
                velocities,
                ..
            } => vec![*positions, *velocities],
        }
    }

    /// Reject passes that read their own target.
    pub fn check_aliasing(&self) -> Result<(), SubstrateError> {
        let target = self.target();
        if self.sources().contains(&target) {
            return Err(SubstrateError::Aliased(target));
        }
        Ok(())
    }
}

/// Abstract GPU-like compute capability.
///
/// Grids hold `f32` data, row-major, channels interleaved.
pub trait ComputeSubstrate {
    /// Allocate a zero-filled grid.
    fn create_grid(&mut self, desc: &GridDescriptor<'_>) -> Result<GridId, SubstrateError>;

    /// Replace a grid's contents.
    fn write_grid(&mut self, grid: GridId, data: &[f32]) -> Result<(), SubstrateError>;

    /// Copy a grid's contents back.
    fn read_grid(&self, grid: GridId) -> Result<Vec<f32>, SubstrateError>;

    /// Release a grid.
    fn release_grid(&mut self, grid: GridId) -> Result<(), DisposalError>;

    /// Upload an SDF volume for sampling by velocity passes.
    fn upload_volume(&mut self, volume: &SdfVolume) -> Result<VolumeBinding, SubstrateError>;

    /// Release an uploaded volume.
    fn release_volume(&mut self, volume: VolumeId) -> Result<(), DisposalError>;

    /// Build the program for `stage`, or `None` if it is unavailable.
    fn compile(&mut self, stage: Stage) -> Option<ProgramId>;

    /// Release a compiled program.
    fn release_program(&mut self, program: ProgramId) -> Result<(), DisposalError>;

    /// Run one pass with a program compiled for its stage.
    fn dispatch(&mut self, program: ProgramId, pass: &Pass<'_>) -> Result<(), SubstrateError>;
}

/// Release grids allocated by a constructor that is failing.
///
/// Release failures are logged; the caller is already returning the
/// allocation error.
pub(crate) fn roll_back<S: ComputeSubstrate + ?Sized>(substrate: &mut S, grids: &[GridId]) {
    for &grid in grids {
        if let Err(e) = substrate.release_grid(grid) {
            warn!("Rollback after failed allocation: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uniforms::PositionParams;
    use glam::Vec2;

    fn frame() -> FrameUniforms {
        FrameUniforms {
            offset: Vec3::ZERO,
            basis_x: Vec3::X,
            basis_y: Vec3::Y,
            basis_z: Vec3::Z,
            extent: Vec2::ONE,
            spawn_scale: 1.0,
        }
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::ALL[0], Stage::DensitySplat);
        assert_eq!(Stage::ALL[4], Stage::Position);
        assert_eq!(BlurAxis::Vertical.stage(), Stage::BlurVertical);
    }

    #[test]
    fn test_grid_descriptor_float_count() {
        let desc = GridDescriptor {
            label: "positions",
            width: 8,
            height: 8,
            format: GridFormat::Rgba32Float,
        };
        assert_eq!(desc.float_count(), 256);
    }

    #[test]
    fn test_aliased_pass_rejected() {
        let frame = frame();
        let params = PositionParams::default();
        let pass = Pass::Position {
            positions: GridId(1),
            velocities: GridId(2),
            target: GridId(1),
            particle_count: 4,
            frame: &frame,
            params: &params,
            time: StepTime::default(),
        };
        assert!(matches!(pass.check_aliasing(), Err(SubstrateError::Aliased(GridId(1)))));

        let pass = Pass::Position {
            positions: GridId(1),
            velocities: GridId(2),
            target: GridId(3),
            particle_count: 4,
            frame: &frame,
            params: &params,
            time: StepTime::default(),
        };
        assert!(pass.check_aliasing().is_ok());
    }
}

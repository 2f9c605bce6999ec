//! # Plume - surface smoke with density feedback
//!
//! GPU particle smoke rising from an arbitrary planar surface. Particles push
//! away from crowded regions through a blurred density field, and can collide
//! with the surrounding geometry through a baked signed-distance volume.
//!
//! ## Quick Start
//!
//! ```ignore
//! use plume::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut substrate = WgpuSubstrate::request_blocking()?;
//!
//!     // Bake the room once; many engines can share the volume.
//!     let room = Scene::new().with_mesh(Mesh::cube(Vec3::new(0.0, 1.0, 0.0), 0.5));
//!     let sdf = pollster::block_on(SdfVolumeGenerator::new().generate(&room, &SdfOptions::new(48), |_| {}))?;
//!     let binding = substrate.upload_volume(&sdf)?;
//!
//!     let config = EngineConfig::new(128).with_density(DensityConfig::new(128));
//!     let mut engine = SmokeEngine::new(&mut substrate, &Mesh::quad(2.0, 2.0), config, Some(binding))?;
//!
//!     for frame in 1..=600 {
//!         engine.step(&mut substrate, frame as f32 / 60.0, 1.0 / 60.0)?;
//!     }
//!
//!     engine.dispose(&mut substrate)?;
//!     substrate.release_volume(binding.id)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Plane frame
//!
//! [`PlaneFrame::from_mesh`] derives an orthonormal basis and extents from the
//! emitting mesh. `basis_y` is the surface normal and the rise direction.
//!
//! ### Substrate
//!
//! The engine runs its passes through a [`ComputeSubstrate`]:
//! [`WgpuSubstrate`] for WGSL compute pipelines, [`CpuSubstrate`] for the
//! reference kernels. Both see the same grids, programs and passes.
//!
//! ### Tick
//!
//! | Stage | Reads | Writes |
//! |-------|-------|--------|
//! | Splat | current positions | density |
//! | Blur H | density | scratch |
//! | Blur V | scratch | density |
//! | Velocity | current positions, velocities, density, SDF | next velocities |
//! | Position | current positions, next velocities | next positions |
//!
//! After the position stage the buffer roles swap.
//!
//! ### SDF volumes
//!
//! [`SdfVolumeGenerator::generate`] bakes a scene into an `n^3` signed
//! distance grid, slice by slice, with progress reports and cancellation.

pub mod cpu;
pub mod density;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod lifecycle;
pub mod mesh;
pub mod plane;
pub mod sdf;
pub mod spawn;
pub mod substrate;
pub mod uniforms;

pub use bytemuck;
pub use glam::{Mat4, Vec2, Vec3, Vec4};

pub use cpu::CpuSubstrate;
pub use density::{DensityConfig, DensityField};
pub use engine::{EngineConfig, ParticleBuffers, PingPong, SmokeEngine};
pub use error::{
    ConfigurationError, DisposalError, EngineError, GpuError, ResourceUnavailable, SdfError, SubstrateError,
};
pub use gpu::WgpuSubstrate;
pub use lifecycle::{EngineRegistry, InstanceId};
pub use mesh::{Aabb, Mesh, Scene, Triangle};
pub use plane::PlaneFrame;
pub use sdf::{CancelToken, SdfJob, SdfOptions, SdfVolume, SdfVolumeGenerator};
pub use substrate::{
    BlurAxis, ComputeSubstrate, GridDescriptor, GridFormat, GridId, Pass, ProgramId, Stage, VolumeBinding, VolumeId,
};
pub use uniforms::{FrameUniforms, PositionParams, RenderParams, SimulationParams, StepTime, UniformUpdate};

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::cpu::CpuSubstrate;
    pub use crate::density::DensityConfig;
    pub use crate::engine::{EngineConfig, SmokeEngine};
    pub use crate::error::{EngineError, SdfError};
    pub use crate::gpu::WgpuSubstrate;
    pub use crate::lifecycle::{EngineRegistry, InstanceId};
    pub use crate::mesh::{Mesh, Scene};
    pub use crate::plane::PlaneFrame;
    pub use crate::sdf::{SdfOptions, SdfVolume, SdfVolumeGenerator};
    pub use crate::substrate::{ComputeSubstrate, Stage, VolumeBinding};
    pub use crate::uniforms::{PositionParams, RenderParams, SimulationParams, UniformUpdate};
    pub use crate::{Vec2, Vec3, Vec4};
}

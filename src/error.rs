//! Error types for Plume.
//!
//! Construction problems, substrate failures, teardown failures and SDF
//! generation outcomes each get their own enum so callers can tell a fatal
//! configuration mistake apart from a cancelled bake.

use thiserror::Error;

use crate::substrate::{GridId, ProgramId, Stage, VolumeId};

/// Missing or invalid input supplied when building an engine.
///
/// Always fatal and always raised synchronously by the constructor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigurationError {
    /// The plane mesh has no vertices at all.
    #[error("plane mesh has no geometry")]
    NoGeometry,
    /// The plane mesh has fewer than the two vertices needed for an axis.
    #[error("plane mesh needs at least 2 vertices, got {0}")]
    TooFewVertices(usize),
    /// The plane mesh does not span a plane (coincident or collinear points).
    #[error("plane mesh is degenerate: {0}")]
    DegeneratePlane(&'static str),
    /// Particle grid width of zero.
    #[error("particle grid width must be at least 1")]
    ZeroGridWidth,
    /// Spawn scale outside `(0, 1]`.
    #[error("spawn scale must be in (0, 1], got {0}")]
    SpawnScale(f32),
    /// Density resolution of zero.
    #[error("density resolution must be at least 1")]
    ZeroDensityResolution,
}

/// A compute program could not be provided for a stage.
///
/// Never returned from a call: the engine logs it and runs the stage as a
/// no-op, so the simulation keeps ticking with visibly wrong output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("compute program for stage '{}' is unavailable; stage disabled", .stage.label())]
pub struct ResourceUnavailable {
    /// The stage that was degraded.
    pub stage: Stage,
}

/// Errors raised by a [`ComputeSubstrate`](crate::substrate::ComputeSubstrate).
#[derive(Debug, Error)]
pub enum SubstrateError {
    /// The grid handle is not live.
    #[error("grid {0:?} is not allocated")]
    UnknownGrid(GridId),
    /// The volume handle is not live.
    #[error("volume {0:?} is not allocated")]
    UnknownVolume(VolumeId),
    /// The program handle is not live.
    #[error("program {0:?} is not compiled")]
    UnknownProgram(ProgramId),
    /// Uploaded data does not match the grid's texel count.
    #[error("grid data size mismatch: expected {expected} floats, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// A pass was dispatched with a program compiled for another stage.
    #[error("program compiled for '{}' cannot run a '{}' pass", .program.label(), .pass.label())]
    StageMismatch { program: Stage, pass: Stage },
    /// A pass would read and write the same grid.
    #[error("pass reads and writes grid {0:?} in the same dispatch")]
    Aliased(GridId),
    /// Grid dimensions of zero.
    #[error("grid '{0}' has zero size")]
    EmptyGrid(String),
    /// The backend has no room for another grid.
    #[error("out of grid storage allocating '{0}'")]
    OutOfMemory(String),
    /// Backend failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Errors that can occur during GPU initialization or readback.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found; ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    #[error("failed to map GPU buffer: {0}")]
    BufferMapping(String),
}

/// A resource could not be released.
///
/// Disposal failures are isolated: whoever tears down several resources keeps
/// going and reports the failures afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisposalError {
    /// Grid was already released or never allocated.
    #[error("grid {0:?} is not live")]
    Grid(GridId),
    /// Volume was already released or never allocated.
    #[error("volume {0:?} is not live")]
    Volume(VolumeId),
    /// Program was already released or never compiled.
    #[error("program {0:?} is not live")]
    Program(ProgramId),
}

/// Errors returned by a running engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has been disposed and can no longer be stepped.
    #[error("engine has been disposed")]
    Disposed,
    /// Invalid construction input.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// The substrate failed while allocating or running a pass.
    #[error(transparent)]
    Substrate(#[from] SubstrateError),
}

/// Outcomes of SDF volume generation other than success.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SdfError {
    /// `cancel()` was observed at a slice boundary.
    #[error("SDF generation was cancelled")]
    Cancelled,
    /// The scene contains no triangles.
    #[error("scene contains no triangles")]
    EmptyScene,
    /// Grid resolution below 2 samples per axis.
    #[error("SDF resolution must be at least 2, got {0}")]
    Resolution(u32),
    /// Padding is negative or not finite.
    #[error("SDF padding must be finite and non-negative, got {0}")]
    Padding(f32),
    /// Clamp distance is not positive and finite.
    #[error("SDF max distance must be finite and positive, got {0}")]
    MaxDistance(f32),
    /// A job was finished before every slice was computed.
    #[error("SDF job finished after {done} of {total} slices")]
    Incomplete { done: u32, total: u32 },
}

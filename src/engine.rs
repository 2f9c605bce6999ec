//! The smoke simulation engine.
//!
//! A [`SmokeEngine`] owns the double-buffered particle state of one emitting
//! surface and drives the compute stages of a tick through a
//! [`ComputeSubstrate`]:
//!
//! ```text
//! splat -> blur (H) -> blur (V) -> velocity -> position -> swap
//! ```
//!
//! The density stages only run when a [`DensityConfig`] is attached. A stage
//! whose program the substrate cannot provide is skipped with a warning, so the
//! effect keeps running with visibly wrong output instead of failing.
//!
//! # Example
//!
//! ```ignore
//! use plume::prelude::*;
//!
//! let mut substrate = CpuSubstrate::new();
//! let config = EngineConfig::new(32).with_density(DensityConfig::new(64));
//! let mut engine = SmokeEngine::new(&mut substrate, &Mesh::quad(2.0, 2.0), config, None)?;
//!
//! engine.step(&mut substrate, 0.016, 0.016)?;
//! let positions = engine.positions(&substrate)?;
//!
//! engine.dispose(&mut substrate)?;
//! ```

use std::collections::HashMap;
use std::mem;

use glam::{Vec3, Vec4};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::density::{DensityConfig, DensityField};
use crate::error::{ConfigurationError, DisposalError, EngineError, ResourceUnavailable, SubstrateError};
use crate::mesh::Mesh;
use crate::plane::PlaneFrame;
use crate::spawn::seed_particles;
use crate::substrate::{roll_back, ComputeSubstrate, GridDescriptor, GridFormat, GridId, Pass, ProgramId, Stage, VolumeBinding};
use crate::uniforms::{FrameUniforms, PositionParams, RenderParams, SimulationParams, StepTime, UniformUpdate};

// ========== Configuration ==========

/// Construction options of a [`SmokeEngine`].
///
/// # Example
///
/// ```ignore
/// let config = EngineConfig::new(64)
///     .with_spawn_scale(0.8)
///     .with_density(DensityConfig::new(128).with_intensity(0.01))
///     .with_seed(7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Width of the square particle grid; the particle count is its square.
    pub grid_width: u32,
    /// Fraction of the plane used for spawning, in `(0, 1]`.
    pub spawn_scale: f32,
    /// Density feedback field, if any.
    pub density: Option<DensityConfig>,
    /// Seed of the initial particle distribution. `None` draws from entropy.
    pub seed: Option<u64>,
    pub simulation: SimulationParams,
    pub position: PositionParams,
    pub render: RenderParams,
}

impl EngineConfig {
    pub fn new(grid_width: u32) -> Self {
        Self {
            grid_width,
            spawn_scale: 1.0,
            density: None,
            seed: None,
            simulation: SimulationParams::default(),
            position: PositionParams::default(),
            render: RenderParams::default(),
        }
    }

    pub fn with_spawn_scale(mut self, spawn_scale: f32) -> Self {
        self.spawn_scale = spawn_scale;
        self
    }

    pub fn with_density(mut self, density: DensityConfig) -> Self {
        self.density = Some(density);
        self
    }

    pub fn without_density(mut self) -> Self {
        self.density = None;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_simulation(mut self, params: SimulationParams) -> Self {
        self.simulation = params;
        self
    }

    pub fn with_position(mut self, params: PositionParams) -> Self {
        self.position = params;
        self
    }

    pub fn with_render(mut self, params: RenderParams) -> Self {
        self.render = params;
        self
    }

    /// Number of particles this configuration simulates.
    pub fn particle_count(&self) -> u32 {
        self.grid_width.saturating_mul(self.grid_width)
    }

    /// Check the values the constructor depends on.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.grid_width == 0 {
            return Err(ConfigurationError::ZeroGridWidth);
        }
        if !(self.spawn_scale > 0.0 && self.spawn_scale <= 1.0) {
            return Err(ConfigurationError::SpawnScale(self.spawn_scale));
        }
        if matches!(self.density, Some(d) if d.resolution == 0) {
            return Err(ConfigurationError::ZeroDensityResolution);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(64)
    }
}

// ========== Double buffering ==========

/// Two values in the roles "current" and "next".
///
/// A tick reads `current` and writes `next`; [`swap`](Self::swap) then
/// exchanges the roles in one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingPong<T> {
    current: T,
    next: T,
}

impl<T> PingPong<T> {
    pub fn new(current: T, next: T) -> Self {
        Self { current, next }
    }

    pub fn current(&self) -> &T {
        &self.current
    }

    pub fn next(&self) -> &T {
        &self.next
    }

    pub fn swap(&mut self) {
        mem::swap(&mut self.current, &mut self.next);
    }

    /// Both values, current first.
    pub fn both(&self) -> [&T; 2] {
        [&self.current, &self.next]
    }
}

/// Matching position and velocity grids of one buffer role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParticleBuffers {
    /// `xyz` position, `w` freshness.
    pub positions: GridId,
    /// `xyz` velocity, `w` age.
    pub velocities: GridId,
}

// ========== Engine ==========

/// Double-buffered surface smoke simulation.
///
/// The engine holds handles only; every call that touches resources takes the
/// substrate that allocated them.
#[derive(Debug)]
pub struct SmokeEngine {
    plane: PlaneFrame,
    frame: FrameUniforms,
    grid_width: u32,
    particles: PingPong<ParticleBuffers>,
    density: Option<DensityField>,
    volume: Option<VolumeBinding>,
    programs: HashMap<Stage, ProgramId>,
    degraded: Vec<Stage>,
    simulation: SimulationParams,
    position: PositionParams,
    render: RenderParams,
    tick: u32,
    running: bool,
    disposed: bool,
}

impl SmokeEngine {
    /// Build an engine on the plane described by `mesh`.
    ///
    /// The plane frame is baked from `mesh` once. `volume` is an SDF binding
    /// uploaded by the caller; the engine reads it but never releases it.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] for invalid options or a mesh without a
    /// plane, [`EngineError::Substrate`] if grid allocation fails. Grids
    /// allocated before the failure are released again.
    pub fn new<S: ComputeSubstrate + ?Sized>(
        substrate: &mut S,
        mesh: &Mesh,
        config: EngineConfig,
        volume: Option<VolumeBinding>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let plane = PlaneFrame::from_mesh(mesh)?;
        let frame = FrameUniforms::new(&plane, config.spawn_scale);

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (positions, velocities) = seed_particles(&frame, config.particle_count() as usize, &mut rng);

        let particles = allocate_particles(substrate, config.grid_width, &positions, &velocities)?;
        let density = match config.density {
            Some(density) => match DensityField::allocate(substrate, density) {
                Ok(field) => Some(field),
                Err(e) => {
                    let grids: Vec<GridId> = particles
                        .both()
                        .iter()
                        .flat_map(|b| [b.positions, b.velocities])
                        .collect();
                    roll_back(substrate, &grids);
                    return Err(e.into());
                }
            },
            None => None,
        };

        let mut programs = HashMap::new();
        let mut degraded = Vec::new();
        for stage in Stage::ALL {
            let needs_density = matches!(
                stage,
                Stage::DensitySplat | Stage::BlurHorizontal | Stage::BlurVertical
            );
            if needs_density && density.is_none() {
                continue;
            }
            match substrate.compile(stage) {
                Some(program) => {
                    programs.insert(stage, program);
                }
                None => {
                    warn!("{}", ResourceUnavailable { stage });
                    degraded.push(stage);
                }
            }
        }

        debug!(
            "Smoke engine created: {} particles, density {:?}, volume {}",
            config.particle_count(),
            config.density.map(|d| d.resolution),
            volume.is_some()
        );

        Ok(Self {
            plane,
            frame,
            grid_width: config.grid_width,
            particles,
            density,
            volume,
            programs,
            degraded,
            simulation: config.simulation,
            position: config.position,
            render: config.render,
            tick: 0,
            running: false,
            disposed: false,
        })
    }

    /// Advance the simulation by one tick.
    ///
    /// Runs regardless of [`is_running`](Self::is_running); the run flag is
    /// bookkeeping for the host.
    ///
    /// # Errors
    ///
    /// [`EngineError::Disposed`] after [`dispose`](Self::dispose). A substrate
    /// failure leaves the instance in an undefined state.
    pub fn step<S: ComputeSubstrate + ?Sized>(
        &mut self,
        substrate: &mut S,
        elapsed: f32,
        delta: f32,
    ) -> Result<(), EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }

        let time = StepTime {
            elapsed,
            delta,
            tick: self.tick,
        };
        let current = *self.particles.current();
        let next = *self.particles.next();
        let count = self.particle_count();

        if let Some(density) = &self.density {
            self.run_stage(substrate, &density.splat_pass(current.positions, count, &self.frame))?;
            for pass in density.blur_passes() {
                self.run_stage(substrate, &pass)?;
            }
        }

        self.run_stage(
            substrate,
            &Pass::Velocity {
                positions: current.positions,
                velocities: current.velocities,
                target: next.velocities,
                density: self.density.map(|d| d.grid()),
                volume: self.volume.as_ref(),
                particle_count: count,
                frame: &self.frame,
                params: &self.simulation,
                time,
            },
        )?;

        // Position integration reads the velocity written above.
        self.run_stage(
            substrate,
            &Pass::Position {
                positions: current.positions,
                velocities: next.velocities,
                target: next.positions,
                particle_count: count,
                frame: &self.frame,
                params: &self.position,
                time,
            },
        )?;

        self.particles.swap();
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    fn run_stage<S: ComputeSubstrate + ?Sized>(&self, substrate: &mut S, pass: &Pass<'_>) -> Result<(), SubstrateError> {
        match self.programs.get(&pass.stage()) {
            Some(&program) => substrate.dispatch(program, pass),
            None => Ok(()),
        }
    }

    /// Mark the effect as running.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Mark the effect as stopped.
    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Route every supplied value to the stage parameter sets that declare it.
    pub fn update_uniforms(&mut self, update: &UniformUpdate) {
        update.apply_velocity(&mut self.simulation);
        update.apply_position(&mut self.position);
        update.apply_render(&mut self.render);
    }

    /// Move the plane origin seen by both compute stages.
    pub fn set_plane_offset(&mut self, offset: Vec3) {
        self.frame.offset = offset;
    }

    /// Release every grid and program this engine allocated.
    ///
    /// Idempotent: later calls return `Ok(())` and release nothing. Every
    /// resource is attempted even if an earlier release fails; the first
    /// failure is returned. A bound SDF volume is left to its owner.
    pub fn dispose<S: ComputeSubstrate + ?Sized>(&mut self, substrate: &mut S) -> Result<(), DisposalError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.running = false;

        let mut failures = Vec::new();
        for buffers in self.particles.both() {
            for grid in [buffers.positions, buffers.velocities] {
                if let Err(e) = substrate.release_grid(grid) {
                    failures.push(e);
                }
            }
        }
        if let Some(density) = &self.density {
            failures.extend(density.release(substrate));
        }
        for (_, program) in self.programs.drain() {
            if let Err(e) = substrate.release_program(program) {
                failures.push(e);
            }
        }

        for failure in &failures {
            warn!("Engine disposal: {}", failure);
        }
        debug!("Smoke engine disposed");

        match failures.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ========== Read access ==========

    /// Copy of the current positions (`xyz` + freshness).
    pub fn positions<S: ComputeSubstrate + ?Sized>(&self, substrate: &S) -> Result<Vec<Vec4>, EngineError> {
        self.read_texels(substrate, self.particles.current().positions)
    }

    /// Copy of the current velocities (`xyz` + age).
    pub fn velocities<S: ComputeSubstrate + ?Sized>(&self, substrate: &S) -> Result<Vec<Vec4>, EngineError> {
        self.read_texels(substrate, self.particles.current().velocities)
    }

    /// Copy of the blurred density grid, row-major, if a field is attached.
    pub fn density<S: ComputeSubstrate + ?Sized>(&self, substrate: &S) -> Result<Option<Vec<f32>>, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        match &self.density {
            Some(field) => Ok(Some(substrate.read_grid(field.grid())?)),
            None => Ok(None),
        }
    }

    fn read_texels<S: ComputeSubstrate + ?Sized>(&self, substrate: &S, grid: GridId) -> Result<Vec<Vec4>, EngineError> {
        if self.disposed {
            return Err(EngineError::Disposed);
        }
        let data = substrate.read_grid(grid)?;
        Ok(data.chunks_exact(4).map(Vec4::from_slice).collect())
    }

    /// Grids the renderer should draw this frame.
    pub fn current_grids(&self) -> ParticleBuffers {
        *self.particles.current()
    }

    /// The blurred density grid, if a field is attached.
    pub fn density_grid(&self) -> Option<GridId> {
        self.density.map(|d| d.grid())
    }

    pub fn particle_count(&self) -> u32 {
        self.grid_width * self.grid_width
    }

    pub fn grid_width(&self) -> u32 {
        self.grid_width
    }

    pub fn plane(&self) -> &PlaneFrame {
        &self.plane
    }

    /// Frame uniforms shared by both compute stages.
    pub fn frame(&self) -> &FrameUniforms {
        &self.frame
    }

    pub fn simulation_params(&self) -> &SimulationParams {
        &self.simulation
    }

    pub fn position_params(&self) -> &PositionParams {
        &self.position
    }

    pub fn render_params(&self) -> &RenderParams {
        &self.render
    }

    pub fn volume(&self) -> Option<&VolumeBinding> {
        self.volume.as_ref()
    }

    /// Ticks run so far.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Stages running as no-ops because their program was unavailable.
    pub fn degraded_stages(&self) -> &[Stage] {
        &self.degraded
    }
}

/// Allocate both buffer roles and upload the seed into each.
fn allocate_particles<S: ComputeSubstrate + ?Sized>(
    substrate: &mut S,
    width: u32,
    positions: &[Vec4],
    velocities: &[Vec4],
) -> Result<PingPong<ParticleBuffers>, SubstrateError> {
    let positions: Vec<f32> = positions.iter().flat_map(|p| p.to_array()).collect();
    let velocities: Vec<f32> = velocities.iter().flat_map(|v| v.to_array()).collect();
    let labels = ["positions a", "velocities a", "positions b", "velocities b"];

    let mut grids = Vec::with_capacity(labels.len());
    for (i, label) in labels.into_iter().enumerate() {
        let seed = if i % 2 == 0 { &positions } else { &velocities };
        let result = substrate
            .create_grid(&GridDescriptor {
                label,
                width,
                height: width,
                format: GridFormat::Rgba32Float,
            })
            .and_then(|grid| {
                grids.push(grid);
                substrate.write_grid(grid, seed)
            });

        if let Err(e) = result {
            roll_back(substrate, &grids);
            return Err(e);
        }
    }

    Ok(PingPong::new(
        ParticleBuffers {
            positions: grids[0],
            velocities: grids[1],
        },
        ParticleBuffers {
            positions: grids[2],
            velocities: grids[3],
        },
    ))
}

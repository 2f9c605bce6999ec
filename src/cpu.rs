//! CPU reference substrate.
//!
//! Runs every stage kernel on the host against `Vec<f32>` grids. It is the
//! executable definition of what the WGSL passes compute, and lets engines
//! run headless and in tests without an adapter.
//!
//! Test hooks make degraded setups reproducible:
//! - [`CpuSubstrate::withhold`] makes `compile` return `None` for a stage.
//! - [`CpuSubstrate::limit_grids`] makes `create_grid` fail past a live count.
//! - live resource counts expose leaks and double releases.

use std::collections::{HashMap, HashSet};

use glam::{Vec3, Vec4, Vec4Swizzles};

use crate::density::{blur_into, gradient, sample_bilinear, splat_into};
use crate::error::{DisposalError, SubstrateError};
use crate::sdf::SdfVolume;
use crate::spawn::{hash_to_unit, pcg_hash, random_lanes, SpawnRegion};
use crate::substrate::{
    ComputeSubstrate, GridDescriptor, GridFormat, GridId, Pass, ProgramId, Stage, VolumeBinding, VolumeId,
};
use crate::uniforms::{FrameUniforms, PositionParams, SimulationParams, StepTime};

/// Lane offset of the respawn velocity draws.
pub const VELOCITY_LANES: u32 = 4;

/// Lane offset of the respawn position draws.
pub const POSITION_LANES: u32 = 0;

#[derive(Debug)]
struct CpuGrid {
    width: u32,
    height: u32,
    format: GridFormat,
    data: Vec<f32>,
}

/// Host-side [`ComputeSubstrate`].
#[derive(Debug, Default)]
pub struct CpuSubstrate {
    grids: HashMap<GridId, CpuGrid>,
    volumes: HashMap<VolumeId, SdfVolume>,
    programs: HashMap<ProgramId, Stage>,
    withheld: HashSet<Stage>,
    grid_limit: Option<usize>,
    dispatches: HashMap<Stage, u64>,
    next_id: u32,
}

impl CpuSubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Substrate whose `compile` fails for `stage` (builder style).
    pub fn without_program(mut self, stage: Stage) -> Self {
        self.withhold(stage);
        self
    }

    /// Make `compile` return `None` for `stage` from now on.
    pub fn withhold(&mut self, stage: Stage) {
        self.withheld.insert(stage);
    }

    /// Make `create_grid` fail once `max` grids are live.
    pub fn limit_grids(&mut self, max: usize) {
        self.grid_limit = Some(max);
    }

    pub fn with_grid_limit(mut self, max: usize) -> Self {
        self.limit_grids(max);
        self
    }

    pub fn live_grids(&self) -> usize {
        self.grids.len()
    }

    pub fn live_volumes(&self) -> usize {
        self.volumes.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Number of passes run for `stage` so far.
    pub fn dispatch_count(&self, stage: Stage) -> u64 {
        self.dispatches.get(&stage).copied().unwrap_or(0)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn grid(&self, id: GridId) -> Result<&CpuGrid, SubstrateError> {
        self.grids.get(&id).ok_or(SubstrateError::UnknownGrid(id))
    }

    fn grid_mut(&mut self, id: GridId) -> Result<&mut CpuGrid, SubstrateError> {
        self.grids.get_mut(&id).ok_or(SubstrateError::UnknownGrid(id))
    }

    fn texels(&self, id: GridId) -> Result<Vec<Vec4>, SubstrateError> {
        Ok(self.grid(id)?.data.chunks_exact(4).map(Vec4::from_slice).collect())
    }

    fn store_texels(&mut self, id: GridId, texels: &[Vec4]) -> Result<(), SubstrateError> {
        let grid = self.grid_mut(id)?;
        for (dst, t) in grid.data.chunks_exact_mut(4).zip(texels) {
            dst.copy_from_slice(&t.to_array());
        }
        Ok(())
    }

    fn run(&mut self, pass: &Pass<'_>) -> Result<(), SubstrateError> {
        match *pass {
            Pass::Splat {
                positions,
                target,
                particle_count,
                frame,
                config,
            } => {
                let coords: Vec<_> = self
                    .texels(positions)?
                    .into_iter()
                    .take(particle_count as usize)
                    .map(|p| frame.project_normalized(p.xyz()))
                    .collect();
                let grid = self.grid_mut(target)?;
                check_len(grid, config.total_texels())?;
                splat_into(&mut grid.data, config, coords);
            }
            Pass::Blur {
                axis,
                source,
                target,
                config,
            } => {
                let source = self.grid(source)?.data.clone();
                if source.len() != config.total_texels() {
                    return Err(SubstrateError::SizeMismatch {
                        expected: config.total_texels(),
                        actual: source.len(),
                    });
                }
                let grid = self.grid_mut(target)?;
                check_len(grid, config.total_texels())?;
                blur_into(&source, &mut grid.data, config, axis);
            }
            Pass::Velocity {
                positions,
                velocities,
                target,
                density,
                volume,
                particle_count,
                frame,
                params,
                time,
            } => {
                let positions = self.texels(positions)?;
                let mut next = self.texels(velocities)?;
                let density = match density {
                    Some(id) => {
                        let grid = self.grid(id)?;
                        Some((grid.data.as_slice(), grid.width))
                    }
                    None => None,
                };
                let volume = match volume {
                    Some(binding) => Some((
                        binding,
                        self.volumes
                            .get(&binding.id)
                            .ok_or(SubstrateError::UnknownVolume(binding.id))?,
                    )),
                    None => None,
                };
                let inputs = VelocityInputs {
                    frame,
                    params,
                    time,
                    density,
                    volume,
                };

                let count = (particle_count as usize).min(positions.len());
                for (i, (p, v)) in positions.iter().zip(next.iter_mut()).take(count).enumerate() {
                    *v = integrate_velocity(i as u32, *p, *v, &inputs);
                }
                self.store_texels(target, &next)?;
            }
            Pass::Position {
                positions,
                velocities,
                target,
                particle_count,
                frame,
                params,
                time,
            } => {
                let mut next = self.texels(positions)?;
                let velocities = self.texels(velocities)?;
                let count = (particle_count as usize).min(next.len());
                for (i, (p, v)) in next.iter_mut().zip(&velocities).take(count).enumerate() {
                    *p = integrate_position(i as u32, *p, *v, frame, params, time);
                }
                self.store_texels(target, &next)?;
            }
        }
        Ok(())
    }
}

fn check_len(grid: &CpuGrid, expected: usize) -> Result<(), SubstrateError> {
    if grid.data.len() != expected {
        return Err(SubstrateError::SizeMismatch {
            expected,
            actual: grid.data.len(),
        });
    }
    Ok(())
}

impl ComputeSubstrate for CpuSubstrate {
    fn create_grid(&mut self, desc: &GridDescriptor<'_>) -> Result<GridId, SubstrateError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(SubstrateError::EmptyGrid(desc.label.to_string()));
        }
        if self.grid_limit.is_some_and(|max| self.grids.len() >= max) {
            return Err(SubstrateError::OutOfMemory(desc.label.to_string()));
        }
        let id = GridId(self.next_id());
        self.grids.insert(
            id,
            CpuGrid {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                data: vec![0.0; desc.float_count()],
            },
        );
        Ok(id)
    }

    fn write_grid(&mut self, grid: GridId, data: &[f32]) -> Result<(), SubstrateError> {
        let grid = self.grid_mut(grid)?;
        if grid.data.len() != data.len() {
            return Err(SubstrateError::SizeMismatch {
                expected: grid.data.len(),
                actual: data.len(),
            });
        }
        grid.data.copy_from_slice(data);
        Ok(())
    }

    fn read_grid(&self, grid: GridId) -> Result<Vec<f32>, SubstrateError> {
        let grid = self.grid(grid)?;
        debug_assert_eq!(
            grid.data.len(),
            grid.width as usize * grid.height as usize * grid.format.channels()
        );
        Ok(grid.data.clone())
    }

    fn release_grid(&mut self, grid: GridId) -> Result<(), DisposalError> {
        self.grids.remove(&grid).map(|_| ()).ok_or(DisposalError::Grid(grid))
    }

    fn upload_volume(&mut self, volume: &SdfVolume) -> Result<VolumeBinding, SubstrateError> {
        let id = VolumeId(self.next_id());
        self.volumes.insert(id, volume.clone());
        Ok(VolumeBinding::describe(id, volume))
    }

    fn release_volume(&mut self, volume: VolumeId) -> Result<(), DisposalError> {
        self.volumes
            .remove(&volume)
            .map(|_| ())
            .ok_or(DisposalError::Volume(volume))
    }

    fn compile(&mut self, stage: Stage) -> Option<ProgramId> {
        if self.withheld.contains(&stage) {
            return None;
        }
        let id = ProgramId(self.next_id());
        self.programs.insert(id, stage);
        Some(id)
    }

    fn release_program(&mut self, program: ProgramId) -> Result<(), DisposalError> {
        self.programs
            .remove(&program)
            .map(|_| ())
            .ok_or(DisposalError::Program(program))
    }

    fn dispatch(&mut self, program: ProgramId, pass: &Pass<'_>) -> Result<(), SubstrateError> {
        let stage = *self
            .programs
            .get(&program)
            .ok_or(SubstrateError::UnknownProgram(program))?;
        if stage != pass.stage() {
            return Err(SubstrateError::StageMismatch {
                program: stage,
                pass: pass.stage(),
            });
        }
        pass.check_aliasing()?;
        self.run(pass)?;
        *self.dispatches.entry(stage).or_insert(0) += 1;
        Ok(())
    }
}

// ========== Stage kernels ==========

/// Everything the velocity kernel reads besides the particle itself.
#[derive(Clone, Copy, Debug)]
pub struct VelocityInputs<'a> {
    pub frame: &'a FrameUniforms,
    pub params: &'a SimulationParams,
    pub time: StepTime,
    /// Blurred density samples and their resolution.
    pub density: Option<(&'a [f32], u32)>,
    pub volume: Option<(&'a VolumeBinding, &'a SdfVolume)>,
}

/// Per-particle phase offset of the wander pattern, in radians.
#[inline]
pub fn wander_phase(index: u32) -> f32 {
    hash_to_unit(pcg_hash(index)) * std::f32::consts::TAU
}

/// Next velocity (xyz) and age (w) of particle `index`.
///
/// A particle older than `max_age` had its position respawned by the previous
/// position pass; here it gets a fresh seed velocity and age.
pub fn integrate_velocity(index: u32, position: Vec4, velocity: Vec4, inputs: &VelocityInputs<'_>) -> Vec4 {
    let VelocityInputs {
        frame,
        params,
        time,
        ..
    } = *inputs;

    if velocity.w > params.max_age {
        return SpawnRegion::new(frame).velocity(random_lanes(index, time.tick, VELOCITY_LANES));
    }

    let p = position.xyz();
    let dt = time.delta;
    let mut v = velocity.xyz();

    // Rise and wander.
    let mut acc = frame.basis_y * params.rise;
    let ns = params.noise_scale;
    let t = time.elapsed * params.noise_speed;
    let phase = wander_phase(index);
    let n = Vec3::new(
        (p.y * ns + t + phase).sin(),
        (p.z * ns * 1.3 + t * 0.7 + phase).sin(),
        (p.x * ns * 0.9 - t + phase).cos(),
    );
    acc += (frame.basis_x * n.x + frame.basis_z * n.z) * params.spread;
    acc += frame.basis_y * (n.y * params.spread * 0.25);

    // Crowding.
    if let Some((grid, resolution)) = inputs.density {
        let uv = frame.project_normalized(p);
        let d = sample_bilinear(grid, resolution, uv);
        if d > params.repulsion_threshold {
            let dir = gradient(grid, resolution, uv).normalize_or_zero();
            acc -= (frame.basis_x * dir.x + frame.basis_z * dir.y) * (params.repulsion * (d - params.repulsion_threshold));
        }
    }

    v += acc * dt;
    v /= 1.0 + params.drag * dt;

    if let Some((binding, volume)) = inputs.volume {
        v = collide(p, v, binding, volume, params);
    }

    let speed = v.length();
    if speed > params.max_speed {
        v *= params.max_speed / speed;
    }

    v.extend(velocity.w + dt)
}

/// Collision response against a bound SDF.
///
/// Inside the volume and closer than the threshold, the into-surface
/// component is damped and an outward push proportional to the penetration
/// is added.
pub fn collide(p: Vec3, v: Vec3, binding: &VolumeBinding, volume: &SdfVolume, params: &SimulationParams) -> Vec3 {
    let unit = binding.unit_transform.transform_point3(p);
    if unit.cmplt(Vec3::ZERO).any() || unit.cmpgt(Vec3::ONE).any() {
        return v;
    }

    let threshold = params.collision_threshold_voxels * binding.voxel_size.max_element();
    let distance = volume.sample_unit(unit);
    if distance >= threshold {
        return v;
    }

    let normal = volume.normal_unit(unit);
    let mut v = v;
    let vn = v.dot(normal);
    if vn < 0.0 {
        v -= normal * (vn * params.collision_damp);
    }
    v + normal * ((threshold - distance) * params.collision_push)
}

/// Next position (xyz) and freshness (w) of particle `index`.
///
/// `velocity` is this tick's output of the velocity kernel.
pub fn integrate_position(
    index: u32,
    position: Vec4,
    velocity: Vec4,
    frame: &FrameUniforms,
    params: &PositionParams,
    time: StepTime,
) -> Vec4 {
    if velocity.w > params.max_age {
        return SpawnRegion::new(frame).position(random_lanes(index, time.tick, POSITION_LANES));
    }

    let p = position.xyz() + velocity.xyz() * time.delta;
    p.extend((position.w - time.delta * params.freshness_decay).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DensityConfig;
    use crate::mesh::Aabb;
    use glam::Vec2;

    fn flat_frame() -> FrameUniforms {
        FrameUniforms {
            offset: Vec3::ZERO,
            basis_x: Vec3::X,
            basis_y: Vec3::Y,
            basis_z: Vec3::Z,
            extent: Vec2::new(2.0, 2.0),
            spawn_scale: 1.0,
        }
    }

    fn quiet_params() -> SimulationParams {
        SimulationParams {
            spread: 0.0,
            drag: 0.0,
            repulsion: 0.0,
            ..Default::default()
        }
    }

    fn inputs<'a>(frame: &'a FrameUniforms, params: &'a SimulationParams, delta: f32) -> VelocityInputs<'a> {
        VelocityInputs {
            frame,
            params,
            time: StepTime {
                elapsed: 1.0,
                delta,
                tick: 3,
            },
            density: None,
            volume: None,
        }
    }

    // ========== Resources ==========

    #[test]
    fn test_grid_lifecycle() {
        let mut cpu = CpuSubstrate::new();
        let desc = GridDescriptor {
            label: "test",
            width: 2,
            height: 2,
            format: GridFormat::Rgba32Float,
        };
        let id = cpu.create_grid(&desc).unwrap();
        assert_eq!(cpu.read_grid(id).unwrap(), vec![0.0; 16]);

        cpu.write_grid(id, &[1.0; 16]).unwrap();
        assert_eq!(cpu.read_grid(id).unwrap(), vec![1.0; 16]);
        assert!(matches!(
            cpu.write_grid(id, &[1.0; 3]),
            Err(SubstrateError::SizeMismatch { expected: 16, actual: 3 })
        ));

        assert!(cpu.release_grid(id).is_ok());
        assert_eq!(cpu.release_grid(id), Err(DisposalError::Grid(id)));
        assert!(matches!(cpu.read_grid(id), Err(SubstrateError::UnknownGrid(_))));
    }

    #[test]
    fn test_zero_sized_grid_rejected() {
        let mut cpu = CpuSubstrate::new();
        let desc = GridDescriptor {
            label: "empty",
            width: 0,
            height: 4,
            format: GridFormat::R32Float,
        };
        assert!(matches!(cpu.create_grid(&desc), Err(SubstrateError::EmptyGrid(_))));
    }

    #[test]
    fn test_grid_limit_counts_live_grids() {
        let mut cpu = CpuSubstrate::new().with_grid_limit(1);
        let desc = GridDescriptor {
            label: "only",
            width: 2,
            height: 2,
            format: GridFormat::R32Float,
        };
        let first = cpu.create_grid(&desc).unwrap();
        assert!(matches!(cpu.create_grid(&desc), Err(SubstrateError::OutOfMemory(_))));

        cpu.release_grid(first).unwrap();
        assert!(cpu.create_grid(&desc).is_ok());
    }

    #[test]
    fn test_withheld_program() {
        let mut cpu = CpuSubstrate::new().without_program(Stage::Velocity);
        assert!(cpu.compile(Stage::Velocity).is_none());
        assert!(cpu.compile(Stage::Position).is_some());
        assert_eq!(cpu.live_programs(), 1);
    }

    #[test]
    fn test_dispatch_rejects_wrong_stage() {
        let mut cpu = CpuSubstrate::new();
        let config = DensityConfig::new(4);
        let a = cpu
            .create_grid(&GridDescriptor {
                label: "a",
                width: 4,
                height: 4,
                format: GridFormat::R32Float,
            })
            .unwrap();
        let b = cpu
            .create_grid(&GridDescriptor {
                label: "b",
                width: 4,
                height: 4,
                format: GridFormat::R32Float,
            })
            .unwrap();
        let program = cpu.compile(Stage::BlurVertical).unwrap();
        let pass = Pass::Blur {
            axis: crate::substrate::BlurAxis::Horizontal,
            source: a,
            target: b,
            config: &config,
        };
        assert!(matches!(
            cpu.dispatch(program, &pass),
            Err(SubstrateError::StageMismatch { .. })
        ));
        assert_eq!(cpu.dispatch_count(Stage::BlurVertical), 0);
    }

    // ========== Velocity kernel ==========

    #[test]
    fn test_rise_accelerates_along_normal() {
        let frame = flat_frame();
        let params = quiet_params();
        let v = integrate_velocity(0, Vec4::new(0.0, 0.1, 0.0, 0.7), Vec4::new(0.0, 0.0, 0.0, 1.0), &inputs(&frame, &params, 0.1));
        assert!((v.y - params.rise * 0.1).abs() < 1e-6);
        assert!(v.x.abs() < 1e-6 && v.z.abs() < 1e-6);
        assert!((v.w - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_speed_capped() {
        let frame = flat_frame();
        let params = SimulationParams {
            max_speed: 0.5,
            ..quiet_params()
        };
        let v = integrate_velocity(0, Vec4::ZERO, Vec4::new(10.0, 0.0, 0.0, 0.0), &inputs(&frame, &params, 0.016));
        assert!((v.truncate().length() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_expired_velocity_reseeded() {
        let frame = flat_frame();
        let params = quiet_params();
        let v = integrate_velocity(5, Vec4::ZERO, Vec4::new(3.0, 3.0, 3.0, params.max_age + 0.01), &inputs(&frame, &params, 0.016));
        assert!(v.truncate().length() <= crate::spawn::MAX_SEED_SPEED + 1e-6);
        assert!(v.w < params.max_age);
    }

    #[test]
    fn test_density_repels_from_crowd() {
        let frame = flat_frame();
        let params = SimulationParams {
            rise: 0.0,
            spread: 0.0,
            drag: 0.0,
            repulsion: 1.0,
            repulsion_threshold: 0.0,
            ..Default::default()
        };
        let config = DensityConfig::new(32).with_intensity(1.0);
        let mut grid = vec![0.0; config.total_texels()];
        splat_into(&mut grid, &config, [Vec2::splat(0.5)]);

        let mut inputs = inputs(&frame, &params, 0.1);
        inputs.density = Some((&grid, 32));
        // Left of the crowd at the plane center: pushed further left.
        let v = integrate_velocity(0, Vec4::new(-0.1, 0.0, 0.0, 1.0), Vec4::new(0.0, 0.0, 0.0, 0.5), &inputs);
        assert!(v.x < 0.0);
        assert!(v.z.abs() < 1e-4);
    }

    // ========== Collision ==========

    fn floor_volume() -> SdfVolume {
        // Solid below y = 0.
        SdfVolume::from_fn(Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0)), 17, 1.0, |p| p.y).unwrap()
    }

    #[test]
    fn test_collision_damps_and_pushes_out() {
        let volume = floor_volume();
        let binding = VolumeBinding::describe(VolumeId(1), &volume);
        let params = SimulationParams {
            collision_damp: 1.0,
            collision_push: 0.0,
            ..Default::default()
        };
        let v = collide(Vec3::new(0.0, 0.05, 0.0), Vec3::new(0.2, -1.0, 0.0), &binding, &volume, &params);
        assert!(v.y.abs() < 1e-4, "into-surface component removed: {}", v);
        assert!((v.x - 0.2).abs() < 1e-4);

        let params = SimulationParams {
            collision_damp: 0.0,
            collision_push: 2.0,
            ..Default::default()
        };
        let v = collide(Vec3::new(0.0, -0.05, 0.0), Vec3::ZERO, &binding, &volume, &params);
        assert!(v.y > 0.0);
    }

    #[test]
    fn test_collision_ignores_far_and_outside_points() {
        let volume = floor_volume();
        let binding = VolumeBinding::describe(VolumeId(1), &volume);
        let params = SimulationParams::default();
        let v = Vec3::new(0.0, -1.0, 0.0);
        assert_eq!(collide(Vec3::new(0.0, 0.8, 0.0), v, &binding, &volume, &params), v);
        assert_eq!(collide(Vec3::new(0.0, 5.0, 0.0), v, &binding, &volume, &params), v);
    }

    // ========== Position kernel ==========

    #[test]
    fn test_position_integrates_and_decays_freshness() {
        let frame = flat_frame();
        let params = PositionParams::default();
        let time = StepTime {
            elapsed: 0.0,
            delta: 0.5,
            tick: 1,
        };
        let p = integrate_position(0, Vec4::new(1.0, 0.0, 0.0, 0.05), Vec4::new(0.0, 2.0, 0.0, 1.0), &frame, &params, time);
        assert!((p.truncate() - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(p.w, 0.0);
    }

    #[test]
    fn test_expired_position_respawns_on_plane() {
        let frame = flat_frame();
        let params = PositionParams::default();
        let time = StepTime {
            elapsed: 0.0,
            delta: 0.016,
            tick: 9,
        };
        let p = integrate_position(2, Vec4::new(5.0, 5.0, 5.0, 0.0), Vec4::new(0.0, 0.0, 0.0, params.max_age + 1.0), &frame, &params, time);
        assert!(p.x.abs() <= 1.0 && p.z.abs() <= 1.0);
        assert!(p.y > 0.0 && p.y < 0.05);
        assert!(p.w >= 0.6);
    }
}

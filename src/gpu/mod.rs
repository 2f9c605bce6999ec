//! wgpu compute backend.
//!
//! Grids are storage buffers; every stage is a WGSL compute pipeline with a
//! single bind group. Accumulator grids hold 16.16 fixed-point `i32` so the
//! splat can use integer atomics, and are converted at the upload/readback
//! boundary so callers only ever see `f32`.
//!
//! Uniform blocks and bind groups are rebuilt per dispatch; each dispatch is
//! submitted on its own, which keeps the pass order the caller issued.

mod params;
pub mod shaders;

use std::collections::HashMap;
use std::sync::mpsc;

use log::{debug, warn};
use wgpu::util::DeviceExt;

pub use params::{BlurParamsGpu, FrameGpu, PositionParamsGpu, SplatParamsGpu, VelocityParamsGpu};

use crate::error::{DisposalError, GpuError, SubstrateError};
use crate::sdf::SdfVolume;
use crate::substrate::{
    ComputeSubstrate, GridDescriptor, GridFormat, GridId, Pass, ProgramId, Stage, VolumeBinding, VolumeId,
};
use shaders::{stage_slots, stage_source, Slot, WORKGROUP_SIZE};

/// Fixed-point scale of accumulator grids (16.16).
pub const FIELD_SCALE: f32 = 65536.0;

struct GpuGrid {
    buffer: wgpu::Buffer,
    width: u32,
    format: GridFormat,
    floats: usize,
}

struct GpuProgram {
    stage: Stage,
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// [`ComputeSubstrate`] on a wgpu device.
pub struct WgpuSubstrate {
    device: wgpu::Device,
    queue: wgpu::Queue,
    grids: HashMap<GridId, GpuGrid>,
    volumes: HashMap<VolumeId, wgpu::Buffer>,
    programs: HashMap<ProgramId, GpuProgram>,
    /// Bound in place of an absent density grid or volume.
    placeholder: wgpu::Buffer,
    next_id: u32,
}

impl WgpuSubstrate {
    /// Wrap an existing device, e.g. the one a renderer already uses.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let placeholder = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Substrate Placeholder Buffer"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        Self {
            device,
            queue,
            grids: HashMap::new(),
            volumes: HashMap::new(),
            programs: HashMap::new(),
            placeholder,
            next_id: 0,
        }
    }

    /// Create a headless device on the default adapter.
    pub async fn request() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Plume Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        debug!("Compute device: {}", adapter.get_info().name);
        Ok(Self::new(device, queue))
    }

    /// Blocking form of [`request`](Self::request).
    pub fn request_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::request())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Storage buffer behind a grid, for binding in a render pass.
    pub fn grid_buffer(&self, grid: GridId) -> Option<&wgpu::Buffer> {
        self.grids.get(&grid).map(|g| &g.buffer)
    }

    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn grid(&self, id: GridId) -> Result<&GpuGrid, SubstrateError> {
        self.grids.get(&id).ok_or(SubstrateError::UnknownGrid(id))
    }

    fn buffer(&self, id: GridId) -> Result<&wgpu::Buffer, SubstrateError> {
        Ok(&self.grid(id)?.buffer)
    }

    fn build_pipeline(&self, stage: Stage) -> (wgpu::ComputePipeline, wgpu::BindGroupLayout) {
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage.label()),
            source: wgpu::ShaderSource::Wgsl(stage_source(stage).into()),
        });

        let entries: Vec<_> = stage_slots(stage)
            .iter()
            .enumerate()
            .map(|(binding, slot)| wgpu::BindGroupLayoutEntry {
                binding: binding as u32,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: match slot {
                        Slot::Read => wgpu::BufferBindingType::Storage { read_only: true },
                        Slot::Write => wgpu::BufferBindingType::Storage { read_only: false },
                        Slot::Uniform => wgpu::BufferBindingType::Uniform,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(stage.label()),
            entries: &entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(stage.label()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(stage.label()),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        (pipeline, layout)
    }

    fn uniform<T: bytemuck::Pod>(&self, value: &T) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stage Params"),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }

    /// Encode and submit one pass. Resource lookups happen before anything is
    /// recorded, so an unknown handle leaves the queue untouched.
    fn run(&self, program: &GpuProgram, pass: &Pass<'_>) -> Result<(), SubstrateError> {
        let (buffers, params, invocations): (Vec<&wgpu::Buffer>, wgpu::Buffer, u32) = match *pass {
            Pass::Splat {
                positions,
                target,
                particle_count,
                frame,
                config,
            } => (
                vec![self.buffer(positions)?, self.buffer(target)?],
                self.uniform(&SplatParamsGpu::new(frame, config, particle_count)),
                particle_count,
            ),
            Pass::Blur {
                source,
                target,
                config,
                ..
            } => (
                vec![self.buffer(source)?, self.buffer(target)?],
                self.uniform(&BlurParamsGpu::from(config)),
                config.resolution * config.resolution,
            ),
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
                let (density_buffer, density_resolution) = match density {
                    Some(id) => {
                        let grid = self.grid(id)?;
                        (&grid.buffer, Some(grid.width))
                    }
                    None => (&self.placeholder, None),
                };
                let volume_buffer = match volume {
                    Some(binding) => self
                        .volumes
                        .get(&binding.id)
                        .ok_or(SubstrateError::UnknownVolume(binding.id))?,
                    None => &self.placeholder,
                };
                (
                    vec![
                        self.buffer(positions)?,
                        self.buffer(velocities)?,
                        self.buffer(target)?,
                        density_buffer,
                        volume_buffer,
                    ],
                    self.uniform(&VelocityParamsGpu::new(
                        frame,
                        params,
                        time,
                        particle_count,
                        density_resolution,
                        volume,
                    )),
                    particle_count,
                )
            }
            Pass::Position {
                positions,
                velocities,
                target,
                particle_count,
                frame,
                params,
                time,
            } => (
                vec![self.buffer(positions)?, self.buffer(velocities)?, self.buffer(target)?],
                self.uniform(&PositionParamsGpu::new(frame, params, time, particle_count)),
                particle_count,
            ),
        };

        let mut entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: buffers.len() as u32,
            resource: params.as_entire_binding(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.stage.label()),
            layout: &program.layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(program.stage.label()),
        });

        if let Pass::Splat { target, .. } = *pass {
            encoder.clear_buffer(self.buffer(target)?, 0, None);
        }

        {
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(program.stage.label()),
                timestamp_writes: None,
            });
            compute.set_pipeline(&program.pipeline);
            compute.set_bind_group(0, &bind_group, &[]);
            compute.dispatch_workgroups(invocations.div_ceil(WORKGROUP_SIZE).max(1), 1, 1);
        }

        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

impl ComputeSubstrate for WgpuSubstrate {
    fn create_grid(&mut self, desc: &GridDescriptor<'_>) -> Result<GridId, SubstrateError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(SubstrateError::EmptyGrid(desc.label.to_string()));
        }
        let floats = desc.float_count();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: (floats * 4) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let id = GridId(self.next_id());
        self.grids.insert(
            id,
            GpuGrid {
                buffer,
                width: desc.width,
                format: desc.format,
                floats,
            },
        );
        Ok(id)
    }

    fn write_grid(&mut self, grid: GridId, data: &[f32]) -> Result<(), SubstrateError> {
        let grid = self.grid(grid)?;
        if data.len() != grid.floats {
            return Err(SubstrateError::SizeMismatch {
                expected: grid.floats,
                actual: data.len(),
            });
        }

        match grid.format {
            GridFormat::Accumulator => {
                let fixed: Vec<i32> = data.iter().map(|v| (v * FIELD_SCALE).round() as i32).collect();
                self.queue.write_buffer(&grid.buffer, 0, bytemuck::cast_slice(&fixed));
            }
            GridFormat::R32Float | GridFormat::Rgba32Float => {
                self.queue.write_buffer(&grid.buffer, 0, bytemuck::cast_slice(data));
            }
        }
        Ok(())
    }

    fn read_grid(&self, grid: GridId) -> Result<Vec<f32>, SubstrateError> {
        let grid = self.grid(grid)?;
        let size = (grid.floats * 4) as u64;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Grid Readback Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Grid Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&grid.buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?
            .map_err(|e| GpuError::BufferMapping(e.to_string()))?;

        let data = {
            let bytes = slice.get_mapped_range();
            match grid.format {
                GridFormat::Accumulator => bytemuck::cast_slice::<u8, i32>(&bytes)
                    .iter()
                    .map(|&v| v as f32 / FIELD_SCALE)
                    .collect(),
                GridFormat::R32Float | GridFormat::Rgba32Float => bytemuck::cast_slice::<u8, f32>(&bytes).to_vec(),
            }
        };
        staging.unmap();
        Ok(data)
    }

    fn release_grid(&mut self, grid: GridId) -> Result<(), DisposalError> {
        let removed = self.grids.remove(&grid).ok_or(DisposalError::Grid(grid))?;
        removed.buffer.destroy();
        Ok(())
    }

    fn upload_volume(&mut self, volume: &SdfVolume) -> Result<VolumeBinding, SubstrateError> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("SDF Volume"),
            contents: bytemuck::cast_slice(volume.data()),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let id = VolumeId(self.next_id());
        self.volumes.insert(id, buffer);
        Ok(VolumeBinding::describe(id, volume))
    }

    fn release_volume(&mut self, volume: VolumeId) -> Result<(), DisposalError> {
        let buffer = self.volumes.remove(&volume).ok_or(DisposalError::Volume(volume))?;
        buffer.destroy();
        Ok(())
    }

    fn compile(&mut self, stage: Stage) -> Option<ProgramId> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let (pipeline, layout) = self.build_pipeline(stage);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            warn!("Failed to build {} pipeline: {}", stage.label(), error);
            return None;
        }

        let id = ProgramId(self.next_id());
        self.programs.insert(
            id,
            GpuProgram {
                stage,
                pipeline,
                layout,
            },
        );
        Some(id)
    }

    fn release_program(&mut self, program: ProgramId) -> Result<(), DisposalError> {
        self.programs
            .remove(&program)
            .map(|_| ())
            .ok_or(DisposalError::Program(program))
    }

    fn dispatch(&mut self, program: ProgramId, pass: &Pass<'_>) -> Result<(), SubstrateError> {
        let program = self
            .programs
            .get(&program)
            .ok_or(SubstrateError::UnknownProgram(program))?;
        if program.stage != pass.stage() {
            return Err(SubstrateError::StageMismatch {
                program: program.stage,
                pass: pass.stage(),
            });
        }
        pass.check_aliasing()?;
        self.run(program, pass)
    }
}

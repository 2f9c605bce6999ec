//! 2D density feedback field.
//!
//! Every tick the current particle positions are projected onto the emitting
//! plane and splatted into a `D x D` accumulation grid, then smoothed with a
//! separable Gaussian blur. The velocity stage samples the result to push
//! particles out of crowded regions, and a renderer may use it to fade dense
//! smoke.
//!
//! # Pass layout
//!
//! ```text
//! positions ──splat──▶ primary ──blur H──▶ scratch ──blur V──▶ primary
//! ```
//!
//! The blur always runs as two passes so no pass reads the grid it writes.
//! The field keeps no history: the splat clears `primary` first.
//!
//! # Example
//!
//! ```ignore
//! let density = DensityConfig::new(64)
//!     .with_splat(3, 1.5)
//!     .with_blur(4, 2.0)
//!     .with_intensity(0.02);
//! ```

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::error::{DisposalError, SubstrateError};
use crate::substrate::{roll_back, BlurAxis, ComputeSubstrate, GridDescriptor, GridFormat, GridId, Pass};
use crate::uniforms::FrameUniforms;

/// Configuration for the density feedback field.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DensityConfig {
    /// Grid resolution per axis (total texels = resolution²).
    /// Independent of the particle grid width.
    pub resolution: u32,

    /// Splat footprint radius in texels.
    pub splat_radius: u32,

    /// Splat Gaussian sigma in texels.
    pub splat_sigma: f32,

    /// Blur kernel radius in texels (taps = 2 * radius + 1).
    pub blur_radius: u32,

    /// Blur Gaussian sigma in texels.
    pub blur_sigma: f32,

    /// Peak contribution of one particle at the center of its footprint.
    pub intensity: f32,
}

impl DensityConfig {
    /// Create a configuration with the given resolution.
    ///
    /// Default values:
    /// - `splat_radius`: 3, `splat_sigma`: 1.5
    /// - `blur_radius`: 4, `blur_sigma`: 2.0
    /// - `intensity`: 0.02
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            splat_radius: 3,
            splat_sigma: 1.5,
            blur_radius: 4,
            blur_sigma: 2.0,
            intensity: 0.02,
        }
    }

    /// Set the splat footprint radius and sigma, in texels.
    pub fn with_splat(mut self, radius: u32, sigma: f32) -> Self {
        self.splat_radius = radius;
        self.splat_sigma = sigma.max(1e-3);
        self
    }

    /// Set the blur kernel radius and sigma, in texels.
    pub fn with_blur(mut self, radius: u32, sigma: f32) -> Self {
        self.blur_radius = radius;
        self.blur_sigma = sigma.max(1e-3);
        self
    }

    /// Set the per-particle peak contribution.
    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity.max(0.0);
        self
    }

    /// Texel step between neighboring blur taps in normalized coordinates.
    pub fn texel_step(&self) -> f32 {
        1.0 / self.resolution.max(1) as f32
    }

    /// Total number of texels.
    pub fn total_texels(&self) -> usize {
        self.resolution as usize * self.resolution as usize
    }
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self::new(64)
    }
}

/// The density grid pair owned by one engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DensityField {
    config: DensityConfig,
    primary: GridId,
    scratch: GridId,
}

impl DensityField {
    /// Allocate the primary and scratch grids.
    ///
    /// If the scratch allocation fails the primary grid is released again.
    pub fn allocate<S: ComputeSubstrate + ?Sized>(
        substrate: &mut S,
        config: DensityConfig,
    ) -> Result<Self, SubstrateError> {
        let primary = substrate.create_grid(&GridDescriptor {
            label: "density",
            width: config.resolution,
            height: config.resolution,
            format: GridFormat::Accumulator,
        })?;
        let scratch = match substrate.create_grid(&GridDescriptor {
            label: "density scratch",
            width: config.resolution,
            height: config.resolution,
            format: GridFormat::R32Float,
        }) {
            Ok(id) => id,
            Err(e) => {
                roll_back(substrate, &[primary]);
                return Err(e);
            }
        };

        Ok(Self {
            config,
            primary,
            scratch,
        })
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    /// The grid holding the blurred result after a tick.
    pub fn grid(&self) -> GridId {
        self.primary
    }

    /// The blur scratch grid.
    pub fn scratch(&self) -> GridId {
        self.scratch
    }

    /// Splat pass reading `positions` into the primary grid.
    pub fn splat_pass<'a>(&'a self, positions: GridId, particle_count: u32, frame: &'a FrameUniforms) -> Pass<'a> {
        Pass::Splat {
            positions,
            target: self.primary,
            particle_count,
            frame,
            config: &self.config,
        }
    }

    /// Horizontal then vertical blur passes.
    pub fn blur_passes(&self) -> [Pass<'_>; 2] {
        [
            Pass::Blur {
                axis: BlurAxis::Horizontal,
                source: self.primary,
                target: self.scratch,
                config: &self.config,
            },
            Pass::Blur {
                axis: BlurAxis::Vertical,
                source: self.scratch,
                target: self.primary,
                config: &self.config,
            },
        ]
    }

    /// Release both grids, collecting every failure.
    pub fn release<S: ComputeSubstrate + ?Sized>(&self, substrate: &mut S) -> Vec<DisposalError> {
        [self.primary, self.scratch]
            .into_iter()
            .filter_map(|grid| substrate.release_grid(grid).err())
            .collect()
    }
}

// ========== Reference kernels ==========

/// Unnormalized Gaussian weight at squared distance `d2`.
#[inline]
pub fn gaussian(d2: f32, sigma: f32) -> f32 {
    (-d2 / (2.0 * sigma * sigma)).exp()
}

/// Normalized 1D Gaussian kernel with `2 * radius + 1` taps.
pub fn blur_weights(radius: u32, sigma: f32) -> Vec<f32> {
    let r = radius as i32;
    let mut weights: Vec<f32> = (-r..=r).map(|i| gaussian((i * i) as f32, sigma)).collect();
    let sum: f32 = weights.iter().sum();
    for w in &mut weights {
        *w /= sum;
    }
    weights
}

/// Clear `grid` and add one Gaussian footprint per normalized plane coordinate.
///
/// Coordinate `(0, 0)` is the corner of texel `(0, 0)`; texel centers sit at
/// `(i + 0.5) / D`.
pub fn splat_into(grid: &mut [f32], config: &DensityConfig, coords: impl IntoIterator<Item = Vec2>) {
    grid.iter_mut().for_each(|v| *v = 0.0);
    let res = config.resolution as i32;
    let radius = config.splat_radius;

    for uv in coords {
        let center = uv * res as f32 - Vec2::splat(0.5);
        if !center.is_finite() {
            continue;
        }
        let lo = (center - Vec2::splat(radius as f32)).floor();
        let hi = (center + Vec2::splat(radius as f32)).ceil();

        for y in (lo.y as i32).max(0)..=(hi.y as i32).min(res - 1) {
            for x in (lo.x as i32).max(0)..=(hi.x as i32).min(res - 1) {
                let d = Vec2::new(x as f32, y as f32) - center;
                if d.length() > radius as f32 {
                    continue;
                }
                grid[(y * res + x) as usize] += config.intensity * gaussian(d.length_squared(), config.splat_sigma);
            }
        }
    }
}

/// One separable blur pass with clamp-to-edge addressing.
pub fn blur_into(source: &[f32], target: &mut [f32], config: &DensityConfig, axis: BlurAxis) {
    let res = config.resolution as i32;
    let weights = blur_weights(config.blur_radius, config.blur_sigma);
    let radius = config.blur_radius as i32;

    for y in 0..res {
        for x in 0..res {
            let mut sum = 0.0;
            for (k, w) in weights.iter().enumerate() {
                let offset = k as i32 - radius;
                let (sx, sy) = match axis {
                    BlurAxis::Horizontal => ((x + offset).clamp(0, res - 1), y),
                    BlurAxis::Vertical => (x, (y + offset).clamp(0, res - 1)),
                };
                sum += w * source[(sy * res + sx) as usize];
            }
            target[(y * res + x) as usize] = sum;
        }
    }
}

/// Bilinear sample at a normalized plane coordinate, clamped to the edge.
pub fn sample_bilinear(grid: &[f32], resolution: u32, uv: Vec2) -> f32 {
    let res = resolution as i32;
    if res == 0 || grid.len() < (res * res) as usize {
        return 0.0;
    }
    let p = (uv * res as f32 - Vec2::splat(0.5)).clamp(Vec2::ZERO, Vec2::splat((res - 1) as f32));
    let x0 = p.x.floor() as i32;
    let y0 = p.y.floor() as i32;
    let x1 = (x0 + 1).min(res - 1);
    let y1 = (y0 + 1).min(res - 1);
    let f = p - Vec2::new(x0 as f32, y0 as f32);

    let at = |x: i32, y: i32| grid[(y * res + x) as usize];
    let top = at(x0, y0) + (at(x1, y0) - at(x0, y0)) * f.x;
    let bottom = at(x0, y1) + (at(x1, y1) - at(x0, y1)) * f.x;
    top + (bottom - top) * f.y
}

/// Central-difference gradient with a one-texel step.
pub fn gradient(grid: &[f32], resolution: u32, uv: Vec2) -> Vec2 {
    let step = 1.0 / resolution.max(1) as f32;
    let dx = sample_bilinear(grid, resolution, uv + Vec2::new(step, 0.0))
        - sample_bilinear(grid, resolution, uv - Vec2::new(step, 0.0));
    let dy = sample_bilinear(grid, resolution, uv + Vec2::new(0.0, step))
        - sample_bilinear(grid, resolution, uv - Vec2::new(0.0, step));
    Vec2::new(dx, dy) / (2.0 * step)
}

//! Brute-force SDF baking with cooperative cancellation.
//!
//! The bake is split into z-slices. [`SdfJob`] computes one slice per call and
//! can be driven by hand (e.g. one slice per rendered frame).
//! [`SdfVolumeGenerator::generate`] drives a job to completion as a future
//! that yields back to the executor after every slice, which is also the only
//! point where a pending [`cancel`](SdfVolumeGenerator::cancel) is observed.
//!
//! Each sample takes the minimum distance to every triangle in the scene and
//! its sign from the parity of hits along one fixed, non-axis-aligned ray.
//! There is no acceleration structure: cost is `n³ * triangles` for both.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use glam::Vec3;
use log::{debug, info};

use super::query::{distance_to_triangle, ray_triangle_intersect};
use super::{SdfOptions, SdfVolume};
use crate::error::SdfError;
use crate::mesh::{Aabb, Scene, Triangle};

/// Parity ray directions. Unit length with irrational components, so rays
/// from lattice sample points do not run through mesh edges or vertices.
/// The sign is the majority vote of the three.
const PARITY_RAYS: [Vec3; 3] = [
    Vec3::new(0.377_577_37, 0.880_582_8, 0.286_372_64),
    Vec3::new(-0.391_003_23, 0.750_494_7, 0.532_798_4),
    Vec3::new(0.441_431_93, -0.188_227_2, 0.877_330_25),
];

/// Hits closer than this along a ray are one crossing of a shared edge.
const HIT_MERGE_EPSILON: f32 = 1e-5;

/// Target number of progress reports over a whole bake.
const PROGRESS_REPORTS: u32 = 20;

/// Shared cancellation flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One bake, computed slice by slice.
#[derive(Debug)]
pub struct SdfJob {
    triangles: Vec<Triangle>,
    bounds: Aabb,
    resolution: u32,
    step: Vec3,
    max_distance: f32,
    data: Vec<f32>,
    slices_done: u32,
}

impl SdfJob {
    /// Validate the input and flatten the scene into a triangle list.
    pub fn new(scene: &Scene, options: &SdfOptions) -> Result<Self, SdfError> {
        if options.resolution < 2 {
            return Err(SdfError::Resolution(options.resolution));
        }
        if !(options.padding.is_finite() && options.padding >= 0.0) {
            return Err(SdfError::Padding(options.padding));
        }

        let triangles = scene.triangles();
        let bounds = scene
            .bounds()
            .filter(|_| !triangles.is_empty())
            .ok_or(SdfError::EmptyScene)?
            .expanded(options.padding);

        let max_distance = match options.max_distance {
            Some(d) if d.is_finite() && d > 0.0 => d,
            Some(d) => return Err(SdfError::MaxDistance(d)),
            None => bounds.diagonal().max(f32::EPSILON),
        };

        let n = options.resolution as usize;
        Ok(Self {
            triangles,
            bounds,
            resolution: options.resolution,
            step: bounds.size() / (options.resolution - 1) as f32,
            max_distance,
            data: Vec::with_capacity(n * n * n),
            slices_done: 0,
        })
    }

    /// Total number of z-slices.
    pub fn slice_count(&self) -> u32 {
        self.resolution
    }

    pub fn slices_done(&self) -> u32 {
        self.slices_done
    }

    pub fn is_complete(&self) -> bool {
        self.slices_done == self.resolution
    }

    /// Fraction of slices computed.
    pub fn progress(&self) -> f32 {
        self.slices_done as f32 / self.resolution as f32
    }

    /// Compute the next z-slice. Does nothing once the job is complete.
    pub fn run_slice(&mut self) {
        if self.is_complete() {
            return;
        }
        let z = self.slices_done;
        for y in 0..self.resolution {
            for x in 0..self.resolution {
                let p = self.bounds.min + self.step * Vec3::new(x as f32, y as f32, z as f32);
                let d = self.signed_distance(p);
                self.data.push(d.clamp(-self.max_distance, self.max_distance));
            }
        }
        self.slices_done += 1;
    }

    /// Hand over the finished volume.
    ///
    /// # Errors
    ///
    /// [`SdfError::Incomplete`] if slices remain; a partial volume is never
    /// returned.
    pub fn finish(self) -> Result<SdfVolume, SdfError> {
        if !self.is_complete() {
            return Err(SdfError::Incomplete {
                done: self.slices_done,
                total: self.resolution,
            });
        }
        SdfVolume::new(self.data, self.bounds, self.resolution, self.max_distance)
    }

    fn signed_distance(&self, p: Vec3) -> f32 {
        let distance = self
            .triangles
            .iter()
            .map(|tri| distance_to_triangle(p, tri))
            .fold(f32::INFINITY, f32::min);

        let inside_votes = PARITY_RAYS
            .iter()
            .filter(|&&dir| crossings(&self.triangles, p, dir) % 2 == 1)
            .count();

        if inside_votes * 2 > PARITY_RAYS.len() {
            -distance
        } else {
            distance
        }
    }
}

/// Number of surface crossings along `dir` from `origin`.
///
/// Hits at (nearly) the same distance are counted once: a ray through an edge
/// shared by two triangles crosses the surface a single time.
fn crossings(triangles: &[Triangle], origin: Vec3, dir: Vec3) -> usize {
    let mut hits: Vec<f32> = triangles
        .iter()
        .filter_map(|tri| ray_triangle_intersect(origin, dir, tri))
        .collect();
    hits.sort_by(f32::total_cmp);
    hits.dedup_by(|a, b| (*a - *b).abs() <= HIT_MERGE_EPSILON * b.max(1.0));
    hits.len()
}

/// Asynchronous, cancellable SDF baker.
///
/// ```ignore
/// let generator = SdfVolumeGenerator::new();
/// let volume = pollster::block_on(generator.generate(&scene, &SdfOptions::new(32), |p| {
///     log::debug!("sdf {:.0}%", p * 100.0);
/// }))?;
/// ```
#[derive(Debug, Default)]
pub struct SdfVolumeGenerator {
    cancel: CancelToken,
}

impl SdfVolumeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the bake in progress. Observed at the next slice boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this generator from elsewhere (another thread, a
    /// progress callback).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Bake `scene` into a volume.
    ///
    /// `on_progress` receives strictly increasing fractions, about
    /// [`PROGRESS_REPORTS`] times, ending with exactly `1.0`. Nothing is
    /// reported after a cancellation.
    ///
    /// A cancel requested before this call starts is discarded.
    ///
    /// # Errors
    ///
    /// [`SdfError::Cancelled`] if cancelled; validation errors from
    /// [`SdfJob::new`].
    pub async fn generate<F>(&self, scene: &Scene, options: &SdfOptions, mut on_progress: F) -> Result<SdfVolume, SdfError>
    where
        F: FnMut(f32),
    {
        self.cancel.reset();
        let mut job = SdfJob::new(scene, options)?;
        let total = job.slice_count();
        let interval = total.div_ceil(PROGRESS_REPORTS).max(1);
        debug!(
            "Baking SDF: {}³ samples, {} triangles",
            total,
            job.triangles.len()
        );

        while !job.is_complete() {
            job.run_slice();
            let done = job.slices_done();
            if done % interval == 0 || done == total {
                on_progress(job.progress());
            }

            YieldNow::default().await;
            if self.cancel.is_cancelled() {
                debug!("SDF bake cancelled after {} of {} slices", done, total);
                return Err(SdfError::Cancelled);
            }
        }

        let volume = job.finish()?;
        info!(
            "SDF baked: {}³ samples, max distance {:.3}",
            volume.resolution(),
            volume.max_distance()
        );
        Ok(volume)
    }
}

/// Future that returns `Pending` once, waking itself, then completes.
#[derive(Default)]
struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

//! Tracking and bulk teardown of live engines.
//!
//! A host that runs several smoke effects registers each engine in an
//! [`EngineRegistry`] and tears them all down with
//! [`dispose_all`](EngineRegistry::dispose_all) when the scene unloads. One
//! engine failing to release a resource never keeps the others alive.
//!
//! ```ignore
//! let mut registry = EngineRegistry::new();
//! let chimney = registry.insert(SmokeEngine::new(&mut substrate, &roof, config, None)?);
//!
//! for (_, engine) in registry.iter_mut() {
//!     engine.step(&mut substrate, elapsed, delta)?;
//! }
//!
//! for (id, error) in registry.dispose_all(&mut substrate) {
//!     eprintln!("{:?}: {}", id, error);
//! }
//! ```

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::engine::SmokeEngine;
use crate::error::DisposalError;
use crate::substrate::ComputeSubstrate;

/// Handle of an engine inside a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

/// Owner of the live engines of one host.
#[derive(Debug, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<InstanceId, SmokeEngine>,
    next_id: u64,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `engine` and return its handle.
    pub fn insert(&mut self, engine: SmokeEngine) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        self.engines.insert(id, engine);
        id
    }

    pub fn get(&self, id: InstanceId) -> Option<&SmokeEngine> {
        self.engines.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut SmokeEngine> {
        self.engines.get_mut(&id)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (InstanceId, &SmokeEngine)> {
        self.engines.iter().map(|(id, e)| (*id, e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (InstanceId, &mut SmokeEngine)> {
        self.engines.iter_mut().map(|(id, e)| (*id, e))
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Untrack and dispose one engine.
    ///
    /// Returns `Ok(false)` if `id` is not tracked. The engine is untracked
    /// even when its disposal fails.
    pub fn remove<S: ComputeSubstrate + ?Sized>(
        &mut self,
        substrate: &mut S,
        id: InstanceId,
    ) -> Result<bool, DisposalError> {
        match self.engines.remove(&id) {
            Some(mut engine) => engine.dispose(substrate).map(|_| true),
            None => Ok(false),
        }
    }

    /// Dispose every tracked engine exactly once and empty the registry.
    ///
    /// Failures are logged and collected; the remaining engines are still
    /// disposed. A second call finds nothing to do.
    pub fn dispose_all<S: ComputeSubstrate + ?Sized>(&mut self, substrate: &mut S) -> Vec<(InstanceId, DisposalError)> {
        let engines = std::mem::take(&mut self.engines);
        let count = engines.len();

        let mut failures = Vec::new();
        for (id, mut engine) in engines {
            if let Err(e) = engine.dispose(substrate) {
                warn!("Failed to dispose engine {:?}: {}", id, e);
                failures.push((id, e));
            }
        }

        debug!("Disposed {} engines ({} failed)", count, failures.len());
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuSubstrate;
    use crate::engine::EngineConfig;
    use crate::mesh::Mesh;

    fn spawn(registry: &mut EngineRegistry, substrate: &mut CpuSubstrate) -> InstanceId {
        let engine = SmokeEngine::new(substrate, &Mesh::quad(1.0, 1.0), EngineConfig::new(2).with_seed(1), None).unwrap();
        registry.insert(engine)
    }

    #[test]
    fn test_insert_and_get() {
        let mut substrate = CpuSubstrate::new();
        let mut registry = EngineRegistry::new();
        let a = spawn(&mut registry, &mut substrate);
        let b = spawn(&mut registry, &mut substrate);

        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(a).is_some());
        assert!(registry.get_mut(b).is_some());
    }

    #[test]
    fn test_remove_disposes() {
        let mut substrate = CpuSubstrate::new();
        let mut registry = EngineRegistry::new();
        let a = spawn(&mut registry, &mut substrate);

        assert_eq!(registry.remove(&mut substrate, a), Ok(true));
        assert_eq!(substrate.live_grids(), 0);
        assert_eq!(registry.remove(&mut substrate, a), Ok(false));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispose_all_twice_is_harmless() {
        let mut substrate = CpuSubstrate::new();
        let mut registry = EngineRegistry::new();
        for _ in 0..3 {
            spawn(&mut registry, &mut substrate);
        }

        assert!(registry.dispose_all(&mut substrate).is_empty());
        assert_eq!(substrate.live_grids(), 0);
        assert_eq!(substrate.live_programs(), 0);
        assert!(registry.dispose_all(&mut substrate).is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dispose_all_isolates_failures() {
        let mut substrate = CpuSubstrate::new();
        let mut registry = EngineRegistry::new();
        let a = spawn(&mut registry, &mut substrate);
        let b = spawn(&mut registry, &mut substrate);
        let c = spawn(&mut registry, &mut substrate);

        let stolen = registry.get(b).unwrap().current_grids().velocities;
        substrate.release_grid(stolen).unwrap();

        let failures = registry.dispose_all(&mut substrate);
        assert_eq!(failures, vec![(b, DisposalError::Grid(stolen))]);
        assert_eq!(substrate.live_grids(), 0);
        assert!(registry.get(a).is_none());
        assert!(registry.get(c).is_none());
    }
}

//! Measurement-point registry.
//!
//! Maps a measurement-point name to its descriptor. A descriptor can be
//! changed until the point is first used to send data; after that it is
//! frozen until the registry is reset.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use oml_types::{FieldDef, MeasurementPoint};
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Registry entry for one measurement point.
#[derive(Debug)]
pub(crate) struct PointState {
    pub id: u64,
    pub point: RwLock<Arc<MeasurementPoint>>,
    pub frozen: AtomicBool,
}

impl PointState {
    /// Callers hold the descriptor lock so a concurrent freeze cannot interleave.
    fn ensure_mutable(&self, point: &MeasurementPoint) -> Result<()> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(Error::SchemaFrozen(point.name.clone()));
        }
        Ok(())
    }
}

/// Process-independent table of measurement points.
///
/// One registry belongs to one [`Client`](crate::Client); nothing here is global.
#[derive(Debug, Default)]
pub struct Registry {
    points: RwLock<BTreeMap<String, Arc<PointState>>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a measurement point, or update it if it is not frozen yet.
    ///
    /// Redefining a frozen point with an identical descriptor is accepted and
    /// returns the existing handle; any other change fails with
    /// [`Error::SchemaFrozen`].
    pub fn define(&self, point: MeasurementPoint) -> Result<MeasurementPointHandle> {
        // Fast path
        {
            let points = self.points.read();
            if let Some(state) = points.get(&point.name) {
                return Self::redefine(state, point);
            }
        }

        // Slow path, re-checked under the write lock
        let mut points = self.points.write();
        if let Some(state) = points.get(&point.name) {
            return Self::redefine(state, point);
        }
        let state = Arc::new(PointState {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            point: RwLock::new(Arc::new(point.clone())),
            frozen: AtomicBool::new(false),
        });
        points.insert(point.name, state.clone());
        Ok(MeasurementPointHandle { state })
    }

    fn redefine(state: &Arc<PointState>, point: MeasurementPoint) -> Result<MeasurementPointHandle> {
        let handle = MeasurementPointHandle {
            state: state.clone(),
        };
        let mut current = state.point.write();
        if **current == point {
            return Ok(handle);
        }
        state.ensure_mutable(&current)?;
        *current = Arc::new(point);
        Ok(handle)
    }

    /// Look up a point by name.
    pub fn get(&self, name: &str) -> Option<MeasurementPointHandle> {
        self.points
            .read()
            .get(name)
            .map(|state| MeasurementPointHandle {
                state: state.clone(),
            })
    }

    /// Names of all registered points.
    pub fn names(&self) -> Vec<String> {
        self.points.read().keys().cloned().collect()
    }

    /// Number of registered points.
    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Check if no point is registered.
    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }

    /// Unfreeze every point so a new run can redefine them.
    pub fn reset(&self) {
        for state in self.points.read().values() {
            state.frozen.store(false, Ordering::Release);
        }
    }

    /// Remove every point.
    pub fn clear(&self) {
        self.points.write().clear();
    }
}

/// Handle to a registered measurement point.
///
/// Cheap to clone; pass it to [`Client::inject`](crate::Client::inject).
#[derive(Clone)]
pub struct MeasurementPointHandle {
    pub(crate) state: Arc<PointState>,
}

impl MeasurementPointHandle {
    /// Measurement point name.
    pub fn name(&self) -> String {
        self.state.point.read().name.clone()
    }

    /// Current descriptor.
    pub fn point(&self) -> Arc<MeasurementPoint> {
        self.state.point.read().clone()
    }

    /// Whether the point has been used to send data.
    pub fn is_frozen(&self) -> bool {
        self.state.frozen.load(Ordering::Acquire)
    }

    /// Append a field. Fails once the point is frozen.
    pub fn add_field(&self, field: FieldDef) -> Result<()> {
        let mut point = self.state.point.write();
        self.state.ensure_mutable(&point)?;
        Arc::make_mut(&mut *point).fields.push(field);
        Ok(())
    }

    /// Freeze the descriptor and return the version that is now fixed.
    pub(crate) fn freeze(&self) -> Arc<MeasurementPoint> {
        let point = self.state.point.read();
        self.state.frozen.store(true, Ordering::Release);
        point.clone()
    }

    pub(crate) fn id(&self) -> u64 {
        self.state.id
    }
}

impl std::fmt::Debug for MeasurementPointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementPointHandle")
            .field("name", &self.name())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

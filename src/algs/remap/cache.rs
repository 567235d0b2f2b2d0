//! Weight cache: one entry per (source grid, destination grid, operator).
//!
//! Each entry remembers the effective masks and runtime coordinates its
//! weights were computed with. When a later request arrives with a
//! different mask or moved coordinates the entry goes stale and is rebuilt;
//! the new matrix replaces the old `Arc`, so callers still holding the
//! previous matrix keep a consistent (if outdated) copy.

use crate::algs::remap::operator::RemapOperator;
use crate::algs::remap::weights::RemapWeights;
use crate::coupler_error::CouplerError;
use crate::data::grid::GridDescriptor;
use crate::data::registry::GridId;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::sync::Arc;

/// Lifecycle of one cached weight matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WeightState {
    Uncomputed,
    Computed,
    /// A mask or coordinate changed since the weights were computed.
    Stale,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WeightKey {
    pub src: GridId,
    pub dst: GridId,
    pub operator: String,
}

impl WeightKey {
    pub fn new(src: GridId, dst: GridId, operator: impl Into<String>) -> Self {
        Self {
            src,
            dst,
            operator: operator.into(),
        }
    }
}

/// Per-timestep state of one grid: a runtime mask and moved cell edges.
///
/// `coords` holds one edge list per axis (see
/// [`GridDescriptor::with_coordinates`]); `None` means the registered bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuntimeState<'a> {
    pub mask: Option<&'a [bool]>,
    pub coords: Option<&'a [Vec<f64>]>,
}

impl<'a> RuntimeState<'a> {
    pub fn masked(mask: &'a [bool]) -> Self {
        Self {
            mask: Some(mask),
            coords: None,
        }
    }

    pub fn moved(coords: &'a [Vec<f64>]) -> Self {
        Self {
            mask: None,
            coords: Some(coords),
        }
    }
}

/// Everything needed to (re)compute one entry.
pub struct WeightRequest<'a> {
    pub src_id: GridId,
    pub dst_id: GridId,
    pub src: &'a GridDescriptor,
    pub dst: &'a GridDescriptor,
    pub operator: &'a dyn RemapOperator,
    /// Runtime state; masks combine with the grids' static masks.
    pub src_state: RuntimeState<'a>,
    pub dst_state: RuntimeState<'a>,
}

impl WeightRequest<'_> {
    fn key(&self) -> WeightKey {
        WeightKey::new(self.src_id, self.dst_id, self.operator.name())
    }

    fn snapshot(&self) -> Result<Snapshot, CouplerError> {
        Ok(Snapshot {
            src_mask: effective_mask(self.src, self.src_state.mask)?,
            dst_mask: effective_mask(self.dst, self.dst_state.mask)?,
            src_coords: self.src_state.coords.map(<[Vec<f64>]>::to_vec),
            dst_coords: self.dst_state.coords.map(<[Vec<f64>]>::to_vec),
        })
    }
}

/// Runtime inputs a matrix was computed with.
#[derive(Debug, PartialEq)]
struct Snapshot {
    src_mask: Option<Vec<bool>>,
    dst_mask: Option<Vec<bool>>,
    src_coords: Option<Vec<Vec<f64>>>,
    dst_coords: Option<Vec<Vec<f64>>>,
}

#[derive(Debug)]
struct Entry {
    state: WeightState,
    weights: Arc<RemapWeights>,
    inputs: Snapshot,
}

#[derive(Debug, Default)]
pub struct WeightCache {
    entries: RwLock<HashMap<WeightKey, Entry>>,
}

impl WeightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &WeightKey) -> WeightState {
        self.entries
            .read()
            .get(key)
            .map_or(WeightState::Uncomputed, |e| e.state)
    }

    /// Compare the request's masks and coordinates with the entry's
    /// snapshot; mark it stale on any change.
    pub fn observe(&self, req: &WeightRequest<'_>) -> Result<WeightState, CouplerError> {
        let key = req.key();
        let inputs = req.snapshot()?;
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(&key) else {
            return Ok(WeightState::Uncomputed);
        };
        if entry.state == WeightState::Computed && entry.inputs != inputs {
            log::debug!("weights `{}` {:?} -> {:?} went stale", key.operator, key.src, key.dst);
            entry.state = WeightState::Stale;
        }
        Ok(entry.state)
    }

    /// Cached weights for `req`, computing or recomputing them as needed.
    ///
    /// Conservative operators are checked against `tolerance`.
    pub fn get_or_compute(&self, req: &WeightRequest<'_>, tolerance: f64) -> Result<Arc<RemapWeights>, CouplerError> {
        let key = req.key();
        if self.observe(req)? == WeightState::Computed {
            if let Some(e) = self.entries.read().get(&key) {
                log::debug!("weights `{}` {:?} -> {:?}: cache hit", key.operator, key.src, key.dst);
                return Ok(Arc::clone(&e.weights));
            }
        }
        let inputs = req.snapshot()?;
        let src = current_grid(req.src, req.src_state.coords)?;
        let dst = current_grid(req.dst, req.dst_state.coords)?;
        let triplets = req
            .operator
            .compute(&src, &dst, inputs.src_mask.as_deref(), inputs.dst_mask.as_deref())?;
        let weights = RemapWeights::from_triplets(
            req.operator.name(),
            src.total_size(),
            dst.total_size(),
            &triplets,
        )?;
        if req.operator.is_conservative() {
            weights.check_conservation(tolerance)?;
        } else {
            let over = weights.rows_exceeding_one(tolerance);
            if !over.is_empty() {
                log::warn!(
                    "weights `{}` from `{}` to `{}`: {} destination cells sum above 1 (first: {})",
                    key.operator,
                    src.name(),
                    dst.name(),
                    over.len(),
                    over[0]
                );
            }
        }
        log::info!(
            "computed weights `{}` from `{}` to `{}`: {} triplets",
            key.operator,
            src.name(),
            dst.name(),
            weights.num_weights()
        );
        let weights = Arc::new(weights);
        self.entries.write().insert(
            key,
            Entry {
                state: WeightState::Computed,
                weights: Arc::clone(&weights),
                inputs,
            },
        );
        Ok(weights)
    }

    /// Mark an entry stale so the next request recomputes it.
    pub fn invalidate(&self, key: &WeightKey) {
        if let Some(e) = self.entries.write().get_mut(key) {
            e.state = WeightState::Stale;
        }
    }

    /// Drop every entry whose source or destination is `grid`.
    pub fn evict_grid(&self, grid: GridId) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| k.src != grid && k.dst != grid);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// The registered grid, or a copy carrying the runtime coordinates.
fn current_grid<'a>(
    grid: &'a GridDescriptor,
    coords: Option<&[Vec<f64>]>,
) -> Result<Cow<'a, GridDescriptor>, CouplerError> {
    match coords {
        Some(c) => Ok(Cow::Owned(grid.with_coordinates(c)?)),
        None => Ok(Cow::Borrowed(grid)),
    }
}

/// Static grid mask AND runtime mask; `None` when every cell is active.
fn effective_mask(grid: &GridDescriptor, runtime: Option<&[bool]>) -> Result<Option<Vec<bool>>, CouplerError> {
    if let Some(m) = runtime {
        if m.len() != grid.total_size() {
            return Err(CouplerError::BufferSizeMismatch {
                what: "runtime mask",
                expected: grid.total_size(),
                got: m.len(),
            });
        }
    }
    Ok(match (grid.mask(), runtime) {
        (None, None) => None,
        (Some(s), None) => Some(s.to_vec()),
        (None, Some(r)) => Some(r.to_vec()),
        (Some(s), Some(r)) => Some(s.iter().zip(r).map(|(&a, &b)| a && b).collect()),
    })
}

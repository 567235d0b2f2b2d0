//! Coupling session: the explicit context that owns registries and caches.
//!
//! A process creates one session and hands it to whatever drives field
//! exchanges. Grids and decompositions are registered once and addressed by
//! handle afterwards. Routers, weights and interchange tables are built on
//! first request and shared as `Arc`s; a rebuilt entry replaces the old one,
//! so fetch from the session on each use instead of holding an `Arc` across
//! a mask change.

use crate::algs::communicator::Communicator;
use crate::algs::group::ComponentGroup;
use crate::algs::interchange::InterchangeTable;
use crate::algs::partition_table::RoutingTags;
use crate::algs::remap::{
    self, RemapOperator, RemapWeights, RuntimeState, WeightCache, WeightRequest,
};
use crate::algs::router::{Router, RouterKey};
use crate::algs::routing::{RoutingContext, Side, build_local_router, build_router};
use crate::config::CouplerConfig;
use crate::coupler_error::CouplerError;
use crate::data::decomp::{DecompDescriptor, GlobalIndex};
use crate::data::grid::{Axis, GridDescriptor};
use crate::data::registry::{DecompId, GridId, Registry};
use hashbrown::HashMap;
use num_traits::Float;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CouplingSession {
    config: CouplerConfig,
    grids: RwLock<Registry<GridDescriptor>>,
    decomps: RwLock<Registry<DecompDescriptor>>,
    routers: RwLock<HashMap<RouterKey, Arc<Router>>>,
    weights: WeightCache,
    interchanges: RwLock<HashMap<(GridId, GridId), Arc<InterchangeTable>>>,
}

impl CouplingSession {
    pub fn new(config: CouplerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &CouplerConfig {
        &self.config
    }

    pub fn register_grid(&self, grid: GridDescriptor) -> Result<GridId, CouplerError> {
        let id = self.grids.write().register(grid)?;
        Ok(GridId(id))
    }

    /// Register the grid formed by concatenating the axes of `parts`.
    pub fn register_composite_grid(&self, name: &str, parts: &[GridId]) -> Result<GridId, CouplerError> {
        let parts = parts.iter().map(|&id| self.grid(id)).collect::<Result<Vec<_>, _>>()?;
        let refs: Vec<&GridDescriptor> = parts.iter().map(Arc::as_ref).collect();
        self.register_grid(GridDescriptor::composite(name, &refs)?)
    }

    /// Register this process's piece of a decomposition of `grid`.
    pub fn register_decomposition(
        &self,
        component: &str,
        name: &str,
        grid: GridId,
        local_to_global: Vec<GlobalIndex>,
    ) -> Result<DecompId, CouplerError> {
        let size = self.grid(grid)?.total_size() as u64;
        let d = DecompDescriptor::new(component, name, size, local_to_global)?.with_grid(grid);
        self.register_descriptor(d)
    }

    /// Register a prepared descriptor; an attached grid must match its global size.
    pub fn register_descriptor(&self, decomp: DecompDescriptor) -> Result<DecompId, CouplerError> {
        if let Some(gid) = decomp.grid() {
            let g = self.grid(gid)?;
            if g.total_size() as u64 != decomp.global_size() {
                return Err(CouplerError::GridMismatch {
                    src_grid: g.name().to_owned(),
                    dst_grid: decomp.full_name(),
                    reason: format!(
                        "grid has {} cells but the decomposition declares {}",
                        g.total_size(),
                        decomp.global_size()
                    ),
                });
            }
        }
        let id = self.decomps.write().register(decomp)?;
        Ok(DecompId(id))
    }

    pub fn grid(&self, id: GridId) -> Result<Arc<GridDescriptor>, CouplerError> {
        self.grids.read().get(id.0).cloned().ok_or(CouplerError::UnknownGrid(id))
    }

    pub fn grid_by_name(&self, name: &str) -> Result<GridId, CouplerError> {
        self.grids
            .read()
            .lookup(name)
            .map(GridId)
            .ok_or_else(|| CouplerError::UnknownGridName(name.to_owned()))
    }

    pub fn decomposition(&self, id: DecompId) -> Result<Arc<DecompDescriptor>, CouplerError> {
        self.decomps.read().get(id.0).cloned().ok_or(CouplerError::UnknownDecomp(id))
    }

    /// Routing context with this session's tags and diagnostics settings.
    pub fn routing_context<'a, G, W>(
        &self,
        group_comm: &'a G,
        world: &'a W,
        local_group: &'a ComponentGroup,
        remote_group: &'a ComponentGroup,
    ) -> RoutingContext<'a, G, W> {
        RoutingContext {
            group_comm,
            world,
            local_group,
            remote_group,
            tags: RoutingTags::from_base(self.config.tag()),
            check_coverage: self.config.check_coverage,
        }
    }

    /// Router between `local` and the decomposition `remote_decomp` of the
    /// remote component, built on first request.
    ///
    /// Collective over both components on a cache miss; every process of
    /// both sides must ask for the same pair in the same order.
    pub fn get_or_build_router<G, W>(
        &self,
        ctx: &RoutingContext<'_, G, W>,
        local: DecompId,
        remote_decomp: &str,
        side: Side,
    ) -> Result<Arc<Router>, CouplerError>
    where
        G: Communicator,
        W: Communicator,
    {
        let decomp = self.decomposition(local)?;
        let remote = ctx.remote_group.name();
        let key = match side {
            Side::Source => RouterKey::new(decomp.component(), remote, decomp.name(), remote_decomp),
            Side::Destination => RouterKey::new(remote, decomp.component(), remote_decomp, decomp.name()),
        };
        self.cached_router(key, || build_router(ctx, &decomp, remote_decomp, side))
    }

    /// Router between two decompositions living on the processes of `comm`.
    pub fn get_or_build_local_router<C: Communicator>(
        &self,
        comm: &C,
        src: DecompId,
        dst: DecompId,
    ) -> Result<Arc<Router>, CouplerError> {
        let s = self.decomposition(src)?;
        let d = self.decomposition(dst)?;
        let key = RouterKey::new(s.component(), d.component(), s.name(), d.name());
        let tags = RoutingTags::from_base(self.config.tag());
        self.cached_router(key, || {
            build_local_router(comm, &s, &d, tags, self.config.check_coverage)
        })
    }

    fn cached_router(
        &self,
        key: RouterKey,
        build: impl FnOnce() -> Result<Router, CouplerError>,
    ) -> Result<Arc<Router>, CouplerError> {
        if let Some(r) = self.routers.read().get(&key) {
            log::debug!("router {key}: cache hit");
            return Ok(Arc::clone(r));
        }
        let router = Arc::new(build()?);
        self.routers.write().insert(key, Arc::clone(&router));
        Ok(router)
    }

    pub fn cached_router_count(&self) -> usize {
        self.routers.read().len()
    }

    /// Weights of `operator` from `src` to `dst` under the given runtime masks.
    ///
    /// Recomputed (and replaced) whenever the effective masks differ from
    /// those of the cached matrix.
    pub fn get_or_build_weights(
        &self,
        src: GridId,
        dst: GridId,
        operator: &dyn RemapOperator,
        src_mask: Option<&[bool]>,
        dst_mask: Option<&[bool]>,
    ) -> Result<Arc<RemapWeights>, CouplerError> {
        let src_state = RuntimeState {
            mask: src_mask,
            coords: None,
        };
        let dst_state = RuntimeState {
            mask: dst_mask,
            coords: None,
        };
        self.get_or_build_weights_at(src, dst, operator, src_state, dst_state)
    }

    /// Weights for grids whose masks or cell coordinates change at runtime.
    ///
    /// The cached matrix is rebuilt when either grid's mask or coordinates
    /// differ from those it was computed with; the cache keeps one entry
    /// per grid pair and operator.
    pub fn get_or_build_weights_at(
        &self,
        src: GridId,
        dst: GridId,
        operator: &dyn RemapOperator,
        src_state: RuntimeState<'_>,
        dst_state: RuntimeState<'_>,
    ) -> Result<Arc<RemapWeights>, CouplerError> {
        let sg = self.grid(src)?;
        let dg = self.grid(dst)?;
        let req = WeightRequest {
            src_id: src,
            dst_id: dst,
            src: &sg,
            dst: &dg,
            operator,
            src_state,
            dst_state,
        };
        self.weights.get_or_compute(&req, self.config.conservation_tolerance)
    }

    pub fn weight_cache(&self) -> &WeightCache {
        &self.weights
    }

    pub fn apply_weights<T: Float>(
        &self,
        weights: &RemapWeights,
        src: &[T],
        dst: &mut [T],
    ) -> Result<(), CouplerError> {
        remap::apply_weights(weights, src, dst)
    }

    /// Reorder `buf` between two explicit axis orders.
    pub fn interchange(
        &self,
        src_axes: &[Axis],
        dst_axes: &[Axis],
        buf: &[u8],
        element_size: usize,
    ) -> Result<Vec<u8>, CouplerError> {
        crate::algs::interchange::interchange(
            src_axes,
            dst_axes,
            buf,
            element_size,
            self.config.interchange_block_bytes,
        )
    }

    /// Reorder `buf` from the axis order of grid `src` to that of grid `dst`,
    /// reusing the cached table.
    pub fn interchange_by_grid(
        &self,
        src: GridId,
        dst: GridId,
        buf: &[u8],
        element_size: usize,
    ) -> Result<Vec<u8>, CouplerError> {
        let table = self.interchange_table(src, dst)?;
        table.apply_bytes(buf, element_size, self.config.interchange_block_bytes)
    }

    pub fn interchange_table(&self, src: GridId, dst: GridId) -> Result<Arc<InterchangeTable>, CouplerError> {
        if let Some(t) = self.interchanges.read().get(&(src, dst)) {
            return Ok(Arc::clone(t));
        }
        let (sg, dg) = (self.grid(src)?, self.grid(dst)?);
        let table = Arc::new(InterchangeTable::from_grids(&sg, &dg)?);
        log::debug!(
            "interchange {:?} -> {:?}: fused extents {:?}",
            src,
            dst,
            table.fused_dims()
        );
        self.interchanges.write().insert((src, dst), Arc::clone(&table));
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::remap::IdentityRemap;

    fn session() -> CouplingSession {
        CouplingSession::new(CouplerConfig::default().with_coverage_check(true))
    }

    #[test]
    fn decomposition_takes_size_from_grid() {
        let s = session();
        let g = s.register_grid(GridDescriptor::new("ocn", vec![Axis::new("x", 4)]).unwrap()).unwrap();
        let d = s.register_decomposition("ocn", "blocks", g, vec![0, 1, 2, 3]).unwrap();
        assert_eq!(s.decomposition(d).unwrap().global_size(), 4);
        assert!(matches!(
            s.register_decomposition("ocn", "bad", g, vec![4]),
            Err(CouplerError::IndexOutOfRange { .. })
        ));
        assert_eq!(s.grid_by_name("ocn").unwrap(), g);
        assert!(matches!(s.grid(GridId(9)), Err(CouplerError::UnknownGrid(GridId(9)))));
    }

    #[test]
    fn local_router_is_cached() {
        let s = session();
        let g = s.register_grid(GridDescriptor::new("g", vec![Axis::new("x", 3)]).unwrap()).unwrap();
        let a = s.register_decomposition("c", "a", g, vec![0, 1, 2]).unwrap();
        let b = s.register_decomposition("c", "b", g, vec![2, 1, 0]).unwrap();
        let r1 = s.get_or_build_local_router(&NoComm, a, b).unwrap();
        let r2 = s.get_or_build_local_router(&NoComm, a, b).unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));
        assert_eq!(s.cached_router_count(), 1);
    }

    #[test]
    fn composite_grid_interchange() {
        let s = session();
        let h = s.register_grid(GridDescriptor::new("h", vec![Axis::new("lon", 2)]).unwrap()).unwrap();
        let v = s.register_grid(GridDescriptor::new("v", vec![Axis::new("lev", 3)]).unwrap()).unwrap();
        let hv = s.register_composite_grid("hv", &[h, v]).unwrap();
        let vh = s.register_composite_grid("vh", &[v, h]).unwrap();
        let buf: Vec<u8> = (0..6).collect();
        let out = s.interchange_by_grid(hv, vh, &buf, 1).unwrap();
        assert_eq!(out, vec![0, 2, 4, 1, 3, 5]);
        let back = s.interchange_by_grid(vh, hv, &out, 1).unwrap();
        assert_eq!(back, buf);
    }

    #[test]
    fn weights_follow_mask_changes() {
        let s = session();
        let g = s.register_grid(GridDescriptor::new("g", vec![Axis::new("x", 2)]).unwrap()).unwrap();
        let w1 = s.get_or_build_weights(g, g, &IdentityRemap, None, None).unwrap();
        let w2 = s.get_or_build_weights(g, g, &IdentityRemap, Some(&[false, true]), None).unwrap();
        assert_eq!(w1.num_weights(), 2);
        assert_eq!(w2.num_weights(), 1);
        let mut dst = [0.0f64; 2];
        s.apply_weights(&w2, &[5.0, 7.0], &mut dst).unwrap();
        assert_eq!(dst, [0.0, 7.0]);
    }
}

//! Decomposition routing: compute, for the local process, which cells go to
//! (or come from) every process of another decomposition of the same grid.
//!
//! The result is a pure function of the two partition tables, so every
//! process derives its part of a globally consistent routing without a
//! controlling process. Matching uses dense lookup tables of size
//! `global_size`, keeping the cost at O(global_size + cells) per process.
//!
//! Ownership rules that keep both sides consistent:
//! - inside one process, the first local position holding a global cell
//!   represents it; later repeats are not routed;
//! - when several source processes hold the same cell, the lowest rank
//!   provides it;
//! - [`UNMAPPED`] local cells never take part.

use crate::algs::communicator::Communicator;
use crate::algs::group::ComponentGroup;
use crate::algs::partition_table::{NO_PROVIDER, PartitionTable, RoutingTags, exchange_tables};
use crate::algs::router::{RecvRoute, RouteRole, Router, RouterKey, SegmentList};
use crate::coupler_error::CouplerError;
use crate::data::decomp::{DecompDescriptor, GlobalIndex, UNMAPPED};
use std::collections::BTreeMap;

const NO_LOCAL: usize = usize::MAX;

/// Which side of the routing pair a decomposition plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Destination,
}

/// Communicators and groups needed to build an inter-component router.
pub struct RoutingContext<'a, G, W> {
    /// Communicator of the local component.
    pub group_comm: &'a G,
    /// Communicator spanning both components (used root to root only).
    pub world: &'a W,
    pub local_group: &'a ComponentGroup,
    pub remote_group: &'a ComponentGroup,
    pub tags: RoutingTags,
    /// Run the sort-and-scan coverage check on the source table.
    pub check_coverage: bool,
}

/// Build the local process's router from the two full partition tables.
///
/// # Errors
/// `GlobalSizeMismatch` when the tables describe index spaces of different size.
pub fn build_router_from_tables(
    key: RouterKey,
    src: &PartitionTable,
    dst: &PartitionTable,
    role: RouteRole,
) -> Result<Router, CouplerError> {
    if src.global_size() != dst.global_size() {
        return Err(CouplerError::GlobalSizeMismatch {
            src_decomp: src.decomp_name().to_owned(),
            src_size: src.global_size(),
            dst_decomp: dst.decomp_name().to_owned(),
            dst_size: dst.global_size(),
        });
    }
    let global_size = src.global_size() as usize;
    let provider = src.first_providers();
    let mut stamps = Stamps::new(global_size);

    let mut send = BTreeMap::new();
    if let Some(p) = role.src_rank() {
        // global -> local position, restricted to cells this process provides
        let lookup = local_lookup(src.part(p), global_size, |g| provider[g] == p as u32);
        for (q, dst_part) in dst.parts().iter().enumerate() {
            stamps.next_generation();
            let mut locals: Vec<usize> = dst_part
                .iter()
                .filter(|&&g| g != UNMAPPED && stamps.first_visit(g))
                .map(|&g| lookup[g as usize])
                .filter(|&l| l != NO_LOCAL)
                .collect();
            if locals.is_empty() {
                continue;
            }
            locals.sort_unstable();
            send.insert(q, SegmentList::from_sorted_indices(&locals));
        }
    }

    let mut recv = BTreeMap::new();
    if let Some(q) = role.dst_rank() {
        let lookup = local_lookup(dst.part(q), global_size, |_| true);
        for (p, src_part) in src.parts().iter().enumerate() {
            stamps.next_generation();
            // message order is the sender's ascending local order
            let locals: Vec<usize> = src_part
                .iter()
                .filter(|&&g| g != UNMAPPED && stamps.first_visit(g))
                .filter(|&&g| provider[g as usize] == p as u32)
                .map(|&g| lookup[g as usize])
                .filter(|&l| l != NO_LOCAL)
                .collect();
            if locals.is_empty() {
                continue;
            }
            recv.insert(p, RecvRoute::from_message_order(&locals));
        }
    }

    let router = Router::from_parts(key, role, src.n_procs(), dst.n_procs(), send, recv);
    log::info!(
        "built router {} for {:?}: {} cells out to {} processes, {} cells in from {} processes",
        router.key(),
        role,
        router.total_send(),
        router.send_remotes().count(),
        router.total_recv(),
        router.recv_remotes().count()
    );
    if router.total_send() == 0 && router.total_recv() == 0 {
        let no_source_cells = provider.iter().all(|&o| o == NO_PROVIDER);
        log::warn!(
            "router {} moves no data for {:?}{}",
            router.key(),
            role,
            if no_source_cells { " (source provides no cells)" } else { "" }
        );
    }
    Ok(router)
}

/// Build an inter-component router on one process of either component.
///
/// `local` is this process's piece of the local decomposition, playing
/// `side`; `remote_decomp` names the decomposition on the other component.
/// Collective over the local component; the two roots talk once over
/// `ctx.world`.
pub fn build_router<G, W>(
    ctx: &RoutingContext<'_, G, W>,
    local: &DecompDescriptor,
    remote_decomp: &str,
    side: Side,
) -> Result<Router, CouplerError>
where
    G: Communicator,
    W: Communicator,
{
    let local_table = PartitionTable::gather(local, ctx.group_comm, ctx.tags.gather)?;
    let remote_full = format!("{}::{}", ctx.remote_group.name(), remote_decomp);
    let remote_table = exchange_tables(
        &local_table,
        &remote_full,
        ctx.group_comm,
        ctx.world,
        ctx.local_group,
        ctx.remote_group,
        ctx.tags,
    )?;
    let rank = ctx.group_comm.rank();
    let (src, dst, key, role) = match side {
        Side::Source => (
            &local_table,
            &remote_table,
            RouterKey::new(
                local.component(),
                ctx.remote_group.name(),
                local.name(),
                remote_decomp,
            ),
            RouteRole::Source(rank),
        ),
        Side::Destination => (
            &remote_table,
            &local_table,
            RouterKey::new(
                ctx.remote_group.name(),
                local.component(),
                remote_decomp,
                local.name(),
            ),
            RouteRole::Destination(rank),
        ),
    };
    if ctx.check_coverage {
        src.check_coverage()?;
    }
    build_router_from_tables(key, src, dst, role)
}

/// Build a router between two decompositions held by the same processes.
///
/// Every process holds its piece of both decompositions; only intra-group
/// all-gathers are needed.
pub fn build_local_router<C>(
    comm: &C,
    src: &DecompDescriptor,
    dst: &DecompDescriptor,
    tags: RoutingTags,
    check_coverage: bool,
) -> Result<Router, CouplerError>
where
    C: Communicator,
{
    let src_table = PartitionTable::gather(src, comm, tags.gather)?;
    let dst_table = PartitionTable::gather(dst, comm, tags.exchange)?;
    if check_coverage {
        src_table.check_coverage()?;
    }
    let key = RouterKey::new(src.component(), dst.component(), src.name(), dst.name());
    build_router_from_tables(key, &src_table, &dst_table, RouteRole::Both(comm.rank()))
}

/// Dense `global -> first local position` map for cells accepted by `keep`.
fn local_lookup(part: &[GlobalIndex], global_size: usize, keep: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut lookup = vec![NO_LOCAL; global_size];
    for (l, &g) in part.iter().enumerate() {
        if g == UNMAPPED {
            continue;
        }
        let g = g as usize;
        if lookup[g] == NO_LOCAL && keep(g) {
            lookup[g] = l;
        }
    }
    lookup
}

/// Generation-stamped visited set, so repeated scans need no clearing.
struct Stamps {
    marks: Vec<u32>,
    generation: u32,
}

impl Stamps {
    fn new(n: usize) -> Self {
        Self {
            marks: vec![0; n],
            generation: 0,
        }
    }

    fn next_generation(&mut self) {
        self.generation += 1;
    }

    /// True the first time `g` is seen in the current generation.
    fn first_visit(&mut self, g: GlobalIndex) -> bool {
        let m = &mut self.marks[g as usize];
        if *m == self.generation {
            false
        } else {
            *m = self.generation;
            true
        }
    }
}

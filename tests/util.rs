#![allow(dead_code)]
use mesh_coupler::{
    algs::communicator::RayonComm,
    algs::group::ComponentGroup,
    algs::partition_table::PartitionTable,
    data::GlobalIndex,
};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

/// One simulated process of a two-component run.
pub struct Endpoint {
    /// `true` on the first component.
    pub first: bool,
    pub rank: usize,
    pub group: RayonComm,
    pub world: RayonComm,
    pub local_group: ComponentGroup,
    pub remote_group: ComponentGroup,
}

/// Run `f` on `na + nb` threads: component `a` on world ranks `0..na`,
/// component `b` on `na..na + nb`. `ctx`, `ctx + 1` and `ctx + 2` are used
/// as mailbox contexts, so concurrent tests must keep them apart.
pub fn coupled_run<R, F>(ctx: u32, na: usize, nb: usize, f: F) -> (Vec<R>, Vec<R>)
where
    R: Send,
    F: Fn(Endpoint) -> R + Sync,
{
    let ga = ComponentGroup::contiguous("a", 0, na).unwrap();
    let gb = ComponentGroup::contiguous("b", na, nb).unwrap();
    let mut endpoints = Vec::with_capacity(na + nb);
    for (first, n) in [(true, na), (false, nb)] {
        let (local, remote, gctx) = if first {
            (&ga, &gb, ctx + 1)
        } else {
            (&gb, &ga, ctx + 2)
        };
        for rank in 0..n {
            endpoints.push(Endpoint {
                first,
                rank,
                group: RayonComm::with_context(gctx, rank, n),
                world: RayonComm::with_context(ctx, local.world_ranks()[rank], na + nb),
                local_group: local.clone(),
                remote_group: remote.clone(),
            });
        }
    }
    let f = &f;
    let mut results: Vec<R> = std::thread::scope(|s| {
        let mut handles = Vec::new();
        for ep in endpoints {
            handles.push(s.spawn(move || f(ep)));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let b = results.split_off(na);
    (results, b)
}

/// Run `f(rank)` for `n` in-process ranks sharing mailbox context `ctx`.
pub fn run_ranks<R, F>(ctx: u32, n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(RayonComm) -> R + Sync,
{
    let f = &f;
    std::thread::scope(|s| {
        let mut handles = Vec::new();
        for r in 0..n {
            handles.push(s.spawn(move || f(RayonComm::with_context(ctx, r, n))));
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// `[0, n)` split into `procs` contiguous blocks (the last ones may be shorter).
pub fn blocks(n: u64, procs: usize) -> Vec<Vec<GlobalIndex>> {
    let per = n.div_ceil(procs as u64).max(1);
    (0..procs as u64)
        .map(|p| (p * per..((p + 1) * per).min(n)).collect())
        .collect()
}

/// Every cell of `[0, n)` given to exactly one of `procs` processes, each
/// process holding its cells in a shuffled local order.
pub fn random_partition(seed: u64, n: u64, procs: usize) -> Vec<Vec<GlobalIndex>> {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut parts = vec![Vec::new(); procs];
    for g in 0..n {
        parts[rng.gen_range(0..procs)].push(g);
    }
    for p in &mut parts {
        p.shuffle(&mut rng);
    }
    parts
}

pub fn table(name: &str, n: u64, parts: Vec<Vec<GlobalIndex>>) -> PartitionTable {
    PartitionTable::new(name, n, parts).unwrap()
}

/// Assert vec is a permutation of another vec (order-agnostic).
pub fn assert_permutation<T: Ord + Copy + std::fmt::Debug>(got: &[T], want: &[T]) {
    let mut a = got.to_vec();
    a.sort_unstable();
    let mut b = want.to_vec();
    b.sort_unstable();
    assert_eq!(a, b, "not a permutation\n got={:?}\nwant={:?}", got, want);
}

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use mesh_coupler::algs::partition_table::PartitionTable;
use mesh_coupler::algs::router::{RouteRole, RouterKey};
use mesh_coupler::algs::routing::build_router_from_tables;

fn blocks(n: u64, procs: usize) -> Vec<Vec<u64>> {
    let per = n.div_ceil(procs as u64);
    (0..procs as u64)
        .map(|p| (p * per..((p + 1) * per).min(n)).collect())
        .collect()
}

fn scattered(n: u64, procs: usize, seed: u64) -> Vec<Vec<u64>> {
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

fn bench_router_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_build");
    let key = RouterKey::new("ocn", "atm", "blocks", "scattered");

    for &n in &[10_000u64, 100_000u64] {
        let src = PartitionTable::new("ocn::blocks", n, blocks(n, 16)).unwrap();
        let dst = PartitionTable::new("atm::scattered", n, scattered(n, 12, 7)).unwrap();

        group.bench_with_input(BenchmarkId::new("sender", n), &n, |b, _| {
            b.iter(|| {
                let r = build_router_from_tables(key.clone(), &src, &dst, RouteRole::Source(3)).unwrap();
                black_box(r);
            });
        });

        group.bench_with_input(BenchmarkId::new("receiver", n), &n, |b, _| {
            b.iter(|| {
                let r = build_router_from_tables(key.clone(), &src, &dst, RouteRole::Destination(5))
                    .unwrap();
                black_box(r);
            });
        });
    }
    group.finish();
}

fn bench_pack(c: &mut Criterion) {
    let n = 100_000u64;
    let src = PartitionTable::new("ocn::blocks", n, blocks(n, 8)).unwrap();
    let dst = PartitionTable::new("atm::scattered", n, scattered(n, 8, 11)).unwrap();
    let key = RouterKey::new("ocn", "atm", "blocks", "scattered");
    let r = build_router_from_tables(key, &src, &dst, RouteRole::Source(0)).unwrap();
    let field: Vec<f64> = (0..src.part(0).len() * 4).map(|i| i as f64).collect();

    c.bench_function("pack_width4", |b| {
        b.iter(|| {
            for q in 0..dst.n_procs() {
                black_box(r.pack_for(q, &field, 4).unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_router_build, bench_pack);
criterion_main!(benches);

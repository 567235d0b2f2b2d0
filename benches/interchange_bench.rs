use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use mesh_coupler::algs::interchange::InterchangeTable;
use mesh_coupler::data::Axis;

fn bench_interchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("interchange");
    let src = vec![Axis::new("lon", 360), Axis::new("lat", 180), Axis::new("lev", 32)];
    let cases = [
        ("lev_fastest", vec![Axis::new("lev", 32), Axis::new("lon", 360), Axis::new("lat", 180)]),
        ("shared_fastest", vec![Axis::new("lon", 360), Axis::new("lev", 32), Axis::new("lat", 180)]),
    ];
    let data: Vec<f64> = (0..360 * 180 * 32).map(|i| i as f64).collect();

    for (name, dst) in &cases {
        let table = InterchangeTable::new(&src, dst).unwrap();
        for &block in &[4 * 1024usize, 32 * 1024, 256 * 1024] {
            group.bench_with_input(BenchmarkId::new(*name, block), &block, |b, &block| {
                b.iter(|| black_box(table.apply(&data, block).unwrap()));
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_interchange);
criterion_main!(benches);

//! A whole timestep through one session: redistribute, reorder, remap.

mod util;
use mesh_coupler::prelude::*;
use serial_test::serial;
use std::sync::Arc;
use util::*;

fn grids(s: &CouplingSession) -> (GridId, GridId, GridId) {
    let h = s
        .register_grid(GridDescriptor::new("h", vec![Axis::uniform("x", 4, 0.0, 4.0)]).unwrap())
        .unwrap();
    let v = s
        .register_grid(GridDescriptor::new("v", vec![Axis::new("lev", 2)]).unwrap())
        .unwrap();
    let hv = s.register_composite_grid("hv", &[h, v]).unwrap();
    (h, v, hv)
}

#[test]
fn registration_is_idempotent_and_checked() {
    let s = CouplingSession::new(CouplerConfig::default());
    let (h, _, hv) = grids(&s);
    let again = s
        .register_grid(GridDescriptor::new("h", vec![Axis::uniform("x", 4, 0.0, 4.0)]).unwrap())
        .unwrap();
    assert_eq!(again, h);
    assert!(matches!(
        s.register_grid(GridDescriptor::new("h", vec![Axis::new("x", 5)]).unwrap()),
        Err(CouplerError::DuplicateRegistration(_))
    ));
    assert_eq!(s.grid(hv).unwrap().total_size(), 8);
    assert_eq!(s.grid_by_name("hv").unwrap(), hv);

    let wrong = DecompDescriptor::new("ocn", "d", 5, vec![0]).unwrap().with_grid(h);
    assert!(matches!(
        s.register_descriptor(wrong),
        Err(CouplerError::GridMismatch { .. })
    ));
}

#[test]
#[serial]
fn two_rank_redistribution_through_session() {
    let results = run_ranks(0x30_00, 2, |comm| {
        let s = CouplingSession::new(CouplerConfig::default().with_coverage_check(true));
        let (_, _, hv) = grids(&s);
        // rank r holds horizontal block r of both levels, then the transpose
        let rows: Vec<u64> = match comm.rank() {
            0 => vec![0, 1, 4, 5],
            _ => vec![2, 3, 6, 7],
        };
        let cols: Vec<u64> = match comm.rank() {
            0 => vec![0, 2, 4, 6],
            _ => vec![1, 3, 5, 7],
        };
        let a = s.register_decomposition("ocn", "rows", hv, rows.clone()).unwrap();
        let b = s.register_decomposition("ocn", "cols", hv, cols.clone()).unwrap();
        let r = s.get_or_build_local_router(&comm, a, b).unwrap();
        let cached = s.get_or_build_local_router(&comm, a, b).unwrap();
        assert!(Arc::ptr_eq(&r, &cached));

        let src: Vec<f32> = rows.iter().map(|&g| g as f32).collect();
        let mut dst = vec![0.0f32; 4];
        redistribute(&r, &comm, &src, &mut dst, 1, CommTag::new(0x77)).unwrap();
        (dst, cols)
    });
    for (dst, cols) in results {
        let want: Vec<f32> = cols.iter().map(|&g| g as f32).collect();
        assert_eq!(dst, want);
    }
}

#[test]
fn reorder_then_remap_levels() {
    let s = CouplingSession::new(CouplerConfig::default().with_block_bytes(64));
    let (h, v, hv) = grids(&s);
    let vh = s.register_composite_grid("vh", &[v, h]).unwrap();

    // field arrives level-fastest ([lev, x]) and is remapped per level ([x, lev])
    let level_fast: Vec<f64> = (0..4)
        .flat_map(|x| [x as f64, 10.0 * x as f64])
        .collect();
    let bytes: Vec<u8> = level_fast.iter().flat_map(|v| v.to_ne_bytes()).collect();
    let out = s.interchange_by_grid(vh, hv, &bytes, 8).unwrap();
    let level_major: Vec<f64> = out
        .chunks_exact(8)
        .map(|c| f64::from_ne_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(level_major, vec![0.0, 1.0, 2.0, 3.0, 0.0, 10.0, 20.0, 30.0]);

    let coarse = s
        .register_grid(GridDescriptor::new("coarse", vec![Axis::uniform("x", 2, 0.0, 4.0)]).unwrap())
        .unwrap();
    let w = s
        .get_or_build_weights(h, coarse, &ConservativeRemap1d, None, None)
        .unwrap();
    let mut dst = vec![0.0; 4];
    apply_weights_levels(&w, &level_major, &mut dst, 2).unwrap();
    assert_eq!(dst, vec![0.5, 2.5, 5.0, 25.0]);
}

#[test]
fn runtime_mask_change_rebuilds_weights() {
    let s = CouplingSession::new(CouplerConfig::default());
    let (h, _, _) = grids(&s);
    let key = mesh_coupler::algs::remap::WeightKey::new(h, h, "identity");
    assert_eq!(s.weight_cache().state(&key), WeightState::Uncomputed);

    let w1 = s.get_or_build_weights(h, h, &IdentityRemap, None, None).unwrap();
    assert_eq!(s.weight_cache().state(&key), WeightState::Computed);
    let same = s.get_or_build_weights(h, h, &IdentityRemap, None, None).unwrap();
    assert!(Arc::ptr_eq(&w1, &same));

    let wet = [true, true, false, true];
    let w2 = s
        .get_or_build_weights(h, h, &IdentityRemap, Some(&wet), None)
        .unwrap();
    assert!(!Arc::ptr_eq(&w1, &w2));
    assert_eq!(w2.num_weights(), 3);
    assert_eq!(s.weight_cache().len(), 1);
}

#[test]
fn moving_coordinates_rebuild_weights_in_place() {
    let s = CouplingSession::new(CouplerConfig::default());
    let fine = s
        .register_grid(GridDescriptor::new("fine", vec![Axis::uniform("x", 4, 0.0, 4.0)]).unwrap())
        .unwrap();
    let coarse = s
        .register_grid(GridDescriptor::new("coarse", vec![Axis::uniform("x", 2, 0.0, 4.0)]).unwrap())
        .unwrap();
    let still = RuntimeState::default();
    let w1 = s
        .get_or_build_weights_at(fine, coarse, &ConservativeRemap1d, still, still)
        .unwrap();

    let moved = vec![vec![0.0, 0.5, 2.0, 3.0, 4.0]];
    let w2 = s
        .get_or_build_weights_at(fine, coarse, &ConservativeRemap1d, RuntimeState::moved(&moved), still)
        .unwrap();
    assert!(!Arc::ptr_eq(&w1, &w2));
    assert_eq!(s.weight_cache().len(), 1);
    let key = mesh_coupler::algs::remap::WeightKey::new(fine, coarse, "conservative-1d");
    assert_eq!(s.weight_cache().state(&key), WeightState::Computed);

    let mut dst = vec![0.0; 2];
    s.apply_weights(&w2, &[1.0, 2.0, 3.0, 4.0], &mut dst).unwrap();
    assert_eq!(dst, vec![1.75, 3.5]);

    // moving back is another rebuild, not a second entry
    let w3 = s
        .get_or_build_weights_at(fine, coarse, &ConservativeRemap1d, still, still)
        .unwrap();
    assert_eq!(*w3, *w1);
    assert_eq!(s.weight_cache().len(), 1);
}

//! Remap operators: the plug-in seam that turns two grids into weights.
//!
//! Operators only produce triplets. Storage, merging, caching and
//! application belong to the rest of the remap module.

use crate::algs::remap::weights::Triplet;
use crate::coupler_error::CouplerError;
use crate::data::grid::GridDescriptor;

/// Computes interpolation weights between two grids.
pub trait RemapOperator: Send + Sync {
    /// Name used in cache keys and diagnostics.
    fn name(&self) -> &str;

    /// Rows of a conservative operator sum to 1, or 0 where nothing contributes.
    fn is_conservative(&self) -> bool {
        false
    }

    /// Triplets over the undecomposed index spaces of `src` and `dst`.
    ///
    /// Masks (`true` = active) are the effective masks for this computation;
    /// inactive cells must not appear in the result.
    fn compute(
        &self,
        src: &GridDescriptor,
        dst: &GridDescriptor,
        src_mask: Option<&[bool]>,
        dst_mask: Option<&[bool]>,
    ) -> Result<Vec<Triplet>, CouplerError>;
}

fn active(mask: Option<&[bool]>, cell: usize) -> bool {
    mask.is_none_or(|m| m[cell])
}

/// Cell `i` to cell `i` with weight 1 between grids of equal size.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityRemap;

impl RemapOperator for IdentityRemap {
    fn name(&self) -> &str {
        "identity"
    }

    fn is_conservative(&self) -> bool {
        true
    }

    fn compute(
        &self,
        src: &GridDescriptor,
        dst: &GridDescriptor,
        src_mask: Option<&[bool]>,
        dst_mask: Option<&[bool]>,
    ) -> Result<Vec<Triplet>, CouplerError> {
        src.expect_same_size(dst)?;
        Ok((0..src.total_size())
            .filter(|&i| active(src_mask, i) && active(dst_mask, i))
            .map(|i| Triplet::new(i, i, 1.0))
            .collect())
    }
}

/// First-order conservative remap between two single-axis grids with cell bounds.
///
/// The weight of source cell `i` in destination cell `j` is the length of
/// their overlap divided by the total overlap of `j` with active source
/// cells, so every covered destination row sums to 1.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConservativeRemap1d;

impl ConservativeRemap1d {
    fn cells(grid: &GridDescriptor) -> Result<Vec<(f64, f64)>, CouplerError> {
        let failed = |reason: String| CouplerError::OperatorFailed {
            operator: "conservative-1d".into(),
            reason,
        };
        let [axis] = grid.axes() else {
            return Err(failed(format!(
                "grid `{}` has {} axes, expected 1",
                grid.name(),
                grid.num_axes()
            )));
        };
        let Some(b) = axis.bounds() else {
            return Err(failed(format!(
                "axis `{}` of grid `{}` has no cell bounds",
                axis.name(),
                grid.name()
            )));
        };
        Ok(b.windows(2).map(|w| (w[0].min(w[1]), w[0].max(w[1]))).collect())
    }
}

impl RemapOperator for ConservativeRemap1d {
    fn name(&self) -> &str {
        "conservative-1d"
    }

    fn is_conservative(&self) -> bool {
        true
    }

    fn compute(
        &self,
        src: &GridDescriptor,
        dst: &GridDescriptor,
        src_mask: Option<&[bool]>,
        dst_mask: Option<&[bool]>,
    ) -> Result<Vec<Triplet>, CouplerError> {
        let s_cells = Self::cells(src)?;
        let d_cells = Self::cells(dst)?;
        // sweep source cells by lower edge; cells of a monotone axis do not overlap
        let mut by_lo: Vec<usize> = (0..s_cells.len()).collect();
        by_lo.sort_unstable_by(|&a, &b| s_cells[a].0.total_cmp(&s_cells[b].0));

        let mut out = Vec::new();
        let mut row: Vec<(usize, f64)> = Vec::new();
        for (j, &(d_lo, d_hi)) in d_cells.iter().enumerate() {
            if !active(dst_mask, j) {
                continue;
            }
            row.clear();
            let first = by_lo.partition_point(|&i| s_cells[i].1 <= d_lo);
            for &i in &by_lo[first..] {
                let (s_lo, s_hi) = s_cells[i];
                if s_lo >= d_hi {
                    break;
                }
                let overlap = s_hi.min(d_hi) - s_lo.max(d_lo);
                if overlap > 0.0 && active(src_mask, i) {
                    row.push((i, overlap));
                }
            }
            let total: f64 = row.iter().map(|r| r.1).sum();
            if total > 0.0 {
                out.extend(row.iter().map(|&(i, o)| Triplet::new(i, j, o / total)));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::grid::Axis;

    fn line(name: &str, bounds: Vec<f64>) -> GridDescriptor {
        GridDescriptor::new(name, vec![Axis::with_bounds("x", bounds)]).unwrap()
    }

    #[test]
    fn identity_drops_masked_cells() {
        let g = GridDescriptor::new("g", vec![Axis::new("x", 3)]).unwrap();
        let t = IdentityRemap
            .compute(&g, &g, Some(&[true, false, true]), None)
            .unwrap();
        assert_eq!(t, vec![Triplet::new(0, 0, 1.0), Triplet::new(2, 2, 1.0)]);
    }

    #[test]
    fn identity_requires_equal_sizes() {
        let a = GridDescriptor::new("a", vec![Axis::new("x", 3)]).unwrap();
        let b = GridDescriptor::new("b", vec![Axis::new("x", 4)]).unwrap();
        assert!(matches!(
            IdentityRemap.compute(&a, &b, None, None),
            Err(CouplerError::GridMismatch { .. })
        ));
    }

    #[test]
    fn coarse_from_fine_averages() {
        let fine = line("fine", vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        let coarse = line("coarse", vec![0.0, 2.0, 4.0]);
        let t = ConservativeRemap1d.compute(&fine, &coarse, None, None).unwrap();
        assert_eq!(
            t,
            vec![
                Triplet::new(0, 0, 0.5),
                Triplet::new(1, 0, 0.5),
                Triplet::new(2, 1, 0.5),
                Triplet::new(3, 1, 0.5)
            ]
        );
    }

    #[test]
    fn masked_source_is_renormalised_away() {
        let fine = line("fine", vec![0.0, 1.0, 2.0]);
        let coarse = line("coarse", vec![0.0, 2.0]);
        let t = ConservativeRemap1d
            .compute(&fine, &coarse, Some(&[false, true]), None)
            .unwrap();
        assert_eq!(t, vec![Triplet::new(1, 0, 1.0)]);
    }

    #[test]
    fn needs_bounds() {
        let g = GridDescriptor::new("g", vec![Axis::new("x", 3)]).unwrap();
        assert!(matches!(
            ConservativeRemap1d.compute(&g, &g, None, None),
            Err(CouplerError::OperatorFailed { .. })
        ));
    }
}

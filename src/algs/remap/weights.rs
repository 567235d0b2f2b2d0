//! Sparse remap weight matrix stored as parallel triplet arrays.

use crate::coupler_error::CouplerError;
use crate::debug_invariants::DebugInvariants;
use serde::{Deserialize, Serialize};

/// One `(source cell, destination cell, weight)` contribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Triplet {
    pub src: usize,
    pub dst: usize,
    pub weight: f64,
}

impl Triplet {
    pub fn new(src: usize, dst: usize, weight: f64) -> Self {
        Self { src, dst, weight }
    }
}

/// Weights of one operator between a source and a destination grid.
///
/// Several triplets may share a destination cell; their contributions add.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemapWeights {
    operator: String,
    src_size: usize,
    dst_size: usize,
    src_index: Vec<usize>,
    dst_index: Vec<usize>,
    weight: Vec<f64>,
}

impl RemapWeights {
    /// Build from parallel arrays.
    ///
    /// # Errors
    /// `InvalidWeights` when the arrays differ in length,
    /// `WeightIndexOutOfRange` for the first index outside its grid.
    pub fn new(
        operator: impl Into<String>,
        src_size: usize,
        dst_size: usize,
        src_index: Vec<usize>,
        dst_index: Vec<usize>,
        weight: Vec<f64>,
    ) -> Result<Self, CouplerError> {
        let w = Self {
            operator: operator.into(),
            src_size,
            dst_size,
            src_index,
            dst_index,
            weight,
        };
        w.validate_invariants()?;
        Ok(w)
    }

    pub fn from_triplets(
        operator: impl Into<String>,
        src_size: usize,
        dst_size: usize,
        triplets: &[Triplet],
    ) -> Result<Self, CouplerError> {
        Self::new(
            operator,
            src_size,
            dst_size,
            triplets.iter().map(|t| t.src).collect(),
            triplets.iter().map(|t| t.dst).collect(),
            triplets.iter().map(|t| t.weight).collect(),
        )
    }

    /// Union of per-partition weights, in partition order.
    ///
    /// Each partition's indices are mapped to the global index space through
    /// its own maps, then the triplets are concatenated. Identical
    /// `(src, dst)` pairs coming from different partitions are kept as
    /// separate contributions.
    pub fn merge_partitions(
        operator: impl Into<String>,
        src_size: usize,
        dst_size: usize,
        parts: &[PartitionWeights<'_>],
    ) -> Result<Self, CouplerError> {
        let operator = operator.into();
        let n: usize = parts.iter().map(|p| p.weights.num_weights()).sum();
        let mut src_index = Vec::with_capacity(n);
        let mut dst_index = Vec::with_capacity(n);
        let mut weight = Vec::with_capacity(n);
        for part in parts {
            let w = part.weights;
            for (k, t) in w.triplets().enumerate() {
                let map = |idx: usize, to_global: &[usize], side| {
                    to_global.get(idx).copied().ok_or(CouplerError::WeightIndexOutOfRange {
                        operator: operator.clone(),
                        triplet: k,
                        side,
                        index: idx,
                        size: to_global.len(),
                    })
                };
                src_index.push(map(t.src, part.src_to_global, "partition source")?);
                dst_index.push(map(t.dst, part.dst_to_global, "partition destination")?);
                weight.push(t.weight);
            }
        }
        log::debug!(
            "merged {} partitions of `{operator}` into {} triplets",
            parts.len(),
            weight.len()
        );
        Self::new(operator, src_size, dst_size, src_index, dst_index, weight)
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    pub fn src_size(&self) -> usize {
        self.src_size
    }

    pub fn dst_size(&self) -> usize {
        self.dst_size
    }

    pub fn num_weights(&self) -> usize {
        self.weight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weight.is_empty()
    }

    pub fn src_index(&self) -> &[usize] {
        &self.src_index
    }

    pub fn dst_index(&self) -> &[usize] {
        &self.dst_index
    }

    pub fn weights(&self) -> &[f64] {
        &self.weight
    }

    pub fn triplets(&self) -> impl Iterator<Item = Triplet> + '_ {
        self.src_index
            .iter()
            .zip(&self.dst_index)
            .zip(&self.weight)
            .map(|((&s, &d), &w)| Triplet::new(s, d, w))
    }

    /// Sum of weights per destination cell.
    pub fn row_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.dst_size];
        for (&d, &w) in self.dst_index.iter().zip(&self.weight) {
            sums[d] += w;
        }
        sums
    }

    /// Every destination row must sum to 1 (or 0 when nothing contributes).
    pub fn check_conservation(&self, tolerance: f64) -> Result<(), CouplerError> {
        let mut touched = vec![false; self.dst_size];
        for &d in &self.dst_index {
            touched[d] = true;
        }
        for (cell, sum) in self.row_sums().into_iter().enumerate() {
            let ok = if touched[cell] {
                (sum - 1.0).abs() <= tolerance || sum.abs() <= tolerance
            } else {
                true
            };
            if !ok {
                return Err(CouplerError::NotConservative {
                    operator: self.operator.clone(),
                    cell,
                    sum,
                    tolerance,
                });
            }
        }
        Ok(())
    }

    /// Destination cells whose weights sum above `1 + tolerance`.
    pub fn rows_exceeding_one(&self, tolerance: f64) -> Vec<usize> {
        self.row_sums()
            .iter()
            .enumerate()
            .filter(|&(_, &s)| s > 1.0 + tolerance)
            .map(|(c, _)| c)
            .collect()
    }
}

impl DebugInvariants for RemapWeights {
    fn validate_invariants(&self) -> Result<(), CouplerError> {
        let n = self.weight.len();
        if self.src_index.len() != n || self.dst_index.len() != n {
            return Err(CouplerError::InvalidWeights {
                operator: self.operator.clone(),
                detail: format!(
                    "{} source indices, {} destination indices, {} weights",
                    self.src_index.len(),
                    self.dst_index.len(),
                    n
                ),
            });
        }
        let out_of_range = |triplet, side, index, size| CouplerError::WeightIndexOutOfRange {
            operator: self.operator.clone(),
            triplet,
            side,
            index,
            size,
        };
        for k in 0..n {
            if self.src_index[k] >= self.src_size {
                return Err(out_of_range(k, "source", self.src_index[k], self.src_size));
            }
            if self.dst_index[k] >= self.dst_size {
                return Err(out_of_range(k, "destination", self.dst_index[k], self.dst_size));
            }
            if !self.weight[k].is_finite() {
                return Err(CouplerError::InvalidWeights {
                    operator: self.operator.clone(),
                    detail: format!("triplet {k} has non-finite weight {}", self.weight[k]),
                });
            }
        }
        Ok(())
    }
}

/// Weights computed on one partition plus the maps taking its local indices to global ones.
#[derive(Clone, Copy, Debug)]
pub struct PartitionWeights<'a> {
    pub weights: &'a RemapWeights,
    pub src_to_global: &'a [usize],
    pub dst_to_global: &'a [usize],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_ragged_and_out_of_range() {
        assert!(matches!(
            RemapWeights::new("op", 2, 2, vec![0], vec![0, 1], vec![1.0]),
            Err(CouplerError::InvalidWeights { .. })
        ));
        let err = RemapWeights::new("op", 2, 1, vec![0, 2], vec![0, 0], vec![0.5, 0.5]).unwrap_err();
        assert_eq!(
            err,
            CouplerError::WeightIndexOutOfRange {
                operator: "op".into(),
                triplet: 1,
                side: "source",
                index: 2,
                size: 2
            }
        );
    }

    #[test]
    fn merge_keeps_duplicate_pairs() {
        let p0 = RemapWeights::from_triplets("op", 2, 1, &[Triplet::new(1, 0, 0.5)]).unwrap();
        let p1 = RemapWeights::from_triplets("op", 2, 1, &[Triplet::new(0, 0, 0.5)]).unwrap();
        let merged = RemapWeights::merge_partitions(
            "op",
            4,
            2,
            &[
                PartitionWeights {
                    weights: &p0,
                    src_to_global: &[0, 2],
                    dst_to_global: &[1],
                },
                PartitionWeights {
                    weights: &p1,
                    src_to_global: &[2, 3],
                    dst_to_global: &[1],
                },
            ],
        )
        .unwrap();
        assert_eq!(merged.src_index(), &[2, 2]);
        assert_eq!(merged.dst_index(), &[1, 1]);
        assert_eq!(merged.row_sums(), vec![0.0, 1.0]);
    }

    #[test]
    fn conservation_accepts_zero_and_unit_rows() {
        let w = RemapWeights::from_triplets(
            "op",
            3,
            3,
            &[Triplet::new(0, 0, 0.25), Triplet::new(1, 0, 0.75), Triplet::new(2, 2, 1.0)],
        )
        .unwrap();
        assert!(w.check_conservation(1e-12).is_ok());
        let bad = RemapWeights::from_triplets("op", 1, 1, &[Triplet::new(0, 0, 1.2)]).unwrap();
        assert!(matches!(
            bad.check_conservation(1e-12),
            Err(CouplerError::NotConservative { cell: 0, .. })
        ));
        assert_eq!(bad.rows_exceeding_one(1e-12), vec![0]);
    }

    #[test]
    fn serde_roundtrip() {
        let w = RemapWeights::from_triplets("op", 2, 1, &[Triplet::new(1, 0, 1.0)]).unwrap();
        let json = serde_json::to_string(&w).unwrap();
        let back: RemapWeights = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }
}

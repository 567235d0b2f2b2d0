//! Apply a sparse weight matrix to field buffers.
//!
//! Contributions accumulate into `dst`, which the caller initialises (to zero
//! or to a fill value); destination cells no triplet reaches are left alone.

use crate::algs::remap::weights::RemapWeights;
use crate::coupler_error::CouplerError;
use num_traits::Float;

/// `dst[dst_index[k]] += weight[k] * src[src_index[k]]` for every triplet.
pub fn apply_weights<T: Float>(weights: &RemapWeights, src: &[T], dst: &mut [T]) -> Result<(), CouplerError> {
    apply_weights_masked(weights, src, dst, None, None)
}

/// Like [`apply_weights`], skipping triplets whose source or destination
/// cell is inactive (`false`) in the given masks.
pub fn apply_weights_masked<T: Float>(
    weights: &RemapWeights,
    src: &[T],
    dst: &mut [T],
    src_mask: Option<&[bool]>,
    dst_mask: Option<&[bool]>,
) -> Result<(), CouplerError> {
    check_len("source field", weights.src_size(), src.len())?;
    check_len("destination field", weights.dst_size(), dst.len())?;
    if let Some(m) = src_mask {
        check_len("source mask", weights.src_size(), m.len())?;
    }
    if let Some(m) = dst_mask {
        check_len("destination mask", weights.dst_size(), m.len())?;
    }
    let w = converted::<T>(weights)?;
    for (k, (&s, &d)) in weights.src_index().iter().zip(weights.dst_index()).enumerate() {
        if src_mask.is_some_and(|m| !m[s]) || dst_mask.is_some_and(|m| !m[d]) {
            continue;
        }
        dst[d] = dst[d] + w[k] * src[s];
    }
    Ok(())
}

/// Apply the same weights to `levels` stacked 2-D fields (level-major:
/// level `l` of `src` is `src[l * src_size..(l + 1) * src_size]`).
pub fn apply_weights_levels<T: Float>(
    weights: &RemapWeights,
    src: &[T],
    dst: &mut [T],
    levels: usize,
) -> Result<(), CouplerError> {
    let (ns, nd) = (weights.src_size(), weights.dst_size());
    check_len("source field", ns * levels, src.len())?;
    check_len("destination field", nd * levels, dst.len())?;
    let w = converted::<T>(weights)?;
    for (s_lev, d_lev) in src.chunks_exact(ns.max(1)).zip(dst.chunks_exact_mut(nd.max(1))) {
        for (k, (&s, &d)) in weights.src_index().iter().zip(weights.dst_index()).enumerate() {
            d_lev[d] = d_lev[d] + w[k] * s_lev[s];
        }
    }
    Ok(())
}

fn converted<T: Float>(weights: &RemapWeights) -> Result<Vec<T>, CouplerError> {
    weights
        .weights()
        .iter()
        .map(|&w| {
            T::from(w).ok_or_else(|| CouplerError::InvalidWeights {
                operator: weights.operator().to_owned(),
                detail: format!("weight {w} is not representable in the field type"),
            })
        })
        .collect()
}

fn check_len(what: &'static str, expected: usize, got: usize) -> Result<(), CouplerError> {
    if got == expected {
        Ok(())
    } else {
        Err(CouplerError::BufferSizeMismatch { what, expected, got })
    }
}

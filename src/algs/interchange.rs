//! Dimension interchange: reorder a flattened field between two axis orders
//! of the same set of axes.
//!
//! Both orders list axes fastest-varying first. Size-1 axes are dropped and
//! runs of axes that stay adjacent in both orders are fused, so a
//! `[lon, lat, lev] -> [lev, lon, lat]` interchange becomes a 2-D transpose
//! of `(lon*lat) x lev`. When the fastest source axis is also the fastest
//! destination axis, whole runs are copied; otherwise the two fastest axes
//! are traversed in square tiles sized to the configured byte budget. The
//! transform only moves memory; it never changes a value.

use crate::coupler_error::CouplerError;
use crate::data::grid::{Axis, GridDescriptor};
use bytemuck::Pod;
use itertools::Itertools;

/// Precomputed permutation between two axis orders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterchangeTable {
    src_axes: Vec<(String, usize)>,
    dst_axes: Vec<(String, usize)>,
    /// `perm[j]` is the source position of destination axis `j`.
    perm: Vec<usize>,
    /// Fused extents, source order.
    dims: Vec<usize>,
    src_strides: Vec<usize>,
    dst_strides: Vec<usize>,
    total: usize,
}

impl InterchangeTable {
    /// Build the table taking data laid out in `src` order to `dst` order.
    ///
    /// # Errors
    /// `InvalidInterchange` unless `dst` is a permutation of `src` with
    /// matching names and sizes, or when an axis is empty.
    pub fn new(src: &[Axis], dst: &[Axis]) -> Result<Self, CouplerError> {
        let src: Vec<(String, usize)> = src.iter().map(|a| (a.name().to_owned(), a.size())).collect();
        let dst: Vec<(String, usize)> = dst.iter().map(|a| (a.name().to_owned(), a.size())).collect();
        let perm = validate(&src, &dst)?;
        Ok(Self::build(src, dst, perm))
    }

    /// Table between the axis orders of two grids.
    pub fn from_grids(src: &GridDescriptor, dst: &GridDescriptor) -> Result<Self, CouplerError> {
        Self::new(src.axes(), dst.axes()).map_err(|e| CouplerError::GridMismatch {
            src_grid: src.name().to_owned(),
            dst_grid: dst.name().to_owned(),
            reason: e.to_string(),
        })
    }

    fn build(src_axes: Vec<(String, usize)>, dst_axes: Vec<(String, usize)>, perm: Vec<usize>) -> Self {
        let n = src_axes.len();
        let mut pos = vec![0usize; n];
        for (j, &i) in perm.iter().enumerate() {
            pos[i] = j;
        }
        // size-1 axes carry no offset; rank the survivors in destination order
        let live: Vec<usize> = (0..n).filter(|&i| src_axes[i].1 > 1).collect();
        let mut dst_rank = vec![0usize; n];
        for (r, i) in live.iter().copied().sorted_by_key(|&i| pos[i]).enumerate() {
            dst_rank[i] = r;
        }

        // groups of source axes that stay adjacent in both orders
        let mut groups: Vec<(usize, usize)> = Vec::new(); // (extent, dst rank of first member)
        let mut last_rank: Option<usize> = None;
        for &i in &live {
            let r = dst_rank[i];
            match groups.last_mut() {
                Some(g) if last_rank.map(|lr| lr + 1) == Some(r) => g.0 *= src_axes[i].1,
                _ => groups.push((src_axes[i].1, r)),
            }
            last_rank = Some(r);
        }

        let dims: Vec<usize> = groups.iter().map(|g| g.0).collect();
        let mut src_strides = Vec::with_capacity(dims.len());
        let mut acc = 1;
        for &d in &dims {
            src_strides.push(acc);
            acc *= d;
        }
        let mut dst_strides = vec![0usize; dims.len()];
        let mut acc = 1;
        for k in (0..groups.len()).sorted_by_key(|&k| groups[k].1) {
            dst_strides[k] = acc;
            acc *= dims[k];
        }
        let total = src_axes.iter().map(|a| a.1).product();
        Self {
            src_axes,
            dst_axes,
            perm,
            dims,
            src_strides,
            dst_strides,
            total,
        }
    }

    /// Table for the opposite direction.
    pub fn inverse(&self) -> Self {
        let mut perm = vec![0usize; self.perm.len()];
        for (j, &i) in self.perm.iter().enumerate() {
            perm[i] = j;
        }
        Self::build(self.dst_axes.clone(), self.src_axes.clone(), perm)
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    /// Number of cells in one field.
    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Both orders lay memory out identically.
    pub fn is_identity(&self) -> bool {
        self.dims.len() <= 1
    }

    /// Fused extents in source order (diagnostics and tests).
    pub fn fused_dims(&self) -> &[usize] {
        &self.dims
    }

    /// Reorder a byte buffer of `element_size`-byte cells.
    pub fn apply_bytes(&self, src: &[u8], element_size: usize, block_bytes: usize) -> Result<Vec<u8>, CouplerError> {
        if element_size == 0 {
            return Err(CouplerError::InvalidInterchange("element size is zero".into()));
        }
        expect_len("interchange source", self.total * element_size, src.len())?;
        let mut out = vec![0u8; src.len()];
        self.permute_into(src, &mut out, element_size, tile_side(block_bytes, element_size));
        Ok(out)
    }

    /// Typed reorder of one field.
    pub fn apply<T: Pod>(&self, src: &[T], block_bytes: usize) -> Result<Vec<T>, CouplerError> {
        expect_len("interchange source", self.total, src.len())?;
        let mut out = vec![T::zeroed(); src.len()];
        self.permute_into(src, &mut out, 1, tile_side(block_bytes, std::mem::size_of::<T>()));
        Ok(out)
    }

    /// Move cells (each `w` consecutive units) from `src` to `dst`.
    fn permute_into<T: Copy>(&self, src: &[T], dst: &mut [T], w: usize, tile: usize) {
        if self.is_identity() {
            dst.copy_from_slice(src);
            return;
        }
        let inner_dst = self
            .dst_strides
            .iter()
            .position(|&s| s == 1)
            .unwrap_or(0);
        let outer: Vec<usize> = (1..self.dims.len()).filter(|&k| k != inner_dst).collect();
        let mut idx = vec![0usize; outer.len()];
        loop {
            let (mut s0, mut d0) = (0, 0);
            for (&k, &i) in outer.iter().zip(&idx) {
                s0 += i * self.src_strides[k];
                d0 += i * self.dst_strides[k];
            }
            if inner_dst == 0 {
                // fastest axis shared: copy whole runs
                let run = self.dims[0] * w;
                dst[d0 * w..d0 * w + run].copy_from_slice(&src[s0 * w..s0 * w + run]);
            } else {
                self.transpose_tiles(src, dst, w, tile, s0, d0, inner_dst);
            }
            if !advance(&mut idx, &outer, &self.dims) {
                break;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn transpose_tiles<T: Copy>(
        &self,
        src: &[T],
        dst: &mut [T],
        w: usize,
        tile: usize,
        s0: usize,
        d0: usize,
        k: usize,
    ) {
        let (n0, nk) = (self.dims[0], self.dims[k]);
        let (ds0, sk) = (self.dst_strides[0], self.src_strides[k]);
        for bk in (0..nk).step_by(tile) {
            for b0 in (0..n0).step_by(tile) {
                for ik in bk..(bk + tile).min(nk) {
                    let s_row = s0 + ik * sk;
                    let d_row = d0 + ik;
                    for i0 in b0..(b0 + tile).min(n0) {
                        let s = (s_row + i0) * w;
                        let d = (d_row + i0 * ds0) * w;
                        dst[d..d + w].copy_from_slice(&src[s..s + w]);
                    }
                }
            }
        }
    }
}

/// Reorder `src` from `src_axes` order to `dst_axes` order in one call.
pub fn interchange(
    src_axes: &[Axis],
    dst_axes: &[Axis],
    src: &[u8],
    element_size: usize,
    block_bytes: usize,
) -> Result<Vec<u8>, CouplerError> {
    InterchangeTable::new(src_axes, dst_axes)?.apply_bytes(src, element_size, block_bytes)
}

fn validate(src: &[(String, usize)], dst: &[(String, usize)]) -> Result<Vec<usize>, CouplerError> {
    let bad = CouplerError::InvalidInterchange;
    if src.len() != dst.len() {
        return Err(bad(format!(
            "source has {} axes, destination has {}",
            src.len(),
            dst.len()
        )));
    }
    if let Some((name, _)) = src.iter().chain(dst).find(|a| a.1 == 0) {
        return Err(bad(format!("axis `{name}` is empty")));
    }
    if let Some(dup) = src.iter().map(|a| &a.0).duplicates().next() {
        return Err(bad(format!("axis `{dup}` appears twice")));
    }
    let mut perm = Vec::with_capacity(dst.len());
    for (name, size) in dst {
        let Some(i) = src.iter().position(|a| &a.0 == name) else {
            return Err(bad(format!("destination axis `{name}` is not a source axis")));
        };
        if src[i].1 != *size {
            return Err(bad(format!(
                "axis `{name}` has size {} in the source but {size} in the destination",
                src[i].1
            )));
        }
        perm.push(i);
    }
    if perm.iter().duplicates().next().is_some() {
        return Err(bad("destination repeats an axis".into()));
    }
    Ok(perm)
}

/// Side of a square tile whose source and destination working set fits `block_bytes`.
fn tile_side(block_bytes: usize, element_size: usize) -> usize {
    let cells = block_bytes / (2 * element_size.max(1));
    ((cells as f64).sqrt() as usize).max(1)
}

/// Odometer over the `outer` dims; false once every combination was visited.
fn advance(idx: &mut [usize], outer: &[usize], dims: &[usize]) -> bool {
    for (i, &k) in idx.iter_mut().zip(outer) {
        *i += 1;
        if *i < dims[k] {
            return true;
        }
        *i = 0;
    }
    false
}

fn expect_len(what: &'static str, expected: usize, got: usize) -> Result<(), CouplerError> {
    if got == expected {
        Ok(())
    } else {
        Err(CouplerError::BufferSizeMismatch { what, expected, got })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axes(extents: &[(&str, usize)]) -> Vec<Axis> {
        extents.iter().map(|&(n, s)| Axis::new(n, s)).collect()
    }

    #[test]
    fn identity_is_byte_identical() {
        let a = axes(&[("lon", 3), ("lat", 2)]);
        let buf: Vec<u8> = (0..24).collect();
        let out = interchange(&a, &a, &buf, 4, 64).unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn transpose_2d() {
        // src [x=3, y=2]: value = x + 3y; dst [y, x]: position = y + 2x
        let t = InterchangeTable::new(&axes(&[("x", 3), ("y", 2)]), &axes(&[("y", 2), ("x", 3)])).unwrap();
        let src: Vec<u32> = (0..6).collect();
        assert_eq!(t.apply(&src, 8).unwrap(), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn adjacent_axes_are_fused() {
        let t = InterchangeTable::new(
            &axes(&[("lon", 4), ("lat", 3), ("lev", 2)]),
            &axes(&[("lev", 2), ("lon", 4), ("lat", 3)]),
        )
        .unwrap();
        assert_eq!(t.fused_dims(), &[12, 2]);
        let src: Vec<u16> = (0..24).collect();
        let out = t.apply(&src, 32 * 1024).unwrap();
        // dst position = lev + 2 * (lon + 4 * lat)
        assert_eq!(out[1], 12);
        assert_eq!(out[2], 1);
        assert_eq!(t.inverse().apply(&out, 16).unwrap(), src);
    }

    #[test]
    fn singleton_axes_do_not_force_a_copy_pattern() {
        let t = InterchangeTable::new(&axes(&[("a", 1), ("b", 5)]), &axes(&[("b", 5), ("a", 1)])).unwrap();
        assert!(t.is_identity());
    }

    #[test]
    fn rejects_foreign_or_resized_axes() {
        let src = axes(&[("x", 3), ("y", 2)]);
        assert!(matches!(
            InterchangeTable::new(&src, &axes(&[("y", 2), ("z", 3)])),
            Err(CouplerError::InvalidInterchange(_))
        ));
        assert!(matches!(
            InterchangeTable::new(&src, &axes(&[("y", 3), ("x", 3)])),
            Err(CouplerError::InvalidInterchange(_))
        ));
        assert!(InterchangeTable::new(&src, &axes(&[("y", 2)])).is_err());
    }

    #[test]
    fn empty_axis_is_rejected() {
        let err = interchange(
            &axes(&[("x", 3), ("y", 0), ("z", 4)]),
            &axes(&[("z", 4), ("y", 0), ("x", 3)]),
            &[],
            4,
            64,
        )
        .unwrap_err();
        assert_eq!(err, CouplerError::InvalidInterchange("axis `y` is empty".into()));
    }

    #[test]
    fn wrong_buffer_length() {
        let a = axes(&[("x", 3)]);
        assert!(matches!(
            interchange(&a, &a, &[0u8; 5], 2, 64),
            Err(CouplerError::BufferSizeMismatch { expected: 6, got: 5, .. })
        ));
    }
}

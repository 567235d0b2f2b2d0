//! Fixed, versioned, little-endian wire types for routing exchanges.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Copy `bytes` into a fresh vector of `T`; `bytes.len()` must be a multiple of `size_of::<T>()`.
pub fn read_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let sz = size_of::<T>();
    if bytes.len() % sz != 0 {
        return Err(format!(
            "{} bytes is not a whole number of {sz}-byte records",
            bytes.len()
        ));
    }
    let mut out = vec![T::zeroed(); bytes.len() / sz];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Record kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const PARTITION_TABLE: u16 = 1;
}

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,  // = WIRE_VERSION.to_le()
    pub kind_le: u16,     // see `kind`
    pub reserved_le: u32, // future use; keep zero
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Byte length of a variable-sized message that follows on another tag.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}
impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global cell index carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIndex {
    pub idx_le: u64,
}
impl WireIndex {
    pub fn of(idx: u64) -> Self {
        Self { idx_le: idx.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.idx_le)
    }
}

// ===== Partition tables ====================================================

/// Header of a serialized partition table; followed by `n_procs` [`WireCount`]s
/// (padded to 8 bytes) and then all [`WireIndex`] records in process order.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireTableHead {
    pub hdr: WireHdr,
    pub global_size_le: u64,
    pub n_procs_le: u32,
    pub _pad: u32,
}
impl WireTableHead {
    pub const SIZE: usize = 24;
    pub fn new(global_size: u64, n_procs: usize) -> Self {
        Self {
            hdr: WireHdr::new(kind::PARTITION_TABLE),
            global_size_le: global_size.to_le(),
            n_procs_le: (n_procs as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn global_size(&self) -> u64 {
        u64::from_le(self.global_size_le)
    }
    pub fn n_procs(&self) -> usize {
        u32::from_le(self.n_procs_le) as usize
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireLen>(), 8);
const_assert_eq!(size_of::<WireIndex>(), 8);
const_assert_eq!(size_of::<WireTableHead>(), WireTableHead::SIZE);
const_assert_eq!(align_of::<WireTableHead>(), 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_head_roundtrip() {
        let h = WireTableHead::new(1 << 40, 3);
        let bytes: Vec<u8> = cast_slice(&[h]).to_vec();
        let out: Vec<WireTableHead> = read_records(&bytes).unwrap();
        assert_eq!(out[0].global_size(), 1 << 40);
        assert_eq!(out[0].n_procs(), 3);
        assert_eq!(out[0].hdr.kind(), kind::PARTITION_TABLE);
        assert_eq!(out[0].hdr.version(), WIRE_VERSION);
    }

    #[test]
    fn ragged_records_rejected() {
        assert!(read_records::<WireIndex>(&[0u8; 12]).is_err());
    }
}

//! Router: the cached routing table that drives field transfers.
//!
//! For every remote process a router holds a run-length encoded list of
//! local index segments to pack (send side) or fill (receive side). Segment
//! lists are sorted ascending, disjoint, and cover exactly the number of
//! cells exchanged with that remote process. Message elements travel in the
//! sender's ascending local order; when the receiver's ascending order visits
//! the shared cells differently, the receive route also stores the local
//! index of every message element, so unpacking is a single scatter.
//!
//! A router is read-only once built. A changed decomposition produces a new
//! router under a new key instead of mutating an existing one.

use crate::coupler_error::CouplerError;
use crate::debug_invariants::DebugInvariants;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A contiguous run `[start, start + len)` of local cell indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub len: usize,
}

impl Segment {
    #[inline]
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Ascending, disjoint segments plus their total length.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentList {
    segments: Vec<Segment>,
    total: usize,
}

impl SegmentList {
    /// Run-length encode strictly ascending local indices.
    ///
    /// A new segment starts whenever an index is not the previous one plus one.
    pub fn from_sorted_indices(indices: &[usize]) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        for &i in indices {
            match segments.last_mut() {
                Some(s) if s.end() == i => s.len += 1,
                _ => segments.push(Segment { start: i, len: 1 }),
            }
        }
        let list = Self {
            segments,
            total: indices.len(),
        };
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        list.debug_assert_invariants();
        list
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Local indices covered, in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments.iter().flat_map(|s| s.start..s.end())
    }

    /// One past the largest local index covered (0 when empty).
    pub fn extent(&self) -> usize {
        self.segments.last().map_or(0, Segment::end)
    }
}

impl DebugInvariants for SegmentList {
    fn validate_invariants(&self) -> Result<(), CouplerError> {
        let bad = CouplerError::InvalidRoute;
        let mut sum = 0usize;
        let mut prev_end: Option<usize> = None;
        for s in &self.segments {
            if s.len == 0 {
                return Err(bad(format!("empty segment at {}", s.start)));
            }
            if let Some(e) = prev_end {
                if s.start < e {
                    return Err(bad(format!("segment at {} overlaps or is out of order", s.start)));
                }
            }
            prev_end = Some(s.end());
            sum += s.len;
        }
        if sum != self.total {
            return Err(bad(format!("segments cover {sum} cells, total says {}", self.total)));
        }
        Ok(())
    }
}

/// Receive-side route: where incoming elements land.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvRoute {
    segments: SegmentList,
    /// `targets[k]` is the receiver-local index of message element `k`.
    /// `None` when message order equals ascending local order.
    targets: Option<Vec<u32>>,
}

impl RecvRoute {
    /// Build from the receiver-local indices in message order.
    pub fn from_message_order(locals: &[usize]) -> Self {
        let mut sorted = locals.to_vec();
        sorted.sort_unstable();
        let targets = if sorted.as_slice() == locals {
            None
        } else {
            Some(locals.iter().map(|&l| l as u32).collect())
        };
        Self {
            segments: SegmentList::from_sorted_indices(&sorted),
            targets,
        }
    }

    pub fn segments(&self) -> &SegmentList {
        &self.segments
    }

    /// Local index of each message element, when it differs from ascending order.
    pub fn targets(&self) -> Option<&[u32]> {
        self.targets.as_deref()
    }
}

/// Which side(s) of a routing pair the local process sits on, and its rank there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteRole {
    /// Local process is rank `r` of the source decomposition only.
    Source(usize),
    /// Local process is rank `r` of the destination decomposition only.
    Destination(usize),
    /// Source and destination share a process set; local rank `r` on both.
    Both(usize),
}

impl RouteRole {
    pub fn src_rank(&self) -> Option<usize> {
        match *self {
            RouteRole::Source(r) | RouteRole::Both(r) => Some(r),
            RouteRole::Destination(_) => None,
        }
    }

    pub fn dst_rank(&self) -> Option<usize> {
        match *self {
            RouteRole::Destination(r) | RouteRole::Both(r) => Some(r),
            RouteRole::Source(_) => None,
        }
    }
}

/// Cache key of a router.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouterKey {
    pub src_component: String,
    pub dst_component: String,
    pub src_decomp: String,
    pub dst_decomp: String,
}

impl RouterKey {
    pub fn new(
        src_component: impl Into<String>,
        dst_component: impl Into<String>,
        src_decomp: impl Into<String>,
        dst_decomp: impl Into<String>,
    ) -> Self {
        Self {
            src_component: src_component.into(),
            dst_component: dst_component.into(),
            src_decomp: src_decomp.into(),
            dst_decomp: dst_decomp.into(),
        }
    }
}

impl fmt::Display for RouterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{} -> {}::{}",
            self.src_component, self.src_decomp, self.dst_component, self.dst_decomp
        )
    }
}

/// Per-process routing table between two decompositions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {
    key: RouterKey,
    role: RouteRole,
    n_src_procs: usize,
    n_dst_procs: usize,
    send: BTreeMap<usize, SegmentList>,
    recv: BTreeMap<usize, RecvRoute>,
}

impl Router {
    pub(crate) fn from_parts(
        key: RouterKey,
        role: RouteRole,
        n_src_procs: usize,
        n_dst_procs: usize,
        send: BTreeMap<usize, SegmentList>,
        recv: BTreeMap<usize, RecvRoute>,
    ) -> Self {
        let r = Self {
            key,
            role,
            n_src_procs,
            n_dst_procs,
            send,
            recv,
        };
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        r.debug_assert_invariants();
        r
    }

    pub fn key(&self) -> &RouterKey {
        &self.key
    }

    pub fn role(&self) -> RouteRole {
        self.role
    }

    /// Segments exchanged with `remote` (a destination rank when `is_send`,
    /// a source rank otherwise). Empty when nothing is exchanged.
    ///
    /// # Errors
    /// `UnknownRemote` if `remote` is not a rank of the other decomposition.
    pub fn get_segment_list(&self, remote: usize, is_send: bool) -> Result<&[Segment], CouplerError> {
        self.check_remote(remote, is_send)?;
        let segs = if is_send {
            self.send.get(&remote).map(SegmentList::segments)
        } else {
            self.recv.get(&remote).map(|r| r.segments.segments())
        };
        Ok(segs.unwrap_or(&[]))
    }

    /// Number of cells exchanged with `remote` in the given direction.
    pub fn get_total_elements(&self, remote: usize, is_send: bool) -> Result<usize, CouplerError> {
        self.check_remote(remote, is_send)?;
        Ok(if is_send {
            self.send.get(&remote).map_or(0, SegmentList::total)
        } else {
            self.recv.get(&remote).map_or(0, |r| r.segments.total())
        })
    }

    /// Destination ranks this process sends to, ascending.
    pub fn send_remotes(&self) -> impl Iterator<Item = usize> + '_ {
        self.send.keys().copied()
    }

    /// Source ranks this process receives from, ascending.
    pub fn recv_remotes(&self) -> impl Iterator<Item = usize> + '_ {
        self.recv.keys().copied()
    }

    pub fn recv_route(&self, remote: usize) -> Option<&RecvRoute> {
        self.recv.get(&remote)
    }

    /// Total cells sent to all remotes.
    pub fn total_send(&self) -> usize {
        self.send.values().map(SegmentList::total).sum()
    }

    /// Total cells received from all remotes.
    pub fn total_recv(&self) -> usize {
        self.recv.values().map(|r| r.segments.total()).sum()
    }

    /// Gather the values bound for `remote` out of `field` (`width` values per cell).
    pub fn pack_for<T: Copy>(&self, remote: usize, field: &[T], width: usize) -> Result<Vec<T>, CouplerError> {
        self.check_remote(remote, true)?;
        let Some(list) = self.send.get(&remote) else {
            return Ok(Vec::new());
        };
        expect_at_least("source field", list.extent() * width, field.len())?;
        let mut out = Vec::with_capacity(list.total() * width);
        for s in list.segments() {
            out.extend_from_slice(&field[s.start * width..s.end() * width]);
        }
        Ok(out)
    }

    /// Scatter a message received from `remote` into `field` (`width` values per cell).
    pub fn unpack_from<T: Copy>(
        &self,
        remote: usize,
        msg: &[T],
        field: &mut [T],
        width: usize,
    ) -> Result<(), CouplerError> {
        self.check_remote(remote, false)?;
        let Some(route) = self.recv.get(&remote) else {
            return expect_len("message", 0, msg.len());
        };
        let list = &route.segments;
        expect_len("message", list.total() * width, msg.len())?;
        expect_at_least("destination field", list.extent() * width, field.len())?;
        match &route.targets {
            None => {
                let mut at = 0;
                for s in list.segments() {
                    let n = s.len * width;
                    field[s.start * width..s.end() * width].copy_from_slice(&msg[at..at + n]);
                    at += n;
                }
            }
            Some(targets) => {
                for (k, &l) in targets.iter().enumerate() {
                    let l = l as usize;
                    field[l * width..(l + 1) * width].copy_from_slice(&msg[k * width..(k + 1) * width]);
                }
            }
        }
        Ok(())
    }

    fn check_remote(&self, remote: usize, is_send: bool) -> Result<(), CouplerError> {
        let (n, direction) = if is_send {
            (self.n_dst_procs, "send")
        } else {
            (self.n_src_procs, "receive")
        };
        let on_side = if is_send {
            self.role.src_rank().is_some()
        } else {
            self.role.dst_rank().is_some()
        };
        if remote >= n || !on_side {
            return Err(CouplerError::UnknownRemote {
                router: self.key.to_string(),
                direction,
                remote,
            });
        }
        Ok(())
    }
}

fn expect_len(what: &'static str, expected: usize, got: usize) -> Result<(), CouplerError> {
    if got == expected {
        Ok(())
    } else {
        Err(CouplerError::BufferSizeMismatch { what, expected, got })
    }
}

// fields may extend past the last routed cell
fn expect_at_least(what: &'static str, expected: usize, got: usize) -> Result<(), CouplerError> {
    if got >= expected {
        Ok(())
    } else {
        Err(CouplerError::BufferSizeMismatch { what, expected, got })
    }
}

impl DebugInvariants for Router {
    fn validate_invariants(&self) -> Result<(), CouplerError> {
        for list in self.send.values() {
            list.validate_invariants()?;
        }
        for route in self.recv.values() {
            route.segments.validate_invariants()?;
            if let Some(targets) = &route.targets {
                let mut sorted: Vec<usize> = targets.iter().map(|&l| l as usize).collect();
                sorted.sort_unstable();
                if !sorted.iter().copied().eq(route.segments.indices()) {
                    return Err(CouplerError::InvalidRoute(format!(
                        "unpack targets of {} do not match its segments",
                        self.key
                    )));
                }
            }
        }
        Ok(())
    }
}

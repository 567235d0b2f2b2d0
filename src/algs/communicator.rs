//! Thin façade over intra-process (in-memory mailbox) or inter-process (MPI)
//! message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Point-to-point handles are **waitable** but non-blocking: callers must
//! `.wait()` before trusting that a receive buffer is ready. The collectives
//! used by routing (all-gather and broadcast of variable-length byte
//! buffers) are provided methods built on top of point-to-point so every
//! backend gets them; MPI overrides them with native collectives.

use crate::algs::wire::{WireLen, cast_slice, cast_slice_mut};
use crate::coupler_error::CouplerError;
use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;

/// Typed message tag. Routing exchanges derive sub-tags with [`CommTag::offset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(v: u16) -> Self {
        CommTag(v)
    }

    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }

    /// Tag `k` slots after this one (wrapping).
    #[inline]
    pub fn offset(self, k: u16) -> Self {
        CommTag(self.0.wrapping_add(k))
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking communication interface plus the two collectives routing needs.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Rank of this process within the communicator.
    fn rank(&self) -> usize;
    /// Number of processes in the communicator.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `buf.len()` bytes; longer messages are truncated.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Every rank contributes `local`; every rank gets all contributions in rank order.
    ///
    /// Uses `tag` for the length stage and `tag.offset(1)` for the payload stage.
    /// All posted handles are drained before returning, even on error.
    fn allgather_bytes(&self, tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, CouplerError> {
        let me = self.rank();
        let n = self.size();
        let peers: Vec<usize> = (0..n).filter(|&r| r != me).collect();

        // stage 1: lengths
        let mut len_recvs = Vec::with_capacity(peers.len());
        for &p in &peers {
            let mut w = WireLen::new(0);
            let h = self.irecv(p, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut w)));
            len_recvs.push((p, h));
        }
        let my_len = WireLen::new(local.len());
        let len_sends: Vec<_> = peers
            .iter()
            .map(|&p| self.isend(p, tag.as_u16(), cast_slice(std::slice::from_ref(&my_len))))
            .collect();
        let mut lens = Vec::with_capacity(peers.len());
        let mut maybe_err = None;
        for (p, h) in len_recvs {
            match decode_len(p, h.wait()) {
                Ok(len) => lens.push((p, len)),
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            }
        }
        for s in len_sends {
            let _ = s.wait();
        }
        if let Some(e) = maybe_err {
            return Err(e);
        }

        // stage 2: payloads
        let data_tag = tag.offset(1).as_u16();
        let mut data_recvs = Vec::with_capacity(lens.len());
        for &(p, len) in &lens {
            let mut buf = vec![0u8; len];
            let h = self.irecv(p, data_tag, &mut buf);
            data_recvs.push((p, len, h));
        }
        let data_sends: Vec<_> = peers
            .iter()
            .map(|&p| self.isend(p, data_tag, local))
            .collect();
        let mut out = vec![Vec::new(); n];
        out[me] = local.to_vec();
        for (p, len, h) in data_recvs {
            match expect_payload(p, len, h.wait()) {
                Ok(data) => out[p] = data,
                Err(e) => {
                    maybe_err.get_or_insert(e);
                }
            }
        }
        for s in data_sends {
            let _ = s.wait();
        }
        match maybe_err {
            Some(e) => Err(e),
            None => Ok(out),
        }
    }

    /// Broadcast `data` from `root`; non-root ranks may pass an empty slice.
    fn broadcast_bytes(&self, tag: CommTag, root: usize, data: &[u8]) -> Result<Vec<u8>, CouplerError> {
        let me = self.rank();
        let data_tag = tag.offset(1).as_u16();
        if me == root {
            let len = WireLen::new(data.len());
            let mut sends = Vec::new();
            for p in (0..self.size()).filter(|&r| r != root) {
                sends.push(self.isend(p, tag.as_u16(), cast_slice(std::slice::from_ref(&len))));
                sends.push(self.isend(p, data_tag, data));
            }
            for s in sends {
                let _ = s.wait();
            }
            return Ok(data.to_vec());
        }
        let mut w = WireLen::new(0);
        let h = self.irecv(root, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut w)));
        let len = decode_len(root, h.wait())?;
        let mut buf = vec![0u8; len];
        let h = self.irecv(root, data_tag, &mut buf);
        expect_payload(root, len, h.wait())
    }

    /// Blocking send of a variable-length buffer (length first, then payload).
    fn send_bytes(&self, peer: usize, tag: CommTag, data: &[u8]) {
        let len = WireLen::new(data.len());
        let a = self.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&len)));
        let b = self.isend(peer, tag.offset(1).as_u16(), data);
        let _ = a.wait();
        let _ = b.wait();
    }

    /// Blocking receive matching [`Communicator::send_bytes`].
    fn recv_bytes(&self, peer: usize, tag: CommTag) -> Result<Vec<u8>, CouplerError> {
        let mut w = WireLen::new(0);
        let h = self.irecv(peer, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut w)));
        let len = decode_len(peer, h.wait())?;
        let mut buf = vec![0u8; len];
        let h = self.irecv(peer, tag.offset(1).as_u16(), &mut buf);
        expect_payload(peer, len, h.wait())
    }
}

fn decode_len(peer: usize, got: Option<Vec<u8>>) -> Result<usize, CouplerError> {
    match got {
        Some(data) if data.len() == std::mem::size_of::<WireLen>() => {
            let mut w = WireLen::new(0);
            cast_slice_mut(std::slice::from_mut(&mut w)).copy_from_slice(&data);
            Ok(w.get())
        }
        Some(data) => Err(CouplerError::CommError {
            neighbor: peer,
            source: format!(
                "expected {} bytes for length header, got {}",
                std::mem::size_of::<WireLen>(),
                data.len()
            )
            .into(),
        }),
        None => Err(CouplerError::CommError {
            neighbor: peer,
            source: format!("failed to receive length from rank {peer}").into(),
        }),
    }
}

fn expect_payload(peer: usize, len: usize, got: Option<Vec<u8>>) -> Result<Vec<u8>, CouplerError> {
    match got {
        Some(data) if data.len() == len => Ok(data),
        Some(data) => Err(CouplerError::CommError {
            neighbor: peer,
            source: format!("expected {len} payload bytes, got {}", data.len()).into(),
        }),
        // a zero-length payload may legitimately come back empty-handed
        None if len == 0 => Ok(Vec::new()),
        None => Err(CouplerError::CommError {
            neighbor: peer,
            source: "no data received (wait returned None)".into(),
        }),
    }
}

/// Compile-time no-op comm for pure serial use: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (u32, usize, usize, u16); // (context, src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

/// Receive handle of [`RayonComm`]; `wait` blocks until a matching message is posted.
pub struct LocalHandle {
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            let popped = MAILBOX.get_mut(&self.key).and_then(|mut queue| queue.pop_front());
            if let Some(bytes) = popped {
                // drained queues leave the map; a later send recreates the entry
                MAILBOX.remove_if(&self.key, |_, queue| queue.is_empty());
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: each "process" is a thread holding its own
/// `RayonComm`. Communicators with different `context` values never see each
/// other's messages, which lets one thread hold a world communicator and a
/// component communicator at the same time. Delivery is FIFO per
/// `(context, src, dst, tag)`.
#[derive(Clone, Debug)]
pub struct RayonComm {
    context: u32,
    rank: usize,
    size: usize,
}

impl RayonComm {
    pub fn new(rank: usize, size: usize) -> Self {
        Self::with_context(0, rank, size)
    }

    pub fn with_context(context: u32, rank: usize, size: usize) -> Self {
        Self { context, rank, size }
    }

    pub fn context(&self) -> u32 {
        self.context
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.context, self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            key: (self.context, peer, self.rank, tag),
            len: buf.len(),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI-backed communicator over any `SimpleCommunicator` (world or a component split).
    pub struct MpiComm {
        pub comm: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        pub fn new(comm: SimpleCommunicator) -> Self {
            let rank = comm.rank() as usize;
            let size = comm.size() as usize;
            Self { comm, rank, size }
        }
    }

    // SAFETY: each process drives the coupling core from a single thread.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    /// Pending immediate send; owns the leaked payload until completion.
    pub struct MpiSendHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    // SAFETY: the buffer is only touched again after the request completed.
    unsafe impl Send for MpiSendHandle {}

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            // SAFETY: `buf` came from `Box::leak` in `isend` and MPI no longer reads it.
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }
    }

    /// Deferred blocking receive; matched when waited on.
    pub struct MpiRecvHandle<'a> {
        comm: &'a SimpleCommunicator,
        peer: i32,
        tag: i32,
        len: usize,
    }

    impl Wait for MpiRecvHandle<'_> {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut data, _status) = self
                .comm
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            data.truncate(self.len);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle<'static>;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let leaked: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr: *mut [u8] = leaked;
            let req = self
                .comm
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*leaked, tag as i32);
            MpiSendHandle { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle<'static> {
            // SAFETY: an MpiComm lives for the whole coupled run (it is created
            // once after MPI init and dropped at shutdown).
            let comm: &'static SimpleCommunicator = unsafe { &*(&self.comm as *const _) };
            MpiRecvHandle {
                comm,
                peer: peer as i32,
                tag: tag as i32,
                len: buf.len(),
            }
        }

        fn allgather_bytes(&self, _tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, CouplerError> {
            use mpi::datatype::PartitionMut;
            let my_len = local.len() as i32;
            let mut lens = vec![0i32; self.size];
            self.comm.all_gather_into(&my_len, &mut lens[..]);
            let displs: Vec<i32> = lens
                .iter()
                .scan(0i32, |acc, &l| {
                    let d = *acc;
                    *acc += l;
                    Some(d)
                })
                .collect();
            let total: i32 = lens.iter().sum();
            let mut flat = vec![0u8; total as usize];
            {
                let mut part = PartitionMut::new(&mut flat[..], &lens[..], &displs[..]);
                self.comm.all_gather_varcount_into(local, &mut part);
            }
            Ok(lens
                .iter()
                .zip(&displs)
                .map(|(&l, &d)| flat[d as usize..(d + l) as usize].to_vec())
                .collect())
        }

        fn broadcast_bytes(&self, _tag: CommTag, root: usize, data: &[u8]) -> Result<Vec<u8>, CouplerError> {
            let root_proc = self.comm.process_at_rank(root as i32);
            let mut len = data.len() as u64;
            root_proc.broadcast_into(&mut len);
            let mut buf = if self.rank == root {
                data.to_vec()
            } else {
                vec![0u8; len as usize]
            };
            root_proc.broadcast_into(&mut buf[..]);
            Ok(buf)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        // Simulate rank 0 and rank 1 in the same process:
        let comm0 = RayonComm::with_context(0x7001, 0, 2);
        let comm1 = RayonComm::with_context(0x7001, 1, 2);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        comm0.isend(1, 7, &[1, 2, 3, 4]).wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn drained_mailbox_keys_are_removed() {
        let c0 = RayonComm::with_context(0x7004, 0, 2);
        let c1 = RayonComm::with_context(0x7004, 1, 2);
        let mut buf = [0u8; 2];
        c0.isend(1, 3, &[1, 2]);
        c0.isend(1, 3, &[3, 4]);
        assert_eq!(c1.irecv(0, 3, &mut buf).wait(), Some(vec![1, 2]));
        assert!(MAILBOX.contains_key(&(0x7004, 0, 1, 3)));
        assert_eq!(c1.irecv(0, 3, &mut buf).wait(), Some(vec![3, 4]));
        assert!(!MAILBOX.iter().any(|e| e.key().0 == 0x7004));
    }

    #[test]
    fn contexts_are_isolated() {
        let a0 = RayonComm::with_context(0x7002, 0, 2);
        let b0 = RayonComm::with_context(0x7003, 0, 2);
        let b1 = RayonComm::with_context(0x7003, 1, 2);
        a0.isend(1, 1, &[9]);
        b0.isend(1, 1, &[5]);
        let mut buf = [0u8; 1];
        assert_eq!(b1.irecv(0, 1, &mut buf).wait(), Some(vec![5]));
    }

    #[test]
    fn no_comm_collectives_are_local() {
        let comm = NoComm;
        let all = comm.allgather_bytes(CommTag::new(1), &[1, 2, 3]).unwrap();
        assert_eq!(all, vec![vec![1, 2, 3]]);
        let b = comm.broadcast_bytes(CommTag::new(3), 0, &[4]).unwrap();
        assert_eq!(b, vec![4]);
    }

    #[test]
    fn commtag_offset_wraps() {
        assert_eq!(CommTag::new(u16::MAX).offset(2), CommTag::new(1));
    }
}

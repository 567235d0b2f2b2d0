//! Drive a field transfer with a [`Router`] over a [`Communicator`].
//!
//! Fields are cell-major: `width` consecutive values per local cell (one per
//! vertical level, for example). Every message is sized from the router, so
//! no length exchange precedes the payload. Every message is packed and
//! every peer checked before the first handle is posted; once posted,
//! receives come before sends and all handles are waited on, matching the
//! completion exchanges.
//!
//! `peers[r]` is the communicator rank of remote process `r` (for an
//! inter-component transfer over a world communicator, the remote group's
//! `world_ranks()`).

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::router::Router;
use crate::algs::wire::{cast_slice, read_records};
use crate::coupler_error::CouplerError;
use bytemuck::Pod;

/// Send this process's share of `field` to every destination process.
pub fn send_field<T, C>(
    router: &Router,
    comm: &C,
    peers: &[usize],
    field: &[T],
    width: usize,
    tag: CommTag,
) -> Result<(), CouplerError>
where
    T: Pod,
    C: Communicator,
{
    // pack everything first so a bad field or peer map posts nothing
    let mut outgoing = Vec::new();
    for q in router.send_remotes() {
        outgoing.push((peer_rank(peers, q)?, router.pack_for(q, field, width)?));
    }
    let pending: Vec<_> = outgoing
        .iter()
        .map(|(peer, msg)| comm.isend(*peer, tag.as_u16(), cast_slice(msg)))
        .collect();
    log::debug!(
        "{}: posted {} sends ({} cells, width {width})",
        router.key(),
        pending.len(),
        router.total_send()
    );
    for h in pending {
        let _ = h.wait();
    }
    Ok(())
}

/// Receive from every source process and scatter into `field`.
///
/// Cells this process does not receive keep their previous value.
pub fn recv_field<T, C>(
    router: &Router,
    comm: &C,
    peers: &[usize],
    field: &mut [T],
    width: usize,
    tag: CommTag,
) -> Result<(), CouplerError>
where
    T: Pod,
    C: Communicator,
{
    let mut expected = Vec::new();
    for p in router.recv_remotes() {
        let n = router.get_total_elements(p, false)? * width;
        expected.push((p, peer_rank(peers, p)?, n * std::mem::size_of::<T>()));
    }
    let mut posted = Vec::with_capacity(expected.len());
    for (p, peer, len) in expected {
        let mut buf = vec![0u8; len];
        let h = comm.irecv(peer, tag.as_u16(), &mut buf);
        posted.push((p, peer, len, h));
    }
    let mut maybe_err = None;
    for (p, peer, len, h) in posted {
        let res = receive_into(router, p, peer, len, h.wait(), field, width);
        if let Err(e) = res {
            maybe_err.get_or_insert(e);
        }
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Move `src` (source decomposition) into `dst` (destination decomposition)
/// when both decompositions live on the processes of `comm`.
///
/// The share a process keeps for itself is copied without messaging.
pub fn redistribute<T, C>(
    router: &Router,
    comm: &C,
    src: &[T],
    dst: &mut [T],
    width: usize,
    tag: CommTag,
) -> Result<(), CouplerError>
where
    T: Pod,
    C: Communicator,
{
    let me = comm.rank();
    let mut expected = Vec::new();
    for p in router.recv_remotes().filter(|&p| p != me) {
        expected.push((p, router.get_total_elements(p, false)? * width * std::mem::size_of::<T>()));
    }
    let mut outgoing = Vec::new();
    for q in router.send_remotes() {
        outgoing.push((q, router.pack_for(q, src, width)?));
    }
    if let Some((_, own)) = outgoing.iter().find(|(q, _)| *q == me) {
        router.unpack_from(me, own, dst, width)?;
    }

    let mut posted = Vec::with_capacity(expected.len());
    for (p, len) in expected {
        let mut buf = vec![0u8; len];
        let h = comm.irecv(p, tag.as_u16(), &mut buf);
        posted.push((p, len, h));
    }
    let sends: Vec<_> = outgoing
        .iter()
        .filter(|(q, _)| *q != me)
        .map(|(q, msg)| comm.isend(*q, tag.as_u16(), cast_slice(msg)))
        .collect();
    let mut maybe_err = None;
    for (p, len, h) in posted {
        if let Err(e) = receive_into(router, p, p, len, h.wait(), dst, width) {
            maybe_err.get_or_insert(e);
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    match maybe_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn peer_rank(peers: &[usize], remote: usize) -> Result<usize, CouplerError> {
    peers.get(remote).copied().ok_or(CouplerError::BufferSizeMismatch {
        what: "peer rank map",
        expected: remote + 1,
        got: peers.len(),
    })
}

fn receive_into<T: Pod>(
    router: &Router,
    remote: usize,
    peer: usize,
    len: usize,
    got: Option<Vec<u8>>,
    field: &mut [T],
    width: usize,
) -> Result<(), CouplerError> {
    let raw = match got {
        Some(raw) => raw,
        None if len == 0 => Vec::new(),
        None => {
            return Err(CouplerError::CommError {
                neighbor: peer,
                source: "no field data received".into(),
            });
        }
    };
    if raw.len() != len {
        return Err(CouplerError::CommError {
            neighbor: peer,
            source: format!("expected {len} bytes of field data, got {}", raw.len()).into(),
        });
    }
    let msg: Vec<T> = read_records(&raw).map_err(CouplerError::Wire)?;
    router.unpack_from(remote, &msg, field, width)
}

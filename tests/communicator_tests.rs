mod util;
use mesh_coupler::algs::communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
use serial_test::serial;
use util::run_ranks;

#[test]
fn rayon_round_trip() {
    let tag = CommTag(0x1000);
    let c0 = RayonComm::with_context(0x20_00, 0, 2);
    let c1 = RayonComm::with_context(0x20_00, 1, 2);

    let msg = b"hello";
    c0.isend(1, tag.as_u16(), msg);

    let mut buf = [0u8; 5];
    let h = c1.irecv(0, tag.as_u16(), &mut buf);
    let got = h.wait().unwrap();
    assert_eq!(&got, msg);
}

#[test]
fn rayon_fifo_order() {
    let tag = CommTag(0x1001);
    let c0 = RayonComm::with_context(0x20_01, 0, 2);
    let c1 = RayonComm::with_context(0x20_01, 1, 2);

    for i in 0..10u8 {
        c0.isend(1, tag.as_u16(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = c1.irecv(0, tag.as_u16(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn truncation_is_ok() {
    let tag = CommTag(0x1002);
    let c0 = RayonComm::with_context(0x20_02, 0, 2);
    let c1 = RayonComm::with_context(0x20_02, 1, 2);

    c0.isend(1, tag.as_u16(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let h = c1.irecv(0, tag.as_u16(), &mut b);
    let got = h.wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
#[serial]
fn allgather_variable_lengths() {
    let all = run_ranks(0x20_10, 3, |c| {
        let mine = vec![c.rank() as u8; c.rank() * 2];
        c.allgather_bytes(CommTag::new(0x40), &mine).unwrap()
    });
    let want = vec![vec![], vec![1, 1], vec![2, 2, 2, 2]];
    for got in all {
        assert_eq!(got, want);
    }
}

#[test]
#[serial]
fn broadcast_from_nonzero_root() {
    let all = run_ranks(0x20_11, 4, |c| {
        let data: &[u8] = if c.rank() == 2 { b"table" } else { &[] };
        c.broadcast_bytes(CommTag::new(0x50), 2, data).unwrap()
    });
    assert!(all.iter().all(|b| b == b"table"));
}

#[test]
#[serial]
fn send_recv_bytes_pair() {
    let got = run_ranks(0x20_12, 2, |c| {
        if c.rank() == 0 {
            c.send_bytes(1, CommTag::new(0x60), &[7; 33]);
            Vec::new()
        } else {
            c.recv_bytes(0, CommTag::new(0x60)).unwrap()
        }
    });
    assert_eq!(got[1], vec![7; 33]);
}

#[test]
fn no_comm_is_single_rank() {
    let c = NoComm;
    assert_eq!((c.rank(), c.size()), (0, 1));
    assert_eq!(c.allgather_bytes(CommTag::new(1), b"x").unwrap(), vec![b"x".to_vec()]);
}

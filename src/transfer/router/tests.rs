//! Unit tests for backlog reconciliation and session lifecycle.

use std::{fs, num::NonZeroUsize, time::Duration};

use bytes::Bytes;
use proptest::prelude::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::packet::StreamMetadata;

const ID: TransferId = TransferId::new(42);

#[fixture]
fn spool() -> TempDir { tempfile::tempdir().expect("spool dir") }

fn router(spool: &TempDir) -> TransferRouter { TransferRouter::new(spool.path(), RouterLimits::default()) }

fn start(count: i32, len: i64) -> Packet {
    Packet::FileStreamStart(FileStreamStart {
        name: "photo.jpg".into(),
        label: "/home/ada/photo.jpg".into(),
        transfer_id: ID,
        fragment_count: count,
        file_length: len,
        metadata: StreamMetadata::new(),
    })
}

fn fragment(index: i32, data: Vec<u8>) -> Packet {
    Packet::FileFragment(FileFragment {
        name: "photo.jpg".into(),
        transfer_id: ID,
        index,
        data: Bytes::from(data),
    })
}

fn close() -> Packet {
    Packet::FileStreamClose(FileStreamClose {
        name: "photo.jpg".into(),
        transfer_id: ID,
    })
}

fn terminate() -> Packet {
    Packet::TerminateFileStream(TerminateFileStream {
        name: "photo.jpg".into(),
        transfer_id: ID,
    })
}

fn completed(events: Vec<TransferEvent>) -> Vec<CompletedTransfer> {
    events
        .into_iter()
        .filter_map(|event| match event {
            TransferEvent::Completed(done) => Some(done),
            _ => None,
        })
        .collect()
}

fn spool_files(dir: &TempDir) -> usize { fs::read_dir(dir.path()).expect("list").count() }

#[rstest]
fn three_fragments_out_of_order_merge_to_original_bytes(spool: TempDir) {
    let mut router = router(&spool);
    let parts = [vec![b'a'; 100], vec![b'b'; 100], vec![b'c'; 50]];

    assert!(router.route(start(3, 250)).is_empty());
    for index in [1, 0, 2] {
        let idx = usize::try_from(index).expect("index");
        assert!(router.route(fragment(index, parts[idx].clone())).is_empty());
    }
    let mut done = completed(router.route(close()));
    assert_eq!(done.len(), 1);

    let transfer = done.remove(0);
    assert_eq!(transfer.start.name, "photo.jpg");
    assert_eq!(transfer.file.len(), 250);
    assert_eq!(transfer.file.read_all().expect("read"), parts.concat());
    assert_eq!(router.active_sessions(), 0);
    assert_eq!(spool_files(&spool), 0);
}

#[rstest]
fn fragments_before_start_are_backlogged_then_drained(spool: TempDir) {
    let mut router = router(&spool);
    router.route(fragment(1, b"world".to_vec()));
    router.route(fragment(0, b"hello ".to_vec()));
    assert_eq!(router.pending_fragments(), 2);
    assert_eq!(spool_files(&spool), 0);

    router.route(start(2, 11));
    assert_eq!(router.pending_fragments(), 0);

    let done = completed(router.route(close()));
    let file = done.into_iter().next().expect("completed").file;
    assert_eq!(file.read_all().expect("read"), b"hello world");
}

#[rstest]
fn close_before_last_fragment_resolves_later(spool: TempDir) {
    let mut router = router(&spool);
    router.route(start(2, 2));
    router.route(fragment(0, b"x".to_vec()));
    assert!(completed(router.route(close())).is_empty());
    assert_eq!(router.pending_closes(), 1);

    let done = completed(router.route(fragment(1, b"y".to_vec())));
    assert_eq!(done.len(), 1);
    assert_eq!(router.pending_closes(), 0);
}

#[rstest]
fn close_before_start_resolves_when_fragments_arrive(spool: TempDir) {
    let mut router = router(&spool);
    router.route(close());
    router.route(fragment(0, b"z".to_vec()));
    assert!(completed(router.route(start(1, 1))).len() == 1);
    assert_eq!(router.pending_closes(), 0);
    assert_eq!(router.pending_fragments(), 0);
}

#[rstest]
fn terminate_releases_storage_and_backlog(spool: TempDir) {
    let mut router = router(&spool);
    router.route(start(4, 4));
    router.route(fragment(0, b"a".to_vec()));
    router.route(fragment(2, b"c".to_vec()));
    assert_eq!(spool_files(&spool), 2);

    let events = router.route(terminate());
    assert!(matches!(
        events.as_slice(),
        [TransferEvent::Terminated { transfer_id, .. }] if *transfer_id == ID
    ));
    assert_eq!(router.active_sessions(), 0);
    assert_eq!(spool_files(&spool), 0);

    // stragglers of the aborted transfer are dropped, not backlogged
    router.route(fragment(3, b"d".to_vec()));
    assert!(completed(router.route(close())).is_empty());
    assert_eq!(router.active_sessions(), 0);
    assert_eq!(router.pending_fragments(), 0);
    assert_eq!(router.pending_closes(), 0);
}

#[rstest]
fn terminated_ids_are_forgotten_once_the_memory_is_full(spool: TempDir) {
    let mut router = router(&spool);
    router.route(terminate());
    for id in 0..64 {
        router.route(Packet::TerminateFileStream(TerminateFileStream {
            name: "other.bin".into(),
            transfer_id: TransferId::new(1_000 + id),
        }));
    }
    router.route(fragment(0, b"a".to_vec()));
    assert_eq!(router.pending_fragments(), 1);
}

#[rstest]
fn terminate_for_unknown_transfer_is_a_noop(spool: TempDir) {
    let mut router = router(&spool);
    assert!(router.route(terminate()).is_empty());
    assert_eq!(router.active_sessions(), 0);
}

#[rstest]
fn same_name_transfers_do_not_collide(spool: TempDir) {
    let mut router = router(&spool);
    let other = TransferId::new(43);
    router.route(start(1, 1));
    router.route(Packet::FileStreamStart(FileStreamStart {
        name: "photo.jpg".into(),
        label: "elsewhere".into(),
        transfer_id: other,
        fragment_count: 1,
        file_length: 1,
        metadata: StreamMetadata::new(),
    }));
    router.route(Packet::FileFragment(FileFragment {
        name: "photo.jpg".into(),
        transfer_id: other,
        index: 0,
        data: Bytes::from_static(b"2"),
    }));
    router.route(fragment(0, b"1".to_vec()));

    let first = completed(router.route(close()));
    assert_eq!(first[0].start.transfer_id, ID);
    assert_eq!(router.active_sessions(), 1);
}

#[rstest]
fn fragment_backlog_evicts_oldest_when_full(spool: TempDir) {
    let limits = RouterLimits {
        max_backlog_per_transfer: NonZeroUsize::new(2).expect("non-zero"),
        ..RouterLimits::default()
    };
    let mut router = TransferRouter::new(spool.path(), limits);
    for index in 0..3 {
        router.route(fragment(index, vec![b'x']));
    }
    assert_eq!(router.pending_fragments(), 2);

    router.route(start(3, 3));
    let session = &router.sessions[0];
    assert_eq!(session.received_count(), 2);
    assert!(!session.is_complete());
}

fn fragment_for(id: u64, index: i32) -> Packet {
    Packet::FileFragment(FileFragment {
        name: "photo.jpg".into(),
        transfer_id: TransferId::new(id),
        index,
        data: Bytes::from_static(b"x"),
    })
}

#[rstest]
fn fragment_backlog_is_capped_across_transfers(spool: TempDir) {
    let limits = RouterLimits {
        max_pending_fragments: NonZeroUsize::new(3).expect("non-zero"),
        ..RouterLimits::default()
    };
    let mut router = TransferRouter::new(spool.path(), limits);
    for id in 100..110 {
        router.route(fragment_for(id, 0));
    }
    assert_eq!(router.pending_fragments(), 3);

    router.route(Packet::FileStreamStart(FileStreamStart {
        name: "photo.jpg".into(),
        label: "photo.jpg".into(),
        transfer_id: TransferId::new(100),
        fragment_count: 2,
        file_length: 2,
        metadata: StreamMetadata::new(),
    }));
    assert_eq!(router.pending_fragments(), 2);
    assert_eq!(router.sessions[0].received_count(), 1);

    router.route(fragment_for(200, 0));
    assert_eq!(router.pending_fragments(), 3);
    router.route(fragment_for(201, 0));
    assert_eq!(router.pending_fragments(), 3);
}

#[rstest]
fn full_transfer_backlog_still_rotates_at_the_global_cap(spool: TempDir) {
    let limits = RouterLimits {
        max_backlog_per_transfer: NonZeroUsize::new(2).expect("non-zero"),
        max_pending_fragments: NonZeroUsize::new(2).expect("non-zero"),
        ..RouterLimits::default()
    };
    let mut router = TransferRouter::new(spool.path(), limits);
    for index in 0..4 {
        router.route(fragment(index, vec![b'x']));
    }
    assert_eq!(router.pending_fragments(), 2);

    router.route(start(4, 4));
    let session = &router.sessions[0];
    assert_eq!(session.received_count(), 2);
    assert!(!session.is_complete());
}

#[rstest]
fn expired_backlog_entries_free_global_capacity(spool: TempDir) {
    let mut router = router(&spool);
    let t0 = Instant::now();
    router.route_at(fragment_for(7, 0), t0);
    router.route_at(fragment_for(8, 0), t0 + Duration::from_secs(200));
    assert_eq!(router.pending_fragments(), 2);

    router.purge_expired_at(t0 + Duration::from_secs(300));
    assert_eq!(router.pending_fragments(), 1);
}

#[rstest]
fn close_backlog_is_bounded(spool: TempDir) {
    let limits = RouterLimits {
        max_pending_closes: NonZeroUsize::new(1).expect("non-zero"),
        ..RouterLimits::default()
    };
    let mut router = TransferRouter::new(spool.path(), limits);
    router.route(close());
    router.route(Packet::FileStreamClose(FileStreamClose {
        name: "other".into(),
        transfer_id: ID,
    }));
    assert_eq!(router.pending_closes(), 1);
}

#[rstest]
fn stalled_sessions_expire_and_release_storage(spool: TempDir) {
    let mut router = router(&spool);
    let t0 = Instant::now();
    router.route_at(start(2, 2), t0);
    router.route_at(fragment(0, b"a".to_vec()), t0);
    assert_eq!(spool_files(&spool), 1);

    assert_eq!(router.purge_expired_at(t0 + Duration::from_secs(299)), 0);
    assert_eq!(router.purge_expired_at(t0 + Duration::from_secs(300)), 1);
    assert_eq!(router.active_sessions(), 0);
    assert_eq!(spool_files(&spool), 0);
}

#[rstest]
fn clear_releases_everything(spool: TempDir) {
    let mut router = router(&spool);
    router.route(start(3, 3));
    router.route(fragment(1, b"b".to_vec()));
    router.route(Packet::FileFragment(FileFragment {
        name: "early.bin".into(),
        transfer_id: TransferId::new(1),
        index: 0,
        data: Bytes::new(),
    }));
    router.clear();
    assert_eq!(router.active_sessions(), 0);
    assert_eq!(router.pending_fragments(), 0);
    assert_eq!(spool_files(&spool), 0);
}

#[rstest]
fn empty_file_completes_with_zero_bytes(spool: TempDir) {
    let mut router = router(&spool);
    router.route(start(1, 0));
    router.route(fragment(0, Vec::new()));
    let done = completed(router.route(close()));
    assert!(done[0].file.is_empty());
}

fn permutation(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    #[test]
    fn any_arrival_order_reconstructs_the_file(
        order in (1usize..12).prop_flat_map(permutation),
        start_at in any::<prop::sample::Index>(),
    ) {
        let spool = tempfile::tempdir().expect("spool dir");
        let mut router = TransferRouter::new(spool.path(), RouterLimits::default());
        let n = order.len();
        let chunk = |i: usize| vec![u8::try_from(i).expect("small"); 3 + i % 4];
        let expected: Vec<u8> = (0..n).flat_map(chunk).collect();
        let start_slot = start_at.index(n + 1);

        let mut done = Vec::new();
        for (slot, &index) in order.iter().enumerate() {
            if slot == start_slot {
                done.extend(completed(router.route(start(i32::try_from(n).expect("n"), 0))));
            }
            done.extend(completed(router.route(fragment(i32::try_from(index).expect("index"), chunk(index)))));
        }
        if start_slot == n {
            done.extend(completed(router.route(start(i32::try_from(n).expect("n"), 0))));
        }
        done.extend(completed(router.route(close())));

        prop_assert_eq!(done.len(), 1);
        let file = done.remove(0).file;
        prop_assert_eq!(file.read_all().expect("read"), expected);
        prop_assert_eq!(fs::read_dir(spool.path()).expect("list").count(), 0);
    }
}

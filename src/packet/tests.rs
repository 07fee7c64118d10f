use bytes::Bytes;
use rstest::rstest;

use super::*;

fn fragment(index: i32, data: &'static [u8]) -> FileFragment {
    FileFragment {
        name: "a.bin".into(),
        transfer_id: TransferId::new(7),
        index,
        data: Bytes::from_static(data),
    }
}

#[test]
fn fragment_layout_is_name_id_index_length_bytes() {
    let bytes = Packet::from(fragment(2, b"xyz")).encode().expect("encode");
    let mut expected = b"a.bin\0".to_vec();
    expected.extend_from_slice(&7u64.to_be_bytes());
    expected.extend_from_slice(&2i32.to_be_bytes());
    expected.extend_from_slice(&3i32.to_be_bytes());
    expected.extend_from_slice(b"xyz");
    assert_eq!(&bytes[..], &expected[..]);
}

#[test]
fn start_without_metadata_ends_after_length() {
    let start = FileStreamStart {
        name: "a.bin".into(),
        label: "/tmp/a.bin".into(),
        transfer_id: TransferId::new(1),
        fragment_count: 3,
        file_length: 250,
        metadata: StreamMetadata::new(),
    };
    let bytes = Packet::from(start.clone()).encode().expect("encode");
    assert_eq!(bytes.len(), "a.bin\0/tmp/a.bin\0".len() + 8 + 4 + 8);
    assert_eq!(
        Packet::decode(PacketKind::FileStreamStart, bytes).expect("decode"),
        Packet::FileStreamStart(start)
    );
}

#[test]
fn start_carries_metadata_bag() {
    let start = FileStreamStart {
        name: "report.pdf".into(),
        label: "report.pdf".into(),
        transfer_id: TransferId::next(),
        fragment_count: 1,
        file_length: 10,
        metadata: StreamMetadata::new()
            .with(keys::SHARED, MetaValue::Flag(true))
            .with(keys::DOWNLOADERS, MetaValue::TextList(vec!["grace".into()])),
    };
    let packet = Packet::from(start);
    let bytes = packet.encode().expect("encode");
    assert_eq!(Packet::decode(PacketKind::FileStreamStart, bytes).expect("decode"), packet);
}

#[rstest]
#[case::truncated_data(PacketKind::FileFragment, {
    let mut b = b"a\0".to_vec();
    b.extend_from_slice(&1u64.to_be_bytes());
    b.extend_from_slice(&0i32.to_be_bytes());
    b.extend_from_slice(&10i32.to_be_bytes());
    b.extend_from_slice(b"short");
    b
})]
#[case::negative_length(PacketKind::FileFragment, {
    let mut b = b"a\0".to_vec();
    b.extend_from_slice(&1u64.to_be_bytes());
    b.extend_from_slice(&0i32.to_be_bytes());
    b.extend_from_slice(&(-1i32).to_be_bytes());
    b
})]
#[case::negative_count(PacketKind::FileStreamStart, {
    let mut b = b"a\0a\0".to_vec();
    b.extend_from_slice(&1u64.to_be_bytes());
    b.extend_from_slice(&(-5i32).to_be_bytes());
    b.extend_from_slice(&0i64.to_be_bytes());
    b
})]
#[case::short_password_hash(PacketKind::Login, {
    let mut b = (-1i32).to_be_bytes().to_vec();
    b.extend_from_slice(b"ada\0");
    b.extend_from_slice(&[0u8; 16]);
    b
})]
#[case::empty_close(PacketKind::FileStreamClose, Vec::new())]
fn malformed_payloads_are_rejected(#[case] kind: PacketKind, #[case] bytes: Vec<u8>) {
    assert!(Packet::decode(kind, Bytes::from(bytes)).is_err());
}

#[test]
fn login_round_trips_fixed_hash() {
    let login = Login {
        account_id: NEW_ACCOUNT,
        username: "ada".into(),
        password_hash: [0x5A; PASSWORD_HASH_LEN],
        version: PROTOCOL_VERSION,
    };
    let bytes = Packet::from(login.clone()).encode().expect("encode");
    assert_eq!(bytes.len(), 4 + 4 + PASSWORD_HASH_LEN + 2);
    assert_eq!(
        Packet::decode(PacketKind::Login, bytes).expect("decode"),
        Packet::Login(login)
    );
}

#[test]
fn files_list_request_is_empty() {
    assert!(Packet::from(FilesListRequest).encode().expect("encode").is_empty());
}

#[test]
fn transfer_control_classification() {
    assert!(Packet::from(fragment(0, b"")).is_transfer_control());
    assert!(!Packet::from(InfoLog::new("hi")).is_transfer_control());
}

#[test]
fn same_transfer_requires_name_and_id() {
    let a = fragment(0, b"");
    let close = FileStreamClose::for_transfer(&a);
    assert!(a.same_transfer(&close));

    let other_id = FileStreamClose {
        transfer_id: TransferId::new(8),
        ..close.clone()
    };
    assert!(!a.same_transfer(&other_id));
}

#[test]
fn transfer_ids_are_unique() {
    let first = TransferId::next();
    let second = TransferId::next();
    assert!(second > first);
}

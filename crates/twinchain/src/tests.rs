//! Unit tests for twinchain
//!
//! End-to-end tests of the chain engine against real files.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;
use twin_crypto::sha256_hex;
use twin_storage::PackedKv;

use crate::record::{self, Record};
use crate::{
    ANCHOR_PAYLOAD, ChainError, ChainLock, CodecError, FieldPacker, Store, StoreConfig,
    resolve_data_path,
};

const ANCHOR_SHA256: &str = "7f240b314ab796fa0fed489eadb5a98edb83bdb7c955372cbcae988435713756";
const FIXED_HEADER: &str = "00000000-0000-1000-8000-000000000001";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_config() -> StoreConfig {
    StoreConfig::new()
        .with_fsync(false)
        .with_lock_timeout(Duration::from_secs(5))
}

fn setup_store() -> (Store, PathBuf, TempDir) {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t1");
    let store = Store::open_with_config(&path, test_config()).unwrap();
    (store, path, dir)
}

fn append_series(store: &mut Store, count: usize) {
    for i in 0..count {
        store.append(format!("r{i}")).unwrap();
    }
}

/// Rewrites the packed file with record `target` edited, keeping every key.
///
/// Stands in for someone editing the file behind the store's back. The store
/// must be closed while this runs.
fn rewrite_record(data_path: &Path, target: usize, mut edit: impl FnMut(&mut Record) -> Bytes) {
    let source = PackedKv::open(data_path, false).unwrap();
    let scratch = data_path.with_file_name("rewrite.pydb");
    let mut copy = PackedKv::open(&scratch, false).unwrap();

    for index in 0..source.size() {
        let (key, value) = source.get(index).unwrap().into_parts();
        let value = if index == target {
            let mut record = record::parse(&FieldPacker, &value).unwrap();
            edit(&mut record)
        } else {
            value
        };
        copy.append(key, value).unwrap();
    }
    drop(source);
    drop(copy);

    fs::rename(&scratch, data_path).unwrap();
    fs::rename(
        scratch.with_extension("pidx"),
        data_path.with_extension("pidx"),
    )
    .unwrap();
}

fn repack(record: &Record) -> Bytes {
    record::encode_fields(&FieldPacker, record).unwrap().into()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[test]
fn new_store_holds_only_the_anchor() {
    let (mut store, path, _dir) = setup_store();

    assert_eq!(store.size().unwrap(), 1);
    assert_eq!(store.data_path(), path.with_extension("pydb"));
    assert_eq!(store.lock_path(), path.with_extension("ulock"));

    let anchor = store.get_record(0).unwrap();
    assert_eq!(anchor.payload.as_ref(), ANCHOR_PAYLOAD);
    assert_eq!(anchor.backlink, "");
    assert_eq!(anchor.hash256, ANCHOR_SHA256);
    assert_eq!(anchor.protocol, "1.0");
    crate::validate_header(&anchor.header).unwrap();

    assert!(store.verify_payload(0).unwrap());
    assert!(!store.verify_link(0).unwrap());
}

#[test]
fn reopening_does_not_write_a_second_anchor() {
    let (mut store, path, _dir) = setup_store();
    let anchor_header = store.get_header(0).unwrap();
    store.append(b"one").unwrap();
    store.close().unwrap();

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert_eq!(store.size().unwrap(), 2);
    assert_eq!(store.get_header(0).unwrap(), anchor_header);
}

#[test]
fn explicit_extension_is_kept() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.chain");

    let store = Store::open_with_config(&path, test_config()).unwrap();
    assert_eq!(store.data_path(), path.as_path());
    assert_eq!(store.lock_path(), dir.path().join("ledger.ulock"));
}

#[test]
fn resolve_uses_configured_extension() {
    let config = StoreConfig::new().with_extension("twin");
    assert_eq!(
        resolve_data_path(Path::new("/x/ledger"), &config).unwrap(),
        PathBuf::from("/x/ledger.twin")
    );
    assert_eq!(
        resolve_data_path(Path::new("/x/ledger.db"), &config).unwrap(),
        PathBuf::from("/x/ledger.db")
    );
}

#[test]
fn lock_and_index_extensions_are_rejected() {
    let dir = TempDir::new().unwrap();

    for name in ["ledger.ulock", "ledger.pidx"] {
        let path = dir.path().join(name);
        assert!(matches!(
            Store::open_with_config(&path, test_config()),
            Err(ChainError::Validation { field: "path", .. })
        ));
        assert!(!path.exists());
    }

    let config = test_config().with_extension("ulock");
    assert!(matches!(
        resolve_data_path(Path::new("/x/ledger"), &config),
        Err(ChainError::Validation { field: "path", .. })
    ));
}

// ============================================================================
// Append and Read
// ============================================================================

#[test]
fn single_append_links_to_anchor() {
    let (mut store, _path, _dir) = setup_store();

    assert_eq!(store.append(b"hello").unwrap(), 1);
    assert_eq!(store.size().unwrap(), 2);

    let anchor = store.get_record(0).unwrap();
    let record = store.get_record(1).unwrap();

    assert_eq!(record.payload.as_ref(), b"hello");
    assert_eq!(record.hash256, sha256_hex(b"hello").as_str());
    assert_eq!(record.md5, "5d41402abc4b2a76b9719d911017c592");

    let link_input = format!(
        "{}{}{}{}",
        anchor.hash256, anchor.header, "Initial record, do not use.", ""
    );
    assert_eq!(record.backlink, sha256_hex(link_input.as_bytes()).as_str());
    assert!(store.verify_link(1).unwrap());
}

#[test]
fn get_payload_returns_what_was_appended() {
    let (mut store, _path, _dir) = setup_store();

    for payload in [&b"alpha"[..], b"", b"\x00\x01binary\xff"] {
        let index = store.append(payload).unwrap();
        let (header, stored) = store.get_payload(index).unwrap();

        assert_eq!(stored.as_ref(), payload);
        assert_eq!(store.find(&header).unwrap(), Some(index));
    }
}

#[test]
fn reads_are_idempotent() {
    let (mut store, _path, _dir) = setup_store();
    append_series(&mut store, 3);

    let first = store.get_payload(2).unwrap();
    let second = store.get_payload(2).unwrap();
    assert_eq!(first, second);
}

#[test]
fn empty_payload_hashes_empty_string() {
    let (mut store, _path, _dir) = setup_store();

    let index = store.append(b"").unwrap();
    let record = store.get_record(index).unwrap();

    assert!(record.payload.is_empty());
    assert_eq!(
        record.hash256,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert!(store.verify_link(index).unwrap());
    assert!(store.verify_payload(index).unwrap());
}

#[test]
fn string_payloads_are_stored_as_utf8() {
    let (mut store, _path, _dir) = setup_store();

    let index = store.append("grüße").unwrap();
    let (_, payload) = store.get_payload(index).unwrap();
    assert_eq!(payload.as_ref(), "grüße".as_bytes());
}

#[test]
fn out_of_range_index_is_reported() {
    let (mut store, _path, _dir) = setup_store();

    assert!(matches!(
        store.get_payload(1),
        Err(ChainError::IndexOutOfRange { index: 1, size: 1 })
    ));
    assert!(matches!(
        store.verify_link(5),
        Err(ChainError::IndexOutOfRange { .. })
    ));
    assert!(matches!(
        store.verify_payload(1),
        Err(ChainError::IndexOutOfRange { .. })
    ));
}

// ============================================================================
// Header Override
// ============================================================================

#[test]
fn append_with_header_stores_header_verbatim() {
    let (mut store, _path, _dir) = setup_store();
    append_series(&mut store, 2);

    let index = store.append_with_header(FIXED_HEADER, b"x").unwrap();
    let size = store.size().unwrap();

    assert_eq!(index, size - 1);
    assert_eq!(store.get_header(size - 1).unwrap(), FIXED_HEADER);
    assert!(store.verify_link(size - 1).unwrap());
    assert_eq!(store.find(FIXED_HEADER).unwrap(), Some(index));

    // The chain keeps going after an overridden header.
    store.append(b"after").unwrap();
    assert!(store.verify_link(size).unwrap());
}

#[test]
fn append_with_invalid_header_is_rejected() {
    let (mut store, _path, _dir) = setup_store();

    for header in [
        "not-a-uuid",
        "9f0c6b42-1d4e-4b8a-9b1a-2c3d4e5f6a7b",
        "{00000000-0000-1000-8000-000000000001}",
    ] {
        match store.append_with_header(header, b"x") {
            Err(ChainError::Validation { field, .. }) => assert_eq!(field, "header"),
            other => panic!("{header}: expected validation error, got {other:?}"),
        }
    }
    assert_eq!(store.size().unwrap(), 1);
}

// ============================================================================
// Verification
// ============================================================================

#[test]
fn every_link_verifies_after_series() {
    let (mut store, _path, _dir) = setup_store();
    append_series(&mut store, 10);

    assert_eq!(store.size().unwrap(), 11);
    assert!(!store.verify_link(0).unwrap());
    for index in 1..=10 {
        assert!(store.verify_link(index).unwrap(), "link {index}");
    }
    for index in 0..=10 {
        assert!(store.verify_payload(index).unwrap(), "payload {index}");
    }

    let report = store.verify_chain().unwrap();
    assert_eq!(report.size, 11);
    assert!(report.is_intact());
}

#[test]
fn payload_tamper_is_detected() {
    let (mut store, path, _dir) = setup_store();
    append_series(&mut store, 10);
    let data_path = store.data_path().to_path_buf();
    store.close().unwrap();

    rewrite_record(&data_path, 3, |record| {
        record.payload = Bytes::from_static(b"tampered");
        repack(record)
    });

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert_eq!(store.get_payload(3).unwrap().1.as_ref(), b"tampered");

    assert!(!store.verify_payload(3).unwrap());
    assert!(!store.verify_link(4).unwrap());
    // Record 3's own link points at record 2, which is untouched.
    assert!(store.verify_link(3).unwrap());

    let report = store.verify_chain().unwrap();
    assert_eq!(report.bad_payloads, vec![3]);
    assert_eq!(report.broken_links, vec![4]);
    assert!(!report.is_intact());
}

#[test]
fn consistent_rewrite_still_breaks_the_next_link() {
    let (mut store, path, _dir) = setup_store();
    append_series(&mut store, 5);
    let data_path = store.data_path().to_path_buf();
    store.close().unwrap();

    // Recompute hash256 too, so only the cumulative link catches it.
    rewrite_record(&data_path, 2, |record| {
        record.payload = Bytes::from_static(b"forged");
        record.hash256 = record::compute_hash256(&record.payload);
        repack(record)
    });

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert!(store.verify_payload(2).unwrap());
    assert!(!store.verify_link(3).unwrap());
    assert_eq!(store.verify_chain().unwrap().broken_links, vec![3]);
}

#[test]
fn undecodable_record_is_a_codec_error() {
    let (mut store, path, _dir) = setup_store();
    append_series(&mut store, 2);
    let data_path = store.data_path().to_path_buf();
    store.close().unwrap();

    rewrite_record(&data_path, 1, |_| Bytes::from_static(b"\x01\x00"));

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert!(matches!(
        store.get_record(1),
        Err(ChainError::Codec(CodecError::Packer(_)))
    ));
    assert!(matches!(store.verify_link(2), Err(ChainError::Codec(_))));
    // Other records are unaffected.
    assert!(store.verify_payload(2).unwrap());
}

#[test]
fn record_under_foreign_key_is_a_chain_error() {
    let (mut store, path, _dir) = setup_store();
    append_series(&mut store, 1);
    let data_path = store.data_path().to_path_buf();
    store.close().unwrap();

    rewrite_record(&data_path, 1, |record| {
        record.header = FIXED_HEADER.to_owned();
        repack(record)
    });

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert!(matches!(store.get_record(1), Err(ChainError::Chain(_))));
}

#[test]
fn damaged_frame_is_a_codec_error() {
    let (mut store, _path, _dir) = setup_store();
    append_series(&mut store, 2);

    let data_path = store.data_path().to_path_buf();
    let mut data = fs::read(&data_path).unwrap();
    let last = data.len() - 6;
    data[last] ^= 0x20;
    fs::write(&data_path, data).unwrap();

    assert!(matches!(
        store.get_record(2),
        Err(ChainError::Codec(CodecError::Frame(_)))
    ));
}

#[test]
fn damaged_length_field_is_reported_not_truncated() {
    let (mut store, path, _dir) = setup_store();
    append_series(&mut store, 3);
    let data_path = store.data_path().to_path_buf();
    store.close().unwrap();

    // The anchor frame now claims 16 MiB more value than the file holds.
    let mut data = fs::read(&data_path).unwrap();
    data[7] = 0x01;
    fs::write(&data_path, &data).unwrap();
    fs::remove_file(data_path.with_extension("pidx")).unwrap();

    assert!(matches!(
        Store::open_with_config(&path, test_config()),
        Err(ChainError::Codec(CodecError::Frame(_)))
    ));
    assert_eq!(fs::read(&data_path).unwrap(), data);
}

// ============================================================================
// Locking
// ============================================================================

#[test]
fn held_lock_times_out_operations() {
    let (mut store, _path, _dir) = setup_store();

    let other = ChainLock::open(store.lock_path(), Duration::from_secs(1)).unwrap();
    let guard = other.acquire().unwrap();

    let mut impatient =
        Store::open_with_config(store.data_path(), test_config().with_lock_timeout(Duration::ZERO));
    assert!(matches!(impatient, Err(ChainError::Lock(_))));

    drop(guard);
    impatient = Store::open_with_config(store.data_path(), test_config());
    assert!(impatient.is_ok());
    assert_eq!(store.size().unwrap(), 1);
}

#[test]
fn handles_in_separate_threads_serialize_appends() {
    let (store, path, _dir) = setup_store();
    drop(store);

    let workers: Vec<_> = (0..2)
        .map(|worker| {
            let path = path.clone();
            thread::spawn(move || {
                let mut store = Store::open_with_config(&path, test_config()).unwrap();
                for i in 0..50 {
                    store.append(format!("w{worker}-{i}")).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut store = Store::open_with_config(&path, test_config()).unwrap();
    assert_eq!(store.size().unwrap(), 101);
    assert!(store.verify_chain().unwrap().is_intact());
}

#[test]
fn verbose_config_changes_nothing_on_disk() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loud");

    let mut store =
        Store::open_with_config(&path, test_config().with_verbose(true)).unwrap();
    store.append_with_header(FIXED_HEADER, b"same").unwrap();
    assert!(store.config().verbose);

    let record = store.get_record(1).unwrap();
    assert_eq!(record.hash256, sha256_hex(b"same").as_str());
    assert!(store.verify_chain().unwrap().is_intact());
}

//! Two processes appending to one store must serialize through the lock.
//!
//! The test binary re-executes itself: when `CHILD_STORE_ENV` is set it acts
//! as a writer child instead of the coordinating parent.

use std::env;
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;
use twinchain::{Store, StoreConfig};

const CHILD_STORE_ENV: &str = "TWINCHAIN_TEST_CHILD_STORE";
const CHILD_ID_ENV: &str = "TWINCHAIN_TEST_CHILD_ID";
const APPENDS_PER_CHILD: usize = 100;
const CHILDREN: usize = 2;

fn config() -> StoreConfig {
    StoreConfig::new()
        .with_fsync(false)
        .with_lock_timeout(Duration::from_secs(60))
}

fn run_child(path: &str) {
    let id = env::var(CHILD_ID_ENV).unwrap_or_default();
    let mut store = Store::open_with_config(path, config()).unwrap();

    for i in 0..APPENDS_PER_CHILD {
        store.append(format!("child-{id}-{i}")).unwrap();
    }
    store.close().unwrap();
}

#[test]
fn concurrent_processes_produce_one_valid_chain() {
    if let Ok(path) = env::var(CHILD_STORE_ENV) {
        run_child(&path);
        return;
    }

    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared");
    Store::open_with_config(&path, config())
        .unwrap()
        .close()
        .unwrap();

    let exe = env::current_exe().unwrap();
    let children: Vec<_> = (0..CHILDREN)
        .map(|id| {
            Command::new(&exe)
                .args([
                    "concurrent_processes_produce_one_valid_chain",
                    "--exact",
                    "--test-threads=1",
                ])
                .env(CHILD_STORE_ENV, &path)
                .env(CHILD_ID_ENV, id.to_string())
                .spawn()
                .unwrap()
        })
        .collect();

    for child in children {
        let output = child.wait_with_output().unwrap();
        assert!(output.status.success(), "child failed: {output:?}");
    }

    let mut store = Store::open_with_config(&path, config()).unwrap();
    let size = store.size().unwrap();
    assert_eq!(size, 1 + CHILDREN * APPENDS_PER_CHILD);

    for index in 1..size {
        assert!(store.verify_link(index).unwrap(), "link {index}");
    }

    for id in 0..CHILDREN {
        let prefix = format!("child-{id}-");
        let mine = (1..size)
            .filter(|&i| store.get_payload(i).unwrap().1.starts_with(prefix.as_bytes()))
            .count();
        assert_eq!(mine, APPENDS_PER_CHILD, "child {id}");
    }
}

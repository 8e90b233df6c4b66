//! Chain engine: the append/read/verify protocol over a packed store.
//!
//! # File Layout
//!
//! ```text
//! {dir}/
//! ├── {name}.pydb    <- packed records (one entry per record, key = header)
//! ├── {name}.pidx    <- position index of the packed file
//! └── {name}.ulock   <- cooperative lock file
//! ```
//!
//! # Invariants
//!
//! Between operations:
//!
//! - The store holds at least the anchor record
//! - Record `i >= 1` carries the back-link of record `i - 1`
//! - Each record is stored under its own header as key
//!
//! Each public operation is one transaction: take the lock, fold in appends
//! made by other processes, do the work, release the lock. Nothing read from
//! disk is cached between operations.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use twin_storage::{INDEX_EXTENSION, PackedKv};

use crate::config::StoreConfig;
use crate::error::{ChainError, Result};
use crate::lock::{ChainLock, LOCK_EXTENSION, lock_path_for};
use crate::packer::{FieldPacker, Packer};
use crate::record::{self, ANCHOR_PAYLOAD, Record};
use crate::stamp::{HeaderGenerator, local_timestamp, validate_header};

/// Emits an operation event at `info` when verbose, `debug` otherwise.
macro_rules! op_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

/// Outcome of [`Store::verify_chain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of records checked.
    pub size: usize,
    /// Indices whose back-link does not match their predecessor.
    pub broken_links: Vec<usize>,
    /// Indices whose `hash256` does not match their payload.
    pub bad_payloads: Vec<usize>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.broken_links.is_empty() && self.bad_payloads.is_empty()
    }
}

/// An open record chain.
///
/// Not meant to be shared between threads; give each thread its own handle
/// (the cooperative lock serializes handles just like processes).
#[derive(Debug)]
pub struct Store<P = FieldPacker> {
    kv: PackedKv,
    lock: ChainLock,
    packer: P,
    headers: HeaderGenerator,
    config: StoreConfig,
}

impl Store<FieldPacker> {
    /// Opens the store at `path` with default configuration, creating it
    /// (with its anchor record) if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default())
    }

    /// Opens the store at `path` with custom configuration.
    pub fn open_with_config(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        Self::open_with_packer(path, config, FieldPacker)
    }
}

impl<P: Packer> Store<P> {
    /// Opens the store at `path`, packing records with `packer`.
    ///
    /// When `path` has no extension, `config.extension` is used for the data
    /// file. The lock file always sits next to it with a `.ulock` extension.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Validation`] if the data file would collide with the
    ///   lock or index file
    /// - [`ChainError::Io`] on filesystem failure
    /// - [`ChainError::Lock`] if the lock cannot be acquired in time
    /// - [`ChainError::Codec`] if the existing data file is damaged
    pub fn open_with_packer(
        path: impl AsRef<Path>,
        config: StoreConfig,
        packer: P,
    ) -> Result<Self> {
        let data_path = resolve_data_path(path.as_ref(), &config)?;
        if let Some(parent) = data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let lock = ChainLock::open(lock_path_for(&data_path), config.lock_timeout)?;
        let mut guard = lock.acquire()?;

        let kv = PackedKv::open(&data_path, config.fsync)?;
        let mut store = Self {
            kv,
            lock,
            packer,
            headers: HeaderGenerator::new(),
            config,
        };

        if store.kv.size() == 0 {
            let header = store.headers.next_header();
            let (header, bytes) = record::encode_new(
                &store.packer,
                None,
                header,
                local_timestamp(),
                Bytes::from_static(ANCHOR_PAYLOAD),
            )?;
            store.kv.append(header.clone(), bytes)?;

            tracing::info!(
                path = %data_path.display(),
                header = %header,
                "created store with anchor record"
            );
        }

        guard.release()?;

        op_event!(
            store.config.verbose,
            path = %data_path.display(),
            records = store.kv.size(),
            "opened store"
        );
        Ok(store)
    }

    pub fn data_path(&self) -> &Path {
        self.kv.data_path()
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Appends `payload` under a freshly generated header.
    ///
    /// Returns the index of the new record.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Chain`] if the store is unexpectedly empty
    /// - [`ChainError::Io`] / [`ChainError::Lock`] / [`ChainError::Codec`]
    pub fn append(&mut self, payload: impl AsRef<[u8]>) -> Result<usize> {
        let header = self.headers.next_header();
        self.append_record(header, Bytes::copy_from_slice(payload.as_ref()))
    }

    /// Appends `payload` under a caller-supplied header.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Validation`] unless `header` is a canonical
    /// hyphenated version-1 UUID; otherwise as [`Self::append`].
    pub fn append_with_header(&mut self, header: &str, payload: impl AsRef<[u8]>) -> Result<usize> {
        validate_header(header)?;
        self.append_record(header.to_owned(), Bytes::copy_from_slice(payload.as_ref()))
    }

    fn append_record(&mut self, header: String, payload: Bytes) -> Result<usize> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;

        let size = self.kv.size();
        if size == 0 {
            return Err(ChainError::Chain(format!(
                "{} has no anchor record",
                self.kv.data_path().display()
            )));
        }

        let tail = read_record(&self.kv, &self.packer, size - 1)?;
        let payload_len = payload.len();
        let (header, bytes) =
            record::encode_new(&self.packer, Some(&tail), header, local_timestamp(), payload)?;
        let index = self.kv.append(header.clone(), bytes)?;

        op_event!(
            self.config.verbose,
            index,
            header = %header,
            payload_len,
            "appended record"
        );
        Ok(index)
    }

    /// Number of records, anchor included.
    pub fn size(&mut self) -> Result<usize> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;
        Ok(self.kv.size())
    }

    /// Reads the full record at `index`.
    ///
    /// # Errors
    ///
    /// - [`ChainError::IndexOutOfRange`] if `index >= size`
    /// - [`ChainError::Codec`] if the stored bytes do not decode
    /// - [`ChainError::Chain`] if the record is stored under a foreign key
    pub fn get_record(&mut self, index: usize) -> Result<Record> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;
        read_record(&self.kv, &self.packer, index)
    }

    /// Reads the header and payload of the record at `index`.
    pub fn get_payload(&mut self, index: usize) -> Result<(String, Bytes)> {
        let record = self.get_record(index)?;
        Ok((record.header, record.payload))
    }

    /// Reads the header of the record at `index`.
    pub fn get_header(&mut self, index: usize) -> Result<String> {
        Ok(self.get_record(index)?.header)
    }

    /// Finds the newest record stored under `header`.
    pub fn find(&mut self, header: &str) -> Result<Option<usize>> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;
        Ok(self.kv.find_key(header.as_bytes())?)
    }

    /// Checks that record `index` carries the back-link of record `index - 1`.
    ///
    /// Returns `false` for the anchor, which has no predecessor. A mismatch
    /// is an answer, not an error; it is logged at `warn`.
    ///
    /// # Errors
    ///
    /// - [`ChainError::IndexOutOfRange`] if `index >= size`
    /// - [`ChainError::Codec`] if either record does not decode
    pub fn verify_link(&mut self, index: usize) -> Result<bool> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;

        let current = read_record(&self.kv, &self.packer, index)?;
        if index == 0 {
            return Ok(false);
        }
        let prev = read_record(&self.kv, &self.packer, index - 1)?;

        let linked = current.links_to(&prev);
        if !linked {
            tracing::warn!(
                index,
                expected = %record::compute_backlink(&prev),
                stored = %current.backlink,
                "back-link mismatch"
            );
        }
        Ok(linked)
    }

    /// Checks that the stored `hash256` of record `index` matches its payload.
    ///
    /// # Errors
    ///
    /// As [`Self::verify_link`].
    pub fn verify_payload(&mut self, index: usize) -> Result<bool> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;

        let record = read_record(&self.kv, &self.packer, index)?;
        let intact = record.payload_intact();
        if !intact {
            tracing::warn!(
                index,
                header = %record.header,
                stored = %record.hash256,
                "payload hash mismatch"
            );
        }
        Ok(intact)
    }

    /// Checks every link and payload hash under a single lock hold.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Codec`] on the first record that does not
    /// decode; hash mismatches are collected in the report instead.
    pub fn verify_chain(&mut self) -> Result<ChainReport> {
        let _guard = self.lock.acquire()?;
        self.kv.refresh()?;

        let mut report = ChainReport {
            size: self.kv.size(),
            ..ChainReport::default()
        };

        let mut prev: Option<Record> = None;
        for index in 0..report.size {
            let current = read_record(&self.kv, &self.packer, index)?;

            if !current.payload_intact() {
                report.bad_payloads.push(index);
            }
            if prev.as_ref().is_some_and(|prev| !current.links_to(prev)) {
                report.broken_links.push(index);
            }
            prev = Some(current);
        }

        if report.is_intact() {
            op_event!(self.config.verbose, records = report.size, "chain verified");
        } else {
            tracing::warn!(
                records = report.size,
                broken_links = ?report.broken_links,
                bad_payloads = ?report.bad_payloads,
                "chain verification found mismatches"
            );
        }
        Ok(report)
    }

    /// Flushes the data file, persists its index and closes the store.
    pub fn close(mut self) -> Result<()> {
        let _guard = self.lock.acquire()?;
        self.kv.sync()?;

        op_event!(
            self.config.verbose,
            path = %self.kv.data_path().display(),
            "closed store"
        );
        Ok(())
    }
}

/// Data file for a store path: the path itself, or with the configured
/// extension when it has none.
///
/// # Errors
///
/// Returns [`ChainError::Validation`] if the data file would end in the lock
/// or index extension and so share a file with one of them.
pub fn resolve_data_path(path: &Path, config: &StoreConfig) -> Result<PathBuf> {
    let data_path = if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(&config.extension)
    };

    let extension = data_path.extension().and_then(|ext| ext.to_str());
    if let Some(reserved) = [LOCK_EXTENSION, INDEX_EXTENSION]
        .into_iter()
        .find(|reserved| extension == Some(*reserved))
    {
        return Err(ChainError::Validation {
            field: "path",
            reason: format!(
                "{} uses the reserved .{reserved} extension",
                data_path.display()
            ),
        });
    }
    Ok(data_path)
}

fn read_record<P: Packer>(kv: &PackedKv, packer: &P, index: usize) -> Result<Record> {
    let entry = kv.get(index)?;
    let record = record::parse(packer, entry.value())?;

    if entry.key().as_ref() != record.header.as_bytes() {
        return Err(ChainError::Chain(format!(
            "record {index} is stored under key {:?} but has header {:?}",
            String::from_utf8_lossy(entry.key()),
            record.header
        )));
    }
    Ok(record)
}

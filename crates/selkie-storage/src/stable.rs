//! Stable store: durable key/value memory that survives restarts
//!
//! TigerStyle: Explicit capacity accounting, validated batches, no partial writes.
//!
//! Capacity is monotonic. Each key is charged the largest value ever written
//! for it plus the key length, and overwrites never shrink that charge. A
//! write that needs more than the remaining capacity is rejected; capacity
//! only increases through an explicit `grow`.

use bytes::Bytes;
use selkie_core::constants::*;
use selkie_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// A set of stable writes applied as one unit
pub type StableBatch = BTreeMap<String, Bytes>;

/// Synchronous durable key/value store
///
/// A write is durable once it returns `Ok`. Implementations are shared
/// (`&self` methods) so one store can outlive a simulated restart.
pub trait StableStore: Send + Sync + fmt::Debug {
    /// Read a key, `None` if it was never written
    fn read(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a single key
    fn write(&self, key: &str, value: Bytes) -> Result<()> {
        let mut batch = StableBatch::new();
        batch.insert(key.to_string(), value);
        self.write_batch(&batch)
    }

    /// Check that `batch` would be accepted without applying it
    fn check_batch(&self, batch: &StableBatch) -> Result<()>;

    /// Apply every write in `batch` or none of them
    fn write_batch(&self, batch: &StableBatch) -> Result<()>;

    /// Increase capacity by `additional_bytes`, returning the new capacity
    fn grow(&self, additional_bytes: u64) -> Result<u64>;

    /// All keys in ascending order
    fn keys(&self) -> Result<Vec<String>>;

    /// Copy of all committed contents
    fn entries(&self) -> Result<StableBatch>;

    /// Current capacity in bytes
    fn capacity_bytes(&self) -> u64;

    /// Bytes charged to keys so far
    fn allocated_bytes(&self) -> u64;
}

// =============================================================================
// Ledger (shared accounting)
// =============================================================================

/// In-memory image of a stable store plus its space accounting
#[derive(Debug, Clone)]
struct Ledger {
    data: StableBatch,
    /// key -> bytes charged (max value length ever written + key length)
    allocations: BTreeMap<String, u64>,
    allocated_bytes: u64,
    capacity_bytes: u64,
    capacity_bytes_max: u64,
}

impl Ledger {
    fn new(capacity_bytes: u64, capacity_bytes_max: u64) -> Self {
        assert!(
            capacity_bytes <= capacity_bytes_max,
            "VIOLATION: initial capacity {} exceeds max {}",
            capacity_bytes,
            capacity_bytes_max
        );
        Self {
            data: BTreeMap::new(),
            allocations: BTreeMap::new(),
            allocated_bytes: 0,
            capacity_bytes,
            capacity_bytes_max,
        }
    }

    fn charge_for(key: &str, value: &Bytes) -> u64 {
        (key.len() + value.len()) as u64
    }

    /// Extra bytes `batch` would add to the allocation total
    fn additional_for(&self, batch: &StableBatch) -> u64 {
        batch
            .iter()
            .map(|(key, value)| {
                let wanted = Self::charge_for(key, value);
                let current = self.allocations.get(key).copied().unwrap_or(0);
                wanted.saturating_sub(current)
            })
            .sum()
    }

    fn check(&self, batch: &StableBatch) -> Result<()> {
        for (key, value) in batch {
            validate_key(key)?;
            if value.len() > STABLE_VALUE_SIZE_BYTES_MAX {
                return Err(Error::stable_write_failed(
                    key.as_str(),
                    format!(
                        "value size {} exceeds limit {}",
                        value.len(),
                        STABLE_VALUE_SIZE_BYTES_MAX
                    ),
                ));
            }
        }

        let additional = self.additional_for(batch);
        let available = self.capacity_bytes - self.allocated_bytes;
        if additional > available {
            let first_key = batch.keys().next().cloned().unwrap_or_default();
            return Err(Error::stable_write_failed(
                first_key,
                format!(
                    "needs {} bytes, {} of {} available",
                    additional, available, self.capacity_bytes
                ),
            ));
        }
        Ok(())
    }

    fn apply(&mut self, batch: &StableBatch) {
        for (key, value) in batch {
            let wanted = Self::charge_for(key, value);
            let slot = self.allocations.entry(key.clone()).or_insert(0);
            if wanted > *slot {
                self.allocated_bytes += wanted - *slot;
                *slot = wanted;
            }
            self.data.insert(key.clone(), value.clone());
        }

        // Postcondition
        assert!(
            self.allocated_bytes <= self.capacity_bytes,
            "VIOLATION: allocated {} exceeds capacity {}",
            self.allocated_bytes,
            self.capacity_bytes
        );
    }

    fn check_grow(&self, additional_bytes: u64) -> Result<u64> {
        let new_capacity = self
            .capacity_bytes
            .checked_add(additional_bytes)
            .filter(|c| *c <= self.capacity_bytes_max)
            .ok_or_else(|| {
                Error::stable_write_failed(
                    "<grow>",
                    format!(
                        "growing {} by {} exceeds max {}",
                        self.capacity_bytes, additional_bytes, self.capacity_bytes_max
                    ),
                )
            })?;
        Ok(new_capacity)
    }
}

/// Validate a stable key's shape (reserved-prefix policy lives in the segment buffer)
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "must not be empty"));
    }
    if key.len() > STABLE_KEY_SIZE_BYTES_MAX {
        return Err(Error::invalid_key(
            key.chars().take(32).collect::<String>(),
            format!(
                "length {} exceeds limit {}",
                key.len(),
                STABLE_KEY_SIZE_BYTES_MAX
            ),
        ));
    }
    Ok(())
}

fn poisoned<T>(_: T) -> Error {
    Error::internal("stable store lock poisoned")
}

// =============================================================================
// MemoryStableStore
// =============================================================================

/// In-memory stable store
///
/// Cloning shares the underlying data, so a clone handed to a fresh
/// dispatcher after `restart` sees everything written before it.
#[derive(Debug, Clone)]
pub struct MemoryStableStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl MemoryStableStore {
    pub fn new(capacity_bytes: u64, capacity_bytes_max: u64) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(Ledger::new(capacity_bytes, capacity_bytes_max))),
        }
    }
}

impl Default for MemoryStableStore {
    fn default() -> Self {
        Self::new(
            STABLE_CAPACITY_BYTES_INITIAL_DEFAULT,
            STABLE_CAPACITY_BYTES_MAX_DEFAULT,
        )
    }
}

impl StableStore for MemoryStableStore {
    fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let ledger = self.ledger.read().map_err(poisoned)?;
        Ok(ledger.data.get(key).cloned())
    }

    fn check_batch(&self, batch: &StableBatch) -> Result<()> {
        self.ledger.read().map_err(poisoned)?.check(batch)
    }

    #[instrument(skip(self, batch), fields(writes = batch.len()), level = "trace")]
    fn write_batch(&self, batch: &StableBatch) -> Result<()> {
        let mut ledger = self.ledger.write().map_err(poisoned)?;
        ledger.check(batch)?;
        ledger.apply(batch);
        Ok(())
    }

    fn grow(&self, additional_bytes: u64) -> Result<u64> {
        let mut ledger = self.ledger.write().map_err(poisoned)?;
        let new_capacity = ledger.check_grow(additional_bytes)?;
        ledger.capacity_bytes = new_capacity;
        debug!(capacity_bytes = new_capacity, "Stable store grown");
        Ok(new_capacity)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let ledger = self.ledger.read().map_err(poisoned)?;
        Ok(ledger.data.keys().cloned().collect())
    }

    fn entries(&self) -> Result<StableBatch> {
        Ok(self.ledger.read().map_err(poisoned)?.data.clone())
    }

    fn capacity_bytes(&self) -> u64 {
        self.ledger.read().map(|l| l.capacity_bytes).unwrap_or(0)
    }

    fn allocated_bytes(&self) -> u64 {
        self.ledger.read().map(|l| l.allocated_bytes).unwrap_or(0)
    }
}

// =============================================================================
// FileStableStore
// =============================================================================

/// Frame header: `len:u32le | crc32:u32le`, followed by `len` payload bytes
const FRAME_HEADER_BYTES: usize = 8;

/// One entry of the stable store log, MessagePack-encoded inside a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum LogRecord {
    Write { key: String, value: Bytes },
    Grow { additional_bytes: u64 },
    /// Writes that become visible together or not at all
    Batch { writes: Vec<(String, Bytes)> },
}

impl LogRecord {
    fn for_batch(batch: &StableBatch) -> Self {
        let mut writes = batch.iter().map(|(key, value)| (key.clone(), value.clone()));
        match (batch.len(), writes.next()) {
            (1, Some((key, value))) => Self::Write { key, value },
            (_, first) => Self::Batch {
                writes: first.into_iter().chain(writes).collect(),
            },
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let payload = rmp_serde::to_vec(self).map_err(|e| Error::SerializationFailed {
            reason: format!("stable log record: {}", e),
        })?;
        let len = u32::try_from(payload.len()).map_err(|_| Error::SerializationFailed {
            reason: format!("stable log record of {} bytes", payload.len()),
        })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_BYTES + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    fn apply_to(self, ledger: &mut Ledger) -> Result<()> {
        match self {
            Self::Write { key, value } => {
                let mut batch = StableBatch::new();
                batch.insert(key, value);
                ledger.check(&batch)?;
                ledger.apply(&batch);
            }
            Self::Grow { additional_bytes } => {
                ledger.capacity_bytes = ledger.check_grow(additional_bytes)?;
            }
            Self::Batch { writes } => {
                let batch: StableBatch = writes.into_iter().collect();
                ledger.check(&batch)?;
                ledger.apply(&batch);
            }
        }
        Ok(())
    }
}

/// File-backed stable store
///
/// An append-only log of checksummed frames, fsynced after every append and
/// replayed on open. A torn tail (crash mid-append) is truncated away on
/// open. A failed append is cut back off the file before the error returns,
/// so the log only ever holds acknowledged records.
#[derive(Debug, Clone)]
pub struct FileStableStore {
    inner: Arc<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    log: Mutex<LogFile>,
    ledger: RwLock<Ledger>,
}

/// The open log and the length of its acknowledged prefix
#[derive(Debug)]
struct LogFile {
    file: File,
    len: u64,
    /// Set when a failed append could not be cut back off the file
    failed: bool,
}

impl LogFile {
    fn append(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.failed {
            return Err(io::Error::other(
                "log refuses writes after an append it could not repair",
            ));
        }

        // Anything past the acknowledged prefix is left over from a failed append
        let file_len = self.file.metadata()?.len();
        if file_len != self.len {
            warn!(
                file_len,
                acknowledged_len = self.len,
                "Cutting unacknowledged bytes off stable store log"
            );
            self.file.set_len(self.len)?;
        }

        match self.file.write_all(frame).and_then(|_| self.file.sync_all()) {
            Ok(()) => {
                self.len += frame.len() as u64;
                Ok(())
            }
            Err(err) => {
                if let Err(repair) = self.file.set_len(self.len).and_then(|_| self.file.sync_all()) {
                    self.failed = true;
                    error!(error = %err, repair_error = %repair, "Stable store log left unrepaired");
                }
                Err(err)
            }
        }
    }
}

impl FileStableStore {
    /// Open or create the store at `path`
    ///
    /// A new file starts with `capacity_bytes`; an existing file recovers the
    /// capacity recorded in it.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        capacity_bytes: u64,
        capacity_bytes_max: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| Error::storage_io(format!("open {}: {}", path.display(), e)))?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| Error::storage_io(format!("read {}: {}", path.display(), e)))?;

        let mut ledger = Ledger::new(0, capacity_bytes_max);
        let valid_len = replay(&contents, &mut ledger)?;

        if valid_len < contents.len() {
            warn!(
                valid_len,
                file_len = contents.len(),
                "Truncating torn tail of stable store log"
            );
            file.set_len(valid_len as u64)
                .and_then(|_| file.sync_all())
                .map_err(|e| Error::storage_io(format!("truncate: {}", e)))?;
        }

        let store = Self {
            inner: Arc::new(FileInner {
                path,
                log: Mutex::new(LogFile {
                    file,
                    len: valid_len as u64,
                    failed: false,
                }),
                ledger: RwLock::new(ledger),
            }),
        };

        if valid_len == 0 && capacity_bytes > 0 {
            store.grow(capacity_bytes)?;
        }

        info!(
            capacity_bytes = store.capacity_bytes(),
            allocated_bytes = store.allocated_bytes(),
            "Stable store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let frame = record.encode()?;
        let mut log = self.inner.log.lock().map_err(poisoned)?;
        log.append(&frame)
            .map_err(|e| Error::storage_io(format!("append {}: {}", self.inner.path.display(), e)))
    }
}

/// Replay the log into `ledger`, returning the length of the valid prefix
///
/// An incomplete frame, or a checksum mismatch in the last frame, ends the
/// valid prefix. A checksum mismatch with frames after it is corruption.
fn replay(bytes: &[u8], ledger: &mut Ledger) -> Result<usize> {
    let mut pos = 0;

    while pos < bytes.len() {
        let [l0, l1, l2, l3, c0, c1, c2, c3, rest @ ..] = &bytes[pos..] else {
            break;
        };
        let len = u32::from_le_bytes([*l0, *l1, *l2, *l3]) as usize;
        let checksum = u32::from_le_bytes([*c0, *c1, *c2, *c3]);
        let Some(payload) = rest.get(..len) else {
            break;
        };
        let end = pos + FRAME_HEADER_BYTES + len;

        if crc32fast::hash(payload) != checksum {
            if end == bytes.len() {
                break;
            }
            return Err(Error::storage_io(format!(
                "checksum mismatch in stable store log at offset {}",
                pos
            )));
        }

        let record: LogRecord =
            rmp_serde::from_slice(payload).map_err(|e| Error::DeserializationFailed {
                reason: format!("stable log record at offset {}: {}", pos, e),
            })?;
        record.apply_to(ledger)?;
        pos = end;
    }

    Ok(pos)
}

impl StableStore for FileStableStore {
    fn read(&self, key: &str) -> Result<Option<Bytes>> {
        let ledger = self.inner.ledger.read().map_err(poisoned)?;
        Ok(ledger.data.get(key).cloned())
    }

    fn check_batch(&self, batch: &StableBatch) -> Result<()> {
        self.inner.ledger.read().map_err(poisoned)?.check(batch)
    }

    #[instrument(skip(self, batch), fields(writes = batch.len()), level = "trace")]
    fn write_batch(&self, batch: &StableBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut ledger = self.inner.ledger.write().map_err(poisoned)?;
        ledger.check(batch)?;

        // Durable before visible
        self.append(&LogRecord::for_batch(batch))?;
        ledger.apply(batch);
        Ok(())
    }

    fn grow(&self, additional_bytes: u64) -> Result<u64> {
        let mut ledger = self.inner.ledger.write().map_err(poisoned)?;
        let new_capacity = ledger.check_grow(additional_bytes)?;

        self.append(&LogRecord::Grow { additional_bytes })?;

        ledger.capacity_bytes = new_capacity;
        debug!(capacity_bytes = new_capacity, "Stable store grown");
        Ok(new_capacity)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let ledger = self.inner.ledger.read().map_err(poisoned)?;
        Ok(ledger.data.keys().cloned().collect())
    }

    fn entries(&self) -> Result<StableBatch> {
        Ok(self.inner.ledger.read().map_err(poisoned)?.data.clone())
    }

    fn capacity_bytes(&self) -> u64 {
        self.inner
            .ledger
            .read()
            .map(|l| l.capacity_bytes)
            .unwrap_or(0)
    }

    fn allocated_bytes(&self) -> u64 {
        self.inner
            .ledger
            .read()
            .map(|l| l.allocated_bytes)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(entries: &[(&str, &str)]) -> StableBatch {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v.as_bytes())))
            .collect()
    }

    #[test]
    fn test_memory_store_read_write() {
        let store = MemoryStableStore::new(1024, 4096);
        store.write("balance", Bytes::from("100")).unwrap();
        assert_eq!(store.read("balance").unwrap(), Some(Bytes::from("100")));
        assert_eq!(store.read("missing").unwrap(), None);
        assert_eq!(store.allocated_bytes(), "balance".len() as u64 + 3);
    }

    #[test]
    fn test_overwrite_never_shrinks_allocation() {
        let store = MemoryStableStore::new(1024, 4096);
        store.write("k", Bytes::from("0123456789")).unwrap();
        store.write("k", Bytes::from("x")).unwrap();
        assert_eq!(store.allocated_bytes(), 11);
        store.write("k", Bytes::from("0123456789")).unwrap();
        assert_eq!(store.allocated_bytes(), 11);
    }

    #[test]
    fn test_write_beyond_capacity_fails() {
        let store = MemoryStableStore::new(16, 64);
        let result = store.write("key", Bytes::from(vec![0u8; 20]));
        assert!(matches!(result, Err(Error::StableWriteFailure { .. })));
        assert_eq!(store.allocated_bytes(), 0);

        store.grow(16).unwrap();
        store.write("key", Bytes::from(vec![0u8; 20])).unwrap();
    }

    #[test]
    fn test_grow_past_max_fails() {
        let store = MemoryStableStore::new(16, 64);
        assert_eq!(store.grow(48).unwrap(), 64);
        assert!(matches!(
            store.grow(1),
            Err(Error::StableWriteFailure { .. })
        ));
        assert_eq!(store.capacity_bytes(), 64);
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let store = MemoryStableStore::new(16, 16);
        let result = store.write_batch(&batch(&[("a", "1234"), ("b", "123456789012")]));
        assert!(result.is_err());
        assert!(store.keys().unwrap().is_empty());
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStableStore::default();
        assert!(matches!(
            store.write("", Bytes::from("v")),
            Err(Error::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_clone_shares_data() {
        let store = MemoryStableStore::default();
        let other = store.clone();
        store.write("shared", Bytes::from("yes")).unwrap();
        assert_eq!(other.read("shared").unwrap(), Some(Bytes::from("yes")));
    }

    #[test]
    fn test_file_store_replays_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.log");

        {
            let store = FileStableStore::open(&path, 1024, 8192).unwrap();
            store.write("balance", Bytes::from("100")).unwrap();
            store
                .write_batch(&batch(&[("a", "1"), ("b", "2")]))
                .unwrap();
            store.grow(1024).unwrap();
            store.write("balance", Bytes::from("90")).unwrap();
        }

        let store = FileStableStore::open(&path, 1024, 8192).unwrap();
        assert_eq!(store.read("balance").unwrap(), Some(Bytes::from("90")));
        assert_eq!(store.read("b").unwrap(), Some(Bytes::from("2")));
        assert_eq!(store.capacity_bytes(), 2048);
        assert_eq!(store.allocated_bytes(), (7 + 3) + 2 + 2);
    }

    #[test]
    fn test_file_store_drops_torn_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.log");

        {
            let store = FileStableStore::open(&path, 1024, 8192).unwrap();
            store.write("kept", Bytes::from("1")).unwrap();
            store
                .write_batch(&batch(&[("x", "first"), ("y", "second")]))
                .unwrap();
        }

        // Chop the last few bytes off the batch record
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let store = FileStableStore::open(&path, 1024, 8192).unwrap();
        assert_eq!(store.read("kept").unwrap(), Some(Bytes::from("1")));
        assert_eq!(store.read("x").unwrap(), None);
        assert_eq!(store.read("y").unwrap(), None);

        // Log is writable again after truncation
        store.write("after", Bytes::from("ok")).unwrap();
        let reopened = FileStableStore::open(&path, 1024, 8192).unwrap();
        assert_eq!(reopened.read("after").unwrap(), Some(Bytes::from("ok")));
    }

    #[test]
    fn test_file_store_cuts_leftovers_of_failed_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.log");
        let store = FileStableStore::open(&path, 1024, 8192).unwrap();
        store.write("a", Bytes::from("1")).unwrap();

        // Bytes of an append that errored halfway
        let mut torn = OpenOptions::new().append(true).open(&path).unwrap();
        torn.write_all(&[1, 5, 0]).unwrap();
        drop(torn);

        store.write("b", Bytes::from("2")).unwrap();
        drop(store);

        let reopened = FileStableStore::open(&path, 1024, 8192).unwrap();
        assert_eq!(reopened.read("a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(reopened.read("b").unwrap(), Some(Bytes::from("2")));
    }

    #[test]
    fn test_file_store_drops_tail_with_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.log");
        {
            let store = FileStableStore::open(&path, 1024, 8192).unwrap();
            store.write("a", Bytes::from("1")).unwrap();
            store.write("b", Bytes::from("2")).unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let store = FileStableStore::open(&path, 1024, 8192).unwrap();
        assert_eq!(store.read("a").unwrap(), Some(Bytes::from("1")));
        assert_eq!(store.read("b").unwrap(), None);
        assert!(std::fs::metadata(&path).unwrap().len() < bytes.len() as u64);
    }

    #[test]
    fn test_file_store_refuses_corruption_before_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stable.log");
        {
            let store = FileStableStore::open(&path, 1024, 8192).unwrap();
            store.write("kept", Bytes::from("1")).unwrap();
        }

        // First payload byte of the opening grow record
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[FRAME_HEADER_BYTES] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            FileStableStore::open(&path, 1024, 8192),
            Err(Error::StorageIo { .. })
        ));
    }

    #[test]
    fn test_log_record_frame_decodes() {
        let record = LogRecord::for_batch(&batch(&[("a", "1"), ("b", "2")]));
        let frame = record.encode().unwrap();
        let mut ledger = Ledger::new(0, 1024);
        LogRecord::Grow { additional_bytes: 64 }
            .apply_to(&mut ledger)
            .unwrap();

        assert_eq!(replay(&frame, &mut ledger).unwrap(), frame.len());
        assert_eq!(ledger.data.get("b"), Some(&Bytes::from("2")));
        assert!(matches!(
            LogRecord::for_batch(&batch(&[("only", "x")])),
            LogRecord::Write { .. }
        ));
    }
}

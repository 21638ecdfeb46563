//! File backend
//!
//! Durable storage as an append-only log of [`Record`]s. The whole log is
//! replayed into memory on open; every write appends one record. Replay
//! stops at the first torn or corrupt record and the log is truncated
//! there, so a partially written value is never exposed.

use super::{check_quota, BackendError, KeyValueBackend, Record, RecordOp, SyncPolicy};
use bytes::Bytes;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::hash::BuildHasherDefault;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type ItemMap = HashMap<String, Bytes, BuildHasherDefault<SipHasher13>>;

/// Key-value backend persisted to a single log file
pub struct FileBackend {
    path: PathBuf,
    sync_policy: SyncPolicy,
    quota: Option<usize>,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    items: ItemMap,
    used_bytes: usize,

    /// Length of the valid part of the log
    log_len: u64,

    /// Records in the log (live or superseded)
    records: usize,

    last_sync: Instant,
}

impl FileBackend {
    /// Open (or create) the log at `path` and replay it
    pub fn open<P: AsRef<Path>>(path: P, sync_policy: SyncPolicy) -> Result<Self, BackendError> {
        Self::open_with_quota(path, sync_policy, None)
    }

    /// Open with an optional byte quota on live data (keys + values)
    pub fn open_with_quota<P: AsRef<Path>>(
        path: P,
        sync_policy: SyncPolicy,
        quota: Option<usize>,
    ) -> Result<Self, BackendError> {
        let path = path.as_ref().to_path_buf();

        let data = match File::open(&path) {
            Ok(mut file) => {
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                data
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let (records, valid_len) = parse_log(&data);

        let mut items = ItemMap::default();
        let mut used_bytes = 0;
        for record in &records {
            apply(&mut items, &mut used_bytes, record);
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        if (valid_len as usize) < data.len() {
            warn!(
                "Dropping {} trailing byte(s) of {} after last valid record",
                data.len() - valid_len as usize,
                path.display()
            );
            file.set_len(valid_len)?;
        }

        info!(
            "Opened {}: {} record(s), {} live key(s)",
            path.display(),
            records.len(),
            items.len()
        );

        Ok(FileBackend {
            path,
            sync_policy,
            quota,
            inner: Mutex::new(FileInner {
                file,
                items,
                used_bytes,
                log_len: valid_len,
                records: records.len(),
                last_sync: Instant::now(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Check if the backend is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records in the log, superseded ones included
    pub fn record_count(&self) -> usize {
        self.lock().records
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<(), BackendError> {
        let mut inner = self.lock();
        inner.file.sync_all()?;
        inner.last_sync = Instant::now();
        Ok(())
    }

    /// Rewrite the log so it holds exactly one record per live key
    ///
    /// The new log is written to a sibling file and renamed over the old one.
    pub fn compact(&self) -> Result<(), BackendError> {
        let mut inner = self.lock();

        let mut keys: Vec<&String> = inner.items.keys().collect();
        keys.sort();

        let mut buf = Vec::new();
        for key in &keys {
            let value = inner.items[*key].clone();
            let bytes = Record::set(key.as_str(), value)
                .to_bytes()
                .map_err(BackendError::TooLarge)?;
            buf.extend_from_slice(&bytes);
        }
        let live = keys.len();

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let before = inner.records;
        inner.file = OpenOptions::new().append(true).open(&self.path)?;
        inner.log_len = buf.len() as u64;
        inner.records = live;
        inner.last_sync = Instant::now();

        info!("Compacted {}: {} -> {} record(s)", self.path.display(), before, live);
        Ok(())
    }

    /// Append one record, rolling back a torn write
    fn append(&self, inner: &mut FileInner, record: &Record) -> Result<(), BackendError> {
        let bytes = record.to_bytes().map_err(BackendError::TooLarge)?;

        if let Err(e) = inner.file.write_all(&bytes) {
            if let Err(truncate_err) = inner.file.set_len(inner.log_len) {
                warn!("Failed to roll back torn write: {}", truncate_err);
            }
            return Err(e.into());
        }

        inner.log_len += bytes.len() as u64;
        inner.records += 1;

        // The record is with the OS at this point; a failed sync is only reported
        let sync_result = match self.sync_policy {
            SyncPolicy::Always => inner.file.sync_all(),
            SyncPolicy::EverySecond if inner.last_sync.elapsed() >= Duration::from_secs(1) => {
                inner.file.sync_all()
            }
            _ => return Ok(()),
        };
        match sync_result {
            Ok(()) => inner.last_sync = Instant::now(),
            Err(e) => warn!("Failed to sync {}: {}", self.path.display(), e),
        }

        Ok(())
    }
}

impl KeyValueBackend for FileBackend {
    fn get_item(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        Ok(self.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: Bytes) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let freed = inner
            .items
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or(0);
        check_quota(self.quota, inner.used_bytes, freed, key.len() + value.len())?;

        let record = Record::set(key, value);
        self.append(&mut inner, &record)?;

        let FileInner { items, used_bytes, .. } = &mut *inner;
        apply(items, used_bytes, &record);
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if !inner.items.contains_key(key) {
            return Ok(());
        }

        let record = Record::remove(key);
        self.append(&mut inner, &record)?;

        let FileInner { items, used_bytes, .. } = &mut *inner;
        apply(items, used_bytes, &record);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.lock().items.keys().cloned().collect())
    }
}

/// Parse records until the end of the log or the first bad record
///
/// Returns the parsed records and the length of the valid prefix.
fn parse_log(data: &[u8]) -> (Vec<Record>, u64) {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        match Record::from_bytes(&data[pos..]) {
            Ok((record, size)) => {
                records.push(record);
                pos += size;
            }
            Err(e) => {
                warn!("Failed to parse log record at position {}: {}", pos, e);
                break;
            }
        }
    }

    debug!("Parsed {} record(s) from {} byte(s)", records.len(), pos);
    (records, pos as u64)
}

/// Apply one record to the in-memory view
fn apply(items: &mut ItemMap, used_bytes: &mut usize, record: &Record) {
    match record.op {
        RecordOp::Set => {
            let added = record.key.len() + record.value.len();
            if let Some(old) = items.insert(record.key.clone(), record.value.clone()) {
                *used_bytes -= record.key.len() + old.len();
            }
            *used_bytes += added;
        }
        RecordOp::Remove => {
            if let Some(old) = items.remove(&record.key) {
                *used_bytes -= record.key.len() + old.len();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A log path unique to one test, removed on drop
    struct TempLog(PathBuf);

    impl TempLog {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("perfkit_{}_{}.log", name, std::process::id()));
            let _ = fs::remove_file(&path);
            TempLog(path)
        }
    }

    impl Drop for TempLog {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
            let _ = fs::remove_file(self.0.with_extension("compact"));
        }
    }

    #[test]
    fn test_values_survive_reopen() {
        let log = TempLog::new("reopen");

        {
            let backend = FileBackend::open(&log.0, SyncPolicy::Always).unwrap();
            backend.set_item("a", Bytes::from("1")).unwrap();
            backend.set_item("b", Bytes::from("2")).unwrap();
            backend.set_item("a", Bytes::from("3")).unwrap();
            backend.remove_item("b").unwrap();
        }

        let backend = FileBackend::open(&log.0, SyncPolicy::Always).unwrap();
        assert_eq!(backend.get_item("a").unwrap(), Some(Bytes::from("3")));
        assert_eq!(backend.get_item("b").unwrap(), None);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.record_count(), 4);
    }

    #[test]
    fn test_remove_missing_key_writes_nothing() {
        let log = TempLog::new("remove_missing");
        let backend = FileBackend::open(&log.0, SyncPolicy::No).unwrap();

        backend.remove_item("nothing").unwrap();
        assert_eq!(backend.record_count(), 0);
        assert_eq!(fs::metadata(&log.0).unwrap().len(), 0);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let log = TempLog::new("torn");

        {
            let backend = FileBackend::open(&log.0, SyncPolicy::Always).unwrap();
            backend.set_item("kept", Bytes::from("yes")).unwrap();
        }

        // Simulate a crash halfway through the next record
        let torn = Record::set("lost", Bytes::from("partial")).to_bytes().unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&log.0).unwrap();
            file.write_all(&torn[..torn.len() / 2]).unwrap();
        }

        {
            let backend = FileBackend::open(&log.0, SyncPolicy::Always).unwrap();
            assert_eq!(backend.get_item("kept").unwrap(), Some(Bytes::from("yes")));
            assert_eq!(backend.get_item("lost").unwrap(), None);

            // Writes after recovery must be readable on the next open
            backend.set_item("after", Bytes::from("ok")).unwrap();
        }

        let backend = FileBackend::open(&log.0, SyncPolicy::Always).unwrap();
        assert_eq!(backend.get_item("after").unwrap(), Some(Bytes::from("ok")));
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_corrupt_record_stops_replay() {
        let log = TempLog::new("corrupt");

        let mut data = Record::set("first", Bytes::from("1")).to_bytes().unwrap();
        let second_at = data.len();
        data.extend(Record::set("second", Bytes::from("2")).to_bytes().unwrap());
        data.extend(Record::set("third", Bytes::from("3")).to_bytes().unwrap());
        // Flip a bit inside the second record's value
        data[second_at + 1 + 4 + "second".len() + 4] ^= 0x01;
        fs::write(&log.0, &data).unwrap();

        let backend = FileBackend::open(&log.0, SyncPolicy::No).unwrap();
        assert_eq!(backend.get_item("first").unwrap(), Some(Bytes::from("1")));
        assert_eq!(backend.get_item("second").unwrap(), None);
        assert_eq!(backend.get_item("third").unwrap(), None);
        assert_eq!(fs::metadata(&log.0).unwrap().len(), second_at as u64);
    }

    #[test]
    fn test_compact_keeps_live_data() {
        let log = TempLog::new("compact");

        let backend = FileBackend::open(&log.0, SyncPolicy::No).unwrap();
        for i in 0..10 {
            backend.set_item("counter", Bytes::from(i.to_string())).unwrap();
        }
        backend.set_item("temp", Bytes::from("x")).unwrap();
        backend.remove_item("temp").unwrap();
        assert_eq!(backend.record_count(), 12);

        backend.compact().unwrap();
        assert_eq!(backend.record_count(), 1);

        // Still writable after the swap
        backend.set_item("other", Bytes::from("y")).unwrap();
        drop(backend);

        let backend = FileBackend::open(&log.0, SyncPolicy::No).unwrap();
        assert_eq!(backend.get_item("counter").unwrap(), Some(Bytes::from("9")));
        assert_eq!(backend.get_item("other").unwrap(), Some(Bytes::from("y")));
        assert_eq!(backend.get_item("temp").unwrap(), None);
        assert_eq!(backend.record_count(), 2);
    }

    #[test]
    fn test_quota() {
        let log = TempLog::new("quota");
        let backend = FileBackend::open_with_quota(&log.0, SyncPolicy::No, Some(8)).unwrap();

        backend.set_item("k", Bytes::from("1234")).unwrap();
        let err = backend.set_item("k2", Bytes::from("12345")).unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { limit: 8, .. }));

        // The rejected write never reached the log
        assert_eq!(backend.record_count(), 1);
    }
}

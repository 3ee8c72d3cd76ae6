// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Single-file write-ahead log
//!
//! Markers are appended in a compact little-endian format:
//!
//! - File header (64 bytes): magic, version, creation timestamp, reserved
//! - Each record (49 bytes):
//!   - Magic Number (4 bytes): 0x4D584E54
//!   - Kind (1 byte)
//!   - Database ID, Transaction ID, Collection ID (0 = none), Revision, Tick (8 bytes each)
//!   - Checksum (4 bytes): CRC32 over everything before it

use super::{MarkerKind, WalError, WalManager, WalMarker, WalSlot};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Magic number to identify WAL records
const WAL_MAGIC: u32 = 0x4D58_4E54;
/// Current WAL format version
const WAL_VERSION: u16 = 1;
const HEADER_SIZE: usize = 64;
const RECORD_SIZE: usize = 4 + 1 + 8 * 5 + 4;
const WAL_FILE_NAME: &str = "markers.log";

/// Options for [`FileWal`]
#[derive(Debug, Clone, Copy)]
pub struct FileWalOptions {
    /// Maximum file size in bytes; writes beyond it fail with `NoSpace`
    pub capacity: Option<u64>,
    pub max_throttle_wait: Duration,
}

impl Default for FileWalOptions {
    fn default() -> Self {
        Self {
            capacity: None,
            max_throttle_wait: Duration::from_secs(15),
        }
    }
}

/// A marker read back from disk together with its tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMarker {
    pub tick: u64,
    pub marker: WalMarker,
}

/// The append target of a [`Writer`]
trait LogFile: Write {
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
    fn sync(&mut self) -> std::io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

struct Writer<F = File> {
    file: F,
    size: u64,
}

impl<F: LogFile> Writer<F> {
    /// Append one record; a failed write is cut back to the last whole record
    fn append(&mut self, record: &[u8], sync: bool) -> Result<(), WalError> {
        let written = self.file.write_all(record).and_then(|_| self.file.flush());
        if let Err(e) = written {
            if let Err(truncate_err) = self.file.truncate(self.size) {
                log::error!(
                    "failed to cut WAL back to {} bytes after a failed write: {}",
                    self.size,
                    truncate_err
                );
            }
            return Err(e.into());
        }
        self.size += record.len() as u64;
        if sync {
            self.file.sync()?;
        }
        Ok(())
    }
}

/// Append-only WAL in one file
pub struct FileWal {
    path: PathBuf,
    options: FileWalOptions,
    writer: Mutex<Writer>,
    sequence: AtomicU64,
    running: Mutex<BTreeSet<u64>>,
    throttled: AtomicBool,
}

impl std::fmt::Debug for FileWal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWal")
            .field("path", &self.path)
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .field("throttled", &self.is_throttled())
            .finish()
    }
}

impl FileWal {
    /// Open (or create) the log inside `dir`
    pub fn open(dir: impl AsRef<Path>, options: FileWalOptions) -> Result<Self, WalError> {
        let dir = dir.as_ref();
        create_dir_all(dir)
            .map_err(|e| WalError::Io(format!("Failed to create WAL directory: {}", e)))?;
        let path = dir.join(WAL_FILE_NAME);

        let existing = if path.exists() {
            read_markers(&path)?
        } else {
            Vec::new()
        };
        let max_tick = existing.iter().map(|m| m.tick).max().unwrap_or(0);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .map_err(|e| WalError::Io(format!("Failed to open WAL file: {}", e)))?;
        let mut size = file.metadata()?.len();
        if size == 0 {
            let header = file_header();
            file.write_all(&header)?;
            file.sync_data()?;
            size = header.len() as u64;
        }

        log::debug!(
            "opened WAL {} ({} markers, resuming after tick {})",
            path.display(),
            existing.len(),
            max_tick
        );

        Ok(Self {
            path,
            options,
            writer: Mutex::new(Writer { file, size }),
            sequence: AtomicU64::new(max_tick),
            running: Mutex::new(BTreeSet::new()),
            throttled: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Switch write throttling on or off
    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::SeqCst);
    }

    /// Ticks of transactions currently registered as running
    pub fn running_transactions(&self) -> Vec<u64> {
        self.running.lock().iter().copied().collect()
    }

    /// Replay all intact markers from disk
    pub fn read_markers(&self) -> Result<Vec<StoredMarker>, WalError> {
        read_markers(&self.path)
    }
}

impl WalManager for FileWal {
    fn allocate_and_write(
        &self,
        marker: &WalMarker,
        wait_for_sync: bool,
    ) -> Result<WalSlot, WalError> {
        let mut writer = self.writer.lock();
        if let Some(capacity) = self.options.capacity {
            if writer.size + RECORD_SIZE as u64 > capacity {
                return Err(WalError::NoSpace);
            }
        }

        let tick = self.next_sequence();
        writer.append(&encode(tick, marker), wait_for_sync)?;

        Ok(WalSlot {
            tick,
            logfile_id: 1,
        })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn register_transaction(&self, transaction_id: u64) -> Result<(), WalError> {
        if !self.running.lock().insert(transaction_id) {
            return Err(WalError::Internal(format!(
                "transaction {} is already registered",
                transaction_id
            )));
        }
        Ok(())
    }

    fn unregister_transaction(&self, transaction_id: u64) {
        self.running.lock().remove(&transaction_id);
    }

    fn can_be_throttled(&self) -> bool {
        true
    }

    fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }

    fn max_throttle_wait(&self) -> Duration {
        self.options.max_throttle_wait
    }
}

fn file_header() -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&WAL_MAGIC.to_le_bytes());
    header.extend_from_slice(&WAL_VERSION.to_le_bytes());
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    header.extend_from_slice(&timestamp.to_le_bytes());
    header.resize(HEADER_SIZE, 0);
    header
}

fn encode(tick: u64, marker: &WalMarker) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(RECORD_SIZE);
    buffer.extend_from_slice(&WAL_MAGIC.to_le_bytes());
    buffer.push(marker.kind as u8);
    buffer.extend_from_slice(&marker.database_id.to_le_bytes());
    buffer.extend_from_slice(&marker.transaction_id.to_le_bytes());
    buffer.extend_from_slice(&marker.collection_id.unwrap_or(0).to_le_bytes());
    buffer.extend_from_slice(&marker.revision.to_le_bytes());
    buffer.extend_from_slice(&tick.to_le_bytes());
    let checksum = crc32fast::hash(&buffer);
    buffer.extend_from_slice(&checksum.to_le_bytes());
    buffer
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn decode(data: &[u8]) -> Result<StoredMarker, WalError> {
    if data.len() < RECORD_SIZE {
        return Err(WalError::Corrupted("record too small".to_string()));
    }
    if read_u32(data, 0) != WAL_MAGIC {
        return Err(WalError::Corrupted("invalid magic number".to_string()));
    }
    let body = &data[..RECORD_SIZE - 4];
    if crc32fast::hash(body) != read_u32(data, RECORD_SIZE - 4) {
        return Err(WalError::Corrupted("checksum mismatch".to_string()));
    }
    let kind = MarkerKind::from_byte(data[4])
        .ok_or_else(|| WalError::Corrupted(format!("invalid marker kind {}", data[4])))?;
    let collection_id = read_u64(data, 21);

    Ok(StoredMarker {
        tick: read_u64(data, 37),
        marker: WalMarker {
            kind,
            database_id: read_u64(data, 5),
            transaction_id: read_u64(data, 13),
            collection_id: (collection_id != 0).then_some(collection_id),
            revision: read_u64(data, 29),
        },
    })
}

/// Read every intact record, skipping damaged bytes
fn read_markers(path: &Path) -> Result<Vec<StoredMarker>, WalError> {
    let mut buffer = Vec::new();
    File::open(path)
        .map_err(|e| WalError::Io(format!("Failed to open WAL file: {}", e)))?
        .read_to_end(&mut buffer)?;

    let mut markers = Vec::new();
    let mut offset = HEADER_SIZE.min(buffer.len());
    while offset + RECORD_SIZE <= buffer.len() {
        match decode(&buffer[offset..]) {
            Ok(marker) => {
                markers.push(marker);
                offset += RECORD_SIZE;
            }
            Err(e) => {
                log::warn!("skipping damaged WAL byte at offset {}: {}", offset, e);
                offset += 1;
            }
        }
    }
    Ok(markers)
}

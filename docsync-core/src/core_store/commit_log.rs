/*
    commit_log.rs - Append-only record log

    Durable, sequential storage of small records (sync cursor updates).
    Replaying the log from the start rebuilds the latest state.

    Features:
    - Append-only writes (no in-place updates)
    - Sequential read for replay
    - Sequence recovery on reopen
    - CRC32 checksums for corruption detection
*/

use super::errors::{StoreError, StoreResult};
use crate::core_oplog::now_millis;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bytes of framing around each entry: [seq:8][timestamp:8][len:4] ... [checksum:4]
const FRAME_OVERHEAD: usize = 8 + 8 + 4 + 4;

/// Entry in the commit log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Sequence number
    pub seq: u64,

    /// Append time in milliseconds
    pub timestamp: u64,

    /// Entry payload
    pub data: Vec<u8>,

    /// CRC32 checksum
    pub checksum: u32,
}

impl LogEntry {
    pub fn new(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        let checksum = Self::calculate_checksum(&data);
        LogEntry { seq, timestamp, data, checksum }
    }

    fn calculate_checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    pub fn verify_checksum(&self) -> bool {
        Self::calculate_checksum(&self.data) == self.checksum
    }
}

/// Append-only commit log
pub struct CommitLog {
    path: PathBuf,
    file: BufWriter<File>,
    seq: u64,
    size: usize,
}

impl CommitLog {
    /// Create or open a commit log, continuing the sequence of existing entries
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let size = file.metadata()?.len() as usize;

        let seq = read_entries(&path)?.last().map(|entry| entry.seq + 1).unwrap_or(0);

        Ok(CommitLog { path, file: BufWriter::new(file), seq, size })
    }

    /// Append an entry to the log
    pub fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let entry = LogEntry::new(self.seq, now_millis(), data.to_vec());

        self.file.write_all(&entry.seq.to_le_bytes())?;
        self.file.write_all(&entry.timestamp.to_le_bytes())?;
        self.file.write_all(&(entry.data.len() as u32).to_le_bytes())?;
        self.file.write_all(&entry.data)?;
        self.file.write_all(&entry.checksum.to_le_bytes())?;

        self.file.flush()?;

        self.size += FRAME_OVERHEAD + entry.data.len();
        self.seq += 1;

        Ok(entry.seq)
    }

    /// Read all entries from the log
    pub fn read_all(&mut self) -> StoreResult<Vec<LogEntry>> {
        self.file.flush()?;
        read_entries(&self.path)
    }

    /// Truncate the log (remove all entries)
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.get_mut().set_len(0)?;
        self.file.get_mut().seek(SeekFrom::Start(0))?;
        self.seq = 0;
        self.size = 0;
        Ok(())
    }

    /// Get the current size of the log in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the next sequence number
    pub fn current_seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_entries(path: &Path) -> StoreResult<Vec<LogEntry>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut entries = Vec::new();

    loop {
        let mut seq_buf = [0u8; 8];
        match reader.read_exact(&mut seq_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let seq = u64::from_le_bytes(seq_buf);

        let mut ts_buf = [0u8; 8];
        read_frame(&mut reader, &mut ts_buf, seq)?;
        let timestamp = u64::from_le_bytes(ts_buf);

        let mut len_buf = [0u8; 4];
        read_frame(&mut reader, &mut len_buf, seq)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        let mut data = vec![0u8; len];
        read_frame(&mut reader, &mut data, seq)?;

        let mut checksum_buf = [0u8; 4];
        read_frame(&mut reader, &mut checksum_buf, seq)?;
        let checksum = u32::from_le_bytes(checksum_buf);

        let entry = LogEntry { seq, timestamp, data, checksum };

        if !entry.verify_checksum() {
            return Err(StoreError::CorruptedData(format!("Invalid checksum at seq {}", seq)));
        }

        entries.push(entry);
    }

    Ok(entries)
}

fn read_frame(reader: &mut impl Read, buf: &mut [u8], seq: u64) -> StoreResult<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            StoreError::CorruptedData(format!("Truncated entry at seq {}", seq))
        }
        _ => e.into(),
    })
}

//! Filter segment: an append-only file of binary rough filter records.
//!
//! Each entry is:
//! - Block id (8 bytes)
//! - Length (4 bytes): length of the record
//! - Checksum (4 bytes): CRC32 of block id, length and record
//! - Record (variable): a rough filter binary record
//!
//! Recovery stops at a torn tail or a checksum mismatch, since nothing after
//! that point can be framed reliably. A record with a valid checksum that fails
//! to decode (format skew) is skipped and its block reported.

use crate::catalog::BlockId;
use crate::error::{Error, Result};
use crate::rough_filter::FastRoughFilter;
use bytes::{BufMut, BytesMut};
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Size of the entry header (block id + length + checksum)
pub const ENTRY_HEADER_SIZE: usize = 16;

/// Upper bound on a single record, guarding allocations against garbage lengths.
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

fn entry_checksum(block: BlockId, length: u32, record: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&block.to_le_bytes());
    hasher.update(&length.to_le_bytes());
    hasher.update(record);
    hasher.finalize()
}

/// Appends rough filter records to a segment file.
pub struct FilterSegmentWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    file_size: u64,
}

impl FilterSegmentWriter {
    /// Open the segment in append mode, creating it if it doesn't exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let file_size = file.metadata()?.len();

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            file_size,
        })
    }

    /// Append the binary record of a built filter.
    pub fn append(&mut self, block: BlockId, filter: &FastRoughFilter) -> Result<()> {
        let record = filter.serialize_to_bytes()?;
        self.append_record(block, &record)
    }

    /// Append an already encoded record.
    pub fn append_record(&mut self, block: BlockId, record: &[u8]) -> Result<()> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(Error::invalid_argument(format!(
                "Rough filter record too large: {} bytes",
                record.len()
            )));
        }

        let length = record.len() as u32;
        let mut buf = BytesMut::with_capacity(ENTRY_HEADER_SIZE + record.len());
        buf.put_u64_le(block);
        buf.put_u32_le(length);
        buf.put_u32_le(entry_checksum(block, length, record));
        buf.put_slice(record);

        self.writer.write_all(&buf)?;
        self.file_size += buf.len() as u64;
        Ok(())
    }

    /// Flush and fsync the segment.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Current size of the segment in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Path of the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FilterSegmentWriter {
    fn drop(&mut self) {
        // Best effort flush on drop
        let _ = self.writer.flush();
    }
}

/// Filters recovered from a segment.
#[derive(Debug, Default)]
pub struct SegmentRecovery {
    /// Decoded filters in file order. A later record for the same block
    /// supersedes an earlier one.
    pub filters: Vec<(BlockId, FastRoughFilter)>,
    /// Blocks whose record passed the checksum but failed to decode.
    pub skipped: Vec<BlockId>,
    /// True if reading stopped early at a torn or corrupted entry.
    pub truncated: bool,
}

/// Reads rough filter records back from a segment file.
pub struct FilterSegmentReader {
    reader: BufReader<File>,
    position: u64,
}

impl FilterSegmentReader {
    /// Open a segment for reading.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
        })
    }

    /// Read the next `(block, record)` entry. Returns None at EOF.
    pub fn read_next(&mut self) -> Result<Option<(BlockId, Vec<u8>)>> {
        let mut header = [0u8; ENTRY_HEADER_SIZE];
        match self.fill(&mut header)? {
            0 => return Ok(None),
            ENTRY_HEADER_SIZE => {}
            n => {
                return Err(Error::corruption(format!(
                    "Truncated segment entry header: {} of {} bytes",
                    n, ENTRY_HEADER_SIZE
                )));
            }
        }

        let block = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let length = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let checksum = u32::from_le_bytes(header[12..16].try_into().unwrap());

        if length as usize > MAX_RECORD_SIZE {
            return Err(Error::corruption(format!("Segment record length {} too large", length)));
        }

        let mut record = vec![0u8; length as usize];
        match self.reader.read_exact(&mut record) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::corruption(format!(
                    "Truncated segment record for block {}",
                    block
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        let actual = entry_checksum(block, length, &record);
        if actual != checksum {
            return Err(Error::ChecksumMismatch {
                expected: checksum,
                actual,
            });
        }

        self.position += (ENTRY_HEADER_SIZE + record.len()) as u64;
        Ok(Some((block, record)))
    }

    /// Read until `buf` is full or EOF; returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(filled)
    }

    /// Offset of the next unread entry.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Decode every readable entry of the segment.
    pub fn recover_all(&mut self) -> Result<SegmentRecovery> {
        let mut recovery = SegmentRecovery::default();

        loop {
            let (block, record) = match self.read_next() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) if e.is_data_error() => {
                    log::warn!("Filter segment corruption at position {}: {}", self.position, e);
                    recovery.truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            };

            match FastRoughFilter::from_bytes(&record) {
                Ok(filter) => recovery.filters.push((block, filter)),
                Err(e) => {
                    log::warn!("Skipping undecodable rough filter of block {}: {}", block, e);
                    recovery.skipped.push(block);
                }
            }
        }

        Ok(recovery)
    }
}

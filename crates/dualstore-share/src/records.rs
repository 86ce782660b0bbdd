//! FILE_DIRECTORY_INFORMATION decoding (MS-FSCC 2.4.10).
//!
//! A QUERY_DIRECTORY output buffer is a chain of variable-length records
//! linked by `NextEntryOffset`:
//!
//! ```text
//! 0   NextEntryOffset  u32
//! 4   FileIndex        u32
//! 8   CreationTime     i64 (FILETIME)
//! 16  LastAccessTime   i64
//! 24  LastWriteTime    i64
//! 32  ChangeTime       i64
//! 40  EndOfFile        i64
//! 48  AllocationSize   i64
//! 56  FileAttributes   u32
//! 60  FileNameLength   u32 (bytes)
//! 64  FileName         UTF-16LE
//! ```

use bytes::Buf;
use dualstore_core::normalize::decode_share_timestamp;
use dualstore_core::DirectoryEntry;
use tracing::{debug, warn};

use crate::transport::FILE_ATTRIBUTE_DIRECTORY;

pub const RECORD_HEADER_LEN: usize = 64;
const BYTE_ORDER_MARK: &str = "\u{feff}";

/// One decoded record, name still in raw UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub file_index: u32,
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_write_time: i64,
    pub change_time: i64,
    pub end_of_file: i64,
    pub allocation_size: i64,
    pub file_attributes: u32,
    pub file_name: Vec<u16>,
}

impl DirectoryRecord {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }

    /// Strict UTF-16 decode; lone surrogates are an error.
    pub fn decoded_name(&self) -> Result<String, std::string::FromUtf16Error> {
        String::from_utf16(&self.file_name)
    }

    /// Last-write time, falling back to change then creation time when the
    /// server left it zero.
    pub fn modified_ticks(&self) -> Option<i64> {
        [self.last_write_time, self.change_time, self.creation_time]
            .into_iter()
            .find(|t| *t != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record at offset {offset} truncated: {available} of {needed} bytes present")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("record at offset {offset} has odd file name length {length}")]
    OddNameLength { offset: usize, length: usize },

    #[error("record at offset {offset} links to {next} outside the buffer")]
    BrokenChain { offset: usize, next: usize },
}

/// Walks the record chain of one output buffer.
///
/// A malformed record yields an error but iteration continues with the
/// next record as long as the chain itself is intact.
pub struct DirectoryRecords<'a> {
    buf: &'a [u8],
    offset: Option<usize>,
}

impl<'a> DirectoryRecords<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: (!buf.is_empty()).then_some(0),
        }
    }
}

impl Iterator for DirectoryRecords<'_> {
    type Item = Result<DirectoryRecord, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offset.take()?;
        let available = self.buf.len() - offset;
        if available < 4 {
            return Some(Err(RecordError::Truncated {
                offset,
                needed: RECORD_HEADER_LEN,
                available,
            }));
        }

        let mut cursor = &self.buf[offset..];
        let next_entry = cursor.get_u32_le() as usize;
        let record_end = if next_entry == 0 {
            self.buf.len()
        } else {
            let next = offset + next_entry;
            if next_entry < RECORD_HEADER_LEN || next > self.buf.len() {
                return Some(Err(RecordError::BrokenChain { offset, next }));
            }
            if next < self.buf.len() {
                self.offset = Some(next);
            }
            next
        };

        Some(parse_record(&self.buf[offset..record_end], offset))
    }
}

fn parse_record(record: &[u8], offset: usize) -> Result<DirectoryRecord, RecordError> {
    if record.len() < RECORD_HEADER_LEN {
        return Err(RecordError::Truncated {
            offset,
            needed: RECORD_HEADER_LEN,
            available: record.len(),
        });
    }

    let mut cursor = &record[4..RECORD_HEADER_LEN];
    let file_index = cursor.get_u32_le();
    let creation_time = cursor.get_i64_le();
    let last_access_time = cursor.get_i64_le();
    let last_write_time = cursor.get_i64_le();
    let change_time = cursor.get_i64_le();
    let end_of_file = cursor.get_i64_le();
    let allocation_size = cursor.get_i64_le();
    let file_attributes = cursor.get_u32_le();
    let name_len = cursor.get_u32_le() as usize;

    if name_len % 2 != 0 {
        return Err(RecordError::OddNameLength {
            offset,
            length: name_len,
        });
    }
    let name_bytes = record
        .get(RECORD_HEADER_LEN..RECORD_HEADER_LEN + name_len)
        .ok_or(RecordError::Truncated {
            offset,
            needed: RECORD_HEADER_LEN + name_len,
            available: record.len(),
        })?;
    let file_name = name_bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(DirectoryRecord {
        file_index,
        creation_time,
        last_access_time,
        last_write_time,
        change_time,
        end_of_file,
        allocation_size,
        file_attributes,
        file_name,
    })
}

/// Whether a decoded name is a real, displayable entry.
pub fn is_listable_name(name: &str) -> bool {
    !(name == "."
        || name == ".."
        || name == BYTE_ORDER_MARK
        || name.trim().is_empty()
        || name.chars().any(|c| (c as u32) < 0x20)
        || name.contains(['/', '\\']))
}

/// Convert a record into an entry, or `None` when it must be skipped.
pub fn entry_from_record(record: &DirectoryRecord) -> Option<DirectoryEntry> {
    let name = match record.decoded_name() {
        Ok(name) => name,
        Err(e) => {
            warn!(file_index = record.file_index, "Skipping undecodable file name: {}", e);
            return None;
        }
    };
    if !is_listable_name(&name) {
        debug!("Skipping pseudo or unprintable entry {:?}", name);
        return None;
    }

    let modified = record.modified_ticks().and_then(decode_share_timestamp);
    let entry = if record.is_directory() {
        DirectoryEntry::directory(name)
    } else {
        DirectoryEntry::file(name, record.end_of_file.max(0) as u64)
    };
    Some(entry.with_modified(modified))
}

/// Decode every usable entry of one output buffer into `out`.
pub fn collect_entries(buf: &[u8], out: &mut Vec<DirectoryEntry>) {
    for record in DirectoryRecords::new(buf) {
        match record {
            Ok(record) => out.extend(entry_from_record(&record)),
            Err(e) => warn!("Skipping malformed directory record: {}", e),
        }
    }
}

//! Shared table of input records.
//!
//! The supervisor fills the table once from a line-oriented input stream
//! before any worker is spawned. Workers map it read-only.

use crate::error::{PalinError, Result};
use crate::shm::Shareable;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Number of records the table can hold.
pub const LIST_SIZE: usize = 50;

/// Bytes per record, including the NUL terminator.
pub const ITEM_SIZE: usize = 256;

/// Fixed-capacity table of NUL-terminated text records.
#[repr(C)]
pub struct RecordTable {
    count: usize,
    records: [[u8; ITEM_SIZE]; LIST_SIZE],
}

unsafe impl Shareable for RecordTable {}

impl RecordTable {
    /// An empty table on the heap, for building outside shared memory.
    pub fn boxed() -> Box<Self> {
        Box::new(Self {
            count: 0,
            records: [[0; ITEM_SIZE]; LIST_SIZE],
        })
    }

    /// Number of records loaded.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Replace the table contents with lines read from `reader`.
    ///
    /// Reads at most [`LIST_SIZE`] lines and stores their raw bytes; text
    /// that is not UTF-8 is kept as is and decoded lossily by [`record`].
    /// Lines longer than `ITEM_SIZE - 1` bytes are cut at the last character
    /// boundary that fits. Returns the number of records stored.
    ///
    /// [`record`]: RecordTable::record
    pub fn populate<R: BufRead>(&mut self, mut reader: R) -> io::Result<usize> {
        self.records = [[0; ITEM_SIZE]; LIST_SIZE];
        self.count = 0;

        let mut line = Vec::new();
        while self.count < LIST_SIZE {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            let text = truncate_to_fit(strip_line_ending(&line));
            self.records[self.count][..text.len()].copy_from_slice(text);
            self.count += 1;
        }
        Ok(self.count)
    }

    /// Text of the record at `index`.
    ///
    /// Slots past the loaded count read as empty text.
    pub fn record(&self, index: usize) -> Result<Cow<'_, str>> {
        let slot = self.records.get(index).ok_or(PalinError::RecordIndex {
            index,
            capacity: LIST_SIZE,
        })?;
        let end = slot.iter().position(|&b| b == 0).unwrap_or(ITEM_SIZE);
        Ok(String::from_utf8_lossy(&slot[..end]))
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Cut `text` to `ITEM_SIZE - 1` bytes without splitting a UTF-8 sequence.
///
/// Bytes that are not valid UTF-8 are cut wherever the limit falls.
fn truncate_to_fit(text: &[u8]) -> &[u8] {
    let max = ITEM_SIZE - 1;
    if text.len() <= max {
        return text;
    }
    // text[max] is the first byte dropped; a continuation byte there means
    // the sequence it belongs to has to go as well.
    let mut end = max;
    while end > 0 && max - end < 3 && text[end] & 0xC0 == 0x80 {
        end -= 1;
    }
    if text[end] & 0xC0 == 0xC0 {
        &text[..end]
    } else {
        &text[..max]
    }
}

/// Open the record source: a file path, or `-` for stdin.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    if path == Path::new("-") {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path).map_err(|e| {
        PalinError::Config(format!("Failed to open input '{}': {}", path.display(), e))
    })?;
    Ok(Box::new(BufReader::new(file)))
}

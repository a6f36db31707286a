//! Append-only outcome logs written from inside the critical section.
//!
//! Each line is `<worker-pid> <record-index> <record-text>`. Line order
//! follows critical-section entry order across all workers.

use crate::classify::Classification;
use crate::error::{PalinError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Log receiving palindromes.
pub const PALINDROME_LOG: &str = "palin.out";

/// Log receiving everything else.
pub const NON_PALINDROME_LOG: &str = "nopalin.out";

/// One parsed outcome line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeLine {
    pub pid: u32,
    pub index: usize,
    pub text: String,
}

impl OutcomeLine {
    pub fn new(pid: u32, index: usize, text: impl Into<String>) -> Self {
        Self {
            pid,
            index,
            text: text.into(),
        }
    }

    pub fn to_line(&self) -> String {
        format!("{} {} {}\n", self.pid, self.index, self.text)
    }

    /// Parse a line previously produced by [`to_line`](Self::to_line).
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let mut parts = line.splitn(3, ' ');
        let pid = parts.next()?.parse().ok()?;
        let index = parts.next()?.parse().ok()?;
        let text = parts.next().unwrap_or("");
        Some(Self::new(pid, index, text))
    }
}

/// The pair of outcome logs held open by one worker.
pub struct OutcomeLogs {
    palindromes: BufWriter<File>,
    others: BufWriter<File>,
}

impl OutcomeLogs {
    /// Open (creating if needed) both logs in `dir` for appending.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            palindromes: open_append(&dir.join(PALINDROME_LOG))?,
            others: open_append(&dir.join(NON_PALINDROME_LOG))?,
        })
    }

    /// Append one line to the log matching `outcome` and flush it.
    pub fn record(&mut self, outcome: Classification, line: &OutcomeLine) -> Result<()> {
        let writer = if outcome.is_palindrome() {
            &mut self.palindromes
        } else {
            &mut self.others
        };
        writer.write_all(line.to_line().as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Flush and close both logs.
    pub fn close(mut self) -> Result<()> {
        self.palindromes.flush()?;
        self.others.flush()?;
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PalinError::Worker(format!("Failed to open {}: {}", path.display(), e)))?;
    Ok(BufWriter::new(file))
}

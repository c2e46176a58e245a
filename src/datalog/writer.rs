//! # Rotating Data File Writer
//!
//! Buffers formatted rows and appends them to the active data file.
//!
//! Two triggers are checked once per poll cycle by
//! [`RotatingLogWriter::maybe_rotate`]:
//!
//! - **Day change**: the pending rows are flushed into the old file, which is
//!   then closed. The next appended reading opens a new file whose header is
//!   taken from that reading.
//! - **Buffer threshold**: the pending rows are flushed into the current
//!   file. No new file is created.
//!
//! A failed write never discards rows. They stay queued, in order, and are
//! retried on the next flush. Rows of a file that was rotated out while its
//! last flush failed are retried before anything newer.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

use super::format::{data_file_name, ColumnLayout};
use crate::error::{LoggerError, Result};
use crate::reading::Reading;

/// Give up looking for a free file name after this many collisions
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Where and how data files are written
#[derive(Debug, Clone)]
pub struct WriterSettings {
    /// Directory holding the data files (created if missing)
    pub dir: PathBuf,
    /// File name after the timestamp prefix, e.g. `falco`
    pub base_name: String,
    /// Extension including the dot, e.g. `.txt`
    pub extension: String,
    /// Pending rows that trigger a flush
    pub buffer_size: usize,
}

/// What [`RotatingLogWriter::maybe_rotate`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    None,
    Flushed,
    Rotated,
}

/// Open data file
#[derive(Debug)]
struct LogFile {
    path: PathBuf,
    file: File,
}

/// Rows belonging to one data file, from its first reading until rotation
#[derive(Debug)]
struct Segment {
    layout: ColumnLayout,
    created: DateTime<Local>,
    file: Option<LogFile>,
    pending: Vec<String>,
}

impl Segment {
    fn new(first: &Reading) -> Self {
        Self {
            layout: ColumnLayout::from_reading(first),
            created: first.captured_at(),
            file: None,
            pending: Vec::new(),
        }
    }

    fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    /// Create the backing file and write its header, if not done yet
    fn ensure_open(&mut self, settings: &WriterSettings) -> Result<&mut LogFile> {
        let log_file = match self.file.take() {
            Some(f) => f,
            None => {
                let f = create_log_file(settings, &self.layout, self.created)?;
                info!("Writing to data file: {}", f.path.display());
                f
            }
        };

        Ok(self.file.insert(log_file))
    }

    /// Write every pending row; on failure the rows stay pending
    fn flush(&mut self, settings: &WriterSettings) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let rows = self.pending.concat();
        let count = self.pending.len();
        let log_file = self.ensure_open(settings)?;

        append_or_rollback(&mut log_file.file, |f| {
            f.write_all(rows.as_bytes())?;
            f.flush()
        })
        .map_err(|e| LoggerError::file(&log_file.path, e))?;
        debug!("Flushed {} rows to {}", count, log_file.path.display());

        self.pending.clear();
        Ok(count)
    }
}

/// Run `write` against the end of `file`, all or nothing
///
/// On failure the file is cut back to its length before the call, so rows
/// that stay pending are never on disk twice.
fn append_or_rollback<F>(file: &mut File, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let start = file.metadata()?.len();

    if let Err(e) = write(&mut *file) {
        if let Err(truncate) = file.set_len(start) {
            error!("Cannot roll back partial write: {}", truncate);
        }
        return Err(e);
    }

    Ok(())
}

/// Create `path` exclusively and write its header
///
/// A file whose header could not be written is removed again.
fn create_with_header<F>(path: &Path, write_header: F) -> io::Result<File>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let mut file = OpenOptions::new().append(true).create_new(true).open(path)?;

    if let Err(e) = write_header(&mut file) {
        drop(file);
        if let Err(remove) = fs::remove_file(path) {
            warn!("Cannot remove {}: {}", path.display(), remove);
        }
        return Err(e);
    }

    Ok(file)
}

/// Create a uniquely named data file and write its header
fn create_log_file(
    settings: &WriterSettings,
    layout: &ColumnLayout,
    created: DateTime<Local>,
) -> Result<LogFile> {
    fs::create_dir_all(&settings.dir).map_err(|e| LoggerError::file(&settings.dir, e))?;
    let header = layout.header(created);

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = data_file_name(created, &settings.base_name, &settings.extension, attempt);
        let path = settings.dir.join(name);

        match create_with_header(&path, |f| f.write_all(header.as_bytes())) {
            Ok(file) => return Ok(LogFile { path, file }),
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
            Err(e) => return Err(LoggerError::file(&path, e)),
        }
    }

    Err(LoggerError::file(
        &settings.dir,
        std::io::Error::new(
            IoErrorKind::AlreadyExists,
            format!("no free file name after {} attempts", MAX_NAME_ATTEMPTS),
        ),
    ))
}

/// Buffered, day-rotating writer for readings
#[derive(Debug)]
pub struct RotatingLogWriter {
    settings: WriterSettings,
    /// Segment receiving new readings
    current: Option<Segment>,
    /// Rotated-out segments whose rows have not been written yet
    retired: VecDeque<Segment>,
    rows_written: u64,
}

impl RotatingLogWriter {
    /// Create a writer; no file is created until the first reading arrives
    pub fn new(mut settings: WriterSettings) -> Self {
        settings.buffer_size = settings.buffer_size.max(1);
        Self {
            settings,
            current: None,
            retired: VecDeque::new(),
            rows_written: 0,
        }
    }

    /// Queue one reading as a row of the current data file
    ///
    /// Opens a new file (header from this reading) when none is active.
    ///
    /// # Errors
    ///
    /// Returns a file error if the data file could not be created. The row is
    /// kept and written by a later flush.
    pub fn append(&mut self, reading: &Reading) -> Result<()> {
        let settings = &self.settings;
        let segment = self.current.get_or_insert_with(|| Segment::new(reading));

        let row = segment.layout.format_row(reading);
        segment.pending.push(row);

        if segment.file.is_none() {
            segment.ensure_open(settings)?;
        }

        Ok(())
    }

    /// Rotate on day change, or flush once the buffer threshold is reached
    ///
    /// # Arguments
    ///
    /// * `now` - Time of the current cycle; its local date is compared with
    ///   the creation date of the active file
    ///
    /// # Errors
    ///
    /// Returns a file error if flushing failed. Rotation still takes effect;
    /// the unwritten rows are retried by later flushes.
    pub fn maybe_rotate(&mut self, now: DateTime<Local>) -> Result<RotationAction> {
        let Some(segment) = self.current.as_ref() else {
            if self.retired.is_empty() {
                return Ok(RotationAction::None);
            }
            self.flush()?;
            return Ok(RotationAction::Flushed);
        };

        if now.date_naive() != segment.created.date_naive() {
            self.rotate()?;
            return Ok(RotationAction::Rotated);
        }

        if segment.pending.len() >= self.settings.buffer_size || !self.retired.is_empty() {
            self.flush()?;
            return Ok(RotationAction::Flushed);
        }

        Ok(RotationAction::None)
    }

    /// Close the active file; the next reading starts a new one
    fn rotate(&mut self) -> Result<()> {
        let Some(segment) = self.current.take() else {
            return Ok(());
        };

        if let Some(path) = segment.path() {
            info!("Day changed, closing data file {}", path.display());
        }

        self.retired.push_back(segment);
        self.flush().map(|_| ())
    }

    /// Write all pending rows, oldest segment first
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of rows written
    pub fn flush(&mut self) -> Result<usize> {
        let mut written = 0;

        while let Some(segment) = self.retired.front_mut() {
            match segment.flush(&self.settings) {
                Ok(n) => {
                    written += n;
                    self.rows_written += n as u64;
                    // Dropping the segment closes its file
                    self.retired.pop_front();
                }
                Err(e) => {
                    warn!(
                        "Data file write failed, keeping {} rows in memory: {}",
                        self.pending_rows(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        if let Some(segment) = self.current.as_mut() {
            match segment.flush(&self.settings) {
                Ok(n) => {
                    written += n;
                    self.rows_written += n as u64;
                }
                Err(e) => {
                    warn!(
                        "Data file write failed, keeping {} rows in memory: {}",
                        self.pending_rows(),
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(written)
    }

    /// Flush everything and release the file handle
    ///
    /// # Errors
    ///
    /// Returns the flush error; the rows that could not be written are
    /// reported and remain in this writer until it is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(path) = self.active_path() {
            info!("Closed data file {}", path.display());
        }
        self.current = None;
        Ok(())
    }

    /// Rows not yet written to disk
    pub fn pending_rows(&self) -> usize {
        self.retired
            .iter()
            .chain(self.current.iter())
            .map(|s| s.pending.len())
            .sum()
    }

    /// Rows successfully written since creation
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Path of the active data file, if one is open
    pub fn active_path(&self) -> Option<&Path> {
        self.current.as_ref().and_then(Segment::path)
    }

    /// Creation time of the active data file
    pub fn active_created(&self) -> Option<DateTime<Local>> {
        self.current.as_ref().map(|s| s.created)
    }
}

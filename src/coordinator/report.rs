use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ReportError;

pub(in crate::coordinator) const REPORT_CSV: &str = "output.csv";
pub(in crate::coordinator) const REPORT_DATA_SUFFIX: &str = ".data";

/// Append-only report files for one run.
///
/// Files open lazily on first write and stay open until [`close_all`];
/// every line is flushed so a crashed run keeps what it reported.
///
/// [`close_all`]: ReportWriters::close_all
#[derive(Debug)]
pub struct ReportWriters {
    directory: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl ReportWriters {
    #[must_use]
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            writers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Append one line to the named report file.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when the file cannot be opened, written, or
    /// flushed. Write failures are never swallowed: losing report data
    /// silently is worse than failing the run.
    pub fn write_line(&mut self, name: &str, value: &str) -> Result<(), ReportError> {
        let writer = match self.writers.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = self.directory.join(name);
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|err| ReportError::Create { path, source: err })?;
                entry.insert(BufWriter::new(file))
            }
        };
        writer
            .write_all(value.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|err| ReportError::Write {
                name: name.to_owned(),
                source: err,
            })?;
        writer.flush().map_err(|err| ReportError::Flush {
            name: name.to_owned(),
            source: err,
        })
    }

    /// Append one line to `output.csv`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`write_line`](ReportWriters::write_line).
    pub fn write_csv_line(&mut self, line: &str) -> Result<(), ReportError> {
        self.write_line(REPORT_CSV, line)
    }

    /// Flush and close every open file. Close failures are logged; the
    /// writers are released either way.
    pub fn close_all(&mut self) {
        for (name, mut writer) in self.writers.drain() {
            if let Err(err) = writer.flush() {
                tracing::error!("Failed to flush report file {} on close: {}", name, err);
            }
        }
    }
}

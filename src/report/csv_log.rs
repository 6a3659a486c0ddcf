//! CSV trace files.
//!
//! Each sink owns one numbered file `run<N>.txt` inside its directory, where
//! `N` is one more than the number of entries already in the directory, so
//! consecutive canary runs never overwrite each other's traces.

use crate::error::AppResult;
use crate::report::{DiagnosticSink, TraceRow};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Writes trace rows to a numbered CSV file, flushing after every row.
pub struct CsvTraceSink {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvTraceSink {
    /// Create `dir` if needed and open the next `run<N>.txt` inside it.
    pub fn create(dir: impl AsRef<Path>) -> AppResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let run_number = fs::read_dir(dir)?.count() + 1;
        let path = dir.join(format!("run{run_number}.txt"));
        debug!(path = %path.display(), "Opening trace file");

        let file = File::create(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(TraceRow::HEADER)?;
        writer.flush()?;

        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// Path of the trace file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_row(&self, row: &TraceRow) -> AppResult<()> {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        };
        writer.serialize(row)?;
        writer.flush()?;
        Ok(())
    }
}

impl DiagnosticSink for CsvTraceSink {
    fn append_record(&self, row: &TraceRow) {
        if let Err(e) = self.write_row(row) {
            warn!(path = %self.path.display(), error = %e, "Failed to write trace row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::TraceTag;
    use tempfile::tempdir;

    #[test]
    fn test_header_and_rows() {
        let dir = tempdir().unwrap();
        let sink = CsvTraceSink::create(dir.path().join("wheeledData")).unwrap();
        sink.append_record(
            &TraceRow::new(TraceTag::MoveStraight, 1200)
                .with_velocity(50.0, 0.0)
                .with_position(0.5, -0.25),
        );

        let contents = fs::read_to_string(sink.path()).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("type,linveldes,angveldes,time,posX,posY,theta"));
        assert_eq!(lines.next(), Some("ms,50.0,0.0,1200,0.5,-0.25,0.0"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_run_numbering() {
        let dir = tempdir().unwrap();
        let first = CsvTraceSink::create(dir.path()).unwrap();
        let second = CsvTraceSink::create(dir.path()).unwrap();

        assert_eq!(first.path().file_name().unwrap(), "run1.txt");
        assert_eq!(second.path().file_name().unwrap(), "run2.txt");
    }
}

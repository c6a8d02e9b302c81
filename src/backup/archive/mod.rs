//! Zip archive engine.
//!
//! [`create_archive`] measures the sources up front, then streams every folder into
//! a deflate compressed zip while reporting [`progress::ProgressEvent`]s.
//! [`extract_archive`] is the blocking inverse.

pub mod counting;
pub mod measure;
pub mod progress;
pub mod source;

use crate::backup::archive::counting::CountingWriter;
use crate::backup::archive::measure::{measure_folders, Measurement};
use crate::backup::archive::progress::{ProgressSink, ProgressTracker};
use crate::backup::archive::source::{ArchiveEntry, ArchiveEntryIterable, EntryKind, SourceFolder};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

static COMPRESSION_LEVEL: i64 = 9;
static COPY_BUFFER_SIZE: usize = 1024 * 1024;
/// Entries at or above this size need zip64 headers.
static LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

fn file_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL))
}

/// Writes `sources` into a zip on `writer` and returns the number of bytes written.
///
/// Each folder becomes a root entry named after its base name. When two folders
/// share a base name the earlier one wins and later duplicates are skipped.
/// Output already written is left in place on failure.
pub fn create_archive<W: Write + Seek>(
    sources: &[PathBuf],
    writer: W,
    progress: &mut dyn ProgressSink,
) -> Result<u64> {
    let totals = measure_folders(sources).map_err(|e| e.in_archive_stage("measure"))?;
    tracing::info!(
        "Archiving {} files, {} bytes from {} folders",
        totals.total_files,
        totals.total_size,
        sources.len()
    );

    let folders = sources
        .iter()
        .map(SourceFolder::from_base_name)
        .collect::<Result<Vec<_>>>()?;

    let counting = CountingWriter::new(writer);
    let written = counting.counter();
    let mut zip = ZipWriter::new(counting);
    let mut state = ArchiveState {
        tracker: ProgressTracker::new(totals),
        totals,
        written,
        files_written: 0,
        names: HashSet::new(),
        buffer: vec![0u8; COPY_BUFFER_SIZE],
    };
    progress.report(state.tracker.event(0, 0));

    for folder in &folders {
        let entries = folder
            .archive_entry_iterator()
            .map_err(|e| e.in_archive_stage(format!("read {:?}", folder.src_dir())))?;
        for entry in entries {
            let entry = entry.map_err(|e| e.in_archive_stage(format!("read {:?}", folder.src_dir())))?;
            state
                .append(&mut zip, &entry, progress)
                .map_err(|e| e.in_archive_stage(format!("add {:?}", entry.src)))?;
        }
    }

    let mut counting = zip.finish().map_err(|e| Error::from(e).in_archive_stage("finish"))?;
    counting
        .flush()
        .map_err(|e| Error::from(e).in_archive_stage("flush"))?;

    let bytes_written = counting.written();
    progress.report(state.tracker.event(bytes_written, state.files_written));
    tracing::info!(
        "Archive finalized: {} files, {} bytes written",
        state.files_written,
        bytes_written
    );
    Ok(bytes_written)
}

struct ArchiveState {
    tracker: ProgressTracker,
    totals: Measurement,
    written: std::sync::Arc<AtomicU64>,
    files_written: u64,
    /// Entry names already written; the first source providing a name wins.
    names: HashSet<String>,
    buffer: Vec<u8>,
}

impl ArchiveState {
    fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn append<W: Write + Seek>(
        &mut self,
        zip: &mut ZipWriter<W>,
        entry: &ArchiveEntry,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        if !self.names.insert(entry.name.clone()) {
            if entry.kind == EntryKind::File {
                tracing::warn!("Skipping {:?}, {} is already in the archive", entry.src, entry.name);
                self.files_written += 1;
                progress.report(self.tracker.event(self.bytes_written(), self.files_written));
            }
            return Ok(());
        }

        match entry.kind {
            EntryKind::Directory => {
                zip.add_directory(entry.name.as_str(), file_options())?;
            }
            EntryKind::File => {
                let mut file = File::open(&entry.src)?;
                let size = file.metadata()?.len();
                let options = file_options().large_file(size >= LARGE_FILE_THRESHOLD);
                zip.start_file(entry.name.as_str(), options)?;
                loop {
                    let n = file.read(&mut self.buffer)?;
                    if n == 0 {
                        break;
                    }
                    zip.write_all(&self.buffer[..n])?;
                    if size >= COPY_BUFFER_SIZE as u64 {
                        progress.report(self.tracker.event(self.bytes_written(), self.files_written));
                    }
                }
                self.files_written += 1;
                tracing::trace!(
                    "Archived {} ({}/{})",
                    entry.name,
                    self.files_written,
                    self.totals.total_files
                );
                progress.report(self.tracker.event(self.bytes_written(), self.files_written));
            }
        }
        Ok(())
    }
}

/// Extracts `archive_path` into `destination`, creating it if needed.
pub fn extract_archive<P1: AsRef<Path>, P2: AsRef<Path>>(archive_path: P1, destination: P2) -> Result<()> {
    let (archive_path, destination) = (archive_path.as_ref(), destination.as_ref());
    tracing::info!("Extracting {:?} into {:?}", archive_path, destination);

    let file = File::open(archive_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::not_found(format!("{:?}", archive_path))
        } else {
            Error::from(e).in_archive_stage("open")
        }
    })?;
    std::fs::create_dir_all(destination).map_err(|e| Error::from(e).in_archive_stage("extract"))?;

    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::from(e).in_archive_stage("open"))?;
    archive
        .extract(destination)
        .map_err(|e| Error::from(e).in_archive_stage("extract"))?;

    tracing::info!("Extracted {} entries", archive.len());
    Ok(())
}

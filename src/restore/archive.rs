// cloudrestore/src/restore/archive.rs
use flate2::read::GzDecoder;
use std::cell::Cell;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

use crate::errors::ExtractError;

/// Unpacks an archive into a directory, reporting 0..1 progress.
pub trait ArchiveExtractor: Send + Sync {
    /// Returns the number of entries unpacked.
    fn extract(
        &self,
        archive_path: &Path,
        destination: &Path,
        overwrite: bool,
        progress: &mut dyn FnMut(f64),
    ) -> Result<usize, ExtractError>;
}

/// Extracts GZipped TAR archives.
pub struct TarGzExtractor;

struct CountingReader<R> {
    inner: R,
    consumed: Rc<Cell<u64>>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.set(self.consumed.get() + n as u64);
        Ok(n)
    }
}

fn classify(err: io::Error) -> ExtractError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            ExtractError::Corrupt(err.to_string())
        }
        _ => ExtractError::Io(err),
    }
}

impl ArchiveExtractor for TarGzExtractor {
    fn extract(
        &self,
        archive_path: &Path,
        destination: &Path,
        overwrite: bool,
        progress: &mut dyn FnMut(f64),
    ) -> Result<usize, ExtractError> {
        if !archive_path.is_file() {
            return Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Archive for extraction is not a file: {}", archive_path.display()),
            )));
        }

        if !destination.exists() {
            fs::create_dir_all(destination)?;
        } else if !destination.is_dir() {
            return Err(ExtractError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!(
                    "Extraction path exists but is not a directory: {}",
                    destination.display()
                ),
            )));
        }

        info!(
            "Extracting tar.gz archive from {} to {}",
            archive_path.display(),
            destination.display()
        );

        let total = fs::metadata(archive_path)?.len().max(1);
        let consumed = Rc::new(Cell::new(0u64));
        let reader = CountingReader {
            inner: BufReader::new(File::open(archive_path)?),
            consumed: Rc::clone(&consumed),
        };
        let mut archive = tar::Archive::new(GzDecoder::new(reader));
        archive.set_overwrite(overwrite);

        let mut unpacked = 0;
        for entry in archive.entries().map_err(classify)? {
            let mut entry = entry.map_err(classify)?;
            let unpacked_here = entry.unpack_in(destination).map_err(classify)?;
            if unpacked_here {
                unpacked += 1;
            } else {
                debug!("Skipped entry outside {}", destination.display());
            }
            progress((consumed.get() as f64 / total as f64).min(1.0));
        }
        progress(1.0);

        info!(
            "✓ Extracted {} entries to {}",
            unpacked,
            destination.display()
        );
        Ok(unpacked)
    }
}

//! Single-file extraction from release archives.

use std::fs::OpenOptions;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;

use crate::error::{UpdateError, UpdateResult};
use crate::verify::VerifiedArtifact;

/// Mode used when an archive entry carries no permission bits.
const DEFAULT_MODE: u32 = 0o755;

/// Archive formats release artifacts may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// gzip compressed tarball (`.tar.gz`)
    TarGz,
    /// zip archive (`.zip`)
    Zip,
}

impl ArchiveFormat {
    /// Detect the format from an artifact file name.
    pub fn from_filename(filename: &str) -> UpdateResult<Self> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".tar.gz") {
            Ok(Self::TarGz)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(UpdateError::UnsupportedArchiveFormat {
                filename: filename.to_string(),
            })
        }
    }
}

/// Extract the executable contained in a verified artifact to `dest`.
pub fn extract_artifact(artifact: &VerifiedArtifact, dest: &Path) -> UpdateResult<()> {
    let format = ArchiveFormat::from_filename(artifact.filename())?;
    extract_single_file(artifact.bytes(), format, dest)
}

/// Extract a single file from an archive to `dest`.
///
/// For tarballs only the first entry is read and any further entries are
/// ignored. Zip archives must contain exactly one entry.
pub fn extract_single_file(archive: &[u8], format: ArchiveFormat, dest: &Path) -> UpdateResult<()> {
    match format {
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest),
        ArchiveFormat::Zip => extract_zip(archive, dest),
    }
}

fn extract_tar_gz(data: &[u8], dest: &Path) -> UpdateResult<()> {
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut entries = archive.entries().map_err(extraction_failed)?;

    let mut entry = match entries.next() {
        Some(entry) => entry.map_err(extraction_failed)?,
        None => return Err(UpdateError::EmptyArchive),
    };

    if !entry.header().entry_type().is_file() {
        return Err(UpdateError::NotARegularFile {
            name: String::from_utf8_lossy(&entry.path_bytes()).into_owned(),
        });
    }

    let mode = entry.header().mode().unwrap_or(DEFAULT_MODE);
    write_file(dest, mode, &mut entry)
}

fn extract_zip(data: &[u8], dest: &Path) -> UpdateResult<()> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(extraction_failed)?;

    if archive.len() != 1 {
        return Err(UpdateError::UnexpectedFileCount {
            count: archive.len(),
        });
    }

    let mut file = archive.by_index(0).map_err(extraction_failed)?;
    if file.is_dir() {
        return Err(UpdateError::NotARegularFile {
            name: file.name().to_string(),
        });
    }

    let mode = file.unix_mode().unwrap_or(DEFAULT_MODE);
    write_file(dest, mode, &mut file)
}

/// Write `reader` to `dest`, truncating any existing file, with `mode` permissions.
fn write_file(dest: &Path, mode: u32, reader: &mut impl Read) -> UpdateResult<()> {
    let mode = mode & 0o7777;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(dest)?;
    std::io::copy(reader, &mut file).map_err(extraction_failed)?;
    file.flush()?;
    file.sync_all()?;

    // The create mode is filtered through the umask; apply the entry's bits as-is.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

fn extraction_failed(e: impl std::fmt::Display) -> UpdateError {
    UpdateError::ExtractionFailed {
        message: e.to_string(),
    }
}

//! Reading entries out of a zip archive, staging large ones to disk
//!
//! Small entries are decompressed into memory on every open. Entries at or
//! above the size threshold are extracted to a directory on first access and
//! later opens read the extracted copy.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

/// Entries at or above this size are staged to disk
pub const DEFAULT_THRESHOLD: u64 = 32 << 20;

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("insecure path: {0}")]
    InsecurePath(String),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// An opened archive entry
#[derive(Debug)]
pub enum StagedFile {
    Memory(Cursor<Vec<u8>>),
    Disk(File),
}

impl Read for StagedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            StagedFile::Memory(cursor) => cursor.read(buf),
            StagedFile::Disk(file) => file.read(buf),
        }
    }
}

/// A zip archive whose large entries are staged under `dir`
pub struct StagedArchive<R: Read + Seek> {
    archive: ZipArchive<R>,
    dir: PathBuf,
    threshold: u64,
}

impl<R: Read + Seek> StagedArchive<R> {
    pub fn new(reader: R, dir: impl Into<PathBuf>) -> Result<Self, StagingError> {
        Ok(Self {
            archive: ZipArchive::new(reader)?,
            dir: dir.into(),
            threshold: DEFAULT_THRESHOLD,
        })
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Open an entry by name. Names that are absolute, empty or climb above
    /// the archive root fail with [`StagingError::InsecurePath`].
    pub fn open(&mut self, name: &str) -> Result<StagedFile, StagingError> {
        let local = local_path(name).ok_or_else(|| StagingError::InsecurePath(name.to_string()))?;

        let mut entry = self.archive.by_name(name)?;
        if entry.size() < self.threshold {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            return Ok(StagedFile::Memory(Cursor::new(buf)));
        }

        let path = self.dir.join(local);
        if path.exists() {
            debug!(path = %path.display(), "reusing staged entry");
        } else {
            info!(name, size = entry.size(), path = %path.display(), "staging archive entry");
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&path)?;
            if let Err(e) = io::copy(&mut entry, &mut out) {
                drop(out);
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
        }

        Ok(StagedFile::Disk(File::open(&path)?))
    }
}

/// Lexically clean `name`, or `None` if it is not local to the archive root
fn local_path(name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    let mut clean = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

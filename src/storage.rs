//! File persistence for databases.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use getrandom::fill;
use tracing::debug;

use crate::database::Database;
use crate::keys::CompositeKey;
use crate::{Error, Result};

/// File name used inside the platform data directory.
pub const DEFAULT_FILE_NAME: &str = "database.kdbx";

/// A database file on disk.
///
/// Writes never modify the file in place: the new content goes to a sibling temporary file
/// which then replaces the target.
#[derive(Debug, Clone)]
pub struct Storage {
    path: PathBuf,
}

impl Storage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the file for buffered reading.
    pub fn open(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.path)?))
    }

    pub fn load_database(&self, key: CompositeKey) -> Result<Database> {
        Database::open(self.open()?, key)
    }

    pub fn save_database(&self, db: &Database) -> Result<u64> {
        self.save_with(|sink| db.save(sink))
    }

    /// Streams new content into the file atomically.
    ///
    /// `write` receives a sink backed by a fresh temporary file in the target directory.
    /// Only if it succeeds is the file synced and moved over the target, so a failed or
    /// interrupted save leaves the previous file untouched. Parent directories are created
    /// as needed.
    pub fn save_with<T, F>(&self, write: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Write) -> Result<T>,
    {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.random_tmp_path()?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        let result = write_synced(file, write).and_then(|value| {
            self.atomic_replace(&tmp_path)?;
            Ok(value)
        });
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
            return result;
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            sync_dir(parent)?;
        }
        debug!(path = %self.path.display(), "database file replaced");
        result
    }

    /// `name.tmp.<16 hex digits>` next to the target.
    fn random_tmp_path(&self) -> Result<PathBuf> {
        let mut buf = [0u8; 8];
        fill(&mut buf)?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")))?
            .to_string_lossy();

        Ok(self
            .path
            .with_file_name(format!("{file_name}.tmp.{}", hex::encode(buf))))
    }

    #[cfg(target_os = "windows")]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<()> {
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use windows_sys::Win32::Storage::FileSystem::{REPLACEFILE_WRITE_THROUGH, ReplaceFileW};

        // ReplaceFileW needs an existing target
        if !self.path.exists() {
            fs::rename(tmp_path, &self.path)?;
            return Ok(());
        }

        fn to_wide(s: &OsStr) -> Vec<u16> {
            s.encode_wide().chain(std::iter::once(0)).collect()
        }

        let target_w = to_wide(self.path.as_os_str());
        let tmp_w = to_wide(tmp_path.as_os_str());

        // SAFETY:
        // - Strings are valid UTF-16 and null-terminated
        // - Pointers remain valid during the call
        // - Windows does not retain the pointers after return
        let result = unsafe {
            ReplaceFileW(
                target_w.as_ptr(),
                tmp_w.as_ptr(),
                std::ptr::null(),
                REPLACEFILE_WRITE_THROUGH,
                std::ptr::null(),
                std::ptr::null(),
            )
        };

        if result == 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// `rename()` is atomic on the same filesystem.
    #[cfg(not(target_os = "windows"))]
    fn atomic_replace(&self, tmp_path: &Path) -> Result<()> {
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }
}

fn write_synced<T, F>(file: File, write: F) -> Result<T>
where
    F: FnOnce(&mut dyn Write) -> Result<T>,
{
    let mut sink = BufWriter::new(file);
    let value = write(&mut sink)?;
    let file = sink.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(value)
}

#[cfg(not(target_os = "windows"))]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Storage in the platform data directory, e.g. `~/.local/share/kdbx-codec/database.kdbx`.
pub fn default_storage() -> Result<Storage> {
    let dirs = ProjectDirs::from("", "", "kdbx-codec").ok_or_else(|| {
        Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            "could not determine platform directories",
        ))
    })?;
    Ok(Storage::new(dirs.data_dir().join(DEFAULT_FILE_NAME)))
}

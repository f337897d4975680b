//! Single-writer lock held next to the database file for the process
//! lifetime.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use log::{info, warn};

use crate::error::StoreError;

pub struct WriterLock {
    file: File,
    path: PathBuf,
}

pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut raw: OsString = db_path.as_os_str().to_owned();
    raw.push(".lock");
    PathBuf::from(raw)
}

impl WriterLock {
    /// Takes the exclusive lock or reports the PID of the current holder.
    pub fn acquire(db_path: &Path) -> Result<Self, StoreError> {
        let path = lock_path_for(db_path);
        let unreadable = |err: io::Error| StoreError::Unreadable {
            path: db_path.to_path_buf(),
            reason: format!("lock file {}: {err}", path.display()),
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(unreadable)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let pid = std::process::id();
                file.set_len(0).map_err(unreadable)?;
                file.seek(SeekFrom::Start(0)).map_err(unreadable)?;
                write!(file, "{pid}").map_err(unreadable)?;
                file.sync_all().map_err(unreadable)?;
                info!("Acquired writer lock {} (pid {pid})", path.display());
                Ok(Self { file, path })
            }
            Err(err) if is_contended(&err) => Err(StoreError::Locked {
                path: db_path.to_path_buf(),
                pid: read_holder_pid(&path).unwrap_or(0),
            }),
            Err(err) => Err(unreadable(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!("Failed to release writer lock {}: {err}", self.path.display());
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_holder_pid(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_reports_holder() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("inventory.sqlite3");

        let held = WriterLock::acquire(&db_path).unwrap();
        match WriterLock::acquire(&db_path) {
            Err(StoreError::Locked { pid, .. }) => assert_eq!(pid, std::process::id()),
            Err(other) => panic!("expected Locked, got {other}"),
            Ok(_) => panic!("second writer acquired the lock"),
        }

        drop(held);
        assert!(WriterLock::acquire(&db_path).is_ok());
    }

    #[test]
    fn lock_file_sits_next_to_database() {
        let path = lock_path_for(Path::new("data/inventory.sqlite3"));
        assert_eq!(path, PathBuf::from("data/inventory.sqlite3.lock"));
    }
}

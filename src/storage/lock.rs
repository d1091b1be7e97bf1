//! Wait-bounded advisory file locks and the temp-file atomic replace used
//! by commit. A handler owns the open file and its lock until `close` or
//! `commit` releases it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use rand::Rng;

use crate::error::{EngineError, EngineResult, ErrorKind};

const POLL_BASE_MILLIS: u64 = 10;
const POLL_JITTER_MILLIS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct FileHandler {
    pub path: PathBuf,
    file: File,
    lock: LockType,
    /// Set for update handlers: the sibling temp file commit writes into.
    temp_path: Option<PathBuf>,
    /// Set for create handlers: close removes the file unless committed.
    created: bool,
    committed: bool,
}

fn lock_timeout_error(path: &Path) -> EngineError {
    EngineError::new(
        ErrorKind::LockTimeout,
        format!("file {} : lock wait timeout", path.display()),
    )
}

/// Polls for the advisory lock until `wait_timeout` elapses, yielding with
/// jitter between attempts.
fn acquire_lock(file: &File, lock: LockType, path: &Path, wait_timeout: f64) -> EngineResult<()> {
    let deadline = Instant::now() + Duration::from_secs_f64(wait_timeout.max(0.0));
    let mut rng = rand::thread_rng();
    loop {
        let acquired = match lock {
            LockType::Shared => file.try_lock_shared().is_ok(),
            LockType::Exclusive => file.try_lock_exclusive().is_ok(),
        };
        if acquired {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(lock_timeout_error(path));
        }
        let sleep = POLL_BASE_MILLIS + rng.gen_range(0..POLL_JITTER_MILLIS);
        std::thread::sleep(Duration::from_millis(sleep));
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{name}.tmp{}", std::process::id()))
}

impl FileHandler {
    /// Opens an existing file under a shared lock.
    pub fn for_read(path: &Path, wait_timeout: f64) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::new(
                ErrorKind::FileNotExist,
                format!("file {} does not exist", path.display()),
            ));
        }
        let file = File::open(path).map_err(|e| {
            EngineError::new(
                ErrorKind::ReadFile,
                format!("file {}: {e}", path.display()),
            )
        })?;
        acquire_lock(&file, LockType::Shared, path, wait_timeout)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock: LockType::Shared,
            temp_path: None,
            created: false,
            committed: false,
        })
    }

    /// Creates a new file under an exclusive lock. The file is removed
    /// again if the handler closes without a commit.
    pub fn for_create(path: &Path, wait_timeout: f64) -> EngineResult<Self> {
        if path.exists() {
            return Err(EngineError::new(
                ErrorKind::FileAlreadyExist,
                format!("file {} already exists", path.display()),
            ));
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                EngineError::new(
                    ErrorKind::WriteFile,
                    format!("file {}: {e}", path.display()),
                )
            })?;
        if let Err(err) = acquire_lock(&file, LockType::Exclusive, path, wait_timeout) {
            let _ = std::fs::remove_file(path);
            return Err(err);
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock: LockType::Exclusive,
            temp_path: None,
            created: true,
            committed: false,
        })
    }

    /// Opens an existing file under an exclusive lock with a sibling temp
    /// file reserved for the rewrite.
    pub fn for_update(path: &Path, wait_timeout: f64) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::new(
                ErrorKind::FileNotExist,
                format!("file {} does not exist", path.display()),
            ));
        }
        let file = OpenOptions::new().read(true).write(true).open(path).map_err(|e| {
            EngineError::new(
                ErrorKind::ReadFile,
                format!("file {}: {e}", path.display()),
            )
        })?;
        acquire_lock(&file, LockType::Exclusive, path, wait_timeout)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock: LockType::Exclusive,
            temp_path: Some(temp_path_for(path)),
            created: false,
            committed: false,
        })
    }

    pub fn lock_type(&self) -> LockType {
        self.lock
    }

    pub fn file(&mut self) -> &mut File {
        &mut self.file
    }

    /// Upgrades a read handler in place: drops the shared lock, reopens
    /// writable and takes the exclusive lock.
    pub fn upgrade(self, wait_timeout: f64) -> EngineResult<Self> {
        if self.lock == LockType::Exclusive {
            return Ok(self);
        }
        let path = self.path.clone();
        drop(self);
        Self::for_update(&path, wait_timeout)
    }

    /// Writes `content` to the sibling temp file, fsyncs, and renames it
    /// over the target. On success the lock is released and the handler
    /// consumed.
    pub fn commit(mut self, content: &[u8]) -> EngineResult<()> {
        if self.created {
            self.file.write_all(content).and_then(|_| self.file.sync_all()).map_err(|e| {
                EngineError::new(
                    ErrorKind::WriteFile,
                    format!("file {}: {e}", self.path.display()),
                )
            })?;
            self.committed = true;
            return Ok(());
        }
        let temp_path = self
            .temp_path
            .clone()
            .unwrap_or_else(|| temp_path_for(&self.path));
        let write = || -> std::io::Result<()> {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(content)?;
            temp.sync_all()?;
            std::fs::rename(&temp_path, &self.path)?;
            Ok(())
        };
        match write() {
            Ok(()) => {
                self.committed = true;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                Err(EngineError::new(
                    ErrorKind::WriteFile,
                    format!("file {}: {e}", self.path.display()),
                ))
            }
        }
    }

    /// Releases the lock. A created-but-uncommitted file is removed.
    pub fn close(self) {}
}

impl Drop for FileHandler {
    fn drop(&mut self) {
        if let Some(temp) = &self.temp_path {
            if temp.exists() {
                let _ = std::fs::remove_file(temp);
            }
        }
        if self.created && !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp dir should be created")
    }

    #[test]
    fn read_handler_requires_existing_file() {
        let dir = temp_dir();
        let missing = dir.path().join("missing.csv");
        let err = FileHandler::for_read(&missing, 0.1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileNotExist);
    }

    #[test]
    fn create_handler_rejects_existing_file() {
        let dir = temp_dir();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a\n1\n").unwrap();
        let err = FileHandler::for_create(&path, 0.1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FileAlreadyExist);
    }

    #[test]
    fn created_file_is_removed_without_commit() {
        let dir = temp_dir();
        let path = dir.path().join("new.csv");
        let handler = FileHandler::for_create(&path, 0.1).unwrap();
        assert!(path.exists());
        handler.close();
        assert!(!path.exists());
    }

    #[test]
    fn commit_replaces_content_atomically() {
        let dir = temp_dir();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "id,name\n1,Louis\n").unwrap();
        let handler = FileHandler::for_update(&path, 1.0).unwrap();
        handler.commit(b"id,name\n1,Louis\n2,Mildred\n").unwrap();
        let mut content = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "id,name\n1,Louis\n2,Mildred\n");
        // No temp files remain.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn second_exclusive_acquirer_times_out() {
        let dir = temp_dir();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a\n1\n").unwrap();
        let _first = FileHandler::for_update(&path, 1.0).unwrap();
        let started = Instant::now();
        let err = FileHandler::for_update(&path, 0.5).unwrap_err();
        assert_eq!(err.kind, ErrorKind::LockTimeout);
        assert!(started.elapsed() >= Duration::from_millis(450));
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = temp_dir();
        let path = dir.path().join("data.csv");
        std::fs::write(&path, "a\n1\n").unwrap();
        let _first = FileHandler::for_read(&path, 0.5).unwrap();
        let _second = FileHandler::for_read(&path, 0.5).unwrap();
    }
}

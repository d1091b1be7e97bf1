//! The commit/rollback cycle over dirty views. Commit encodes each dirty
//! file and atomically replaces it under its exclusive lock, walking
//! paths in sorted order; errors are collected per file, not fatal to
//! the rest.

use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::session::Session;
use crate::storage::codec;
use crate::storage::lock::{FileHandler, LockType};

/// Flushes every dirty view. Created files are written fresh; updated
/// files are rewritten through a sibling temp file.
pub fn commit(session: &mut Session) -> EngineResult<()> {
    let wait_timeout = crate::session::flags::with_flags_read(|f| f.wait_timeout);
    let mut failures: Vec<String> = Vec::new();
    let mut messages: Vec<String> = Vec::new();

    for key in session.uncommitted.created_keys() {
        match commit_created(session, &key, wait_timeout) {
            Ok(path) => {
                session.uncommitted.discard(&key);
                messages.push(format!("Commit: file {path} is created"));
            }
            Err(err) => failures.push(err.to_string()),
        }
    }
    for key in session.uncommitted.updated_keys() {
        match commit_updated(session, &key, wait_timeout) {
            Ok(path) => {
                session.uncommitted.discard(&key);
                messages.push(format!("Commit: file {path} is updated"));
            }
            Err(err) => failures.push(err.to_string()),
        }
    }
    for key in session.uncommitted.temp_dirty_keys() {
        session.uncommitted.discard(&key);
        messages.push(format!("Commit: view {key} is updated"));
    }

    for message in messages {
        session.notice(&message);
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::new(
            ErrorKind::WriteFile,
            format!("commit failed: {}", failures.join("; ")),
        ))
    }
}

fn encode_cached(session: &Session, key: &str) -> EngineResult<(std::path::PathBuf, Vec<u8>)> {
    let entry = session.cache.get(key).ok_or_else(|| {
        EngineError::new(
            ErrorKind::ViewNotLoaded,
            format!("view {key} is not loaded"),
        )
    })?;
    let info = entry.view.file_info.clone().ok_or_else(|| {
        EngineError::new(
            ErrorKind::ViewNotLoaded,
            format!("view {key} has no backing file"),
        )
    })?;
    let header = entry.view.header.column_names();
    let rows = entry.view.all_values();
    let bytes = codec::encode(&info, &header, &rows)?;
    Ok((info.path, bytes))
}

fn commit_created(session: &mut Session, key: &str, wait_timeout: f64) -> EngineResult<String> {
    let (path, bytes) = encode_cached(session, key)?;
    let handler = FileHandler::for_create(&path, wait_timeout)?;
    handler.commit(&bytes)?;
    Ok(path.display().to_string())
}

fn commit_updated(session: &mut Session, key: &str, wait_timeout: f64) -> EngineResult<String> {
    let (path, bytes) = encode_cached(session, key)?;
    // The handler was upgraded to exclusive when the view went dirty;
    // recover if it is somehow missing.
    let handler = match session.cache.take_handler(key) {
        Some(handler) if handler.lock_type() == LockType::Exclusive => handler,
        Some(shared) => shared.upgrade(wait_timeout)?,
        None => FileHandler::for_update(&path, wait_timeout)?,
    };
    handler.commit(&bytes)?;
    Ok(path.display().to_string())
}

/// Discards every uncommitted change: dirty cache entries are dropped so
/// the next read reloads from disk, created files vanish with their
/// cache entries, locks are released.
pub fn rollback(session: &mut Session) {
    let mut messages: Vec<String> = Vec::new();
    for key in session.uncommitted.created_keys() {
        session.cache.remove(&key);
        session.uncommitted.discard(&key);
        messages.push(format!("Rollback: file {key} is dropped"));
    }
    for key in session.uncommitted.updated_keys() {
        session.cache.remove(&key);
        session.uncommitted.discard(&key);
        messages.push(format!("Rollback: file {key} is restored"));
    }
    for key in session.uncommitted.temp_dirty_keys() {
        session.uncommitted.discard(&key);
        messages.push(format!("Rollback: view {key} is discarded"));
    }
    for message in messages {
        session.notice(&message);
    }
}

/// Drops every cache entry, releasing all file locks. Called when a run
/// finishes.
pub fn release_resources(session: &mut Session) {
    session.cache.clear();
    session.uncommitted.clear();
}

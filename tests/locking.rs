//! Locking discipline and commit atomicity over real files.

use std::time::{Duration, Instant};

use csvql::storage::codec;
use csvql::storage::file_info::{Encoding, FileInfo, Format};
use csvql::storage::lock::{FileHandler, LockType};
use csvql::ErrorKind;

fn scratch_file(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");
    std::fs::write(&path, content).unwrap();
    (dir, path)
}

#[test]
fn second_exclusive_acquirer_waits_then_times_out() {
    let (_dir, path) = scratch_file("id,name\n1,Louis\n");
    let first = FileHandler::for_update(&path, 1.0).unwrap();
    assert_eq!(first.lock_type(), LockType::Exclusive);

    let started = Instant::now();
    let err = FileHandler::for_update(&path, 1.0).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LockTimeout);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[test]
fn exclusive_blocks_shared_until_released() {
    let (_dir, path) = scratch_file("id\n1\n");
    let writer = FileHandler::for_update(&path, 0.5).unwrap();
    let err = FileHandler::for_read(&path, 0.3).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LockTimeout);
    drop(writer);
    FileHandler::for_read(&path, 0.5).unwrap();
}

#[test]
fn lock_released_across_threads_lets_waiter_in() {
    let (_dir, path) = scratch_file("id\n1\n");
    let first = FileHandler::for_update(&path, 1.0).unwrap();
    let waiter_path = path.clone();
    let waiter = std::thread::spawn(move || FileHandler::for_update(&waiter_path, 5.0).map(|_| ()));
    std::thread::sleep(Duration::from_millis(200));
    drop(first);
    waiter.join().unwrap().expect("waiter should acquire after release");
}

#[test]
fn commit_is_atomic_per_file() {
    let (dir, path) = scratch_file("id,name\n1,Louis\n2,Sean\n");

    let info = FileInfo::new(path.clone(), Format::Csv);
    let header = vec!["id".to_string(), "name".to_string()];
    let rows = vec![
        vec![csvql::Value::Integer(1), csvql::Value::String("Louis".into())],
        vec![
            csvql::Value::Integer(2),
            csvql::Value::String("Mildred".into()),
        ],
    ];
    let bytes = codec::encode(&info, &header, &rows).unwrap();

    let handler = FileHandler::for_update(&path, 1.0).unwrap();
    handler.commit(&bytes).unwrap();

    // The file content equals the encoding byte for byte, and no temp
    // file survives.
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn failed_update_leaves_original_untouched() {
    let (_dir, path) = scratch_file("id,name\n1,Louis\n");
    // Dropping the handler without a commit simulates a crash before the
    // rename: the original file stays intact.
    let handler = FileHandler::for_update(&path, 1.0).unwrap();
    drop(handler);
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        "id,name\n1,Louis\n"
    );
}

#[test]
fn sjis_commit_round_trips() {
    let (_dir, path) = scratch_file("");
    std::fs::remove_file(&path).unwrap();

    let mut info = FileInfo::new(path.clone(), Format::Csv);
    info.encoding = Encoding::Sjis;
    let header = vec!["名前".to_string()];
    let rows = vec![vec![csvql::Value::String("たろう".into())]];
    let bytes = codec::encode(&info, &header, &rows).unwrap();

    let handler = FileHandler::for_create(&path, 1.0).unwrap();
    handler.commit(&bytes).unwrap();

    let read_back = std::fs::read(&path).unwrap();
    let decoded = codec::decode(&info, &read_back, false).unwrap();
    assert_eq!(decoded.header, vec!["名前"]);
    assert_eq!(
        decoded.rows[0][0],
        csvql::Value::String("たろう".into())
    );
}

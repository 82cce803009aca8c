// Mlog - tests/e2e_pipeline.rs
//
// End-to-end tests for the ingestion pipeline.
//
// These tests exercise real files in a temp directory, the real `notify`
// backend, and a real on-disk SQLite store: append a line to a watched file
// and observe the stored event. Notification delivery is asynchronous, so
// every assertion on stored state goes through a bounded polling wait.

use mlog::app::watcher::Watcher;
use mlog::core::classify::Classifier;
use mlog::core::filter::EventQuery;
use mlog::core::model::{EventType, Severity, StoredEvent, WatchProgress};
use mlog::platform::config::parse_config;
use mlog::store::EventStore;
use mlog::util::error::WatchError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_STEP: Duration = Duration::from_millis(25);

/// Create `relative` under a fresh temp root with `initial` content.
fn seed_file(relative: &str, initial: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, initial).unwrap();
    (dir, path)
}

fn open_store(dir: &TempDir) -> Arc<EventStore> {
    Arc::new(EventStore::init(&dir.path().join("data").join("mlog.db")).unwrap())
}

fn append(path: &Path, text: &str) {
    let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    f.write_all(text.as_bytes()).unwrap();
    f.flush().unwrap();
}

/// Poll until the store holds at least `count` events or the wait limit
/// passes; returns the final count.
fn wait_for_events(store: &EventStore, count: i64) -> i64 {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let n = store.count_events().unwrap();
        if n >= count || Instant::now() >= deadline {
            return n;
        }
        std::thread::sleep(POLL_STEP);
    }
}

fn all_events(store: &EventStore) -> Vec<StoredEvent> {
    store.query_events(&EventQuery::default()).unwrap()
}

// =============================================================================
// Ingestion
// =============================================================================

#[test]
fn e2e_appended_ssh_login_is_stored() {
    let (dir, path) = seed_file(
        "var/log/auth.log",
        "Accepted password for mallory from 6.6.6.6 port 1 ssh2\n",
    );
    let store = open_store(&dir);
    let mut watcher = Watcher::new("web-1", Classifier::builtin(), store.clone());
    watcher.add_path(&path).unwrap();
    watcher.start().unwrap();

    append(
        &path,
        "Jan 15 14:30:22 web-1 sshd[4242]: Accepted password for alice from 10.0.0.5 port 51515 ssh2\n",
    );
    assert_eq!(wait_for_events(&store, 1), 1);

    // Pre-existing content is never backfilled.
    std::thread::sleep(Duration::from_millis(200));
    let events = all_events(&store);
    assert_eq!(events.len(), 1);
    let e = &events[0].event;
    assert_eq!(e.event_type, EventType::SshConnected);
    assert_eq!(e.severity, Severity::Info);
    assert_eq!(e.username.as_deref(), Some("alice"));
    assert_eq!(e.source_ip.as_deref(), Some("10.0.0.5"));
    assert_eq!(e.source_port, Some(51515));
    assert_eq!(e.server_id, "web-1");

    watcher.stop().unwrap();
    let progress = watcher.poll_progress(usize::MAX);
    assert!(matches!(progress.first(), Some(WatchProgress::Started { file_count: 1 })));
    assert!(progress
        .iter()
        .any(|p| matches!(p, WatchProgress::Ingested { events: 1, .. })));
    assert_eq!(progress.last(), Some(&WatchProgress::Stopped));
}

#[test]
fn e2e_nginx_error_and_unrecognised_line() {
    let (dir, path) = seed_file("nginx/error.log", "");
    let store = open_store(&dir);
    let mut watcher = Watcher::new("web-1", Classifier::builtin(), store.clone());
    watcher.add_path(&path).unwrap();
    watcher.start().unwrap();

    append(
        &path,
        "2024/01/15 14:30:22 [error] 1234#0: *1 open() failed, client: 10.0.0.1\n\
         this is not an nginx line\n",
    );
    assert_eq!(wait_for_events(&store, 1), 1);
    watcher.stop().unwrap();

    let events = all_events(&store);
    assert_eq!(events.len(), 1);
    let e = &events[0].event;
    assert_eq!(e.event_type, EventType::NginxError);
    assert_eq!(e.severity, Severity::Error);
    assert_eq!(
        e.raw_log,
        "2024/01/15 14:30:22 [error] 1234#0: *1 open() failed, client: 10.0.0.1"
    );

    let size = std::fs::metadata(&path).unwrap().len();
    assert_eq!(watcher.offset_of(&path), Some(size));
}

#[test]
fn e2e_lines_after_stop_are_not_ingested() {
    let (dir, path) = seed_file("var/log/secure", "");
    let store = open_store(&dir);
    let mut watcher = Watcher::new("db-1", Classifier::builtin(), store.clone());
    watcher.add_path(&path).unwrap();
    watcher.start().unwrap();

    append(&path, "Invalid user admin from 10.0.0.9 port 2222\n");
    assert_eq!(wait_for_events(&store, 1), 1);

    watcher.stop().unwrap();
    assert!(!watcher.is_running());
    append(&path, "Invalid user root from 10.0.0.9 port 2223\n");
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(store.count_events().unwrap(), 1);
}

#[test]
fn e2e_rotation_by_truncation_reads_from_start() {
    let (dir, path) = seed_file("var/log/auth.log", "");
    let store = open_store(&dir);
    let mut watcher = Watcher::new("web-1", Classifier::builtin(), store.clone());
    watcher.add_path(&path).unwrap();
    watcher.start().unwrap();

    append(
        &path,
        "Accepted publickey for deploy from 192.168.1.20 port 40000 ssh2\n\
         Received disconnect from 192.168.1.20 port 40000:11: disconnected by user\n",
    );
    assert_eq!(wait_for_events(&store, 2), 2);

    // Shorter than the stored offset.
    std::fs::write(&path, "Invalid user x from 1.1.1.1 port 1\n").unwrap();
    assert_eq!(wait_for_events(&store, 3), 3);
    watcher.stop().unwrap();

    let newest = &all_events(&store)[0].event;
    assert_eq!(newest.event_type, EventType::SshFailedAuth);
    assert_eq!(newest.source_ip.as_deref(), Some("1.1.1.1"));
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn e2e_nonexistent_path_and_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let mut watcher = Watcher::new("web-1", Classifier::builtin(), store);

    watcher
        .add_path(&dir.path().join("var/log/auth.log"))
        .unwrap();
    assert!(watcher.watched_paths().is_empty());

    let err = watcher.add_path(dir.path()).unwrap_err();
    assert!(matches!(err, WatchError::NotAFile { .. }));

    // Starting with nothing registered is allowed.
    watcher.start().unwrap();
    watcher.stop().unwrap();
}

#[test]
fn e2e_directory_target_does_not_stop_valid_file() {
    let (dir, auth) = seed_file("var/log/auth.log", "");
    let nginx_dir = dir.path().join("nginxdir");
    std::fs::create_dir(&nginx_dir).unwrap();

    let store = open_store(&dir);
    let mut watcher = Watcher::new("web-1", Classifier::builtin(), store.clone());
    let failures = watcher.add_paths([auth.as_path(), nginx_dir.as_path()]);
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].1, WatchError::NotAFile { .. }));
    watcher.start().unwrap();

    append(&auth, "Invalid user guest from 10.0.0.4 port 2200\n");
    assert_eq!(wait_for_events(&store, 1), 1);
    watcher.stop().unwrap();
}

// =============================================================================
// Config -> classifier -> watcher
// =============================================================================

#[test]
fn e2e_custom_log_from_config() {
    let (dir, path) = seed_file("srv/backup/run.log", "");
    let toml = format!(
        "[server]\nid = 'backup-1'\n\n[[watch.custom]]\nname = 'backup'\npath = '{}'\n",
        path.display()
    );
    let (config, warnings) = parse_config(&toml, Path::new("config.toml"));
    assert!(warnings.is_empty(), "{warnings:?}");
    assert!(config.watch_targets().contains(&path));

    let store = open_store(&dir);
    let mut watcher = Watcher::new(&config.server_id, config.classifier(), store.clone());
    watcher.add_path(&path).unwrap();
    watcher.start().unwrap();

    append(&path, "ERROR: backup of /srv/db failed\n");
    assert_eq!(wait_for_events(&store, 1), 1);
    watcher.stop().unwrap();

    let e = &all_events(&store)[0].event;
    assert_eq!(e.event_type, EventType::Custom);
    assert_eq!(e.severity, Severity::Error);
    assert_eq!(e.server_id, "backup-1");
}

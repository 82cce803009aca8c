// Mlog - platform/fs.rs
//
// Directory listing helpers.
//
// PM2 writes one stdout and one stderr file per app into its log directory
// (`<app>-out.log`, `<app>-error.log`). The watcher registers individual
// files, so the directory is expanded once at startup.

use crate::util::constants::{PM2_STDERR_PATTERN, PM2_STDOUT_PATTERN};
use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// List PM2 per-app log files directly inside `dir`, sorted by path.
///
/// A missing directory is not an error (PM2 may not be installed); it yields
/// an empty list. Unreadable entries are skipped with a debug log.
pub fn list_pm2_logs(dir: &Path, watch_stdout: bool, watch_stderr: bool) -> io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "PM2 log directory does not exist");
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not a directory", dir.display()),
        ));
    }

    let mut patterns = Vec::new();
    if watch_stdout {
        patterns.push(builtin_pattern(PM2_STDOUT_PATTERN));
    }
    if watch_stderr {
        patterns.push(builtin_pattern(PM2_STDERR_PATTERN));
    }
    if patterns.is_empty() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if patterns.iter().any(|p| p.matches(&name)) {
            files.push(entry.into_path());
        }
    }
    files.sort();

    tracing::debug!(dir = %dir.display(), count = files.len(), "PM2 log files found");
    Ok(files)
}

fn builtin_pattern(pat: &str) -> Pattern {
    Pattern::new(pat).expect("built-in PM2 file pattern")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "").unwrap();
    }

    #[test]
    fn test_lists_out_and_error_logs() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "api-out.log");
        touch(dir.path(), "api-error.log");
        touch(dir.path(), "worker-out.log");
        touch(dir.path(), "notes.txt");
        std::fs::create_dir(dir.path().join("old-out.log")).unwrap();

        let all = list_pm2_logs(dir.path(), true, true).unwrap();
        let names: Vec<String> = all
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["api-error.log", "api-out.log", "worker-out.log"]);

        let stderr_only = list_pm2_logs(dir.path(), false, true).unwrap();
        assert_eq!(stderr_only.len(), 1);

        assert!(list_pm2_logs(dir.path(), false, false).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let found = list_pm2_logs(&dir.path().join("nope"), true, true).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_file_instead_of_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "pm2.log");
        assert!(list_pm2_logs(&dir.path().join("pm2.log"), true, true).is_err());
    }
}

//! Local rolling history store.
//!
//! One plain-text file per VM inside a directory, named by the VM
//! identifier: one non-negative integer per line, oldest first. A history
//! never holds more than `max_length` values; the oldest are dropped
//! first. A missing file is an empty history.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// VM identifiers that are safe to use as file names.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").expect("valid regex"));

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: invalid sample {value:?}")]
    Parse {
        path: PathBuf,
        line: usize,
        value: String,
    },

    #[error("invalid VM identifier for a history file: {0:?}")]
    InvalidIdentifier(String),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn is_valid_identifier(id: &str) -> bool {
    IDENTIFIER_RE.is_match(id)
}

fn history_path(directory: &Path, vm_id: &str) -> Result<PathBuf, HistoryError> {
    if !is_valid_identifier(vm_id) {
        return Err(HistoryError::InvalidIdentifier(vm_id.to_string()));
    }
    Ok(directory.join(vm_id))
}

/// Keeps the last `max_length` values.
fn keep_last(values: &[u64], max_length: usize) -> &[u64] {
    &values[values.len().saturating_sub(max_length)..]
}

/// Lists the VMs that have a history file in `directory`.
///
/// A missing directory has no histories.
pub fn read(directory: &Path) -> Result<HashSet<String>, HistoryError> {
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(io_err(directory)(e)),
    };

    let mut out = HashSet::new();
    for entry in entries {
        let entry = entry.map_err(io_err(directory))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) if is_valid_identifier(name) => {
                out.insert(name.to_string());
            }
            _ => trace!("Ignoring {} in history directory", entry.path().display()),
        }
    }

    Ok(out)
}

/// Reads one VM's history, oldest first.
pub fn read_history(directory: &Path, vm_id: &str) -> Result<Vec<u64>, HistoryError> {
    let path = history_path(directory, vm_id)?;
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(&path)(e)),
    };

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            line.trim().parse::<u64>().map_err(|_| HistoryError::Parse {
                path: path.clone(),
                line: i + 1,
                value: line.to_string(),
            })
        })
        .collect()
}

/// Replaces the history file through a hidden temporary file.
fn write_history(directory: &Path, vm_id: &str, values: &[u64]) -> Result<(), HistoryError> {
    let path = history_path(directory, vm_id)?;
    let tmp = directory.join(format!(".{}.tmp", vm_id));

    let mut content = String::with_capacity(values.len() * 8);
    for v in values {
        content.push_str(&v.to_string());
        content.push('\n');
    }

    fs::write(&tmp, content).map_err(io_err(&tmp))?;
    fs::rename(&tmp, &path).map_err(io_err(&path))?;
    Ok(())
}

/// Creates or overwrites each VM's history with the last `max_length`
/// values of its sequence.
pub fn write(
    directory: &Path,
    samples: &HashMap<String, Vec<u64>>,
    max_length: usize,
) -> Result<(), HistoryError> {
    for (vm_id, values) in samples {
        write_history(directory, vm_id, keep_last(values, max_length))?;
    }
    debug!(
        "Wrote {} local histories to {}",
        samples.len(),
        directory.display()
    );
    Ok(())
}

/// Appends one value to each VM's history, keeping the last `max_length`.
///
/// A history that does not parse is replaced by the new value alone, so one
/// damaged file cannot hold back the other VMs. I/O errors still fail.
pub fn append(
    directory: &Path,
    new_samples: &HashMap<String, u64>,
    max_length: usize,
) -> Result<(), HistoryError> {
    for (vm_id, value) in new_samples {
        let mut values = match read_history(directory, vm_id) {
            Ok(values) => values,
            Err(e @ HistoryError::Parse { .. }) => {
                warn!("Discarding unreadable local history of VM {}: {}", vm_id, e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        values.push(*value);
        write_history(directory, vm_id, keep_last(&values, max_length))?;
    }
    Ok(())
}

/// Deletes the history files of the given VMs. Missing files are ignored.
pub fn cleanup(directory: &Path, ids: &[String]) -> Result<(), HistoryError> {
    for vm_id in ids {
        let path = history_path(directory, vm_id)?;
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed local history of VM {}", vm_id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&path)(e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const VM1: &str = "ec452be0-e5d0-11e1-aff1-0800200c9a66";
    const VM2: &str = "e615c450-e5d0-11e1-aff1-0800200c9a66";

    fn samples(entries: &[(&str, &[u64])]) -> HashMap<String, Vec<u64>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_vec()))
            .collect()
    }

    #[test]
    fn test_write_truncates_to_last_entries() {
        let dir = tempdir().expect("Failed to create temp dir");
        let data = samples(&[(VM1, &[1, 2, 3, 4, 5]), (VM2, &[9])]);

        write(dir.path(), &data, 3).expect("write");

        assert_eq!(read_history(dir.path(), VM1).expect("read"), vec![3, 4, 5]);
        assert_eq!(read_history(dir.path(), VM2).expect("read"), vec![9]);
        let ids = read(dir.path()).expect("list");
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(VM1) && ids.contains(VM2));
    }

    #[test]
    fn test_write_zero_length_creates_empty_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), &samples(&[(VM1, &[1, 2])]), 0).expect("write");

        assert!(dir.path().join(VM1).exists());
        assert_eq!(read_history(dir.path(), VM1).expect("read"), Vec::<u64>::new());
    }

    #[test]
    fn test_file_format_one_integer_per_line() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), &samples(&[(VM1, &[10, 20, 30])]), 10).expect("write");

        let content = fs::read_to_string(dir.path().join(VM1)).expect("read file");
        assert_eq!(content, "10\n20\n30\n");
    }

    #[test]
    fn test_append_drops_oldest() {
        let dir = tempdir().expect("Failed to create temp dir");
        write(dir.path(), &samples(&[("X", &[10, 20, 30])]), 3).expect("write");

        let mut new = HashMap::new();
        new.insert("X".to_string(), 40u64);
        append(dir.path(), &new, 3).expect("append");

        assert_eq!(read_history(dir.path(), "X").expect("read"), vec![20, 30, 40]);
    }

    #[test]
    fn test_append_creates_missing_history() {
        let dir = tempdir().expect("Failed to create temp dir");
        let mut new = HashMap::new();
        new.insert(VM1.to_string(), 7u64);

        append(dir.path(), &new, 5).expect("append");
        append(dir.path(), &new, 5).expect("append");
        assert_eq!(read_history(dir.path(), VM1).expect("read"), vec![7, 7]);

        append(dir.path(), &new, 0).expect("append");
        assert!(read_history(dir.path(), VM1).expect("read").is_empty());
    }

    #[test]
    fn test_cleanup_ignores_missing_files() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("other-file"), "1\n").expect("write");
        write(dir.path(), &samples(&[("X", &[1])]), 5).expect("write");

        cleanup(dir.path(), &["X".to_string(), "Y".to_string()]).expect("cleanup");

        assert!(!dir.path().join("X").exists());
        let ids = read(dir.path()).expect("list");
        assert_eq!(ids.len(), 1);
        assert!(ids.contains("other-file"));
    }

    #[test]
    fn test_read_ignores_hidden_files_and_directories() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(".gitignore"), "*\n").expect("write");
        fs::write(dir.path().join(format!(".{}.tmp", VM1)), "1\n").expect("write");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");
        fs::write(dir.path().join(VM2), "5\n").expect("write");

        let ids = read(dir.path()).expect("list");
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(VM2));
    }

    #[test]
    fn test_read_missing_directory_is_empty() {
        let dir = tempdir().expect("Failed to create temp dir");
        assert!(read(&dir.path().join("absent")).expect("list").is_empty());
        assert!(read_history(&dir.path().join("absent"), VM1)
            .expect("read")
            .is_empty());
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let dir = tempdir().expect("Failed to create temp dir");
        let err = write(dir.path(), &samples(&[("../escape", &[1])]), 5).unwrap_err();
        assert!(matches!(err, HistoryError::InvalidIdentifier(_)));
        assert!(cleanup(dir.path(), &[".hidden".to_string()]).is_err());
    }

    #[test]
    fn test_corrupt_history_reports_line() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(VM1), "1\n\nabc\n").expect("write");

        match read_history(dir.path(), VM1) {
            Err(HistoryError::Parse { line, value, .. }) => {
                assert_eq!(line, 3);
                assert_eq!(value, "abc");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_append_replaces_corrupt_history_only() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join(VM1), "12\ngarbage\n").expect("write");
        fs::write(dir.path().join(VM2), "4\n").expect("write");

        let mut new = HashMap::new();
        new.insert(VM1.to_string(), 30u64);
        new.insert(VM2.to_string(), 5u64);
        append(dir.path(), &new, 5).expect("append");

        assert_eq!(read_history(dir.path(), VM1).expect("read"), vec![30]);
        assert_eq!(read_history(dir.path(), VM2).expect("read"), vec![4, 5]);
    }

    #[test]
    fn test_append_propagates_io_errors() {
        let dir = tempdir().expect("Failed to create temp dir");
        fs::create_dir(dir.path().join(VM1)).expect("mkdir");

        let mut new = HashMap::new();
        new.insert(VM1.to_string(), 1u64);
        assert!(matches!(
            append(dir.path(), &new, 5),
            Err(HistoryError::Io { .. })
        ));
    }
}

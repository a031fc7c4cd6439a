//! JSONL storage: one record per line.
//!
//! Nodes, ledger commits and documents all share this format. Whole-file
//! writes go through a temp file and rename; appends are fsynced before
//! returning.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Read records from a JSONL reader. Blank lines and `#` comments are skipped.
pub fn read_records<T: DeserializeOwned>(reader: impl BufRead) -> Result<Vec<T>, JsonlError> {
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| JsonlError::Io(line_no + 1, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: T = serde_json::from_str(trimmed)
            .map_err(|e| JsonlError::Parse(line_no + 1, e.to_string()))?;
        records.push(record);
    }
    Ok(records)
}

/// Write records to a JSONL writer.
pub fn write_records<T: Serialize>(writer: &mut impl Write, records: &[T]) -> Result<(), JsonlError> {
    for record in records {
        let line =
            serde_json::to_string(record).map_err(|e| JsonlError::Serialize(e.to_string()))?;
        writeln!(writer, "{line}").map_err(|e| JsonlError::Io(0, e.to_string()))?;
    }
    Ok(())
}

/// Read records from a JSONL file path. NUL bytes and invalid UTF-8 are
/// rejected as corruption before any line is parsed.
pub fn read_records_from_path<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, JsonlError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(io_at(path))?;
    ensure_text(path, &bytes)?;
    read_records(bytes.as_slice())
}

/// Replace the file at `path` with `records`.
///
/// Records go to a sibling temp file that is fsynced and renamed over the
/// target; readers see either the old or the new content.
pub fn write_records_to_path<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<(), JsonlError> {
    let path = path.as_ref();
    create_parent(path)?;

    let staged = staging_path(path);
    if let Err(err) = write_staged(&staged, records) {
        let _ = fs::remove_file(&staged);
        return Err(err);
    }
    if let Err(err) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(JsonlError::Io(
            0,
            format!("rename {} to {}: {err}", staged.display(), path.display()),
        ));
    }
    sync_parent(path)
}

/// Append one record and fsync before returning.
pub fn append_record_to_path<T: Serialize>(path: impl AsRef<Path>, record: &T) -> Result<(), JsonlError> {
    let path = path.as_ref();
    create_parent(path)?;

    let line = serde_json::to_string(record).map_err(|e| JsonlError::Serialize(e.to_string()))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_at(path))?;
    writeln!(file, "{line}").map_err(io_at(path))?;
    file.sync_data().map_err(io_at(path))
}

fn io_at(path: &Path) -> impl Fn(std::io::Error) -> JsonlError + '_ {
    move |err| JsonlError::Io(0, format!("{}: {err}", path.display()))
}

fn write_staged<T: Serialize>(staged: &Path, records: &[T]) -> Result<(), JsonlError> {
    let mut writer = BufWriter::new(File::create(staged).map_err(io_at(staged))?);
    write_records(&mut writer, records)?;
    let file = writer
        .into_inner()
        .map_err(|e| JsonlError::Io(0, format!("{}: {}", staged.display(), e.error())))?;
    file.sync_all().map_err(io_at(staged))
}

fn create_parent(path: &Path) -> Result<(), JsonlError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(io_at(parent))
        }
        _ => Ok(()),
    }
}

fn sync_parent(path: &Path) -> Result<(), JsonlError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)
            .and_then(|dir| dir.sync_all())
            .map_err(io_at(parent)),
        _ => Ok(()),
    }
}

/// `<path>.tmp.<pid>.<nanos>`
fn staging_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let mut staged: OsString = path.as_os_str().to_os_string();
    staged.push(format!(".tmp.{}.{nanos}", std::process::id()));
    PathBuf::from(staged)
}

fn ensure_text(path: &Path, bytes: &[u8]) -> Result<(), JsonlError> {
    let problem = if bytes.contains(&0) {
        "NUL byte"
    } else if std::str::from_utf8(bytes).is_err() {
        "invalid UTF-8"
    } else {
        return Ok(());
    };
    Err(JsonlError::Corrupt(format!("{}: {problem}", path.display())))
}

/// Errors from JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, String),

    #[error("line {0}: parse error: {1}")]
    Parse(usize, String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("corrupt jsonl file: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::WbsNode;

    fn temp_path(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!(
            "costing-jsonl-{prefix}-{}-{unique}.jsonl",
            std::process::id()
        ))
    }

    #[test]
    fn read_rejects_nul_payload() {
        let path = temp_path("nul");
        fs::write(&path, b"{\"key\":\"WBS-0001\"}\n\0garbage").expect("fixture should write");

        match read_records_from_path::<WbsNode>(&path) {
            Err(JsonlError::Corrupt(message)) => assert!(message.contains("NUL byte")),
            other => panic!("expected corruption error, got {other:?}"),
        }

        let _ = fs::remove_file(path);
    }

    #[test]
    fn write_replaces_file_atomically() {
        let path = temp_path("atomic-write");
        let first = WbsNode::new("WBS-0001", "boq-1", "A", 1, None);
        write_records_to_path(&path, &[first]).expect("first write should succeed");

        let second = WbsNode::new("WBS-0002", "boq-1", "B", 1, None);
        write_records_to_path(&path, &[second]).expect("second write should succeed");

        let text = fs::read_to_string(&path).expect("jsonl should exist");
        assert!(!text.contains("WBS-0001"));
        assert!(text.contains("WBS-0002"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn append_accumulates_lines() {
        let path = temp_path("append");
        append_record_to_path(&path, &WbsNode::new("WBS-0001", "t", "A", 1, None))
            .expect("append should succeed");
        append_record_to_path(&path, &WbsNode::new("WBS-0002", "t", "B", 1, None))
            .expect("append should succeed");

        let nodes: Vec<WbsNode> = read_records_from_path(&path).expect("read should succeed");
        let keys: Vec<&str> = nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["WBS-0001", "WBS-0002"]);

        let _ = fs::remove_file(path);
    }
}

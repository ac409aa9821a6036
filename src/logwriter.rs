//! Append-only per-process log files with size-bounded tail retention.
//!
//! The supervisor hands the opened descriptor straight to the child at
//! spawn time, so the write path never goes through PortMux. All this
//! module does is open files in append mode with owner-only permissions
//! and, when a file has grown past the configured cap, trim it down to the
//! most recent tail before reuse. `ps` applies the same trim when it scans.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// Open a log file for appending, trimming it first when oversized.
///
/// The file is created with mode 0600 when missing. An existing file
/// larger than `max_bytes` is cut down to the most recent
/// `max_bytes * LOG_RETAIN_FRACTION` bytes.
pub fn open_for_append(path: &Path, max_bytes: u64) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    trim_to_tail(path, max_bytes)?;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).append(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    Ok(options.open(path)?)
}

/// Trim an existing log file to its most recent tail when it exceeds
/// `max_bytes`. Returns whether a trim happened. Absent files are left
/// alone.
pub fn trim_to_tail(path: &Path, max_bytes: u64) -> Result<bool> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if metadata.len() <= max_bytes {
        return Ok(false);
    }

    let retain = (max_bytes as f64 * crate::LOG_RETAIN_FRACTION) as u64;
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-(retain as i64)))?;
    let mut tail = Vec::with_capacity(retain as usize);
    file.read_to_end(&mut tail)?;

    // Drop the partial first line so the retained log starts clean
    let start = tail
        .iter()
        .position(|b| *b == b'\n')
        .map(|i| i + 1)
        .unwrap_or(0);

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(&tail[start..])?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    debug!(
        "Trimmed log {} from {} to {} bytes",
        path.display(),
        metadata.len(),
        retain
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("web.log");
        let mut file = open_for_append(&path, 1024).unwrap();
        writeln!(file, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_open_mode_0600() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.log");
        open_for_append(&path, 1024).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_open_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.log");
        {
            let mut file = open_for_append(&path, 1024).unwrap();
            writeln!(file, "first").unwrap();
        }
        {
            let mut file = open_for_append(&path, 1024).unwrap();
            writeln!(file, "second").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_trim_under_cap_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.log");
        std::fs::write(&path, "short\n").unwrap();
        assert!(!trim_to_tail(&path, 1024).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "short\n");
    }

    #[test]
    fn test_trim_absent_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!trim_to_tail(&dir.path().join("missing.log"), 1024).unwrap());
    }

    #[test]
    fn test_trim_keeps_most_recent_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.log");

        let mut content = String::new();
        for i in 0..200 {
            content.push_str(&format!("line number {:04}\n", i));
        }
        std::fs::write(&path, &content).unwrap();

        let cap = 1000;
        assert!(trim_to_tail(&path, cap).unwrap());

        let trimmed = std::fs::read_to_string(&path).unwrap();
        let len = trimmed.len() as u64;
        assert!(len <= (cap as f64 * crate::LOG_RETAIN_FRACTION) as u64);
        // The newest line survives, the oldest does not
        assert!(trimmed.contains("line number 0199"));
        assert!(!trimmed.contains("line number 0000"));
        // Starts on a line boundary
        assert!(trimmed.starts_with("line number"));
    }

    #[test]
    fn test_open_trims_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("web.log");
        std::fs::write(&path, "x".repeat(4096)).unwrap();

        open_for_append(&path, 1024).unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        assert!(len <= 512);
    }
}

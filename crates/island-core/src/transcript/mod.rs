//! Incremental transcript reading
//!
//! Transcripts are append-only, newline-delimited JSON files, one per session
//! (`conversation.jsonl`). `read_new` is pure per call: given a path and the
//! byte offset consumed so far, it returns the records appended since and the
//! new offset. A trailing partial line is left un-consumed so the next call
//! can complete it; malformed lines are skipped and counted without blocking
//! the lines after them.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::MessageKind;

/// File name of a session's main transcript within its session directory
pub const TRANSCRIPT_FILE_NAME: &str = "conversation.jsonl";

/// File name prefix of a subagent task transcript (`task-<id>.jsonl`)
pub const TASK_FILE_PREFIX: &str = "task-";

/// Whether a path is a session's main transcript
pub fn is_conversation_file(path: &Path) -> bool {
    path.file_name().is_some_and(|n| n == TRANSCRIPT_FILE_NAME)
}

/// Whether a path is a subagent task transcript
pub fn is_task_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TASK_FILE_PREFIX) && n.ends_with(".jsonl"))
}

/// One parsed transcript record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub kind: MessageKind,
    /// The full record object as written by the CLI
    pub payload: serde_json::Value,
}

/// Outcome of one incremental read
#[derive(Debug, Default)]
pub struct ReadOutcome {
    pub records: Vec<TranscriptRecord>,
    pub new_offset: u64,
    /// Count of malformed lines skipped
    pub skipped: usize,
}

/// Read records appended past `offset`.
///
/// A missing file yields an empty outcome with the offset unchanged. An
/// offset beyond the current file length means the file was truncated or
/// replaced; reading restarts from the beginning.
pub fn read_new(path: &Path, offset: u64) -> Result<ReadOutcome> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ReadOutcome {
                new_offset: offset,
                ..Default::default()
            });
        }
        Err(e) => return Err(e.into()),
    };

    let len = file.metadata()?.len();
    let start = if offset > len {
        debug!(path = %path.display(), offset, len, "Transcript shrank; restarting from zero");
        0
    } else {
        offset
    };

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    let mut outcome = ReadOutcome {
        new_offset: start,
        ..Default::default()
    };

    let mut line_start = 0;
    while let Some(nl) = buf[line_start..].iter().position(|&b| b == b'\n') {
        let line = &buf[line_start..line_start + nl];
        line_start += nl + 1;
        // Offset advances past every complete line, valid or not
        outcome.new_offset = start + line_start as u64;

        let trimmed = line.strip_suffix(b"\r").unwrap_or(line);
        if trimmed.is_empty() {
            continue;
        }
        match parse_record(trimmed) {
            Some(record) => outcome.records.push(record),
            None => {
                outcome.skipped += 1;
                warn!(
                    path = %path.display(),
                    line = %String::from_utf8_lossy(trimmed),
                    "Skipping malformed transcript line"
                );
            }
        }
    }

    Ok(outcome)
}

/// Parse a single transcript line into a record; `None` when malformed
fn parse_record(line: &[u8]) -> Option<TranscriptRecord> {
    let payload: serde_json::Value = serde_json::from_slice(line).ok()?;
    let kind: MessageKind = serde_json::from_value(payload.get("type")?.clone()).ok()?;
    Some(TranscriptRecord { kind, payload })
}

/// Whether a record is the user `/clear` command
fn is_clear_command(record: &TranscriptRecord) -> bool {
    record.kind == MessageKind::User
        && record
            .payload
            .get("content")
            .and_then(|c| c.as_str())
            .is_some_and(|c| c.trim_start().starts_with("/clear"))
}

/// Split a batch on the last `/clear` command.
///
/// Returns the records after the clear marker and whether a clear was seen;
/// history before the marker is to be truncated by the caller.
pub fn split_after_clear(records: Vec<TranscriptRecord>) -> (Vec<TranscriptRecord>, bool) {
    match records.iter().rposition(is_clear_command) {
        Some(idx) => (records.into_iter().skip(idx + 1).collect(), true),
        None => (records, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_lines(path: &Path, lines: &[&str]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
    }

    #[test]
    fn test_transcript_file_kinds() {
        assert!(is_conversation_file(Path::new("/x/s1/conversation.jsonl")));
        assert!(!is_conversation_file(Path::new("/x/s1/task-42.jsonl")));

        assert!(is_task_file(Path::new("/x/s1/task-42.jsonl")));
        assert!(!is_task_file(Path::new("/x/s1/conversation.jsonl")));
        assert!(!is_task_file(Path::new("/x/s1/task-42.log")));
        assert!(!is_task_file(Path::new("/x/s1/notes.txt")));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = read_new(&dir.path().join("nope.jsonl"), 42).unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.new_offset, 42);
    }

    #[test]
    fn test_incremental_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSCRIPT_FILE_NAME);
        write_lines(&path, &[r#"{"type": "user", "content": "hi"}"#]);

        let first = read_new(&path, 0).unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.records[0].kind, MessageKind::User);

        // No growth: second read is empty with the offset unchanged
        let second = read_new(&path, first.new_offset).unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.new_offset, first.new_offset);

        // Growth: only the appended records come back
        write_lines(&path, &[r#"{"type": "assistant", "content": "hello"}"#]);
        let third = read_new(&path, first.new_offset).unwrap();
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.records[0].kind, MessageKind::Assistant);
    }

    #[test]
    fn test_partial_trailing_line_left_unconsumed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSCRIPT_FILE_NAME);
        let complete = r#"{"type": "user", "content": "a"}"#;
        std::fs::write(&path, format!("{}\n{{\"type\": \"assist", complete)).unwrap();

        let outcome = read_new(&path, 0).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.new_offset as usize, complete.len() + 1);

        // Completing the line later makes it visible from the saved offset
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "ant\", \"content\": \"b\"}}").unwrap();
        let next = read_new(&path, outcome.new_offset).unwrap();
        assert_eq!(next.records.len(), 1);
        assert_eq!(next.records[0].kind, MessageKind::Assistant);
    }

    #[test]
    fn test_malformed_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSCRIPT_FILE_NAME);
        write_lines(
            &path,
            &[
                r#"{"type": "user", "content": "ok"}"#,
                "not json at all",
                r#"{"type": "weird_kind", "content": "x"}"#,
                r#"{"type": "assistant", "content": "still parsed"}"#,
            ],
        );

        let outcome = read_new(&path, 0).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.skipped, 2);
    }

    #[test]
    fn test_truncated_file_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TRANSCRIPT_FILE_NAME);
        write_lines(&path, &[r#"{"type": "user", "content": "fresh"}"#]);

        // Offset far beyond the file: read restarts at zero
        let outcome = read_new(&path, 10_000).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.new_offset > 0);
    }

    #[test]
    fn test_split_after_clear() {
        let records = vec![
            TranscriptRecord {
                kind: MessageKind::User,
                payload: serde_json::json!({"type": "user", "content": "old"}),
            },
            TranscriptRecord {
                kind: MessageKind::User,
                payload: serde_json::json!({"type": "user", "content": "/clear"}),
            },
            TranscriptRecord {
                kind: MessageKind::User,
                payload: serde_json::json!({"type": "user", "content": "new"}),
            },
        ];

        let (after, cleared) = split_after_clear(records);
        assert!(cleared);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].payload["content"], "new");
    }

    #[test]
    fn test_split_without_clear_is_identity() {
        let records = vec![TranscriptRecord {
            kind: MessageKind::Assistant,
            payload: serde_json::json!({"type": "assistant", "content": "hi"}),
        }];
        let (after, cleared) = split_after_clear(records);
        assert!(!cleared);
        assert_eq!(after.len(), 1);
    }
}

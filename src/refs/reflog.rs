//! Reflogs: per-ref append-only logs under `logs/<name>`.
//!
//! Each line is `<old> <new> <name> <<email>> <ts> <tz>\t<message>`, oldest
//! first on disk; readers surface newest first.

use std::str::FromStr;

use bytes::Bytes;

use crate::{errors::GitError, hash::ObjectId, storage::raw::RawStore};

/// Who performed a ref update and why; attached to updates that should log.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
    pub message: String,
}

/// One parsed reflog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    pub name: String,
    pub email: String,
    pub timestamp: i64,
    pub timezone: String,
    pub message: String,
}

pub(crate) fn log_key(ref_name: &str) -> String {
    format!("logs/{ref_name}")
}

/// Append one entry to a ref's log.
pub(crate) async fn append(
    raw: &dyn RawStore,
    ref_name: &str,
    old: Option<ObjectId>,
    new: ObjectId,
    log: &LogContext,
) -> Result<(), GitError> {
    let key = log_key(ref_name);
    let mut data = match raw.load_bytes(&key).await {
        Ok(existing) => existing.to_vec(),
        Err(GitError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let line = format!(
        "{} {} {} <{}> {} {}\t{}\n",
        old.unwrap_or(ObjectId::ZERO),
        new,
        log.name,
        log.email,
        log.timestamp,
        log.timezone,
        log.message.replace('\n', " "),
    );
    data.extend_from_slice(line.as_bytes());
    raw.store_bytes(&key, Bytes::from(data)).await
}

/// Read a ref's log, newest entry first.
pub(crate) async fn read(
    raw: &dyn RawStore,
    ref_name: &str,
) -> Result<Vec<ReflogEntry>, GitError> {
    let data = match raw.load_bytes(&log_key(ref_name)).await {
        Ok(data) => data,
        Err(GitError::NotFound(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let text = std::str::from_utf8(&data)
        .map_err(|_| GitError::Invalid(format!("reflog for {ref_name} is not UTF-8")))?;

    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        entries.push(parse_line(line).ok_or_else(|| {
            GitError::Invalid(format!("malformed reflog line `{line}` for {ref_name}"))
        })?);
    }
    entries.reverse();
    Ok(entries)
}

fn parse_line(line: &str) -> Option<ReflogEntry> {
    let (meta, message) = match line.split_once('\t') {
        Some((meta, message)) => (meta, message.to_string()),
        None => (line, String::new()),
    };

    // `<old> <new> <name possibly with spaces> <<email>> <ts> <tz>`
    let (old, rest) = meta.split_once(' ')?;
    let (new, rest) = rest.split_once(' ')?;
    let email_open = rest.find('<')?;
    let email_close = rest.find('>')?;
    let name = rest[..email_open].trim().to_string();
    let email = rest[email_open + 1..email_close].to_string();
    let mut tail = rest[email_close + 1..].trim().split(' ');
    let timestamp: i64 = tail.next()?.parse().ok()?;
    let timezone = tail.next()?.to_string();

    Some(ReflogEntry {
        old_id: ObjectId::from_str(old).ok()?,
        new_id: ObjectId::from_str(new).ok()?,
        name,
        email,
        timestamp,
        timezone,
        message,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::storage::raw::MemoryStore;

    fn context(message: &str) -> LogContext {
        LogContext {
            name: "A U Thor".to_string(),
            email: "a@x".to_string(),
            timestamp: 1700000000,
            timezone: "+0200".to_string(),
            message: message.to_string(),
        }
    }

    /// Append + read round trip, newest first, multi-word names intact.
    #[tokio::test]
    async fn append_read_round_trip() {
        let raw = Arc::new(MemoryStore::new());
        let first = ObjectId::from_raw([1; 20]);
        let second = ObjectId::from_raw([2; 20]);

        append(raw.as_ref(), "HEAD", None, first, &context("commit: one"))
            .await
            .unwrap();
        append(
            raw.as_ref(),
            "HEAD",
            Some(first),
            second,
            &context("commit: two"),
        )
        .await
        .unwrap();

        let entries = read(raw.as_ref(), "HEAD").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "commit: two");
        assert_eq!(entries[0].old_id, first);
        assert_eq!(entries[0].new_id, second);
        assert_eq!(entries[1].old_id, ObjectId::ZERO);
        assert_eq!(entries[1].name, "A U Thor");
        assert_eq!(entries[1].timezone, "+0200");
    }

    /// A missing log reads as empty.
    #[tokio::test]
    async fn missing_log_is_empty() {
        let raw = Arc::new(MemoryStore::new());
        assert!(read(raw.as_ref(), "refs/heads/none").await.unwrap().is_empty());
    }

    /// Newlines in messages are flattened so the log stays line-oriented.
    #[tokio::test]
    async fn message_newlines_flattened() {
        let raw = Arc::new(MemoryStore::new());
        append(
            raw.as_ref(),
            "HEAD",
            None,
            ObjectId::from_raw([3; 20]),
            &context("multi\nline"),
        )
        .await
        .unwrap();
        let entries = read(raw.as_ref(), "HEAD").await.unwrap();
        assert_eq!(entries[0].message, "multi line");
    }
}

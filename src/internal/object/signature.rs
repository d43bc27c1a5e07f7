//! Identity lines of commits and tags.
//!
//! A signature is the `author`, `committer`, or `tagger` line of a commit or
//! tag object: a display name, an email address, unix seconds, and a `±HHMM`
//! timezone. The byte layout is
//! `<kind> <name> <email@example.com> <timestamp> <timezone>` and must
//! round-trip exactly for object ids to be stable.

use std::fmt::Display;

use bstr::ByteSlice;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which header line a signature belongs to.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum SignatureKind {
    Author,
    Committer,
    Tagger,
}

impl SignatureKind {
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            SignatureKind::Author => b"author",
            SignatureKind::Committer => b"committer",
            SignatureKind::Tagger => b"tagger",
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, GitError> {
        match data {
            b"author" => Ok(SignatureKind::Author),
            b"committer" => Ok(SignatureKind::Committer),
            b"tagger" => Ok(SignatureKind::Tagger),
            _ => Err(GitError::CorruptObject(format!(
                "`{}` is not a valid signature kind",
                String::from_utf8_lossy(data)
            ))),
        }
    }
}

impl Display for SignatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SignatureKind::Author => write!(f, "author"),
            SignatureKind::Committer => write!(f, "committer"),
            SignatureKind::Tagger => write!(f, "tagger"),
        }
    }
}

/// An identity with timestamp, as it appears in commit and tag headers.
#[derive(PartialEq, Eq, Debug, Hash, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub email: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Offset in `±HHMM` form, kept verbatim for round-trip stability.
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    pub fn new(
        kind: SignatureKind,
        name: impl Into<String>,
        email: impl Into<String>,
        timestamp: i64,
        timezone: impl Into<String>,
    ) -> Self {
        Signature {
            kind,
            name: name.into(),
            email: email.into(),
            timestamp,
            timezone: timezone.into(),
        }
    }

    /// An identity stamped with the current time in the given timezone.
    pub fn now(
        kind: SignatureKind,
        name: impl Into<String>,
        email: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        Signature::new(kind, name, email, Utc::now().timestamp(), timezone)
    }

    /// Parse a full signature line, e.g.
    /// `author Alice <alice@example.com> 1700000000 +0800`.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let corrupt =
            |msg: &str| GitError::CorruptObject(format!("{msg}: `{}`", data.as_bstr()));

        let kind_end = data
            .find_byte(b' ')
            .ok_or_else(|| corrupt("signature missing kind"))?;
        let kind = SignatureKind::from_bytes(&data[..kind_end])?;
        let rest = &data[kind_end + 1..];

        // The email is bracketed; the name is everything before `<`, the
        // timestamp and timezone everything after `>`.
        let email_open = rest
            .find_byte(b'<')
            .ok_or_else(|| corrupt("signature missing email"))?;
        let email_close = rest
            .find_byte(b'>')
            .ok_or_else(|| corrupt("signature missing email terminator"))?;
        if email_close < email_open {
            return Err(corrupt("signature email brackets reversed"));
        }

        let name = rest[..email_open]
            .trim_with(|c| c == ' ')
            .to_str()
            .map_err(|_| corrupt("signature name is not UTF-8"))?
            .to_string();
        let email = rest[email_open + 1..email_close]
            .to_str()
            .map_err(|_| corrupt("signature email is not UTF-8"))?
            .to_string();

        let tail = rest[email_close + 1..].trim_with(|c| c == ' ');
        let mut fields = tail.split_str(b" ");
        let timestamp = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| corrupt("signature missing timestamp"))?;
        let timezone = fields
            .next()
            .and_then(|f| f.to_str().ok())
            .ok_or_else(|| corrupt("signature missing timezone"))?
            .to_string();

        Ok(Signature {
            kind,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the canonical line, including the kind prefix.
    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut out = Vec::new();
        out.extend_from_slice(self.kind.to_bytes());
        out.push(b' ');
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(b" <");
        out.extend_from_slice(self.email.as_bytes());
        out.extend_from_slice(b"> ");
        out.extend_from_slice(self.timestamp.to_string().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.timezone.as_bytes());
        Ok(out)
    }

    /// Same identity under a different kind; used when a cherry-pick keeps
    /// the author but stamps a new committer.
    pub fn with_kind(&self, kind: SignatureKind) -> Signature {
        Signature {
            kind,
            ..self.clone()
        }
    }

    /// Timestamp as a timezone-aware datetime, when the offset parses.
    pub fn when(&self) -> Option<DateTime<FixedOffset>> {
        let tz = self.timezone.as_bytes();
        if tz.len() != 5 {
            return None;
        }
        let sign = match tz[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return None,
        };
        let hours: i32 = self.timezone[1..3].parse().ok()?;
        let minutes: i32 = self.timezone[3..5].parse().ok()?;
        let offset = FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))?;
        offset.timestamp_opt(self.timestamp, 0).single()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse the standard author line and read every field back.
    #[test]
    fn test_parse_author_line() {
        let line = b"author Alice Example <alice@example.com> 1700000000 +0800".to_vec();
        let sig = Signature::from_data(line).unwrap();
        assert_eq!(sig.kind, SignatureKind::Author);
        assert_eq!(sig.name, "Alice Example");
        assert_eq!(sig.email, "alice@example.com");
        assert_eq!(sig.timestamp, 1700000000);
        assert_eq!(sig.timezone, "+0800");
    }

    /// Serialization matches the input byte-for-byte.
    #[test]
    fn test_round_trip() {
        let line = b"committer A U Thor <author@example.com> 1234567890 -0500".to_vec();
        let sig = Signature::from_data(line.clone()).unwrap();
        assert_eq!(sig.to_data().unwrap(), line);
    }

    /// Negative timezone offsets resolve to valid datetimes.
    #[test]
    fn test_when() {
        let sig = Signature::new(
            SignatureKind::Author,
            "a",
            "a@x",
            1700000000,
            "-0500",
        );
        let when = sig.when().unwrap();
        assert_eq!(when.timestamp(), 1700000000);
    }

    /// Malformed lines are rejected as corrupt objects.
    #[test]
    fn test_rejects_malformed() {
        assert!(Signature::from_data(b"author broken".to_vec()).is_err());
        assert!(Signature::from_data(b"reviewer A <a@x> 1 +0000".to_vec()).is_err());
        assert!(Signature::from_data(b"author A <a@x> nan +0000".to_vec()).is_err());
    }

    /// An empty name is representable; git permits it in old history.
    #[test]
    fn test_empty_name() {
        let sig = Signature::from_data(b"author  <a@x> 1 +0000".to_vec()).unwrap();
        assert_eq!(sig.name, "");
        assert_eq!(sig.email, "a@x");
    }
}

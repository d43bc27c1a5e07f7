//! The Commit object records a snapshot of the project: the id of the root
//! tree, zero or more parent commits, author and committer identities, and
//! the message.
//!
//! Headers after `committer` (`encoding`, `gpgsig`, `mergetag`, ...) are kept
//! in their original order with continuation lines folded, so loading any
//! commit native git wrote and re-encoding it reproduces the id bit-exactly.

use std::fmt::Display;
use std::str::FromStr;

use bstr::{BString, ByteSlice};

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// A header line following the committer line: `encoding`, `gpgsig`, or any
/// extension header. Continuation lines (leading space) are folded into
/// `value` joined with `\n` and re-expanded on encode.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ExtraHeader {
    pub name: String,
    pub value: BString,
}

impl ExtraHeader {
    pub fn new(name: impl Into<String>, value: impl Into<BString>) -> Self {
        ExtraHeader {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Emit `name SP first-line LF (SP continuation LF)*`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.name.as_bytes());
        out.push(b' ');
        let mut first = true;
        for line in self.value.split_str(b"\n") {
            if !first {
                out.push(b'\n');
                out.push(b' ');
            }
            out.extend_from_slice(line);
            first = false;
        }
        out.push(b'\n');
    }
}

/// The `Commit` struct represents a commit object.
///
/// - `tree_id` points at the root tree for this commit, the complete state of
///   the repository at commit time.
/// - `parent_ids` link the commit into history: none for a root commit, one
///   for an ordinary commit, two or more for a merge.
/// - `author` and `committer` carry name, email, timestamp and timezone.
/// - `message` is kept byte-verbatim, including trailing newlines.
#[derive(Eq, Debug, Clone)]
pub struct Commit {
    pub id: ObjectId,
    pub tree_id: ObjectId,
    pub parent_ids: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub extra_headers: Vec<ExtraHeader>,
    pub message: BString,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "commit {}", self.id)?;
        writeln!(f, "tree   {}", self.tree_id)?;
        for parent in &self.parent_ids {
            writeln!(f, "parent {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        writeln!(f)?;
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectId,
        parent_ids: Vec<ObjectId>,
        message: &str,
    ) -> Commit {
        let mut commit = Commit {
            id: ObjectId::default(),
            tree_id,
            parent_ids,
            author,
            committer,
            extra_headers: vec![],
            message: BString::from(message),
        };
        commit.id = commit
            .object_hash()
            .expect("commit serialization cannot fail");
        commit
    }

    /// Value of the `encoding` header, if present.
    pub fn encoding(&self) -> Option<&str> {
        self.extra_headers
            .iter()
            .find(|h| h.name == "encoding")
            .and_then(|h| h.value.to_str().ok())
    }

    /// The GPG signature block, if the commit is signed.
    pub fn gpgsig(&self) -> Option<&BString> {
        self.extra_headers
            .iter()
            .find(|h| h.name == "gpgsig")
            .map(|h| &h.value)
    }

    /// The message decoded for display, honouring the `encoding` header for
    /// charsets `encoding_rs` knows; lossy UTF-8 otherwise.
    pub fn message_str(&self) -> String {
        match self
            .encoding()
            .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
        {
            Some(encoding) => encoding.decode(&self.message).0.into_owned(),
            None => self.message.to_str_lossy().into_owned(),
        }
    }

    /// First non-empty line of the message, the conventional subject.
    pub fn subject(&self) -> String {
        self.message_str()
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .to_string()
    }
}

/// Split object payload into folded header lines and the message body.
pub(crate) fn split_headers(data: &[u8]) -> Result<(Vec<(String, BString)>, BString), GitError> {
    let mut headers: Vec<(String, BString)> = Vec::new();
    let mut rest = data;
    loop {
        if rest.is_empty() {
            // No blank separator; an empty message is legal for tags.
            return Ok((headers, BString::from("")));
        }
        if rest[0] == b'\n' {
            return Ok((headers, BString::from(&rest[1..])));
        }
        let line_end = rest.find_byte(b'\n').ok_or_else(|| {
            GitError::CorruptObject("object header line missing newline".to_string())
        })?;
        let line = &rest[..line_end];
        rest = &rest[line_end + 1..];

        if line.starts_with(b" ") {
            // Continuation of the previous header.
            let (_, value) = headers.last_mut().ok_or_else(|| {
                GitError::CorruptObject("continuation line before any header".to_string())
            })?;
            value.push(b'\n');
            value.extend_from_slice(&line[1..]);
        } else {
            let space = line.find_byte(b' ').ok_or_else(|| {
                GitError::CorruptObject(format!(
                    "malformed object header line `{}`",
                    line.as_bstr()
                ))
            })?;
            let name = line[..space]
                .to_str()
                .map_err(|_| {
                    GitError::CorruptObject("object header name is not UTF-8".to_string())
                })?
                .to_string();
            headers.push((name, BString::from(&line[space + 1..])));
        }
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectId) -> Result<Self, GitError> {
        let (headers, message) = split_headers(data)?;
        let mut headers = headers.into_iter();

        let (name, value) = headers
            .next()
            .ok_or_else(|| GitError::CorruptObject("commit missing tree header".to_string()))?;
        if name != "tree" {
            return Err(GitError::CorruptObject(format!(
                "commit starts with `{name}`, expected `tree`"
            )));
        }
        let tree_id = parse_id_value(&value)?;

        let mut parent_ids = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra_headers = Vec::new();
        for (name, value) in headers {
            match name.as_str() {
                "parent" if author.is_none() => parent_ids.push(parse_id_value(&value)?),
                "author" => {
                    let mut line = b"author ".to_vec();
                    line.extend_from_slice(&value);
                    author = Some(Signature::from_data(line)?);
                }
                "committer" => {
                    let mut line = b"committer ".to_vec();
                    line.extend_from_slice(&value);
                    committer = Some(Signature::from_data(line)?);
                }
                _ => extra_headers.push(ExtraHeader { name, value }),
            }
        }

        Ok(Commit {
            id: hash,
            tree_id,
            parent_ids,
            author: author
                .ok_or_else(|| GitError::CorruptObject("commit missing author".to_string()))?,
            committer: committer
                .ok_or_else(|| GitError::CorruptObject("commit missing committer".to_string()))?,
            extra_headers,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn get_size(&self) -> usize {
        self.message.len()
    }

    /// [Git-Internals-Git-Objects](https://git-scm.com/book/en/v2/Git-Internals-Git-Objects)
    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend_from_slice(b"tree ");
        data.extend_from_slice(self.tree_id.to_string().as_bytes());
        data.push(b'\n');

        for parent in &self.parent_ids {
            data.extend_from_slice(b"parent ");
            data.extend_from_slice(parent.to_string().as_bytes());
            data.push(b'\n');
        }

        data.extend(self.author.to_data()?);
        data.push(b'\n');
        data.extend(self.committer.to_data()?);
        data.push(b'\n');

        for header in &self.extra_headers {
            header.encode_into(&mut data);
        }

        data.push(b'\n');
        data.extend_from_slice(&self.message);

        Ok(data)
    }
}

pub(crate) fn parse_id_value(value: &[u8]) -> Result<ObjectId, GitError> {
    let text = value
        .to_str()
        .map_err(|_| GitError::CorruptObject("object id header is not hex".to_string()))?;
    ObjectId::from_str(text).map_err(|e| GitError::CorruptObject(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::signature::SignatureKind;

    fn fixed_author() -> Signature {
        Signature::new(SignatureKind::Author, "A", "a@x", 1700000000, "+0000")
    }

    fn fixed_committer() -> Signature {
        Signature::new(SignatureKind::Committer, "A", "a@x", 1700000000, "+0000")
    }

    /// A root commit over the known single-entry tree hashes deterministically.
    #[test]
    fn test_known_commit_id() {
        let tree_id =
            ObjectId::from_str("853694aae8816094a0d875fee7ea26278dbf5d0f").unwrap();
        let commit = Commit::new(fixed_author(), fixed_committer(), tree_id, vec![], "init\n");
        assert_eq!(
            commit.id.to_string(),
            "009e87432e2767c0b40443fce48ad6bdcd21f4f5"
        );
    }

    /// Parents serialize in order and survive the round trip.
    #[test]
    fn test_parents_round_trip() {
        let tree_id =
            ObjectId::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let p1 = ObjectId::from_str("1111111111111111111111111111111111111111").unwrap();
        let p2 = ObjectId::from_str("2222222222222222222222222222222222222222").unwrap();
        let commit = Commit::new(
            fixed_author(),
            fixed_committer(),
            tree_id,
            vec![p1, p2],
            "merge\n",
        );
        let data = commit.to_data().unwrap();
        let reparsed = Commit::from_bytes(&data, commit.id).unwrap();
        assert_eq!(reparsed.parent_ids, vec![p1, p2]);
        assert_eq!(reparsed.object_hash().unwrap(), commit.id);
    }

    /// A signed commit parses with the signature as a structured header and
    /// re-encodes to the original bytes.
    #[test]
    fn test_gpgsig_round_trip() {
        let raw: &[u8] = b"tree 853694aae8816094a0d875fee7ea26278dbf5d0f\n\
author A <a@x> 1700000000 +0000\n\
committer A <a@x> 1700000000 +0000\n\
gpgsig -----BEGIN PGP SIGNATURE-----\n \n iQJNBAABCAA3FiEE\n =UeLf\n -----END PGP SIGNATURE-----\n\
\n\
signed commit\n";
        let hash = ObjectId::from_type_and_data(ObjectType::Commit, raw);
        let commit = Commit::from_bytes(raw, hash).unwrap();

        let sig = commit.gpgsig().expect("signature header present");
        assert!(sig.starts_with(b"-----BEGIN PGP SIGNATURE-----"));
        assert!(sig.ends_with(b"-----END PGP SIGNATURE-----"));
        assert_eq!(commit.message, BString::from("signed commit\n"));

        assert_eq!(commit.to_data().unwrap(), raw);
        assert_eq!(commit.object_hash().unwrap(), hash);
    }

    /// The encoding header survives and drives message decoding.
    #[test]
    fn test_encoding_header() {
        let mut raw = b"tree 853694aae8816094a0d875fee7ea26278dbf5d0f\n\
author A <a@x> 1700000000 +0000\n\
committer A <a@x> 1700000000 +0000\n\
encoding ISO-8859-1\n\
\n"
        .to_vec();
        raw.extend_from_slice(&[0xe9]); // 'é' in latin-1
        raw.push(b'\n');
        let hash = ObjectId::from_type_and_data(ObjectType::Commit, &raw);
        let commit = Commit::from_bytes(&raw, hash).unwrap();
        assert_eq!(commit.encoding(), Some("ISO-8859-1"));
        assert_eq!(commit.message_str(), "é\n");
        assert_eq!(commit.to_data().unwrap(), raw);
    }

    /// Subject extraction takes the first non-empty message line.
    #[test]
    fn test_subject() {
        let tree_id = ObjectId::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let commit = Commit::new(
            fixed_author(),
            fixed_committer(),
            tree_id,
            vec![],
            "\nsubject line\n\nbody\n",
        );
        assert_eq!(commit.subject(), "subject line");
    }

    /// Truncated commits are rejected as corrupt.
    #[test]
    fn test_rejects_corrupt() {
        let hash = ObjectId::default();
        assert!(Commit::from_bytes(b"", hash).is_err());
        assert!(Commit::from_bytes(b"tree short\n\nmsg", hash).is_err());
        assert!(
            Commit::from_bytes(
                b"tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n\nmsg",
                hash
            )
            .is_err()
        );
    }
}

//! The Tree object represents a directory: an ordered sequence of
//! `(mode, name, id)` entries. The byte layout of each entry is the octal
//! mode in ASCII, a space, the entry name, a NUL, then the 20 raw id bytes.
//!
//! Entries are sorted canonically: bytewise on name, with directory entries
//! compared as if their name carried a trailing `/`. Encoding always sorts
//! and validates, so a tree built from unsorted input still hashes to the id
//! native git would produce.

use std::cmp::Ordering;
use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// Id of the empty tree, a fixed point of the codec every git knows.
pub const EMPTY_TREE_ID: ObjectId = ObjectId::from_raw([
    0x4b, 0x82, 0x5d, 0xc6, 0x42, 0xcb, 0x6e, 0xb9, 0xa0, 0x60, 0xe5, 0x4b, 0xf8, 0xd6, 0x92,
    0x88, 0xfb, 0xee, 0x49, 0x04,
]);

/// File mode of a tree entry, restricted to the values git will write.
///
/// `Commit` (gitlink, submodule) entries are readable but this library never
/// creates them; writing through one fails with `Unsupported` upstream.
#[derive(PartialEq, Eq, Hash, Ord, PartialOrd, Debug, Clone, Copy)]
pub enum TreeItemMode {
    Blob,
    BlobExecutable,
    Link,
    Tree,
    Commit,
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(
            std::str::from_utf8(self.to_bytes()).expect("tree item mode is ASCII"),
        )
    }
}

impl TreeItemMode {
    /// Parse the octal mode bytes as they appear on disk. git writes
    /// `40000` for trees (no leading zero) but tolerates `040000`.
    pub fn from_bytes(mode: &[u8]) -> Result<Self, GitError> {
        Ok(match mode {
            b"100644" | b"100664" => TreeItemMode::Blob,
            b"100755" => TreeItemMode::BlobExecutable,
            b"120000" => TreeItemMode::Link,
            b"40000" | b"040000" => TreeItemMode::Tree,
            b"160000" => TreeItemMode::Commit,
            _ => {
                return Err(GitError::Invalid(format!(
                    "`{}` is not a valid tree item mode",
                    String::from_utf8_lossy(mode)
                )));
            }
        })
    }

    /// Canonical on-disk spelling.
    pub fn to_bytes(self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::BlobExecutable => b"100755",
            TreeItemMode::Link => b"120000",
            TreeItemMode::Tree => b"40000",
            TreeItemMode::Commit => b"160000",
        }
    }

    pub fn is_tree(self) -> bool {
        self == TreeItemMode::Tree
    }

    /// The mode as the u32 git stores in the staging index.
    pub fn mode_bits(self) -> u32 {
        match self {
            TreeItemMode::Blob => 0o100644,
            TreeItemMode::BlobExecutable => 0o100755,
            TreeItemMode::Link => 0o120000,
            TreeItemMode::Tree => 0o040000,
            TreeItemMode::Commit => 0o160000,
        }
    }

    pub fn from_mode_bits(bits: u32) -> Result<Self, GitError> {
        Ok(match bits {
            0o100644 | 0o100664 => TreeItemMode::Blob,
            0o100755 => TreeItemMode::BlobExecutable,
            0o120000 => TreeItemMode::Link,
            0o040000 => TreeItemMode::Tree,
            0o160000 => TreeItemMode::Commit,
            _ => {
                return Err(GitError::Invalid(format!(
                    "`{bits:o}` is not a valid tree item mode"
                )));
            }
        })
    }
}

/// One `(mode, name, id)` entry of a tree.
#[derive(PartialEq, Eq, Hash, Debug, Clone)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectId,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectId, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Entry names may not be empty, `.`, `..`, or contain `/` or NUL.
    pub fn validate_name(name: &str) -> Result<(), GitError> {
        if name.is_empty() {
            return Err(GitError::Invalid("empty tree entry name".to_string()));
        }
        if name == "." || name == ".." {
            return Err(GitError::Invalid(format!(
                "`{name}` is not a valid tree entry name"
            )));
        }
        if name.bytes().any(|b| b == b'/' || b == 0) {
            return Err(GitError::Invalid(format!(
                "tree entry name `{name}` contains a path separator or NUL"
            )));
        }
        Ok(())
    }
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {} {}", self.mode, self.id, self.name)
    }
}

/// A directory listing, entries kept in canonical order.
#[derive(Eq, Debug, Clone)]
pub struct Tree {
    pub id: ObjectId,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree {}", self.id)?;
        for item in &self.tree_items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

/// git's tree ordering: bytewise on name, with directories compared as if
/// their name ended in `/`.
fn canonical_cmp(a: &TreeItem, b: &TreeItem) -> Ordering {
    let an = a.name.as_bytes();
    let bn = b.name.as_bytes();
    let common = an.len().min(bn.len());
    match an[..common].cmp(&bn[..common]) {
        Ordering::Equal => {
            let ac = an
                .get(common)
                .copied()
                .unwrap_or(if a.mode.is_tree() { b'/' } else { 0 });
            let bc = bn
                .get(common)
                .copied()
                .unwrap_or(if b.mode.is_tree() { b'/' } else { 0 });
            ac.cmp(&bc)
        }
        other => other,
    }
}

impl Tree {
    /// Build a tree from items, sorting canonically and validating names.
    /// The empty item list is allowed and produces [`EMPTY_TREE_ID`].
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, GitError> {
        for item in &tree_items {
            TreeItem::validate_name(&item.name)?;
        }
        tree_items.sort_by(canonical_cmp);
        for pair in tree_items.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(GitError::Invalid(format!(
                    "duplicate tree entry name `{}`",
                    pair[0].name
                )));
            }
        }

        let mut tree = Tree {
            id: ObjectId::default(),
            tree_items,
        };
        tree.id = ObjectId::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// The empty tree.
    pub fn empty() -> Tree {
        Tree {
            id: EMPTY_TREE_ID,
            tree_items: vec![],
        }
    }

    /// Look up a direct child entry by name.
    pub fn get_entry(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectId) -> Result<Self, GitError> {
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let mode_end = rest
                .find_byte(b' ')
                .ok_or_else(|| GitError::CorruptObject("tree entry missing mode".to_string()))?;
            let mode = TreeItemMode::from_bytes(&rest[..mode_end])
                .map_err(|e| GitError::CorruptObject(e.to_string()))?;
            rest = &rest[mode_end + 1..];

            let name_end = rest
                .find_byte(0)
                .ok_or_else(|| GitError::CorruptObject("tree entry missing name".to_string()))?;
            let name = rest[..name_end]
                .to_str()
                .map_err(|_| {
                    GitError::CorruptObject("tree entry name is not UTF-8".to_string())
                })?
                .to_string();
            rest = &rest[name_end + 1..];

            if rest.len() < crate::hash::ID_RAW_LEN {
                return Err(GitError::CorruptObject(
                    "tree entry truncated before id".to_string(),
                ));
            }
            let id = ObjectId::from_bytes(&rest[..crate::hash::ID_RAW_LEN])
                .map_err(|e| GitError::CorruptObject(e.to_string()))?;
            rest = &rest[crate::hash::ID_RAW_LEN..];

            tree_items.push(TreeItem { mode, id, name });
        }

        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        self.tree_items
            .iter()
            .map(|item| item.mode.to_bytes().len() + item.name.len() + 2 + crate::hash::ID_RAW_LEN)
            .sum()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::with_capacity(self.get_size());
        for item in &self.tree_items {
            data.extend_from_slice(item.mode.to_bytes());
            data.push(b' ');
            data.extend_from_slice(item.name.as_bytes());
            data.push(0);
            data.extend_from_slice(item.id.as_ref());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::internal::object::blob::Blob;

    /// The empty tree hashes to the well-known id.
    #[test]
    fn test_empty_tree_id() {
        let tree = Tree::from_tree_items(vec![]).unwrap();
        assert_eq!(tree.id, EMPTY_TREE_ID);
        assert_eq!(
            tree.id.to_string(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }

    /// A one-entry tree containing blob("hello\n") at README.md matches the id
    /// native git produces.
    #[test]
    fn test_known_single_entry_tree() {
        let blob = Blob::from_content("hello\n");
        let tree = Tree::from_tree_items(vec![TreeItem::new(
            TreeItemMode::Blob,
            blob.id,
            "README.md".to_string(),
        )])
        .unwrap();
        // git mktree with `100644 blob ce0136.. README.md`
        assert_eq!(
            tree.id.to_string(),
            "853694aae8816094a0d875fee7ea26278dbf5d0f"
        );
        assert_eq!(tree.tree_items.len(), 1);
    }

    /// Directories sort as if suffixed with `/`: `foo` (dir) after `foo.txt`.
    #[test]
    fn test_canonical_sort_order() {
        let id = ObjectId::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Tree, id, "foo".to_string()),
            TreeItem::new(TreeItemMode::Blob, id, "foo.txt".to_string()),
            TreeItem::new(TreeItemMode::Blob, id, "bar".to_string()),
        ])
        .unwrap();
        let names: Vec<_> = tree.tree_items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo.txt", "foo"]);
    }

    /// Round-trip: encode, decode, re-encode yields the same id.
    #[test]
    fn test_round_trip_id_stable() {
        let id = ObjectId::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let tree = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Blob, id, "a".to_string()),
            TreeItem::new(TreeItemMode::Tree, id, "dir".to_string()),
            TreeItem::new(TreeItemMode::Link, id, "link".to_string()),
        ])
        .unwrap();
        let data = tree.to_data().unwrap();
        let reparsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(reparsed.object_hash().unwrap(), tree.id);
        assert_eq!(reparsed.tree_items, tree.tree_items);
    }

    /// Invalid names are rejected.
    #[test]
    fn test_name_validation() {
        let id = ObjectId::default();
        for bad in ["", ".", "..", "a/b", "nul\0"] {
            let result = Tree::from_tree_items(vec![TreeItem::new(
                TreeItemMode::Blob,
                id,
                bad.to_string(),
            )]);
            assert!(result.is_err(), "name `{bad:?}` should be rejected");
        }
    }

    /// Duplicate names are rejected.
    #[test]
    fn test_duplicate_names_rejected() {
        let id = ObjectId::default();
        let result = Tree::from_tree_items(vec![
            TreeItem::new(TreeItemMode::Blob, id, "same".to_string()),
            TreeItem::new(TreeItemMode::Blob, id, "same".to_string()),
        ]);
        assert!(result.is_err());
    }

    /// Submodule (gitlink) entries parse.
    #[test]
    fn test_gitlink_parses() {
        let id = ObjectId::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap();
        let tree =
            Tree::from_tree_items(vec![TreeItem::new(TreeItemMode::Commit, id, "sub".into())])
                .unwrap();
        let data = tree.to_data().unwrap();
        let reparsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(reparsed.tree_items[0].mode, TreeItemMode::Commit);
    }
}

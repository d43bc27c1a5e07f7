//! Tags: lightweight refs under `refs/tags/`, or annotated tag objects
//! referenced from there.

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::signature::SignatureKind,
    internal::object::tag::Tag,
    internal::object::types::ObjectType,
    internal::object::GitObject,
    repository::Repository,
};

/// A tag row from [`TagCommand::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub name: String,
    /// The ref's immediate target: the tag object for annotated tags.
    pub id: ObjectId,
    /// The commit (or other object) an annotated tag dereferences to.
    pub peeled: Option<ObjectId>,
}

pub struct TagCommand<'a> {
    repo: &'a Repository,
    force: bool,
}

impl<'a> TagCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        TagCommand { repo, force: false }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    fn full_name(name: &str) -> Result<String, GitError> {
        if name.is_empty() || name.contains(' ') || name.contains("..") {
            return Err(GitError::Invalid(format!("invalid tag name `{name}`")));
        }
        Ok(format!("refs/tags/{name}"))
    }

    /// Create a lightweight tag pointing at `target` (default HEAD).
    pub async fn create(self, name: &str, target: Option<&str>) -> Result<ObjectId, GitError> {
        let full = Self::full_name(name)?;
        let target_id = self.resolve_target(target).await?;
        self.guard_existing(&full, name).await?;
        self.repo.refs().set(&full, target_id, None).await?;
        Ok(target_id)
    }

    /// Create an annotated tag: store a tag object, then reference it.
    pub async fn create_annotated(
        self,
        name: &str,
        target: Option<&str>,
        message: &str,
    ) -> Result<ObjectId, GitError> {
        let full = Self::full_name(name)?;
        let target_id = self.resolve_target(target).await?;
        self.guard_existing(&full, name).await?;

        let target_type = match self.repo.odb().load_object(&target_id).await? {
            GitObject::Commit(_) => ObjectType::Commit,
            GitObject::Tree(_) => ObjectType::Tree,
            GitObject::Blob(_) => ObjectType::Blob,
            GitObject::Tag(_) => ObjectType::Tag,
        };
        let tag = Tag::new(
            target_id,
            target_type,
            name,
            Some(self.repo.signature(SignatureKind::Tagger)),
            message,
        );
        let tag_id = self.repo.odb().store_object(&tag).await?;
        self.repo.refs().set(&full, tag_id, None).await?;
        Ok(tag_id)
    }

    pub async fn delete(self, name: &str) -> Result<(), GitError> {
        let full = Self::full_name(name)?;
        if !self.repo.refs().delete(&full).await? {
            return Err(GitError::ref_not_found(&full));
        }
        Ok(())
    }

    /// All tags sorted by name, annotated ones peeled.
    pub async fn list(self) -> Result<Vec<TagInfo>, GitError> {
        let mut out = Vec::new();
        for reference in self.repo.refs().list("refs/tags/").await? {
            let name = reference
                .name()
                .trim_start_matches("refs/tags/")
                .to_string();
            let Some(id) = reference.id() else { continue };
            let peeled = match self.repo.odb().load_object(&id).await {
                Ok(GitObject::Tag(tag)) => Some(tag.object_id),
                _ => None,
            };
            out.push(TagInfo { name, id, peeled });
        }
        Ok(out)
    }

    async fn resolve_target(&self, target: Option<&str>) -> Result<ObjectId, GitError> {
        match target {
            Some(rev) => self.repo.resolve_rev(rev).await,
            None => self
                .repo
                .head_id()
                .await?
                .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string())),
        }
    }

    async fn guard_existing(&self, full: &str, name: &str) -> Result<(), GitError> {
        if !self.force && self.repo.refs().get(full).await?.is_some() {
            return Err(GitError::Conflict(format!("tag `{name}` already exists")));
        }
        Ok(())
    }
}

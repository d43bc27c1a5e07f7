//! The repository facade: composes the object database, reference store,
//! staging area, worktree, pack directory and resolution cache into a single
//! handle, and exposes the porcelain command builders.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;

use crate::{
    commands,
    config::RepoConfig,
    errors::GitError,
    hash::ObjectId,
    internal::index::{self, Staging},
    internal::object::signature::{Signature, SignatureKind},
    internal::object::tree::{Tree, TreeItemMode},
    internal::object::GitObject,
    internal::zlib::Zlib,
    merge::rr_cache::ResolutionCache,
    refs::{LogContext, Ref, RefStore},
    storage::{
        objects::ObjectStore,
        packdir::{PackDirStore, PackDirectory},
        raw::{CompositeStore, FileStore, MemoryStore, RawStore},
    },
    worktree::{FileWorktree, MemoryWorktree, Worktree},
};

const GIT_DIR: &str = ".git";

/// One open repository.
impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

pub struct Repository {
    git: Arc<dyn RawStore>,
    objects: Arc<ObjectStore>,
    refs: RefStore,
    staging: Mutex<Staging>,
    worktree: Arc<dyn Worktree>,
    packs: Option<Arc<PackDirectory>>,
    resolutions: ResolutionCache,
    pub config: RepoConfig,
    /// Worktree root for file-backed repositories.
    pub path: Option<PathBuf>,
}

impl Repository {
    /// Create a fresh repository at `path` (its worktree root), laying out
    /// the `.git` directory, then open it.
    pub async fn init(path: impl AsRef<Path>) -> Result<Repository, GitError> {
        let config = RepoConfig::default();
        Self::init_with_config(path, config).await
    }

    pub async fn init_with_config(
        path: impl AsRef<Path>,
        config: RepoConfig,
    ) -> Result<Repository, GitError> {
        let root = path.as_ref().to_path_buf();
        let git_dir = root.join(GIT_DIR);
        if tokio::fs::try_exists(&git_dir).await? {
            return Err(GitError::Invalid(format!(
                "repository already exists at {}",
                git_dir.display()
            )));
        }
        for sub in ["objects/pack", "refs/heads", "refs/tags", "logs"] {
            tokio::fs::create_dir_all(git_dir.join(sub)).await?;
        }
        tokio::fs::write(
            git_dir.join("HEAD"),
            format!("ref: refs/heads/{}\n", config.default_branch),
        )
        .await?;
        Self::open_with_config(root, config).await
    }

    /// Open an existing repository at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Repository, GitError> {
        Self::open_with_config(path, RepoConfig::default()).await
    }

    pub async fn open_with_config(
        path: impl AsRef<Path>,
        config: RepoConfig,
    ) -> Result<Repository, GitError> {
        let root = path.as_ref().to_path_buf();
        let git_dir = root.join(GIT_DIR);
        if !tokio::fs::try_exists(&git_dir.join("HEAD")).await? {
            return Err(GitError::NotFound(format!(
                "not a git repository: {}",
                root.display()
            )));
        }

        let git: Arc<dyn RawStore> = Arc::new(FileStore::new(&git_dir));
        let loose: Arc<dyn RawStore> = Arc::new(FileStore::new(git_dir.join("objects")));
        let packs = Arc::new(
            PackDirectory::open(git_dir.join("objects/pack"), &config.pack).await?,
        );
        let composite: Arc<dyn RawStore> = Arc::new(CompositeStore::new(
            loose,
            vec![Arc::new(PackDirStore::new(packs.clone()))],
        ));
        let objects = Arc::new(ObjectStore::new(composite, Zlib::new(), &config.store));

        let staging = index::load_staging(git.as_ref()).await?;

        Ok(Repository {
            refs: RefStore::new(git.clone()),
            resolutions: ResolutionCache::new(git.clone()),
            git,
            objects,
            staging: Mutex::new(staging),
            worktree: Arc::new(FileWorktree::new(root.clone())),
            packs: Some(packs),
            config,
            path: Some(root),
        })
    }

    /// A fully in-memory repository; objects, refs, staging and worktree all
    /// live in process.
    pub fn in_memory() -> Repository {
        Self::in_memory_with_config(RepoConfig::default())
    }

    pub fn in_memory_with_config(config: RepoConfig) -> Repository {
        let git: Arc<dyn RawStore> = Arc::new(MemoryStore::new());
        let loose: Arc<dyn RawStore> = Arc::new(MemoryStore::new());
        let objects = Arc::new(ObjectStore::new(loose, Zlib::new(), &config.store));

        let repo = Repository {
            refs: RefStore::new(git.clone()),
            resolutions: ResolutionCache::new(git.clone()),
            git: git.clone(),
            objects,
            staging: Mutex::new(Staging::new()),
            worktree: Arc::new(MemoryWorktree::new()),
            packs: None,
            config,
            path: None,
        };
        // Seed HEAD like init does on disk.
        let head = format!("ref: refs/heads/{}\n", repo.config.default_branch);
        let git_for_head = git.clone();
        // MemoryStore writes are synchronous underneath; a blocking seed at
        // construction keeps `in_memory` a plain function.
        futures::executor::block_on(async move {
            git_for_head
                .store_bytes("HEAD", Bytes::from(head))
                .await
                .expect("memory store write cannot fail")
        });
        repo
    }

    pub fn odb(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn worktree(&self) -> &dyn Worktree {
        self.worktree.as_ref()
    }

    pub fn packs(&self) -> Option<&Arc<PackDirectory>> {
        self.packs.as_ref()
    }

    pub fn resolutions(&self) -> &ResolutionCache {
        &self.resolutions
    }

    pub fn staging(&self) -> &Mutex<Staging> {
        &self.staging
    }

    /// Persist the staging area through the repository store.
    pub async fn save_staging(&self, staging: &Staging) -> Result<(), GitError> {
        index::flush_staging(self.git.as_ref(), staging).await
    }

    pub(crate) fn git_store(&self) -> &Arc<dyn RawStore> {
        &self.git
    }

    /// The HEAD ref as stored: symbolic on a branch, direct when detached.
    pub async fn head(&self) -> Result<Option<Ref>, GitError> {
        self.refs.get("HEAD").await
    }

    /// The commit id HEAD resolves to, if any commit exists yet.
    pub async fn head_id(&self) -> Result<Option<ObjectId>, GitError> {
        self.refs.resolve_id("HEAD").await
    }

    /// Current branch name, `None` when HEAD is detached.
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        Ok(match self.head().await? {
            Some(Ref::Symbolic { target, .. }) => {
                target.strip_prefix("refs/heads/").map(str::to_string)
            }
            _ => None,
        })
    }

    /// Resolve a revision string: `HEAD`, a 40-hex id, or a ref name looked
    /// up as given, then under `refs/`, `refs/heads/`, `refs/tags/`,
    /// `refs/remotes/`.
    pub async fn resolve_rev(&self, rev: &str) -> Result<ObjectId, GitError> {
        if rev == "HEAD" {
            return self
                .head_id()
                .await?
                .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string()));
        }
        for candidate in [
            rev.to_string(),
            format!("refs/{rev}"),
            format!("refs/heads/{rev}"),
            format!("refs/tags/{rev}"),
            format!("refs/remotes/{rev}"),
        ] {
            if let Some(id) = self.refs.resolve_id(&candidate).await? {
                return Ok(id);
            }
        }
        if rev.len() == crate::hash::ID_HEX_LEN
            && let Ok(id) = ObjectId::from_str(rev)
        {
            if self.objects.has(&id).await? {
                return Ok(id);
            }
            return Err(GitError::object_not_found(&id));
        }
        Err(GitError::NotFound(format!("revision `{rev}`")))
    }

    /// Follow tag objects until a commit surfaces.
    pub async fn peel_to_commit(&self, id: ObjectId) -> Result<ObjectId, GitError> {
        let mut current = id;
        for _ in 0..10 {
            match self.objects.load_object(&current).await? {
                GitObject::Commit(_) => return Ok(current),
                GitObject::Tag(tag) => current = tag.object_id,
                other => {
                    return Err(GitError::Invalid(format!(
                        "{} is a {}, not a commit",
                        current,
                        other.object_type()
                    )));
                }
            }
        }
        Err(GitError::Invalid(format!("tag chain from {id} too deep")))
    }

    /// Tree id of a commit.
    pub async fn tree_of(&self, commit_id: ObjectId) -> Result<ObjectId, GitError> {
        Ok(self.objects.load_commit(&commit_id).await?.tree_id)
    }

    /// A signature for the configured identity, stamped now.
    pub fn signature(&self, kind: SignatureKind) -> Signature {
        Signature::now(
            kind,
            self.config.user_name.clone(),
            self.config.user_email.clone(),
            self.config.timezone.clone(),
        )
    }

    /// A reflog context for the configured identity.
    pub fn log_context(&self, message: impl Into<String>) -> LogContext {
        let signature = self.signature(SignatureKind::Committer);
        LogContext {
            name: signature.name,
            email: signature.email,
            timestamp: signature.timestamp,
            timezone: signature.timezone,
            message: message.into(),
        }
    }

    /// Write a tree's contents into the worktree, removing paths under
    /// `previous` that the new tree no longer has.
    pub async fn write_tree_to_worktree(
        &self,
        previous: Option<ObjectId>,
        target: ObjectId,
    ) -> Result<(), GitError> {
        let target_map = crate::merge::flatten_tree(&self.objects, target).await?;
        let previous_map = match previous {
            Some(previous) => crate::merge::flatten_tree(&self.objects, previous).await?,
            None => Default::default(),
        };
        for path in previous_map.keys() {
            if !target_map.contains_key(path) {
                self.worktree.remove(path).await?;
            }
        }
        for (path, (mode, id)) in target_map {
            // Paths identical in both trees carry over untouched, the way
            // git leaves unchanged files (and any local edits to them) alone.
            if previous_map.get(&path) == Some(&(mode, id))
                && self.worktree.stat(&path).await?.is_some()
            {
                continue;
            }
            let blob = self.objects.load_blob(&id).await?;
            self.worktree
                .write_blob(&path, Bytes::from(blob.data), mode)
                .await?;
        }
        Ok(())
    }

    /// Force a tree onto the worktree, discarding local edits: every path is
    /// rewritten unless its on-disk content already hashes to the target id.
    pub async fn reset_tree_to_worktree(
        &self,
        previous: Option<ObjectId>,
        target: ObjectId,
    ) -> Result<(), GitError> {
        let target_map = crate::merge::flatten_tree(&self.objects, target).await?;
        if let Some(previous) = previous {
            let previous_map = crate::merge::flatten_tree(&self.objects, previous).await?;
            for path in previous_map.keys() {
                if !target_map.contains_key(path) {
                    self.worktree.remove(path).await?;
                }
            }
        }
        for (path, (mode, id)) in target_map {
            if let Ok(on_disk) = self.worktree.read_blob(&path).await {
                let on_disk_id = ObjectId::from_type_and_data(
                    crate::internal::object::types::ObjectType::Blob,
                    &on_disk,
                );
                if on_disk_id == id {
                    continue;
                }
            }
            let blob = self.objects.load_blob(&id).await?;
            self.worktree
                .write_blob(&path, Bytes::from(blob.data), mode)
                .await?;
        }
        Ok(())
    }

    /// Move loose refs into packed-refs, peeling annotated tags.
    pub async fn pack_refs(
        &self,
        options: crate::refs::PackRefsOptions,
    ) -> Result<usize, GitError> {
        let mut peeled = std::collections::HashMap::new();
        for reference in self.refs.list("refs/tags/").await? {
            if let Some(id) = reference.id()
                && let Ok(GitObject::Tag(tag)) = self.objects.load_object(&id).await
            {
                peeled.insert(reference.name().to_string(), tag.object_id);
            }
        }
        self.refs.pack_refs(options, &peeled).await
    }

    /// Import every entry of a decoded pack into the object store.
    pub async fn import_entries(
        &self,
        entries: Vec<crate::internal::pack::entry::Entry>,
    ) -> Result<usize, GitError> {
        let count = entries.len();
        for entry in entries {
            self.objects.store_raw(entry.obj_type, &entry.data).await?;
        }
        Ok(count)
    }

    // Porcelain builders.

    pub fn commit(&self) -> commands::commit::CommitCommand<'_> {
        commands::commit::CommitCommand::new(self)
    }

    pub fn add(&self) -> commands::add::AddCommand<'_> {
        commands::add::AddCommand::new(self)
    }

    pub fn branch(&self) -> commands::branch::BranchCommand<'_> {
        commands::branch::BranchCommand::new(self)
    }

    pub fn checkout(&self) -> commands::checkout::CheckoutCommand<'_> {
        commands::checkout::CheckoutCommand::new(self)
    }

    pub fn merge(&self) -> commands::merge::MergeCommand<'_> {
        commands::merge::MergeCommand::new(self)
    }

    pub fn cherry_pick(&self) -> commands::cherry_pick::CherryPickCommand<'_> {
        commands::cherry_pick::CherryPickCommand::new(self)
    }

    pub fn revert(&self) -> commands::revert::RevertCommand<'_> {
        commands::revert::RevertCommand::new(self)
    }

    pub fn reset(&self) -> commands::reset::ResetCommand<'_> {
        commands::reset::ResetCommand::new(self)
    }

    pub fn tag(&self) -> commands::tag::TagCommand<'_> {
        commands::tag::TagCommand::new(self)
    }

    pub fn stash(&self) -> commands::stash::StashCommand<'_> {
        commands::stash::StashCommand::new(self)
    }

    pub fn log(&self) -> commands::log::LogCommand<'_> {
        commands::log::LogCommand::new(self)
    }

    pub fn status(&self) -> commands::status::StatusCommand<'_> {
        commands::status::StatusCommand::new(self)
    }

    pub fn diff(&self) -> commands::diff::DiffCommand<'_> {
        commands::diff::DiffCommand::new(self)
    }
}

/// Build a tree object from plain (path, mode, id) rows; shared by tests and
/// the stash machinery.
pub async fn build_tree_from_entries(
    odb: &ObjectStore,
    entries: &[(String, TreeItemMode, ObjectId)],
) -> Result<ObjectId, GitError> {
    let mut staged = Staging::new();
    for (path, mode, id) in entries {
        staged.add(path, crate::internal::index::StageEntry::new(*mode, *id));
    }
    if entries.is_empty() {
        let empty = Tree::from_tree_items(vec![])?;
        return odb.store_object(&empty).await;
    }
    staged.write_tree(odb).await
}

pub use crate::internal::object::tree::EMPTY_TREE_ID;

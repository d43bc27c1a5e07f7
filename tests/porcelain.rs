//! End-to-end porcelain scenarios over in-memory and file-backed
//! repositories: initial commit, history walks, merge bases, conflicting and
//! clean merges, cherry-pick, revert, reset, stash, status and tags.

use std::str::FromStr;

use bytes::Bytes;

use git_peer::commands::cherry_pick::PickStatus;
use git_peer::commands::merge::MergeStatus;
use git_peer::commands::reset::ResetMode;
use git_peer::hash::ObjectId;
use git_peer::history;
use git_peer::internal::object::signature::{Signature, SignatureKind};
use git_peer::internal::object::tree::TreeItemMode;
use git_peer::worktree::Worktree;
use git_peer::{GitError, Repository};

fn author_at(time: i64) -> Signature {
    Signature::new(SignatureKind::Author, "A", "a@x", time, "+0000")
}

fn committer_at(time: i64) -> Signature {
    Signature::new(SignatureKind::Committer, "A", "a@x", time, "+0000")
}

async fn write_file(repo: &Repository, path: &str, content: &str) {
    repo.worktree()
        .write_blob(path, Bytes::from(content.to_string()), TreeItemMode::Blob)
        .await
        .unwrap();
}

async fn commit_file(repo: &Repository, path: &str, content: &str, message: &str, time: i64) -> ObjectId {
    write_file(repo, path, content).await;
    repo.add().path(path).call().await.unwrap();
    repo.commit()
        .message(message)
        .author(author_at(time))
        .committer(committer_at(time))
        .call()
        .await
        .unwrap()
}

/// Scenario: initial commit on an empty repository pins the known blob id,
/// a single-entry tree, and HEAD == refs/heads/main.
#[tokio::test]
async fn initial_commit_on_empty_repo() {
    let repo = Repository::in_memory();

    write_file(&repo, "README.md", "hello\n").await;
    let staged = repo.add().path("README.md").call().await.unwrap();
    assert_eq!(
        staged[0],
        ObjectId::from_str("ce013625030ba8dba906f756967f9e9ca394464a").unwrap()
    );

    let commit_id = repo
        .commit()
        .message("init\n")
        .author(author_at(1700000000))
        .committer(committer_at(1700000000))
        .call()
        .await
        .unwrap();

    let commit = repo.odb().load_commit(&commit_id).await.unwrap();
    assert!(commit.parent_ids.is_empty());
    let tree = repo.odb().load_tree(&commit.tree_id).await.unwrap();
    assert_eq!(tree.tree_items.len(), 1);
    assert_eq!(tree.tree_items[0].name, "README.md");

    assert_eq!(repo.head_id().await.unwrap(), Some(commit_id));
    assert_eq!(
        repo.refs().resolve_id("refs/heads/main").await.unwrap(),
        Some(commit_id)
    );
    assert_eq!(repo.current_branch().await.unwrap().as_deref(), Some("main"));

    // Reflog recorded the birth of the branch.
    let log = repo.refs().reflog("refs/heads/main").await.unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].message.starts_with("commit: init"));
}

/// Scenario: a five-commit chain walks newest-first and honours the limit.
#[tokio::test]
async fn linear_chain_walk_with_limit() {
    let repo = Repository::in_memory();
    let mut ids = Vec::new();
    for i in 0..5 {
        let id = commit_file(
            &repo,
            "file.txt",
            &format!("content {i}\n"),
            &format!("c{i}\n"),
            1700000000 + i as i64,
        )
        .await;
        ids.push(id);
    }

    let walked = history::walk_ancestry(repo.odb(), ids[4], Some(3))
        .await
        .unwrap();
    assert_eq!(walked, vec![ids[4], ids[3], ids[2]]);

    let log = repo.log().max_count(2).call().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].id, ids[4]);
}

/// Scenario: two branches forked from one base have that base as their only
/// merge base.
#[tokio::test]
async fn merge_base_of_forked_branches() {
    let repo = Repository::in_memory();
    let base = commit_file(&repo, "f", "base\n", "B\n", 1700000000).await;

    repo.branch().create("feature", None).await.unwrap();

    let a1 = commit_file(&repo, "a", "a1\n", "A1\n", 1700000001).await;
    let a2 = commit_file(&repo, "a", "a2\n", "A2\n", 1700000002).await;

    repo.checkout().target("feature").call().await.unwrap();
    let f1 = commit_file(&repo, "b", "f1\n", "F1\n", 1700000001).await;
    let f2 = commit_file(&repo, "b", "f2\n", "F2\n", 1700000002).await;

    assert_ne!(a1, f1);
    let bases = history::find_merge_base(repo.odb(), a2, f2).await.unwrap();
    assert_eq!(bases, vec![base]);
}

/// Scenario: both sides editing the same line region conflicts; staging
/// carries stages 1/2/3 for the path.
#[tokio::test]
async fn conflicting_merge_stages_all_three() {
    let repo = Repository::in_memory();
    commit_file(&repo, "file.txt", "line1\nline2\n", "base\n", 1700000000).await;
    repo.branch().create("feat", None).await.unwrap();

    commit_file(&repo, "file.txt", "line1\nmain\n", "main change\n", 1700000001).await;

    repo.checkout().target("feat").call().await.unwrap();
    commit_file(&repo, "file.txt", "line1\nfeat\n", "feat change\n", 1700000002).await;

    repo.checkout().target("main").call().await.unwrap();
    let status = repo.merge().theirs("feat").call().await.unwrap();
    let MergeStatus::Conflicting(paths) = status else {
        panic!("expected a conflict, got {status:?}");
    };
    assert_eq!(paths, vec!["file.txt"]);

    let staging = repo.staging().lock().await;
    assert!(staging.has_conflicts());
    let stages = staging.entries_at("file.txt");
    assert_eq!(stages.len(), 3);
    drop(staging);

    // Committing with unmerged paths is refused.
    let err = repo.commit().message("nope\n").call().await.unwrap_err();
    assert!(matches!(err, GitError::Conflict(_)));

    // The worktree carries conflict markers.
    let content = repo.worktree().read_blob("file.txt").await.unwrap();
    let text = String::from_utf8(content.to_vec()).unwrap();
    assert!(text.contains("<<<<<<< HEAD"));
    assert!(text.contains(">>>>>>> feat"));

    // Resolving and committing produces a two-parent merge commit.
    let main_tip = repo.refs().resolve_id("refs/heads/main").await.unwrap().unwrap();
    let feat_tip = repo.refs().resolve_id("refs/heads/feat").await.unwrap().unwrap();
    write_file(&repo, "file.txt", "line1\nmerged\n").await;
    repo.add().path("file.txt").call().await.unwrap();
    let merged = repo
        .commit()
        .message("resolve the conflict\n")
        .author(author_at(1700000003))
        .committer(committer_at(1700000003))
        .call()
        .await
        .unwrap();
    let merged_commit = repo.odb().load_commit(&merged).await.unwrap();
    assert_eq!(merged_commit.parent_ids, vec![main_tip, feat_tip]);
}

/// A merge whose sides touch different files lands a two-parent commit.
#[tokio::test]
async fn clean_merge_creates_merge_commit() {
    let repo = Repository::in_memory();
    commit_file(&repo, "shared", "s\n", "base\n", 1700000000).await;
    repo.branch().create("side", None).await.unwrap();

    let ours = commit_file(&repo, "ours.txt", "o\n", "ours\n", 1700000001).await;
    repo.checkout().target("side").call().await.unwrap();
    let theirs = commit_file(&repo, "theirs.txt", "t\n", "theirs\n", 1700000002).await;

    repo.checkout().target("main").call().await.unwrap();
    let status = repo.merge().theirs("side").call().await.unwrap();
    let MergeStatus::Merged(merge_id) = status else {
        panic!("expected a merge commit, got {status:?}");
    };

    let merge = repo.odb().load_commit(&merge_id).await.unwrap();
    assert_eq!(merge.parent_ids, vec![ours, theirs]);

    // Both sides' files are present afterwards.
    assert!(repo.worktree().read_blob("ours.txt").await.is_ok());
    assert!(repo.worktree().read_blob("theirs.txt").await.is_ok());

    // Merging again reports up to date.
    let again = repo.merge().theirs("side").call().await.unwrap();
    assert_eq!(again, MergeStatus::AlreadyUpToDate);
}

/// Fast-forward moves the branch without a merge commit; NO_FF forces one.
#[tokio::test]
async fn fast_forward_and_no_ff() {
    let repo = Repository::in_memory();
    commit_file(&repo, "f", "1\n", "one\n", 1700000000).await;
    repo.branch().create("ahead", None).await.unwrap();
    repo.checkout().target("ahead").call().await.unwrap();
    let tip = commit_file(&repo, "f", "2\n", "two\n", 1700000001).await;

    repo.checkout().target("main").call().await.unwrap();
    let status = repo.merge().theirs("ahead").call().await.unwrap();
    assert_eq!(status, MergeStatus::FastForward(tip));
    assert_eq!(repo.head_id().await.unwrap(), Some(tip));

    // Advance `ahead` once more and merge with no-ff: a merge commit appears
    // even though a fast-forward was possible.
    repo.checkout().target("ahead").call().await.unwrap();
    let tip2 = commit_file(&repo, "f", "3\n", "three\n", 1700000002).await;
    repo.checkout().target("main").call().await.unwrap();
    let status = repo
        .merge()
        .theirs("ahead")
        .no_ff()
        .message("merge ahead\n")
        .call()
        .await
        .unwrap();
    let MergeStatus::Merged(merge_id) = status else {
        panic!("expected a merge commit, got {status:?}");
    };
    let merge = repo.odb().load_commit(&merge_id).await.unwrap();
    assert_eq!(merge.parent_ids, vec![tip, tip2]);
}

/// Cherry-pick keeps the original author; revert undoes a commit.
#[tokio::test]
async fn cherry_pick_and_revert() {
    let repo = Repository::in_memory();
    commit_file(&repo, "f", "base\n", "base\n", 1700000000).await;
    repo.branch().create("work", None).await.unwrap();
    repo.checkout().target("work").call().await.unwrap();
    let picked = commit_file(&repo, "g", "addition\n", "add g\n", 1700000005).await;

    repo.checkout().target("main").call().await.unwrap();
    let status = repo.cherry_pick().source(&picked.to_string()).call().await.unwrap();
    let PickStatus::Committed(new_id) = status else {
        panic!("expected a committed pick, got {status:?}");
    };
    let new_commit = repo.odb().load_commit(&new_id).await.unwrap();
    assert_eq!(new_commit.author.timestamp, 1700000005);
    assert_eq!(new_commit.subject(), "add g");
    assert!(repo.worktree().read_blob("g").await.is_ok());

    let status = repo.revert().source(&new_id.to_string()).call().await.unwrap();
    let PickStatus::Committed(revert_id) = status else {
        panic!("expected a committed revert, got {status:?}");
    };
    let revert = repo.odb().load_commit(&revert_id).await.unwrap();
    assert!(revert.subject().starts_with("Revert"));
    assert!(repo.worktree().read_blob("g").await.is_err());
}

/// Reset soft/mixed/hard move the ref and progressively more state.
#[tokio::test]
async fn reset_modes() {
    let repo = Repository::in_memory();
    let first = commit_file(&repo, "f", "1\n", "one\n", 1700000000).await;
    let _second = commit_file(&repo, "f", "2\n", "two\n", 1700000001).await;

    // Soft: ref moves, staging and worktree keep the newer content.
    repo.reset()
        .mode(ResetMode::Soft)
        .target(&first.to_string())
        .call()
        .await
        .unwrap();
    assert_eq!(repo.head_id().await.unwrap(), Some(first));
    let staged = repo.staging().lock().await.get("f").unwrap();
    let staged_blob = repo.odb().load_blob(&staged.id).await.unwrap();
    assert_eq!(staged_blob.data, b"2\n");

    // Hard: worktree snaps back too.
    repo.reset()
        .mode(ResetMode::Hard)
        .target(&first.to_string())
        .call()
        .await
        .unwrap();
    assert_eq!(
        repo.worktree().read_blob("f").await.unwrap().as_ref(),
        b"1\n"
    );
}

/// Stash push parks dirty state, apply conflicts surface as MergeConflict,
/// pop drops the entry.
#[tokio::test]
async fn stash_round_trip() {
    let repo = Repository::in_memory();
    commit_file(&repo, "f", "clean\n", "base\n", 1700000000).await;

    // Dirty the worktree and staging, then stash.
    write_file(&repo, "f", "dirty\n").await;
    repo.add().path("f").call().await.unwrap();
    write_file(&repo, "untracked.txt", "loose\n").await;

    let stash_id = repo
        .stash()
        .include_untracked()
        .push(None)
        .await
        .unwrap();
    let stash = repo.odb().load_commit(&stash_id).await.unwrap();
    assert_eq!(stash.parent_ids.len(), 3);

    // Working copy is back at HEAD.
    assert_eq!(
        repo.worktree().read_blob("f").await.unwrap().as_ref(),
        b"clean\n"
    );
    assert!(repo.worktree().read_blob("untracked.txt").await.is_err());

    let entries = repo.stash().list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].message.starts_with("WIP on main"));

    // Pop restores both the tracked edit and the untracked file.
    repo.stash().pop(0).await.unwrap();
    assert_eq!(
        repo.worktree().read_blob("f").await.unwrap().as_ref(),
        b"dirty\n"
    );
    assert_eq!(
        repo.worktree()
            .read_blob("untracked.txt")
            .await
            .unwrap()
            .as_ref(),
        b"loose\n"
    );
    assert!(repo.stash().list().await.unwrap().is_empty());
}

/// Status splits staged, unstaged and untracked buckets.
#[tokio::test]
async fn status_buckets() {
    let repo = Repository::in_memory();
    commit_file(&repo, "committed", "v1\n", "base\n", 1700000000).await;

    write_file(&repo, "staged-new", "s\n").await;
    repo.add().path("staged-new").call().await.unwrap();
    write_file(&repo, "committed", "v2\n").await;
    write_file(&repo, "untracked", "u\n").await;

    let report = repo.status().call().await.unwrap();
    assert_eq!(report.branch.as_deref(), Some("main"));
    assert!(report
        .staged
        .iter()
        .any(|(path, kind)| path == "staged-new"
            && *kind == git_peer::commands::ChangeKind::Added));
    assert!(report
        .unstaged
        .iter()
        .any(|(path, kind)| path == "committed"
            && *kind == git_peer::commands::ChangeKind::Modified));
    assert_eq!(report.untracked, vec!["untracked"]);
    assert!(!report.is_clean());
}

/// Tags: lightweight points at the commit, annotated peels to it.
#[tokio::test]
async fn tags_lightweight_and_annotated() {
    let repo = Repository::in_memory();
    let commit = commit_file(&repo, "f", "x\n", "base\n", 1700000000).await;

    repo.tag().create("light", None).await.unwrap();
    let annotated_id = repo
        .tag()
        .create_annotated("v1.0", None, "release v1.0\n")
        .await
        .unwrap();
    assert_ne!(annotated_id, commit);

    let tags = repo.tag().list().await.unwrap();
    assert_eq!(tags.len(), 2);
    let light = tags.iter().find(|t| t.name == "light").unwrap();
    assert_eq!(light.id, commit);
    assert_eq!(light.peeled, None);
    let annotated = tags.iter().find(|t| t.name == "v1.0").unwrap();
    assert_eq!(annotated.peeled, Some(commit));

    // Checking out the annotated tag detaches at the commit.
    let result = repo.checkout().target("v1.0").call().await.unwrap();
    assert!(result.detached);
    assert_eq!(result.new_head, commit);

    repo.tag().delete("light").await.unwrap();
    assert_eq!(repo.tag().list().await.unwrap().len(), 1);
}

/// Checkout refuses to clobber local modifications unless forced.
#[tokio::test]
async fn checkout_guards_dirty_files() {
    let repo = Repository::in_memory();
    commit_file(&repo, "f", "one\n", "one\n", 1700000000).await;
    repo.branch().create("other", None).await.unwrap();
    commit_file(&repo, "f", "two\n", "two\n", 1700000001).await;

    write_file(&repo, "f", "local edit\n").await;
    let err = repo.checkout().target("other").call().await.unwrap_err();
    assert!(matches!(err, GitError::Conflict(_)));

    repo.checkout().target("other").force().call().await.unwrap();
    assert_eq!(
        repo.worktree().read_blob("f").await.unwrap().as_ref(),
        b"one\n"
    );
}

/// File-backed repositories persist across open(), including staging and
/// refs.
#[tokio::test]
async fn file_backed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let commit_id;
    {
        let repo = Repository::init(dir.path()).await.unwrap();
        commit_id = commit_file(&repo, "persisted.txt", "on disk\n", "persist\n", 1700000000).await;
        repo.pack_refs(git_peer::refs::PackRefsOptions {
            all: true,
            delete_loose: true,
        })
        .await
        .unwrap();
    }

    let reopened = Repository::open(dir.path()).await.unwrap();
    assert_eq!(reopened.head_id().await.unwrap(), Some(commit_id));
    let staged = reopened.staging().lock().await.get("persisted.txt");
    assert!(staged.is_some());
    assert_eq!(
        reopened
            .worktree()
            .read_blob("persisted.txt")
            .await
            .unwrap()
            .as_ref(),
        b"on disk\n"
    );

    // Opening a directory without .git fails the way git describes it.
    let empty = tempfile::tempdir().unwrap();
    let err = Repository::open(empty.path()).await.unwrap_err();
    assert!(matches!(err, GitError::NotFound(_)));
}

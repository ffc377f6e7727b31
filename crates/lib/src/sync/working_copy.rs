//! Blocking helpers over a checked-out libgit2 repository.
//!
//! Nothing here takes the staging lock; callers do. Paths are always
//! working-copy relative and `/`-separated, and always taken literally:
//! record ids may contain `*`, `?` or `[`, so nothing is handed to libgit2
//! as a pathspec.

use std::collections::BTreeSet;
use std::path::Path;

use git2::{
    Commit, Delta, DiffOptions, ErrorCode, Index, ObjectType, Repository, Signature, Sort, Tree,
};
use tracing::debug;

use super::error::{GitErrorCode, SyncError};
use crate::constants::{LOCAL_COMMIT_WALK_DEPTH, MAIN_REMOTE, OS_ARTIFACTS, VCS_DIR};

pub(crate) fn open(work_dir: &Path) -> Result<Repository, SyncError> {
    Ok(Repository::open(work_dir)?)
}

/// Name of the branch HEAD points at, born or not.
pub(crate) fn local_branch(repo: &Repository) -> Result<String, SyncError> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or(SyncError::NoLocalBranch)
}

/// The commit HEAD points at, or `None` on an unborn branch.
pub(crate) fn head_commit(repo: &Repository) -> Result<Option<Commit<'_>>, SyncError> {
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, SyncError> {
    head_commit(repo)?.map(|c| c.tree()).transpose().map_err(Into::into)
}

/// VCS internals, parent escapes and OS clutter.
pub(crate) fn is_artifact(path: &str) -> bool {
    path.split('/').any(|c| c == ".." || c == VCS_DIR)
        || path
            .rsplit('/')
            .next()
            .is_some_and(|name| OS_ARTIFACTS.contains(&name))
}

/// `"."` or `""` matches everything; otherwise a path spec matches itself and
/// anything below it.
pub(crate) fn matches_spec(path: &str, spec: &str) -> bool {
    let spec = spec.trim_end_matches('/');
    spec.is_empty()
        || spec == "."
        || path == spec
        || path
            .strip_prefix(spec)
            .is_some_and(|rest| rest.starts_with('/'))
}

pub(crate) fn filter_by_specs<S: AsRef<str>>(paths: Vec<String>, specs: &[S]) -> Vec<String> {
    paths
        .into_iter()
        .filter(|p| specs.iter().any(|s| matches_spec(p, s.as_ref())))
        .collect()
}

/// Paths whose working-tree content differs from HEAD, index ignored.
pub(crate) fn changed_paths(
    repo: &Repository,
    include_artifacts: bool,
) -> Result<Vec<String>, SyncError> {
    let tree = head_tree(repo)?;
    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .include_typechange(true);
    let diff = repo.diff_tree_to_workdir(tree.as_ref(), Some(&mut opts))?;

    let mut paths = BTreeSet::new();
    for delta in diff.deltas() {
        let file = if delta.status() == Delta::Deleted {
            delta.old_file()
        } else {
            delta.new_file()
        };
        let Some(path) = file.path().and_then(Path::to_str) else {
            continue;
        };
        if !include_artifacts && is_artifact(path) {
            continue;
        }
        paths.insert(path.to_string());
    }
    Ok(paths.into_iter().collect())
}

fn work_dir_of(repo: &Repository) -> Result<&Path, SyncError> {
    repo.workdir().ok_or_else(|| {
        SyncError::git(GitErrorCode::NotFound, "repository has no working directory")
    })
}

/// Commit exactly `paths`, starting from an index equal to HEAD.
///
/// Every changed file under `paths` is staged by its own name: present files
/// are added, missing ones removed. With `removing`, all of them are removed
/// from the index. Returns the number of files staged; zero means nothing
/// was touched.
pub(crate) fn stage_and_commit(
    repo: &Repository,
    paths: &[&str],
    message: &str,
    removing: bool,
    signature: &Signature<'_>,
) -> Result<usize, SyncError> {
    let changed = filter_by_specs(changed_paths(repo, false)?, paths);
    if changed.is_empty() {
        debug!(?paths, "Nothing to commit");
        return Ok(0);
    }

    let work_dir = work_dir_of(repo)?;
    let head = head_commit(repo)?;
    let mut index = repo.index()?;
    match &head {
        Some(commit) => index.read_tree(&commit.tree()?)?,
        None => index.clear()?,
    }
    for path in &changed {
        let rel = Path::new(path.as_str());
        let on_disk = std::fs::symlink_metadata(work_dir.join(rel)).is_ok_and(|m| !m.is_dir());
        if on_disk && !removing {
            index.add_path(rel)?;
        } else if index.get_path(rel, 0).is_some() {
            index.remove_path(rel)?;
        }
    }
    index.write()?;

    let tree = repo.find_tree(index.write_tree()?)?;
    let parents: Vec<&Commit<'_>> = head.iter().collect();
    let oid = repo.commit(Some("HEAD"), signature, signature, message, &tree, &parents)?;
    debug!(%oid, files = changed.len(), "Committed");
    Ok(changed.len())
}

/// Restore `targets` to their HEAD state. Paths unknown to HEAD are deleted.
///
/// Only the exact paths listed are touched; other edits stay in place.
pub(crate) fn reset_paths(
    repo: &Repository,
    work_dir: &Path,
    targets: &[String],
) -> Result<(), SyncError> {
    if targets.is_empty() {
        return Ok(());
    }

    let tree = head_tree(repo)?;
    let (tracked, untracked): (Vec<&String>, Vec<&String>) = targets.iter().partition(|p| {
        tree.as_ref()
            .is_some_and(|t| t.get_path(Path::new(p.as_str())).is_ok())
    });

    let mut index = repo.index()?;

    // Untracked first: a record that changed form leaves a directory where
    // HEAD has a file, or the other way round.
    for path in &untracked {
        let rel = Path::new(path.as_str());
        if index.get_path(rel, 0).is_some() {
            index.remove_path(rel)?;
        }
        match std::fs::remove_file(work_dir.join(rel)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        prune_empty_parents(work_dir, rel);
    }

    if let Some(tree) = &tree {
        for path in &tracked {
            restore_from_tree(repo, &mut index, work_dir, tree, path)?;
        }
    }
    index.write()?;

    debug!(tracked = tracked.len(), untracked = untracked.len(), "Reset paths");
    Ok(())
}

/// Write the blob `tree` holds at `path` back to disk and re-stage it.
fn restore_from_tree(
    repo: &Repository,
    index: &mut Index,
    work_dir: &Path,
    tree: &Tree<'_>,
    path: &str,
) -> Result<(), SyncError> {
    let rel = Path::new(path);
    let entry = tree.get_path(rel)?;
    let blob = entry.to_object(repo)?.peel_to_blob()?;

    let full = work_dir.join(rel);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&full, blob.content())?;
    #[cfg(unix)]
    if entry.filemode() == 0o100755 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&full, std::fs::Permissions::from_mode(0o755))?;
    }

    index.add_path(rel)?;
    Ok(())
}

fn prune_empty_parents(work_dir: &Path, rel: &Path) {
    let mut current = rel.parent();
    while let Some(dir) = current {
        if dir.as_os_str().is_empty() || std::fs::remove_dir(work_dir.join(dir)).is_err() {
            break;
        }
        current = dir.parent();
    }
}

/// Summaries of commits on HEAD that the remote-tracking branch lacks,
/// newest first.
pub(crate) fn local_commits(repo: &Repository) -> Result<Vec<String>, SyncError> {
    let Some(head) = head_commit(repo)? else {
        return Ok(Vec::new());
    };
    let branch = local_branch(repo)?;

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    walk.push(head.id())?;
    match repo.refname_to_id(&format!("refs/remotes/{MAIN_REMOTE}/{branch}")) {
        Ok(remote) => walk.hide(remote)?,
        Err(e) if e.code() == ErrorCode::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut messages = Vec::new();
    for oid in walk.take(LOCAL_COMMIT_WALK_DEPTH + 1) {
        let commit = repo.find_commit(oid?)?;
        messages.push(commit.summary().unwrap_or_default().to_string());
    }
    if messages.len() > LOCAL_COMMIT_WALK_DEPTH {
        return Err(SyncError::git(
            GitErrorCode::NotFound,
            format!("remote branch not found within the last {LOCAL_COMMIT_WALK_DEPTH} commits"),
        ));
    }
    Ok(messages)
}

/// Raw contents of a file as of `revision`.
pub(crate) fn file_at_revision(
    repo: &Repository,
    path: &str,
    revision: &str,
) -> Result<Vec<u8>, SyncError> {
    let tree = repo.revparse_single(revision)?.peel_to_commit()?.tree()?;
    let entry = tree.get_path(Path::new(path))?;
    if entry.kind() != Some(ObjectType::Blob) {
        return Err(SyncError::git(
            GitErrorCode::NotFound,
            format!("{path} is not a file at {revision}"),
        ));
    }
    let blob = entry.to_object(repo)?.peel_to_blob()?;
    Ok(blob.content().to_vec())
}

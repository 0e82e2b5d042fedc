//! State Reconciler (C4): compares declared manifest entries against what's
//! actually on disk. Grounded on `check_for_changes`/`check_for_state_match`
//! in the original `gitp.py`.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::fs_helpers::{is_real_dir, is_symlink, resolve_repo_link};
use crate::manifest::{Manifest, RepoEntry, MANIFEST_FILE};
use crate::vcs::Repo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Clean,
    Modified,
    Unaligned,
    Nonexistent,
    Unlinked,
    Overlayed,
}

impl RepoState {
    /// Status symbol from `spec.md` §6.
    pub fn symbol(self) -> char {
        match self {
            RepoState::Clean => '✓',
            RepoState::Modified => '*',
            RepoState::Unaligned => '!',
            RepoState::Nonexistent => '-',
            RepoState::Unlinked => '#',
            RepoState::Overlayed => '^',
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateMismatch {
    pub observed_branch: Option<String>,
    pub observed_commit: Option<String>,
    pub observed_link: Option<PathBuf>,
    pub state: RepoState,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ChangeOptions {
    pub ignore_committed: bool,
    pub ignore_uncommitted: bool,
    pub ignore_untracked: bool,
    pub ignore_local_only_branches: bool,
}

#[derive(Debug, Clone)]
pub struct ChangedRepo {
    pub path: PathBuf,
    pub unpushed_commits: u32,
}

/// Depth-first walk of the manifest tree rooted at `root`, invoking `visit`
/// for every materialized non-link child with its absolute path, the
/// manifest that declares it, its relative path (`/`-joined from `root`),
/// and its [`RepoEntry`].
fn walk_tree(
    root: &Path,
    rel_prefix: &Path,
    mut visit: impl FnMut(&Path, &RepoEntry, &Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    fn recurse(
        dir: &Path,
        rel_prefix: &Path,
        visit: &mut dyn FnMut(&Path, &RepoEntry, &Path) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Ok(());
        }
        let manifest = Manifest::load(&manifest_path)?;
        for (child, entry) in &manifest.repos {
            let child_abs = dir.join(child);
            let child_rel = rel_prefix.join(child);
            visit(&child_abs, entry, &child_rel)?;
            if !entry.is_linked() && is_real_dir(&child_abs) {
                recurse(&child_abs, &child_rel, visit)?;
            }
        }
        Ok(())
    }
    recurse(root, rel_prefix, &mut visit)
}

/// `checkForChanges`: every node in the subtree with uncommitted, untracked,
/// or unpushed work.
pub fn check_for_changes(
    root: &Path,
    options: ChangeOptions,
) -> anyhow::Result<Vec<ChangedRepo>> {
    let mut out = Vec::new();
    walk_tree(root, Path::new(""), |abspath, _entry, relpath| {
        if !is_real_dir(abspath) {
            return Ok(());
        }
        let repo = Repo::at(abspath);
        if !repo.is_git_repo() {
            return Ok(());
        }
        let mut dirty = false;
        if !options.ignore_uncommitted && repo.has_uncommitted_changes()? {
            dirty = true;
        }
        if !options.ignore_untracked && repo.has_untracked_files()? {
            dirty = true;
        }
        let unpushed = unpushed_commit_count(&repo, options.ignore_local_only_branches)?;
        if !options.ignore_committed && unpushed > 0 {
            dirty = true;
        }
        if dirty {
            out.push(ChangedRepo { path: relpath.to_path_buf(), unpushed_commits: unpushed });
        }
        Ok(())
    })?;
    Ok(out)
}

/// Maximum, over all remotes, of `rev-list --count <remote>/<branch>..HEAD`.
/// A branch with no remote counterpart on any remote counts as 0.
fn unpushed_commit_count(repo: &Repo, ignore_local_only: bool) -> anyhow::Result<u32> {
    let branch = repo.current_branch()?;
    let remotes = repo.run(&["remote"])?;
    let mut max_count = 0u32;
    let mut found_remote_branch = false;
    for remote in remotes.lines().map(str::trim).filter(|s| !s.is_empty()) {
        let remote_ref = format!("{remote}/{branch}");
        if !repo.check(&["rev-parse", "--verify", "--quiet", &remote_ref])? {
            continue;
        }
        found_remote_branch = true;
        let count = repo
            .run(&["rev-list", "--count", &format!("{remote_ref}..HEAD")])?
            .trim()
            .parse()
            .unwrap_or(0);
        max_count = max_count.max(count);
    }
    if !found_remote_branch && ignore_local_only {
        return Ok(0);
    }
    Ok(max_count)
}

/// `checkForStateMatch`: per-child disagreement between declared and
/// observed state, per the table in `spec.md` §4.4.
pub fn check_for_state_match(
    root: &Path,
    target: Option<&str>,
    recurse: bool,
) -> anyhow::Result<IndexMap<PathBuf, StateMismatch>> {
    anyhow::ensure!(
        target.is_none() || recurse,
        "target and recurse=false are mutually exclusive"
    );
    let manifest_path = root.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(IndexMap::new());
    }
    let manifest = Manifest::load(&manifest_path)?;
    let mut out = IndexMap::new();

    for (child, entry) in &manifest.repos {
        if let Some(t) = target {
            if t != child {
                continue;
            }
        }
        let child_abs = root.join(child);
        if let Some(mismatch) = state_of_child(root, &child_abs, entry)? {
            out.insert(PathBuf::from(child), mismatch);
        }
        if recurse && !entry.is_linked() && is_real_dir(&child_abs) {
            let nested = check_for_state_match(&child_abs, None, true)?;
            for (nested_rel, mismatch) in nested {
                out.insert(PathBuf::from(child).join(nested_rel), mismatch);
            }
        }
    }
    Ok(out)
}

fn state_of_child(
    root: &Path,
    child_abs: &Path,
    entry: &RepoEntry,
) -> anyhow::Result<Option<StateMismatch>> {
    if entry.is_overlay() {
        let state = overlay_state(root, child_abs, entry)?;
        let observed_link = is_symlink(child_abs).then(|| std::fs::read_link(child_abs)).transpose()?;
        return Ok(Some(StateMismatch {
            observed_branch: None,
            observed_commit: None,
            observed_link,
            state,
        }));
    }

    if entry.is_linked() {
        if is_symlink(child_abs) {
            let target = std::fs::read_link(child_abs)?;
            let resolved = resolve_repo_link(root, entry, false)?;
            let matches = resolved.as_deref() == Some(target.as_path())
                || resolved
                    .as_ref()
                    .map(|r| child_abs.parent().map(|p| p.join(&target)) == Some(r.clone()))
                    .unwrap_or(false);
            if matches {
                return Ok(None);
            }
            return Ok(Some(StateMismatch {
                observed_branch: None,
                observed_commit: None,
                observed_link: Some(target),
                state: RepoState::Unaligned,
            }));
        }
        if is_real_dir(child_abs) {
            return Ok(Some(StateMismatch {
                observed_branch: None,
                observed_commit: None,
                observed_link: None,
                state: RepoState::Unlinked,
            }));
        }
        return Ok(Some(StateMismatch {
            observed_branch: None,
            observed_commit: None,
            observed_link: None,
            state: RepoState::Nonexistent,
        }));
    }

    if !is_real_dir(child_abs) {
        return Ok(Some(StateMismatch {
            observed_branch: None,
            observed_commit: None,
            observed_link: None,
            state: RepoState::Nonexistent,
        }));
    }

    let repo = Repo::at(child_abs);
    let observed_branch = repo.current_branch().ok();
    let observed_commit = repo.head_commit().ok();

    if let Some(commit) = &entry.commit {
        if let Some(observed) = &observed_commit {
            if !observed.starts_with(commit.as_str()) {
                return Ok(Some(StateMismatch {
                    observed_branch,
                    observed_commit,
                    observed_link: None,
                    state: RepoState::Unaligned,
                }));
            }
        }
    } else if observed_branch.as_deref() != Some(entry.branch_or_default()) {
        return Ok(Some(StateMismatch {
            observed_branch,
            observed_commit,
            observed_link: None,
            state: RepoState::Unaligned,
        }));
    }
    Ok(None)
}

/// Overlay parity: a top-level overlay target is `OVERLAYED` when the
/// symlink's resolved relative path equals the declared link's resolved
/// relative path.
pub fn overlay_state(root: &Path, target_abs: &Path, entry: &RepoEntry) -> anyhow::Result<RepoState> {
    if !entry.is_linked() {
        anyhow::bail!("overlay_state called on a non-link entry");
    }
    if is_symlink(target_abs) {
        let observed = std::fs::read_link(target_abs)?;
        let declared = resolve_repo_link(root, entry, false)?;
        let declared_rel = declared.and_then(|d| {
            target_abs.parent().and_then(|p| pathdiff(&d, p))
        });
        if declared_rel.as_deref() == Some(observed.as_path()) {
            return Ok(RepoState::Overlayed);
        }
        return Ok(RepoState::Unaligned);
    }
    if is_real_dir(target_abs) {
        return Ok(RepoState::Unlinked);
    }
    Ok(RepoState::Nonexistent)
}

fn pathdiff(target: &Path, base: &Path) -> Option<PathBuf> {
    pathdiff::diff_paths(target, base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) -> Repo {
        let repo = Repo::at(dir);
        fs::create_dir_all(dir).unwrap();
        repo.run(&["init", "-b", "main"]).unwrap();
        repo.run(&["config", "user.email", "t@example.com"]).unwrap();
        repo.run(&["config", "user.name", "t"]).unwrap();
        fs::write(dir.join("f.txt"), "x").unwrap();
        repo.run(&["add", "."]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
        repo
    }

    #[test]
    fn nonexistent_child_reported() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n    branch: main\n",
        )
        .unwrap();
        let mismatches = check_for_state_match(dir.path(), None, true).unwrap();
        let sub = mismatches.get(Path::new("sub")).unwrap();
        assert_eq!(sub.state, RepoState::Nonexistent);
    }

    #[test]
    fn aligned_branch_reports_no_mismatch() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let sub_dir = dir.path().join("sub");
        init_repo(&sub_dir);
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n    branch: main\n",
        )
        .unwrap();
        let mismatches = check_for_state_match(dir.path(), None, true).unwrap();
        assert!(mismatches.get(Path::new("sub")).is_none());
    }

    #[test]
    fn unlinked_reported_when_real_dir_in_place_of_link() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n    link: ../elsewhere\n",
        )
        .unwrap();
        let mismatches = check_for_state_match(dir.path(), None, true).unwrap();
        assert_eq!(mismatches.get(Path::new("sub")).unwrap().state, RepoState::Unlinked);
    }
}

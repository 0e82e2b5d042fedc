//! Manifest-aware VCS verbs (C8): `commit`, `push`, `rm`, `mv`, `add`, and
//! `remote set-url`. Grounded on the corresponding functions in the original
//! `gitp.py`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GitpError;
use crate::fs_helpers::{gitignore_add, gitignore_rm, is_real_dir};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::reconcile::{check_for_changes, check_for_state_match, ChangeOptions};
use crate::vcs::Repo;

/// `commit`: walk the tree; any node with staged changes gets the underlying
/// commit verbatim. Overlay targets are skipped. `-p`/`-e` are rejected by
/// the CLI layer before this is called — a non-interactive message option is
/// required.
pub fn commit(root: &Path, message_args: &[String]) -> anyhow::Result<u32> {
    let mut failures = 0u32;
    walk_forward(root, &mut |dir, entry_is_overlay| {
        if entry_is_overlay {
            return Ok(());
        }
        let repo = Repo::at(dir);
        if !repo.is_git_repo() {
            return Ok(());
        }
        let staged = repo.run(&["diff", "--cached", "--name-only"])?;
        if staged.trim().is_empty() {
            return Ok(());
        }
        let mut args: Vec<&str> = vec!["commit"];
        args.extend(message_args.iter().map(String::as_str));
        if let Err(e) = repo.run(&args) {
            log::warn!("commit failed in {}: {e}", dir.display());
            failures += 1;
        }
        Ok(())
    })?;
    Ok(failures)
}

fn walk_forward(root: &Path, visit: &mut dyn FnMut(&Path, bool) -> anyhow::Result<()>) -> anyhow::Result<()> {
    visit(root, false)?;
    let manifest_path = root.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(());
    }
    let manifest = Manifest::load(&manifest_path)?;
    for (child, entry) in &manifest.repos {
        let child_abs = root.join(child);
        if entry.is_overlay() {
            visit(&child_abs, true)?;
            continue;
        }
        if !entry.is_linked() && is_real_dir(&child_abs) {
            walk_forward(&child_abs, visit)?;
        }
    }
    Ok(())
}

/// Collects nodes in reverse depth-first order (children before parent),
/// used by `push` so a parent's new pin is never pushed before the child
/// commit it references.
fn collect_reverse(root: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let manifest_path = root.join(MANIFEST_FILE);
    if manifest_path.is_file() {
        let manifest = Manifest::load(&manifest_path)?;
        for (child, entry) in &manifest.repos {
            let child_abs = root.join(child);
            if entry.is_overlay() {
                continue;
            }
            if !entry.is_linked() && is_real_dir(&child_abs) {
                collect_reverse(&child_abs, out)?;
            }
        }
    }
    out.push(root.to_path_buf());
    Ok(())
}

/// `push`: reverse depth-first, pushing only nodes with outstanding local
/// commits. An unaligned subtree aborts unless `force`.
pub fn push(root: &Path, force: bool) -> anyhow::Result<()> {
    if !force {
        let mismatches = check_for_state_match(root, None, true)?;
        if !mismatches.is_empty() {
            return Err(GitpError::precondition(
                "subtree is unaligned with its manifest; `sync` first or pass --force",
            )
            .into());
        }
    }

    let mut order = Vec::new();
    collect_reverse(root, &mut order)?;

    for dir in order {
        let repo = Repo::at(&dir);
        if !repo.is_git_repo() {
            continue;
        }
        let branch = repo.current_branch()?;
        let unpushed = repo
            .run(&["rev-list", "--count", &format!("origin/{branch}..HEAD")])
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0);
        if unpushed > 0 {
            repo.run(&["push", "origin", &branch])?;
        }
    }
    Ok(())
}

/// `rm`: removes a manifest entry (+ `.gitignore` line), then deletes the
/// materialized directory/symlink unless local changes block it. Overlays
/// must go through `unlink --overlay`.
pub fn rm(top: &Path, child: &str, force: bool) -> anyhow::Result<()> {
    let manifest_path = top.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path)?;
    let entry = manifest
        .repos
        .get(child)
        .ok_or_else(|| GitpError::usage(format!("no manifest entry named '{child}'")))?
        .clone();
    if entry.is_overlay() {
        return Err(GitpError::usage("overlays must be removed with `unlink --overlay`").into());
    }

    let child_abs = top.join(child);
    if is_real_dir(&child_abs) && !force {
        let changes = check_for_changes(&child_abs, ChangeOptions::default())?;
        if !changes.is_empty() {
            return Err(GitpError::precondition(format!(
                "{child} has local changes (use --force to discard)"
            ))
            .into());
        }
    }

    manifest.repos.shift_remove(child);
    manifest.save()?;
    gitignore_rm(top, child)?;

    if is_real_dir(&child_abs) {
        fs::remove_dir_all(&child_abs)?;
    } else if child_abs.symlink_metadata().is_ok() {
        fs::remove_file(&child_abs)?;
    }
    Ok(())
}

/// `mv`: relocates a repo entry's directory, updating both the source and
/// destination manifests and `.gitignore`s.
pub fn mv(top: &Path, src_child: &str, dst_child: &str) -> anyhow::Result<()> {
    let manifest_path = top.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path)?;
    let entry = manifest
        .repos
        .shift_remove(src_child)
        .ok_or_else(|| GitpError::usage(format!("no manifest entry named '{src_child}'")))?;

    if manifest.repos.contains_key(dst_child) {
        return Err(GitpError::usage(format!("'{dst_child}' is already a manifest entry")).into());
    }

    let src_abs = top.join(src_child);
    let dst_abs = top.join(dst_child);
    if let Some(parent) = dst_abs.parent() {
        fs::create_dir_all(parent)?;
    }
    if src_abs.exists() || src_abs.symlink_metadata().is_ok() {
        fs::rename(&src_abs, &dst_abs)?;
    }

    manifest.repos.insert(dst_child.to_string(), entry);
    manifest.save()?;
    gitignore_rm(top, src_child)?;
    gitignore_add(top, dst_child)?;
    Ok(())
}

/// `remote set-url origin <url>`: runs the underlying VCS remote update and
/// also updates the parent manifest's declared URL for this child, so the
/// two stay consistent.
pub fn remote_set_url(top: &Path, child: &str, remote: &str, url: &str) -> anyhow::Result<()> {
    let child_abs = top.join(child);
    Repo::at(&child_abs).set_remote_url(remote, url)?;

    let manifest_path = top.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path)?;
    if let Some(entry) = manifest.repos.get_mut(child) {
        if remote == "origin" {
            entry.url = url.to_string();
            manifest.save()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        let repo = Repo::at(dir);
        repo.run(&["init", "-b", "main"]).unwrap();
        repo.run(&["config", "user.email", "t@example.com"]).unwrap();
        repo.run(&["config", "user.name", "t"]).unwrap();
    }

    #[test]
    fn rm_removes_manifest_entry_and_gitignore() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n",
        )
        .unwrap();
        gitignore_add(dir.path(), "sub").unwrap();

        rm(dir.path(), "sub", true).unwrap();

        let manifest = Manifest::load(&dir.path().join(".gitp_manifest")).unwrap();
        assert!(manifest.get("sub").is_none());
        let gi = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(!gi.contains("sub"));
    }

    #[test]
    fn rm_refuses_overlay() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  over:\n    type: overlay\n    url: https://example.com/o.git\n    link: ../x\n",
        )
        .unwrap();
        let result = rm(dir.path(), "over", true);
        assert!(result.is_err());
    }
}

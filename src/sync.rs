//! Sync Engine (C5): the recursive clone/pull/link/checkout walker and the
//! overlay applier. Grounded on `pull`/`clone`/`sync`/`new`/`apply_overlays`/
//! `checkout` in the original `gitp.py`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::GitpError;
use crate::fs_helpers::{gitignore_add, gitignore_rm, is_real_dir, is_symlink, resolve_repo_link};
use crate::manifest::{Manifest, RepoEntry, MANIFEST_FILE};
use crate::reconcile::{check_for_changes, ChangeOptions};
use crate::shell_exec::ShellConfig;
use crate::vcs::{self, Repo};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub force: bool,
    pub target: Option<String>,
    /// `--local`: materialize declared links as real, disconnected copies
    /// instead of symlinks.
    pub local: bool,
}

#[derive(Debug, Clone)]
struct TargetSpec {
    components: Vec<String>,
    subtree: bool,
}

impl TargetSpec {
    fn parse(raw: &str) -> Self {
        let subtree = raw.ends_with('/');
        let trimmed = raw.trim_end_matches('/');
        TargetSpec {
            components: trimmed.split('/').filter(|s| !s.is_empty()).map(String::from).collect(),
            subtree,
        }
    }
}

enum Decision {
    /// Perform the sync operation on this node and all descendants.
    Process,
    /// Don't touch this node, but descend into it (if already materialized)
    /// to reach a nested target.
    TraverseOnly,
    /// Ignore this node and its subtree entirely.
    Skip,
}

fn decide(child_rel: &[String], spec: &TargetSpec) -> Decision {
    let child_len = child_rel.len();
    let target_len = spec.components.len();
    if child_rel == spec.components.as_slice() {
        return Decision::Process;
    }
    if child_len < target_len && spec.components[..child_len] == *child_rel {
        return Decision::TraverseOnly;
    }
    if spec.subtree && child_len > target_len && spec.components[..] == child_rel[..target_len] {
        return Decision::Process;
    }
    Decision::Skip
}

/// Sets `GITP_PARENT_REPO` for the duration of hook execution, per `spec.md`
/// §6: `1` for the top-level repo's own hooks, `0` for children's.
fn run_hooks(dir: &Path, commands: &[String], is_top: bool) -> anyhow::Result<()> {
    let shell = ShellConfig::get();
    for cmd in commands {
        debug!("running hook in {} via {}: {cmd}", dir.display(), shell.name);
        let status = shell
            .command(cmd)
            .current_dir(dir)
            .env("GITP_PARENT_REPO", if is_top { "1" } else { "0" })
            .status()?;
        if !status.success() {
            return Err(GitpError::vcs(format!("hook `{cmd}` failed in {}", dir.display())).into());
        }
    }
    Ok(())
}

/// Entry point for `gitp sync [target] [-f]`. Walks the already-materialized
/// tree rooted at `root`, aligning every node to its manifest declaration.
pub fn sync(root: &Path, opts: &SyncOptions) -> anyhow::Result<()> {
    sync_from(None, root, opts)
}

/// Entry point for `gitp pull [src] [--target] [--local] [--force]`. `src`,
/// when given, overrides the declared URL as a clone/fetch mirror source for
/// nodes that need (re)materializing.
pub fn pull(src: Option<&Path>, root: &Path, opts: &SyncOptions) -> anyhow::Result<()> {
    sync_from(src, root, opts)
}

fn sync_from(src: Option<&Path>, root: &Path, opts: &SyncOptions) -> anyhow::Result<()> {
    let overlay_targets = collect_overlay_targets(root)?;
    let spec = opts.target.as_deref().map(TargetSpec::parse);
    walk(src, root, &[], opts, spec.as_ref(), &overlay_targets, true)?;
    apply_overlays(root, opts.force)?;
    Ok(())
}

/// Collects every overlay target declared in `top`'s own manifest. Overlay
/// entries declared in a nested manifest are not recognized as overlays at
/// all — only the top-level manifest's `type: overlay` entries count, no
/// matter how deep the target path they point at.
fn collect_overlay_targets(top: &Path) -> anyhow::Result<HashSet<PathBuf>> {
    let mut out = HashSet::new();
    let manifest_path = top.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(out);
    }
    let manifest = Manifest::load(&manifest_path)?;
    for (child, entry) in &manifest.repos {
        if entry.is_overlay() {
            out.insert(top.join(child));
        }
    }
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn walk(
    src: Option<&Path>,
    dir: &Path,
    rel: &[String],
    opts: &SyncOptions,
    target: Option<&TargetSpec>,
    overlay_targets: &HashSet<PathBuf>,
    is_top: bool,
) -> anyhow::Result<()> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(());
    }
    let manifest = Manifest::load(&manifest_path)?;

    for (child, entry) in &manifest.repos {
        let child_abs = dir.join(child);
        let mut child_rel = rel.to_vec();
        child_rel.push(child.clone());

        if overlay_targets.contains(&child_abs) && !opts.local {
            debug!("skipping overlay target {}", child_abs.display());
            continue;
        }

        let (process, next_target) = match target {
            None => (true, None),
            Some(spec) => match decide(&child_rel, spec) {
                Decision::Process => (true, None),
                Decision::TraverseOnly => (false, target),
                Decision::Skip => continue,
            },
        };

        let child_src = src.map(|s| s.join(child));

        if process {
            sync_node(child_src.as_deref(), dir, child, entry, opts)?;
        } else if !is_real_dir(&child_abs) {
            continue;
        }

        if !entry.is_linked() && is_real_dir(&child_abs) {
            walk(
                child_src.as_deref(),
                &child_abs,
                &child_rel,
                opts,
                next_target,
                overlay_targets,
                false,
            )?;
        }
    }
    let _ = is_top;
    Ok(())
}

/// Materializes or realigns a single declared child.
fn sync_node(
    src: Option<&Path>,
    parent_dir: &Path,
    child_name: &str,
    entry: &RepoEntry,
    opts: &SyncOptions,
) -> anyhow::Result<()> {
    let dst = parent_dir.join(child_name);

    if entry.is_linked() {
        let link = resolve_repo_link(parent_dir, entry, !opts.force)?;
        let Some(link) = link else { return Ok(()) };
        if opts.local {
            copy_link_target(&link, &dst, opts.force)?;
        } else {
            replace_with_symlink(&dst, &link, opts.force)?;
        }
        return Ok(());
    }

    let url = entry.url.as_str();

    if is_real_dir(&dst) || is_symlink(&dst) {
        safety_check(&dst, opts.force)?;
        let repo = Repo::at(&dst);
        if repo.is_git_repo() {
            let remote = if let Some(src) = src { src.to_string_lossy().into_owned() } else { "origin".to_string() };
            if src.is_some() {
                repo.run(&["fetch", &remote])?;
            } else {
                repo.fetch("origin")?;
            }
            align_ref(&repo, entry)?;
            run_post_hook(&dst, "post_pull")?;
            return Ok(());
        }
    }

    info!("cloning {child_name} from {url}");
    let mirror = src.filter(|p| p.exists());
    let clone_src = mirror.map(|p| p.to_string_lossy().into_owned()).unwrap_or_else(|| url.to_string());
    let repo = vcs::clone(&clone_src, &dst, entry.branch_or_default(), entry.commit.as_deref())?;

    if let Some(mirror) = mirror {
        rewrite_remotes_from_mirror(&repo, &Repo::at(mirror))?;
    }
    align_ref(&repo, entry)?;
    run_post_hook(&dst, "post_clone")?;
    Ok(())
}

fn align_ref(repo: &Repo, entry: &RepoEntry) -> anyhow::Result<()> {
    if let Some(commit) = &entry.commit {
        repo.reset_hard(commit)?;
    } else {
        repo.checkout(entry.branch_or_default())?;
    }
    Ok(())
}

fn run_post_hook(dst: &Path, which: &str) -> anyhow::Result<()> {
    let manifest_path = dst.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(());
    }
    let manifest = Manifest::load(&manifest_path)?;
    let commands = if which == "post_clone" { &manifest.post_clone } else { &manifest.post_pull };
    run_hooks(dst, commands, false)
}

fn safety_check(dst: &Path, force: bool) -> anyhow::Result<()> {
    if force {
        return Ok(());
    }
    let repo = Repo::at(dst);
    if !repo.is_git_repo() {
        return Ok(());
    }
    if repo.has_uncommitted_changes()? || repo.has_untracked_files()? {
        return Err(GitpError::precondition(format!(
            "{} has local changes (use --force to clobber)",
            dst.display()
        ))
        .into());
    }
    if repo.has_stashes()? {
        return Err(GitpError::precondition(format!(
            "{} has stashed changes (use --force to clobber)",
            dst.display()
        ))
        .into());
    }
    Ok(())
}

/// Clones from a local mirror, then rewrites each remote's URL to the value
/// observed in `mirror_repo` and fetches once, so the result's remotes point
/// at the original location rather than the mirror.
fn rewrite_remotes_from_mirror(repo: &Repo, mirror_repo: &Repo) -> anyhow::Result<()> {
    let remotes = mirror_repo.run(&["remote"])?;
    for remote in remotes.lines().map(str::trim).filter(|s| !s.is_empty()) {
        let url = mirror_repo.remote_url(remote)?;
        if repo.run(&["remote"])?.lines().any(|r| r.trim() == remote) {
            repo.set_remote_url(remote, &url)?;
        } else {
            repo.run(&["remote", "add", remote, &url])?;
        }
    }
    repo.fetch("origin")?;
    Ok(())
}

fn replace_with_symlink(dst: &Path, link_target: &Path, force: bool) -> anyhow::Result<()> {
    if is_real_dir(dst) {
        safety_check(dst, force)?;
        std::fs::remove_dir_all(dst)?;
    } else if is_symlink(dst) {
        std::fs::remove_file(dst)?;
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(link_target, dst)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_dir(link_target, dst)?;
    Ok(())
}

fn copy_link_target(link_target: &Path, dst: &Path, force: bool) -> anyhow::Result<()> {
    if (is_real_dir(dst) || is_symlink(dst)) && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", dst.display());
    }
    if is_symlink(dst) {
        std::fs::remove_file(dst)?;
    } else if dst.exists() {
        std::fs::remove_dir_all(dst)?;
    }
    copy_dir_recursive(link_target, dst)
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dst_path = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_path)?;
        } else {
            std::fs::copy(entry.path(), dst_path)?;
        }
    }
    Ok(())
}

/// Overlay Applier: resolves every overlay's link target declared in `top`'s
/// own manifest, checks for conflicting local/stashed changes, and replaces
/// the target with a symlink. Overlay entries declared in a nested manifest
/// are ignored entirely, no matter how deep their target path points.
pub fn apply_overlays(top: &Path, force: bool) -> anyhow::Result<()> {
    let manifest_path = top.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(());
    }
    let manifest = Manifest::load(&manifest_path)?;
    for (child, entry) in &manifest.repos {
        if !entry.is_overlay() || entry.link.is_none() {
            continue;
        }
        let target_abs = top.join(child);
        let link = match resolve_repo_link(top, entry, !force) {
            Ok(Some(l)) => l,
            Ok(None) => continue,
            Err(e) if force => {
                warn!("skipping overlay {child}: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };
        let link = if entry.link.as_ref().map(|l| l.is_absolute()).unwrap_or(false) {
            link
        } else {
            pathdiff::diff_paths(&link, target_abs.parent().unwrap_or(top))
                .unwrap_or(link)
        };

        if is_real_dir(&target_abs) {
            let changes = check_for_changes(&target_abs, ChangeOptions::default())?;
            if !changes.is_empty() && !force {
                anyhow::bail!(
                    "failed to apply overlay on top of {} due to local changes (use --force)",
                    target_abs.display()
                );
            }
            let repo = Repo::at(&target_abs);
            if repo.is_git_repo() && repo.has_stashes()? && !force {
                anyhow::bail!(
                    "failed to apply overlay on top of {} due to stashed changes (use --force)",
                    target_abs.display()
                );
            }
            std::fs::remove_dir_all(&target_abs)?;
        } else if is_symlink(&target_abs) {
            std::fs::remove_file(&target_abs)?;
        }
        if let Some(parent) = target_abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&link, &target_abs)?;
        #[cfg(windows)]
        std::os::windows::fs::symlink_dir(&link, &target_abs)?;
    }
    Ok(())
}

/// Top-level clone: `git clone` of the top repo, then a top-level pull with
/// `src` set to the mirror when the clone's own origin was itself a local
/// directory. Grounded on `clone()` in `gitp.py`.
pub fn clone_top(url: &str, dst: &Path) -> anyhow::Result<()> {
    if dst.exists() {
        anyhow::bail!("{} already exists", dst.display());
    }
    let status = std::process::Command::new("git")
        .args(["clone", url])
        .arg(dst)
        .status()?;
    if !status.success() {
        return Err(GitpError::vcs(format!("git clone {url} exited with {status}")).into());
    }
    let repo = Repo::at(dst);
    let origin = repo.remote_url("origin").unwrap_or_default();
    let mirror_src = if Path::new(&origin).is_dir() { Some(PathBuf::from(&origin)) } else { None };
    pull(mirror_src.as_deref(), dst, &SyncOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_spec_exact_vs_subtree() {
        let exact = TargetSpec::parse("sub");
        assert!(!exact.subtree);
        let subtree = TargetSpec::parse("sub/");
        assert!(subtree.subtree);
        assert_eq!(subtree.components, vec!["sub".to_string()]);
    }

    #[test]
    fn decide_matches_exact_only() {
        let spec = TargetSpec::parse("sub");
        assert!(matches!(decide(&["sub".to_string()], &spec), Decision::Process));
        assert!(matches!(
            decide(&["sub".to_string(), "nested".to_string()], &spec),
            Decision::Skip
        ));
    }

    #[test]
    fn decide_subtree_includes_descendants() {
        let spec = TargetSpec::parse("sub/");
        assert!(matches!(
            decide(&["sub".to_string(), "nested".to_string()], &spec),
            Decision::Process
        ));
    }

    #[test]
    fn decide_traverses_ancestors_of_nested_target() {
        let spec = TargetSpec::parse("a/b");
        assert!(matches!(decide(&["a".to_string()], &spec), Decision::TraverseOnly));
    }
}

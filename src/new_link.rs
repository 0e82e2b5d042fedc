//! `new`, `link`, `unlink`, and `checkout` — the remaining manifest-aware
//! verbs from `spec.md` §4.5/§4.8. Grounded on `new()`/`checkout()` in the
//! original `gitp.py`.

use std::path::{Path, PathBuf};

use crate::error::GitpError;
use crate::fs_helpers::gitignore_add;
use crate::manifest::{Manifest, RepoEntry, RepoKind, MANIFEST_FILE};
use crate::sync::{self, SyncOptions};
use crate::vcs::Repo;
use crate::verbs;

pub enum Ref {
    Branch(String),
    Commit(String),
}

pub struct NewOptions {
    pub from_url: Option<String>,
    pub ref_: Option<Ref>,
    pub link: Option<PathBuf>,
    pub link_newest: bool,
    pub link_filter: Option<String>,
    pub force: bool,
}

/// `new <dst> --from URL (--branch|--commit|--link ...) [-f]`.
///
/// Validates the target, creates the parent manifest if absent, rejects a
/// nested-hierarchy conflict (the candidate would reparent an existing
/// descendant), appends the entry, registers it in `.gitignore`, then syncs
/// just that child. On any failure after the entry is appended, it is rolled
/// back via `rm`.
pub fn new(top: &Path, dst: &str, opts: NewOptions) -> anyhow::Result<()> {
    anyhow::ensure!(
        !dst.split('/').any(|seg| seg == ".."),
        "path segments may not contain '..'"
    );

    let manifest_path = top.join(MANIFEST_FILE);
    let mut manifest = if manifest_path.is_file() {
        Manifest::load(&manifest_path)?
    } else {
        Manifest::empty(manifest_path.clone())
    };

    if manifest.repos.contains_key(dst) {
        return Err(GitpError::usage(format!("'{dst}' is already a manifest entry")).into());
    }

    reject_nested_conflict(top, dst)?;

    let entry = RepoEntry {
        kind: RepoKind::Repo,
        url: opts.from_url.clone().unwrap_or_default(),
        branch: match &opts.ref_ {
            Some(Ref::Branch(b)) => Some(b.clone()),
            _ => None,
        },
        commit: match &opts.ref_ {
            Some(Ref::Commit(c)) => Some(c.clone()),
            _ => None,
        },
        link: opts.link.clone(),
        link_newest: opts.link_newest.then_some(true),
        link_filter: opts.link_filter.clone(),
    };

    manifest.repos.insert(dst.to_string(), entry);
    manifest.save()?;
    gitignore_add(top, dst)?;

    let sync_opts = SyncOptions { force: opts.force, target: Some(format!("{dst}/")), local: false };
    if let Err(e) = sync::sync(top, &sync_opts) {
        verbs::rm(top, dst, true).ok();
        return Err(e);
    }
    Ok(())
}

/// A candidate path at `dst` would "reparent" an existing descendant if some
/// deeper path under it is already materialized as its own repo outside the
/// new entry's control — i.e. `dst` names a directory that currently exists
/// on disk with its own `.gitp_manifest` tree beneath a removed
/// intermediate. This walks up from `dst` looking for any ancestor manifest
/// that already declares a path through `dst`.
fn reject_nested_conflict(top: &Path, dst: &str) -> anyhow::Result<()> {
    let dst_path = Path::new(dst);
    let mut manifest_dir = top.to_path_buf();
    for component in dst_path.iter() {
        let manifest_path = manifest_dir.join(MANIFEST_FILE);
        if manifest_path.is_file() {
            let manifest = Manifest::load(&manifest_path)?;
            for child in manifest.repos.keys() {
                let child_path = Path::new(child);
                if child_path != Path::new(component) && child_path.starts_with(component) {
                    return Err(GitpError::precondition(format!(
                        "'{dst}' would reparent existing descendant '{child}'"
                    ))
                    .into());
                }
            }
        }
        manifest_dir = manifest_dir.join(component);
    }
    Ok(())
}

/// Splits a (possibly nested) target path into the directory holding its
/// declaring manifest and the entry's key within that manifest, e.g.
/// `"child1/gchild1"` -> (`top/child1`, `"gchild1"`).
fn split_target<'a>(top: &Path, tgt: &'a str) -> (PathBuf, &'a str) {
    match tgt.rsplit_once('/') {
        Some((parent, leaf)) => (top.join(parent), leaf),
        None => (top.to_path_buf(), tgt),
    }
}

/// `link <tgt> <link> [--newest] [--filter REGEX] [--overlay] [-f]`. For a
/// plain link, `tgt` may be a nested path and the declaring manifest is the
/// one belonging to its immediate parent directory; a relative `link_path`
/// is interpreted relative to that directory. Overlay entries are
/// recognized only in the top-level manifest, so `--overlay` always writes
/// its entry there, keyed by `tgt`'s full relative path (slashes included)
/// regardless of nesting depth; a relative `link_path` for an overlay is
/// interpreted relative to `top` itself, not to `tgt`'s parent, matching how
/// the overlay applier resolves it.
pub fn link(
    top: &Path,
    tgt: &str,
    link_path: &Path,
    newest: bool,
    filter: Option<String>,
    overlay: bool,
    force: bool,
) -> anyhow::Result<()> {
    let (manifest_dir, key) =
        if overlay { (top.to_path_buf(), tgt) } else { split_target(top, tgt) };
    let manifest_path = manifest_dir.join(MANIFEST_FILE);
    let mut manifest = if manifest_path.is_file() {
        Manifest::load(&manifest_path)?
    } else {
        Manifest::empty(manifest_path.clone())
    };

    let entry = RepoEntry {
        kind: if overlay { RepoKind::Overlay } else { RepoKind::Repo },
        url: manifest.get(key).map(|e| e.url.clone()).unwrap_or_default(),
        branch: None,
        commit: None,
        link: Some(link_path.to_path_buf()),
        link_newest: newest.then_some(true),
        link_filter: filter,
    };
    manifest.repos.insert(key.to_string(), entry);
    manifest.save()?;
    gitignore_add(&manifest_dir, key)?;

    let sync_opts = SyncOptions { force, target: Some(format!("{tgt}/")), local: false };
    sync::sync(top, &sync_opts)
}

/// `unlink <tgt> [--overlay]`: removes the `link`/overlay markers from an
/// entry, leaving it a plain repo entry (or removing it outright if it was
/// overlay-only with no real url to clone from). Overlay entries only ever
/// live in the top-level manifest, keyed by `tgt`'s full relative path, so
/// `--overlay` looks there regardless of nesting depth.
pub fn unlink(top: &Path, tgt: &str, overlay: bool) -> anyhow::Result<()> {
    let (manifest_dir, key) =
        if overlay { (top.to_path_buf(), tgt) } else { split_target(top, tgt) };
    let manifest_path = manifest_dir.join(MANIFEST_FILE);
    let mut manifest = Manifest::load(&manifest_path)?;
    let entry = manifest
        .repos
        .get_mut(key)
        .ok_or_else(|| GitpError::usage(format!("no manifest entry named '{tgt}'")))?;

    if overlay {
        anyhow::ensure!(entry.is_overlay(), "'{tgt}' is not an overlay entry");
        manifest.repos.shift_remove(key);
        manifest.save()?;
        let target_abs = top.join(tgt);
        if target_abs.symlink_metadata().is_ok() {
            std::fs::remove_file(&target_abs)?;
        }
        return Ok(());
    }

    entry.link = None;
    entry.link_newest = None;
    entry.link_filter = None;
    manifest.save()?;
    Ok(())
}

pub enum CheckoutTarget {
    /// `checkout <ref> [-b|--orphan|--detach]` on the top-level repo itself.
    Ref { reference: String, is_branch: bool },
    /// `checkout <ref> <path>`: pull a child's declaration as of `ref` from
    /// the current manifest's history.
    FromRef { reference: String, path: String },
}

/// `checkout`: see `spec.md` §4.5 for the three recognized modes. File-path
/// arguments that don't name a manifest entry fall through to the plain VCS
/// driver at the call site (not modeled here).
pub fn checkout(top: &Path, target: CheckoutTarget, force: bool) -> anyhow::Result<()> {
    match target {
        CheckoutTarget::Ref { reference, is_branch } => {
            if !force {
                let changes = crate::reconcile::check_for_changes(
                    top,
                    crate::reconcile::ChangeOptions::default(),
                )?;
                if !changes.is_empty() {
                    return Err(GitpError::precondition(
                        "uncommitted changes present; pass --force to discard",
                    )
                    .into());
                }
            }
            let repo = Repo::at(top);
            repo.checkout(&reference)?;

            if let Some(parent) = top.parent() {
                let parent_manifest_path = parent.join(MANIFEST_FILE);
                if parent_manifest_path.is_file() {
                    let child_name =
                        top.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
                    let mut parent_manifest = Manifest::load(&parent_manifest_path)?;
                    if let Some(entry) = parent_manifest.repos.get_mut(&child_name) {
                        if is_branch {
                            entry.branch = Some(reference.clone());
                            entry.commit = None;
                        } else {
                            entry.commit = Some(reference.clone());
                        }
                        parent_manifest.save()?;
                    }
                }
            }
            sync::sync(top, &SyncOptions::default())
        }
        CheckoutTarget::FromRef { reference, path } => {
            let repo = Repo::at(top);
            let historical_yaml = repo.show_file(&reference, ".gitp_manifest")?;
            let historical = Manifest::parse(&historical_yaml, top.join(MANIFEST_FILE))?;
            let reference_entry = historical
                .get(&path)
                .ok_or_else(|| GitpError::usage(format!("'{path}' not found in {reference}")))?
                .clone();

            let manifest_path = top.join(MANIFEST_FILE);
            let mut manifest = Manifest::load(&manifest_path)?;
            let changed = manifest
                .get(&path)
                .map(|current| current.differs_from(&reference_entry))
                .unwrap_or(true);
            manifest.repos.insert(path.clone(), reference_entry);
            manifest.save()?;

            if changed {
                sync::sync(top, &SyncOptions { force, target: Some(path), local: false })?;
            }
            Ok(())
        }
    }
}

//! Stash Stack (C7): a cross-repo super-stash layered atop per-repo VCS
//! stashes. Grounded on `stash()` in the original `gitp.py`, with the
//! post-drop rewrite bug described there (and in `spec.md` §9) fixed rather
//! than replicated: this collects surviving *lines*, not the whole file's
//! line list, before rewriting.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::GitpError;
use crate::fs_helpers::{gitignore_add, is_real_dir};
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::vcs::Repo;

pub const STASH_FILE: &str = ".gitp_stashes";

#[derive(Debug, Clone, PartialEq)]
pub struct StashEntry {
    pub pos: usize,
    pub branch: String,
    pub id: String,
    pub message: String,
}

impl StashEntry {
    fn format(&self) -> String {
        format!("stash@{{{}}}: On {}: __gitp{} {}", self.pos, self.branch, self.id, self.message)
    }

    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let rest = line.strip_prefix("stash@{")?;
        let (pos_str, rest) = rest.split_once('}')?;
        let pos: usize = pos_str.parse().ok()?;
        let rest = rest.strip_prefix(": On ")?;
        let (branch, rest) = rest.split_once(": __gitp")?;
        let (id, message) = rest.split_once(' ').unwrap_or((rest, ""));
        Some(StashEntry { pos, branch: branch.to_string(), id: id.to_string(), message: message.to_string() })
    }
}

fn stash_file_path(top: &Path) -> PathBuf {
    top.join(STASH_FILE)
}

pub fn read_stashes(top: &Path) -> anyhow::Result<Vec<StashEntry>> {
    let path = stash_file_path(top);
    let content = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).map_err(Into::into),
    };
    let mut entries: Vec<StashEntry> = content.lines().filter_map(StashEntry::parse).collect();
    entries.sort_by_key(|e| e.pos);

    let mut seen = std::collections::HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.id.clone()) {
            return Err(GitpError::parse(format!("duplicate stash id {} in {STASH_FILE}", entry.id)).into());
        }
    }
    Ok(entries)
}

/// Rewrites the stash file from `entries`, renumbering positions so index 0
/// is first in the given order (the top of the stack). This is the fixed
/// counterpart of the original's buggy post-drop rewrite.
fn write_stashes(top: &Path, entries: &[StashEntry]) -> anyhow::Result<()> {
    let path = stash_file_path(top);
    if entries.is_empty() {
        if path.exists() {
            fs::remove_file(&path)?;
        }
        return Ok(());
    }
    let lines: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| StashEntry { pos: i, ..e.clone() }.format())
        .collect();
    fs::write(&path, lines.join("\n") + "\n")?;
    Ok(())
}

struct FileLock {
    _file: File,
}

impl FileLock {
    fn acquire(top: &Path) -> anyhow::Result<Self> {
        let lock_path = top.join(".git").join("gitp_stash.lock");
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&lock_path)?;
        file.lock_exclusive()?;
        Ok(FileLock { _file: file })
    }
}

fn new_id() -> anyhow::Result<String> {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH)?;
    Ok(format!("{}", now.as_nanos()))
}

fn walk_repos(root: &Path, mut visit: impl FnMut(&Path) -> anyhow::Result<()>) -> anyhow::Result<()> {
    fn recurse(dir: &Path, visit: &mut dyn FnMut(&Path) -> anyhow::Result<()>) -> anyhow::Result<()> {
        visit(dir)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Ok(());
        }
        let manifest = Manifest::load(&manifest_path)?;
        for (child, entry) in &manifest.repos {
            let child_abs = dir.join(child);
            if !entry.is_linked() && is_real_dir(&child_abs) {
                recurse(&child_abs, visit)?;
            }
        }
        Ok(())
    }
    recurse(root, &mut visit)
}

/// `stash push`: allocates a fresh id, stashes every dirty repo in the tree
/// under a message embedding it, and records one new super-stash entry at
/// the top of the stack. If nothing was stashed anywhere, no entry is
/// recorded and the caller is told it was a no-op.
pub fn push(top: &Path, message: &str) -> anyhow::Result<bool> {
    let _lock = FileLock::acquire(top)?;
    let id = new_id()?;
    let branch = Repo::at(top).current_branch().unwrap_or_else(|_| "HEAD".to_string());
    let stash_message = format!("__gitp{id} {message}");

    let mut stashed_any = false;
    walk_repos(top, |dir| {
        let repo = Repo::at(dir);
        if !repo.is_git_repo() {
            return Ok(());
        }
        if repo.has_uncommitted_changes()? || repo.has_untracked_files()? {
            repo.run(&["stash", "push", "-u", "-m", &stash_message])?;
            stashed_any = true;
        }
        Ok(())
    })?;

    if !stashed_any {
        return Ok(false);
    }

    let mut entries = read_stashes(top)?;
    entries.insert(0, StashEntry { pos: 0, branch, id, message: message.to_string() });
    gitignore_add(top, STASH_FILE)?;
    write_stashes(top, &entries)?;
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashOp {
    Pop,
    Apply,
    Drop,
    Clear,
}

/// Resolves a user-given stash reference (`stash@{N}`, a literal message, or
/// `None` for the top of the stack) to a concrete entry.
pub fn resolve(top: &Path, reference: Option<&str>) -> anyhow::Result<StashEntry> {
    let entries = read_stashes(top)?;
    match reference {
        None => entries.into_iter().next().ok_or_else(|| GitpError::usage("no stash entries").into()),
        Some(r) => {
            if let Some(inner) = r.strip_prefix("stash@{").and_then(|s| s.strip_suffix('}')) {
                let pos: usize = inner.parse().map_err(|_| GitpError::usage(format!("bad stash ref {r}")))?;
                return entries
                    .into_iter()
                    .find(|e| e.pos == pos)
                    .ok_or_else(|| GitpError::usage(format!("no such stash {r}")).into());
            }
            entries
                .into_iter()
                .find(|e| e.message == r)
                .ok_or_else(|| GitpError::usage(format!("no stash entry matching '{r}'")).into())
        }
    }
}

/// `pop`/`apply`/`drop`/`clear`: locate the per-repo stashes embedding
/// `entry.id` in every node of the tree and apply the underlying operation.
pub fn apply_op(top: &Path, entry: &StashEntry, op: StashOp) -> anyhow::Result<()> {
    let _lock = FileLock::acquire(top)?;
    let needle = format!("__gitp{}", entry.id);

    walk_repos(top, |dir| {
        let repo = Repo::at(dir);
        if !repo.is_git_repo() {
            return Ok(());
        }
        let list = repo.run(&["stash", "list"])?;
        for (idx, line) in list.lines().enumerate() {
            if line.contains(&needle) {
                let stash_ref = format!("stash@{{{idx}}}");
                match op {
                    StashOp::Pop => repo.run(&["stash", "pop", &stash_ref])?,
                    StashOp::Apply => repo.run(&["stash", "apply", &stash_ref])?,
                    StashOp::Drop | StashOp::Clear => repo.run(&["stash", "drop", &stash_ref])?,
                };
                break;
            }
        }
        Ok(())
    })?;

    if op == StashOp::Pop || op == StashOp::Drop || op == StashOp::Clear {
        let remaining: Vec<StashEntry> = read_stashes(top)?
            .into_iter()
            .filter(|e| e.id != entry.id)
            .collect();
        write_stashes(top, &remaining)?;
    }
    Ok(())
}

/// `stash clear`: drop every matching entry in every repo.
pub fn clear(top: &Path) -> anyhow::Result<()> {
    let entries = read_stashes(top)?;
    for entry in entries {
        apply_op(top, &entry, StashOp::Clear)?;
    }
    Ok(())
}

/// `stash branch NAME [ref]`: create `name` per repo from its current ref
/// and apply the matching stash there, restoring the previous ref on
/// failure in any one repo.
pub fn branch(top: &Path, name: &str, entry: &StashEntry) -> anyhow::Result<()> {
    let _lock = FileLock::acquire(top)?;
    let needle = format!("__gitp{}", entry.id);
    walk_repos(top, |dir| {
        let repo = Repo::at(dir);
        if !repo.is_git_repo() {
            return Ok(());
        }
        let list = repo.run(&["stash", "list"])?;
        let Some(idx) = list.lines().position(|l| l.contains(&needle)) else { return Ok(()) };
        let previous = repo.current_branch()?;
        let stash_ref = format!("stash@{{{idx}}}");
        if let Err(e) = repo.run(&["stash", "branch", name, &stash_ref]) {
            repo.checkout(&previous).ok();
            return Err(e);
        }
        Ok(())
    })?;
    let remaining: Vec<StashEntry> = read_stashes(top)?.into_iter().filter(|e| e.id != entry.id).collect();
    write_stashes(top, &remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_formats_round_trip() {
        let entry = StashEntry { pos: 0, branch: "main".into(), id: "1700000000".into(), message: "wip".into() };
        let line = entry.format();
        let parsed = StashEntry::parse(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn renumbers_after_removal() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            StashEntry { pos: 0, branch: "main".into(), id: "a".into(), message: "first".into() },
            StashEntry { pos: 1, branch: "main".into(), id: "b".into(), message: "second".into() },
        ];
        write_stashes(dir.path(), &entries).unwrap();
        let remaining: Vec<StashEntry> =
            read_stashes(dir.path()).unwrap().into_iter().filter(|e| e.id != "a").collect();
        write_stashes(dir.path(), &remaining).unwrap();
        let after = read_stashes(dir.path()).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].pos, 0);
        assert_eq!(after[0].id, "b");
    }

    #[test]
    fn duplicate_ids_are_a_corruption_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            stash_file_path(dir.path()),
            "stash@{0}: On main: __gitp1 a\nstash@{1}: On main: __gitp1 b\n",
        )
        .unwrap();
        assert!(read_stashes(dir.path()).is_err());
    }
}

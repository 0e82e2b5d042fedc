//! Small filesystem primitives shared by the reconciler, sync engine, and
//! manifest-aware verbs. Grounded on `is_real_dir`/`get_latest_subdir`/
//! `resolve_repo_link`/`gitignore_add`/`gitignore_rm` in the original
//! `gitp.py`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use regex::Regex;

use crate::manifest::RepoEntry;

/// `true` when `path` is a directory and not a symlink to one.
pub fn is_real_dir(path: &Path) -> bool {
    match fs::symlink_metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(_) => false,
    }
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).map(|m| m.is_symlink()).unwrap_or(false)
}

/// Finds the most-recently-modified real subdirectory of `root`, optionally
/// restricted to names matching `filter`.
pub fn newest_subdir(root: &Path, filter: Option<&str>) -> anyhow::Result<Option<PathBuf>> {
    let regex = filter.map(Regex::new).transpose().context("invalid link_filter regex")?;
    if !root.is_dir() {
        anyhow::bail!("directory '{}' does not exist", root.display());
    }

    let mut candidates: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("reading {}", root.display()))? {
        let entry = entry?;
        let path = entry.path();
        if !is_real_dir(&path) {
            continue;
        }
        if let Some(re) = &regex {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if !re.is_match(name) {
                continue;
            }
        }
        let mtime = entry.metadata()?.modified()?;
        candidates.push((path, mtime));
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(candidates.into_iter().next().map(|(p, _)| p))
}

/// Resolves a [`RepoEntry`]'s `link` (and, if `link_newest` is set, the
/// newest matching subdirectory beneath it) to an absolute path.
///
/// `root` is the directory the manifest declaring `entry` lives in; `link`
/// paths are relative to it unless already absolute. When `fail` is `false`,
/// an unresolved `link_newest` search returns `Ok(None)` instead of erroring.
pub fn resolve_repo_link(
    root: &Path,
    entry: &RepoEntry,
    fail: bool,
) -> anyhow::Result<Option<PathBuf>> {
    let link = entry
        .link
        .as_ref()
        .context("resolve_repo_link called on an entry with no link")?;
    let mut qualified = if link.is_absolute() { link.clone() } else { root.join(link) };

    if entry.link_newest.unwrap_or(false) {
        if !qualified.is_dir() {
            if fail {
                anyhow::bail!("link search directory '{}' does not exist", qualified.display());
            }
            return Ok(None);
        }
        match newest_subdir(&qualified, entry.link_filter.as_deref())? {
            Some(found) => qualified = found,
            None => {
                if fail {
                    anyhow::bail!(
                        "could not find any valid subdirectory within {} to link to",
                        link.display()
                    );
                }
                return Ok(None);
            }
        }
    }
    Ok(Some(qualified))
}

/// Appends `token` as its own line to `root/.gitignore`, creating the file
/// if needed. No-op if `token` is already present.
pub fn gitignore_add(root: &Path, token: &str) -> anyhow::Result<()> {
    let path = root.join(".gitignore");
    let existing = fs::read_to_string(&path).unwrap_or_default();
    if existing.lines().any(|l| l.trim() == token) {
        return Ok(());
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(token);
    content.push('\n');
    fs::write(&path, content).with_context(|| format!("writing {}", path.display()))
}

/// Removes the line matching `token` from `root/.gitignore`, if present.
pub fn gitignore_rm(root: &Path, token: &str) -> anyhow::Result<()> {
    let path = root.join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
    };
    let new_content: String = existing
        .lines()
        .filter(|l| l.trim() != token)
        .map(|l| format!("{l}\n"))
        .collect();
    fs::write(&path, new_content).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn is_real_dir_rejects_symlinks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("real");
        fs::create_dir(&target).unwrap();
        let link = dir.path().join("link");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, &link).unwrap();
        assert!(is_real_dir(&target));
        #[cfg(unix)]
        assert!(!is_real_dir(&link));
    }

    #[test]
    fn newest_subdir_picks_most_recent() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir(&a).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::create_dir(&b).unwrap();
        let found = newest_subdir(dir.path(), None).unwrap().unwrap();
        assert_eq!(found, b);
    }

    #[test]
    fn newest_subdir_respects_filter() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("release-1")).unwrap();
        fs::create_dir(dir.path().join("scratch")).unwrap();
        let found = newest_subdir(dir.path(), Some("^release-")).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "release-1");
    }

    #[test]
    fn gitignore_add_is_idempotent() {
        let dir = tempdir().unwrap();
        gitignore_add(dir.path(), "sub/").unwrap();
        gitignore_add(dir.path(), "sub/").unwrap();
        let content = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content.matches("sub/").count(), 1);
    }

    #[test]
    fn gitignore_rm_removes_matching_line() {
        let dir = tempdir().unwrap();
        gitignore_add(dir.path(), "sub/").unwrap();
        gitignore_add(dir.path(), "other/").unwrap();
        gitignore_rm(dir.path(), "sub/").unwrap();
        let content = fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(!content.contains("sub/"));
        assert!(content.contains("other/"));
    }
}

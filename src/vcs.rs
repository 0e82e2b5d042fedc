//! VCS Driver (C1): the only module that shells out to `git`.
//!
//! Grounded on `worktrunk::git::repository::Repository::run_command` (a
//! captured invocation that bails with combined stderr+stdout on failure)
//! and on the `_git()` helper in the original `gitp.py`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context as _;
use log::debug;

use crate::error::GitpError;

/// A `git` invocation rooted at a particular working directory.
#[derive(Debug, Clone)]
pub struct Repo {
    pub root: PathBuf,
}

impl Repo {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Repo { root: root.into() }
    }

    /// Runs `git <args>` in this repo's root, returning captured stdout.
    /// Fails (as a [`GitpError::Vcs`]) with the combined stderr+stdout on a
    /// non-zero exit, mirroring `run_command`'s error-message shape.
    pub fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        debug!("git {} (in {})", args.join(" "), self.root.display());
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("failed to spawn: git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let msg = [stderr.trim(), stdout.trim()]
                .into_iter()
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(GitpError::vcs(format!("git {}: {msg}", args.join(" "))).into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Like [`Repo::run`] but only cares whether the command succeeded.
    pub fn check(&self, args: &[&str]) -> anyhow::Result<bool> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("failed to spawn: git {}", args.join(" ")))?;
        Ok(status.success())
    }

    /// Runs `git <args>` with stdio inherited from the parent process, for
    /// commands the user should see/interact with directly (e.g. `push`,
    /// `commit` when it opens an editor).
    pub fn run_interactive(&self, args: &[&str]) -> anyhow::Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .status()
            .with_context(|| format!("failed to spawn: git {}", args.join(" ")))?;
        if !status.success() {
            return Err(GitpError::vcs(format!(
                "git {} exited with {status}",
                args.join(" ")
            ))
            .into());
        }
        Ok(())
    }

    pub fn current_branch(&self) -> anyhow::Result<String> {
        Ok(self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?.trim().to_string())
    }

    pub fn head_commit(&self) -> anyhow::Result<String> {
        Ok(self.run(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn is_git_repo(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// `true` if the working tree has uncommitted changes (tracked, unstaged
    /// or staged). Mirrors `git status --porcelain` being non-empty.
    pub fn has_uncommitted_changes(&self) -> anyhow::Result<bool> {
        let status = self.run(&["status", "--porcelain", "--untracked-files=no"])?;
        Ok(!status.trim().is_empty())
    }

    /// `true` if there are untracked files (ignored files excluded).
    pub fn has_untracked_files(&self) -> anyhow::Result<bool> {
        let status = self.run(&["status", "--porcelain", "--untracked-files=normal"])?;
        Ok(status.lines().any(|l| l.starts_with("??")))
    }

    pub fn has_stashes(&self) -> anyhow::Result<bool> {
        Ok(!self.run(&["stash", "list"])?.trim().is_empty())
    }

    pub fn remote_url(&self, remote: &str) -> anyhow::Result<String> {
        Ok(self.run(&["remote", "get-url", remote])?.trim().to_string())
    }

    pub fn set_remote_url(&self, remote: &str, url: &str) -> anyhow::Result<()> {
        self.run(&["remote", "set-url", remote, url])?;
        Ok(())
    }

    pub fn fetch(&self, remote: &str) -> anyhow::Result<()> {
        self.run(&["fetch", remote])?;
        Ok(())
    }

    pub fn checkout(&self, target: &str) -> anyhow::Result<()> {
        self.run(&["checkout", target])?;
        Ok(())
    }

    pub fn reset_hard(&self, target: &str) -> anyhow::Result<()> {
        self.run(&["reset", "--hard", target])?;
        Ok(())
    }

    pub fn pull_ff_only(&self) -> anyhow::Result<()> {
        self.run(&["pull", "--ff-only"])?;
        Ok(())
    }

    pub fn show_file(&self, rev: &str, path: &str) -> anyhow::Result<String> {
        self.run(&["show", &format!("{rev}:{path}")])
    }
}

/// Clones `url` to `dest`, checking out `branch` (or `commit` if given).
/// Grounded on the `clone` sequence in `gitp.py`: plain `git clone`, then a
/// `checkout`/`reset --hard` to pin the exact ref.
pub fn clone(url: &str, dest: &Path, branch: &str, commit: Option<&str>) -> anyhow::Result<Repo> {
    let parent = dest.parent().context("clone destination has no parent directory")?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating {}", parent.display()))?;
    let status = Command::new("git")
        .args(["clone", "--branch", branch, url])
        .arg(dest)
        .status()
        .with_context(|| format!("failed to spawn: git clone {url}"))?;
    if !status.success() {
        return Err(GitpError::vcs(format!("git clone {url} exited with {status}")).into());
    }
    let repo = Repo::at(dest);
    if let Some(commit) = commit {
        repo.reset_hard(commit)?;
    }
    Ok(repo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) -> Repo {
        let repo = Repo::at(dir);
        repo.run(&["init"]).unwrap();
        repo.run(&["config", "user.email", "test@example.com"]).unwrap();
        repo.run(&["config", "user.name", "test"]).unwrap();
        repo
    }

    #[test]
    fn run_captures_stdout() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        repo.run(&["add", "a.txt"]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
        let branch = repo.current_branch().unwrap();
        assert!(!branch.is_empty());
    }

    #[test]
    fn run_fails_on_bad_command() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        let res = repo.run(&["this-is-not-a-git-command"]);
        assert!(res.is_err());
    }

    #[test]
    fn detects_uncommitted_changes() {
        let dir = tempdir().unwrap();
        let repo = init_repo(dir.path());
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        repo.run(&["add", "a.txt"]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
        assert!(!repo.has_uncommitted_changes().unwrap());
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        assert!(repo.has_uncommitted_changes().unwrap());
    }
}

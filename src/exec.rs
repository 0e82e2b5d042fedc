//! Recursive Executor (C6): filtered, link-aware command fan-out.
//! Grounded on `exec()` in the original `gitp.py`.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::GitpError;
use crate::fs_helpers::is_real_dir;
use crate::manifest::{Manifest, MANIFEST_FILE};
use crate::reconcile::{check_for_changes, ChangeOptions};
use crate::shell_exec::ShellConfig;
use crate::vcs::Repo;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub targets: Vec<String>,
    pub filters: Vec<String>,
    pub modified_only: bool,
    pub preview: bool,
    pub stop_on_error: bool,
}

#[derive(Debug, Clone)]
pub enum SkipReason {
    Missing,
    Linked,
}

#[derive(Debug, Clone)]
pub struct NodeResult {
    pub path: PathBuf,
    pub skipped: Option<SkipReason>,
    pub output: Option<String>,
    pub failed: bool,
}

/// Discovers every materialized node under `root` matching `opts.targets`/
/// `opts.filters`, recording non-materialized or linked nodes with a skip
/// reason instead of executing there.
fn discover(root: &Path, opts: &ExecOptions) -> anyhow::Result<Vec<(PathBuf, PathBuf)>> {
    let filters: Vec<Regex> = if opts.filters.is_empty() {
        vec![Regex::new(".*").unwrap()]
    } else {
        opts.filters
            .iter()
            .map(|f| Regex::new(f))
            .collect::<Result<_, _>>()
            .map_err(|e| GitpError::usage(format!("invalid filter regex: {e}")))?
    };

    let mut found = Vec::new();
    let mut unresolved_targets: Vec<String> = opts.targets.clone();
    walk(root, Path::new(""), &filters, opts, &mut found, &mut unresolved_targets)?;

    if !unresolved_targets.is_empty() {
        return Err(GitpError::usage(format!(
            "unresolved exec target(s): {}",
            unresolved_targets.join(", ")
        ))
        .into());
    }
    Ok(found)
}

fn walk(
    dir: &Path,
    rel: &Path,
    filters: &[Regex],
    opts: &ExecOptions,
    found: &mut Vec<(PathBuf, PathBuf)>,
    unresolved_targets: &mut Vec<String>,
) -> anyhow::Result<()> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Ok(());
    }
    let manifest = Manifest::load(&manifest_path)?;

    for (child, entry) in &manifest.repos {
        let child_abs = dir.join(child);
        let child_rel = rel.join(child);
        let rel_str = child_rel.to_string_lossy().into_owned();

        let target_match = opts.targets.iter().any(|t| t == &rel_str);
        if target_match {
            unresolved_targets.retain(|t| t != &rel_str);
        }
        let filter_match = filters.iter().any(|re| re.is_match(&rel_str));
        let wants = (opts.targets.is_empty() && filter_match) || target_match;

        if wants {
            found.push((child_abs.clone(), child_rel.clone()));
        }

        if !entry.is_linked() && is_real_dir(&child_abs) {
            walk(&child_abs, &child_rel, filters, opts, found, unresolved_targets)?;
        }
    }
    Ok(())
}

/// Runs `commands` in every node discovered by `opts`, in discovery order.
/// Returns one [`NodeResult`] per discovered node (skipped nodes are not
/// executed against). `preview` runs discovery only.
pub fn exec(root: &Path, commands: &[String], opts: &ExecOptions) -> anyhow::Result<Vec<NodeResult>> {
    let candidates = discover(root, opts)?;
    let mut results = Vec::new();

    for (abs, rel) in candidates {
        let skip = classify_skip(&abs, root)?;
        if let Some(reason) = skip {
            results.push(NodeResult { path: rel, skipped: Some(reason), output: None, failed: false });
            continue;
        }

        if opts.modified_only {
            let changes = check_for_changes(&abs, ChangeOptions::default())?;
            let this_dirty = changes.iter().any(|c| c.path == Path::new(""));
            if !this_dirty {
                continue;
            }
        }

        if opts.preview {
            results.push(NodeResult { path: rel, skipped: None, output: None, failed: false });
            continue;
        }

        let mut failed = false;
        let mut combined_output = String::new();
        for cmd in commands {
            match run_one(&abs, cmd) {
                Ok(out) => combined_output.push_str(&out),
                Err(e) => {
                    failed = true;
                    combined_output.push_str(&format!("{e}\n"));
                    if opts.stop_on_error {
                        results.push(NodeResult {
                            path: rel,
                            skipped: None,
                            output: Some(combined_output),
                            failed,
                        });
                        return Ok(results);
                    }
                    break;
                }
            }
        }
        results.push(NodeResult { path: rel, skipped: None, output: Some(combined_output), failed });
    }
    Ok(results)
}

fn classify_skip(abs: &Path, root: &Path) -> anyhow::Result<Option<SkipReason>> {
    if !is_real_dir(abs) && !abs.is_file() {
        if abs.symlink_metadata().is_ok() {
            return Ok(Some(SkipReason::Linked));
        }
        return Ok(Some(SkipReason::Missing));
    }
    let _ = root;
    Ok(None)
}

/// Dispatches a single command line. `git `-prefixed commands run through
/// the VCS Driver; everything else runs as an external shell command.
fn run_one(dir: &Path, cmd: &str) -> anyhow::Result<String> {
    if let Some(rest) = cmd.strip_prefix("git ") {
        let args: Vec<&str> = rest.split_whitespace().collect();
        return Repo::at(dir).run(&args);
    }
    let mut command = ShellConfig::get().command(cmd);
    command.current_dir(dir);
    let output = crate::shell_exec::run(&mut command, dir.to_str())?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GitpError::vcs(format!("`{cmd}` failed: {stderr}")).into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        fs::create_dir_all(dir).unwrap();
        let repo = Repo::at(dir);
        repo.run(&["init", "-b", "main"]).unwrap();
        repo.run(&["config", "user.email", "t@example.com"]).unwrap();
        repo.run(&["config", "user.name", "t"]).unwrap();
        fs::write(dir.join("f.txt"), "x").unwrap();
        repo.run(&["add", "."]).unwrap();
        repo.run(&["commit", "-m", "init"]).unwrap();
    }

    #[test]
    fn skips_missing_nodes_with_reason() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n",
        )
        .unwrap();
        let results = exec(dir.path(), &["echo hi".into()], &ExecOptions::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].skipped, Some(SkipReason::Missing)));
    }

    #[test]
    fn runs_command_in_materialized_child() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let sub = dir.path().join("sub");
        init_repo(&sub);
        fs::write(
            dir.path().join(".gitp_manifest"),
            "repos:\n  sub:\n    url: https://example.com/sub.git\n",
        )
        .unwrap();
        let results = exec(dir.path(), &["echo hi".into()], &ExecOptions::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].skipped.is_none());
        assert!(results[0].output.as_deref().unwrap().contains("hi"));
    }

    #[test]
    fn unresolved_target_is_an_error() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        fs::write(dir.path().join(".gitp_manifest"), "repos: {}\n").unwrap();
        let opts = ExecOptions { targets: vec!["nope".into()], ..Default::default() };
        let result = exec(dir.path(), &["echo hi".into()], &opts);
        assert!(result.is_err());
    }
}

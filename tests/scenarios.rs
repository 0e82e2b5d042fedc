//! End-to-end scenarios against real `git` subprocesses in a tempdir, the
//! way `worktrunk`'s integration tests drive real repositories instead of
//! mocking the VCS. Grounded on `spec.md` §8's concrete scenarios.

use std::path::{Path, PathBuf};
use std::process::Command;

use gitp::manifest::Manifest;
use gitp::{new_link, reconcile, sync, verbs};

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .expect("spawn git");
    assert!(status.success(), "git {args:?} failed");
}

/// Creates a bare remote at `path` seeded with one commit on `master`
/// (matching `RepoEntry::branch_or_default`).
fn bare_remote(path: &Path, seed_file: &str) -> String {
    std::fs::create_dir_all(path).unwrap();
    git(path, &["init", "--bare", "-b", "master"]);

    let scratch = path.with_extension("scratch");
    std::fs::create_dir_all(&scratch).unwrap();
    git(&scratch, &["init", "-b", "master"]);
    std::fs::write(scratch.join(seed_file), "seed\n").unwrap();
    git(&scratch, &["add", "."]);
    git(&scratch, &["commit", "-m", "seed"]);
    git(&scratch, &["remote", "add", "origin", path.to_str().unwrap()]);
    git(&scratch, &["push", "origin", "master"]);
    std::fs::remove_dir_all(&scratch).unwrap();

    path.to_string_lossy().into_owned()
}

struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    fn new() -> Self {
        Workspace { dir: tempfile::tempdir().unwrap() }
    }
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

#[test]
fn basic_compose_produces_clean_nested_tree() {
    let ws = Workspace::new();
    let top = bare_remote(&ws.path("remotes/top"), "top.txt");
    let child = bare_remote(&ws.path("remotes/child"), "child.txt");
    let gchild = bare_remote(&ws.path("remotes/gchild"), "gchild.txt");

    let l = ws.path("L");
    sync::clone_top(&top, &l).unwrap();

    new_link::new(
        &l,
        "sub",
        new_link::NewOptions {
            from_url: Some(child),
            ref_: None,
            link: None,
            link_newest: false,
            link_filter: None,
            force: false,
        },
    )
    .unwrap();

    let sub = l.join("sub");
    new_link::new(
        &sub,
        "subsub",
        new_link::NewOptions {
            from_url: Some(gchild),
            ref_: None,
            link: None,
            link_newest: false,
            link_filter: None,
            force: false,
        },
    )
    .unwrap();

    let top_manifest = Manifest::load(&l.join(".gitp_manifest")).unwrap();
    assert!(top_manifest.get("sub").is_some());
    let sub_manifest = Manifest::load(&sub.join(".gitp_manifest")).unwrap();
    assert!(sub_manifest.get("subsub").is_some());

    git(&l, &["add", "-A"]);
    git(&l, &["commit", "-m", "hello"]);

    let mismatches = reconcile::check_for_state_match(&l, None, true).unwrap();
    assert!(mismatches.is_empty(), "expected a clean tree, got {mismatches:?}");
}

#[test]
fn new_then_rm_restores_prior_manifest_and_gitignore() {
    let ws = Workspace::new();
    let top = bare_remote(&ws.path("remotes/top"), "top.txt");
    let child = bare_remote(&ws.path("remotes/child"), "child.txt");

    let l = ws.path("L");
    sync::clone_top(&top, &l).unwrap();

    let manifest_before = std::fs::read_to_string(l.join(".gitp_manifest")).unwrap_or_default();
    let gitignore_before = std::fs::read_to_string(l.join(".gitignore")).unwrap_or_default();

    new_link::new(
        &l,
        "sub",
        new_link::NewOptions {
            from_url: Some(child),
            ref_: None,
            link: None,
            link_newest: false,
            link_filter: None,
            force: false,
        },
    )
    .unwrap();
    assert!(l.join("sub").is_dir());

    verbs::rm(&l, "sub", true).unwrap();

    let manifest_after = std::fs::read_to_string(l.join(".gitp_manifest")).unwrap_or_default();
    let gitignore_after = std::fs::read_to_string(l.join(".gitignore")).unwrap_or_default();
    assert_eq!(manifest_before, manifest_after);
    assert_eq!(gitignore_before, gitignore_after);
    assert!(!l.join("sub").exists());
}

#[test]
fn overlay_link_is_idempotent_and_reports_overlayed() {
    let ws = Workspace::new();
    let top = bare_remote(&ws.path("remotes/top"), "top.txt");
    let child1 = bare_remote(&ws.path("remotes/child1"), "c1.txt");
    let gchild1 = bare_remote(&ws.path("remotes/gchild1"), "g1.txt");
    let child2 = bare_remote(&ws.path("remotes/child2"), "c2.txt");
    let gchild2 = bare_remote(&ws.path("remotes/gchild2"), "g2.txt");

    let l = ws.path("L");
    sync::clone_top(&top, &l).unwrap();

    for (dst, url) in [("child1", child1), ("child2", child2)] {
        new_link::new(
            &l,
            dst,
            new_link::NewOptions {
                from_url: Some(url),
                ref_: None,
                link: None,
                link_newest: false,
                link_filter: None,
                force: false,
            },
        )
        .unwrap();
    }
    new_link::new(
        &l.join("child1"),
        "gchild1",
        new_link::NewOptions {
            from_url: Some(gchild1),
            ref_: None,
            link: None,
            link_newest: false,
            link_filter: None,
            force: false,
        },
    )
    .unwrap();
    new_link::new(
        &l.join("child2"),
        "gchild2",
        new_link::NewOptions {
            from_url: Some(gchild2),
            ref_: None,
            link: None,
            link_newest: false,
            link_filter: None,
            force: false,
        },
    )
    .unwrap();

    // The overlay's link field is relative to the top-level root, not to
    // `child1` (tgt's parent) — it resolves to `L/child2/gchild2`.
    new_link::link(&l, "child1/gchild1", Path::new("child2/gchild2"), false, None, true, false)
        .unwrap();

    let link_target = l.join("child1/gchild1");
    assert!(link_target.symlink_metadata().unwrap().file_type().is_symlink());

    // The overlay entry lives in the top-level manifest, keyed by the full
    // relative path, not in child1's own nested manifest.
    let top_manifest = Manifest::load(&l.join(".gitp_manifest")).unwrap();
    let overlay_entry = top_manifest.get("child1/gchild1").expect("overlay entry in top manifest");
    assert!(overlay_entry.is_overlay());
    let child1_manifest = Manifest::load(&l.join("child1/.gitp_manifest")).unwrap();
    assert!(child1_manifest.get("gchild1").is_some_and(|e| !e.is_overlay()));

    let mismatches = reconcile::check_for_state_match(&l, None, true).unwrap();
    let mismatch = mismatches.get(Path::new("child1/gchild1")).expect("overlay status reported");
    assert_eq!(mismatch.state, reconcile::RepoState::Overlayed);

    // Idempotent: syncing again shouldn't error or change the symlink or status.
    sync::sync(&l, &sync::SyncOptions::default()).unwrap();
    assert!(link_target.symlink_metadata().unwrap().file_type().is_symlink());
    let mismatches = reconcile::check_for_state_match(&l, None, true).unwrap();
    assert_eq!(
        mismatches.get(Path::new("child1/gchild1")).unwrap().state,
        reconcile::RepoState::Overlayed
    );
}

//! The manifest data model and the process-wide manifest cache.
//!
//! Grounded on `Manifest`/`Repo` in the original `gitp.py`: a `.gitp_manifest`
//! YAML file mapping child paths to repo declarations, plus two hook command
//! lists. Parsing/serialization follow `worktrunk::config`'s pattern of a
//! plain `serde`-derived struct with an explicit, ordered field set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::Context as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::GitpError;

pub const MANIFEST_FILE: &str = ".gitp_manifest";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Repo,
    Overlay,
}

impl Default for RepoKind {
    fn default() -> Self {
        RepoKind::Repo
    }
}

/// One declared child repository. Exactly one of `branch`/`commit` should be
/// set (invariant 2 in `spec.md` §3); `branch` defaults to `master` when
/// neither is given, matching the original's default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoEntry {
    #[serde(rename = "type", default)]
    pub kind: RepoKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_newest: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_filter: Option<String>,
}

impl RepoEntry {
    pub fn branch_or_default(&self) -> &str {
        self.branch.as_deref().unwrap_or("master")
    }

    pub fn is_linked(&self) -> bool {
        self.link.is_some() || self.link_newest.unwrap_or(false)
    }

    pub fn is_overlay(&self) -> bool {
        self.kind == RepoKind::Overlay
    }

    /// `true` when `other` is the same declaration in every field that
    /// matters to `checkout`'s "did this child's entry actually change"
    /// comparison: url, ref (branch-or-commit), link.
    pub fn differs_from(&self, other: &RepoEntry) -> bool {
        self.url != other.url
            || self.branch != other.branch
            || self.commit != other.commit
            || self.link != other.link
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_server: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_clone: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_pull: Vec<String>,
    #[serde(default)]
    pub repos: IndexMap<String, RepoEntry>,

    /// Not serialized: the file this manifest was loaded from, kept for
    /// diagnostics and for `save()`.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Manifest {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Manifest { path: path.into(), ..Default::default() }
    }

    /// Parses raw YAML, trimming any trailing path separator on child keys
    /// (`"sub/"` and `"sub"` name the same declaration; the trailing slash
    /// is only meaningful to `exec`'s filter matching, never to the map key).
    pub fn parse(yaml: &str, path: PathBuf) -> anyhow::Result<Self> {
        let mut manifest: Manifest = serde_yaml::from_str(yaml)
            .map_err(|e| GitpError::parse(format!("{}: {e}", path.display())))?;
        manifest.path = path;
        let trimmed: IndexMap<String, RepoEntry> = manifest
            .repos
            .into_iter()
            .map(|(k, v)| (k.trim_end_matches('/').to_string(), v))
            .collect();
        manifest.repos = trimmed;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        Self::parse(&raw, path.to_path_buf())
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(&self.path, yaml)
            .with_context(|| format!("writing manifest {}", self.path.display()))?;
        Ok(())
    }

    pub fn get(&self, child: &str) -> Option<&RepoEntry> {
        self.repos.get(child.trim_end_matches('/'))
    }
}

struct CacheEntry {
    manifest: Manifest,
    mtime: SystemTime,
}

/// Process-wide manifest cache, keyed by canonical path, invalidated by
/// mtime. Replaces the original's "read it again every call" pattern with
/// the memoization shape `worktrunk::git::repository::RepoCache` uses.
pub struct Store {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Store {
    pub fn new() -> Self {
        Store { cache: Mutex::new(HashMap::new()) }
    }

    pub fn load(&self, path: &Path) -> anyhow::Result<Manifest> {
        let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mtime = fs::metadata(&canon)
            .with_context(|| format!("stat {}", canon.display()))?
            .modified()?;

        {
            let cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get(&canon) {
                if entry.mtime == mtime {
                    return Ok(entry.manifest.clone());
                }
            }
        }

        let manifest = Manifest::load(path)?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(canon, CacheEntry { manifest: manifest.clone(), mtime });
        Ok(manifest)
    }

    /// Writes `manifest` to disk and refreshes the cache entry so a
    /// subsequent `load` in the same process sees the write without an
    /// extra stat-and-compare round trip.
    pub fn save(&self, manifest: &Manifest) -> anyhow::Result<()> {
        manifest.save()?;
        let canon = manifest
            .path
            .canonicalize()
            .unwrap_or_else(|_| manifest.path.clone());
        let mtime = fs::metadata(&canon)?.modified()?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(canon, CacheEntry { manifest: manifest.clone(), mtime });
        Ok(())
    }

    pub fn invalidate(&self, path: &Path) {
        if let Ok(canon) = path.canonicalize() {
            self.cache.lock().unwrap().remove(&canon);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let yaml = "repos:\n  sub:\n    url: https://example.com/sub.git\n    branch: main\n";
        let m = Manifest::parse(yaml, PathBuf::from(".gitp_manifest")).unwrap();
        let entry = m.get("sub").unwrap();
        assert_eq!(entry.url, "https://example.com/sub.git");
        assert_eq!(entry.branch.as_deref(), Some("main"));
        assert!(entry.commit.is_none());
    }

    #[test]
    fn trims_trailing_separator_on_keys() {
        let yaml = "repos:\n  sub/:\n    url: https://example.com/sub.git\n";
        let m = Manifest::parse(yaml, PathBuf::from(".gitp_manifest")).unwrap();
        assert!(m.get("sub").is_some());
        assert!(m.repos.contains_key("sub"));
    }

    #[test]
    fn branch_defaults_to_master() {
        let entry = RepoEntry {
            kind: RepoKind::Repo,
            url: "u".into(),
            branch: None,
            commit: None,
            link: None,
            link_newest: None,
            link_filter: None,
        };
        assert_eq!(entry.branch_or_default(), "master");
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "repos:\n  sub:\n    url: u\n    bogus: true\n";
        let res = Manifest::parse(yaml, PathBuf::from(".gitp_manifest"));
        assert!(res.is_err());
    }

    #[test]
    fn differs_from_detects_url_change() {
        let a = RepoEntry {
            kind: RepoKind::Repo,
            url: "u1".into(),
            branch: Some("main".into()),
            commit: None,
            link: None,
            link_newest: None,
            link_filter: None,
        };
        let mut b = a.clone();
        assert!(!a.differs_from(&b));
        b.url = "u2".into();
        assert!(a.differs_from(&b));
    }
}

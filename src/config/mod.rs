//! Config & namespace model: repos, namespaces (incl. ghost NS),
//! quotas, permissions, and the reference-dir tree, loaded from a TOML
//! file (the in-scope stand-in for the XML parser, which is an
//! external collaborator per the purpose/scope section).
//!
//! Config objects are arena-allocated and referenced by index rather
//! than by pointer, so namespace parent/ghost links can't form cycles
//! that the borrow checker would reject.

pub mod namespace;
pub mod refdir;
pub mod repo;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MarfsError, MarfsResult};

pub use namespace::{NamespaceConfig, Perms, Quotas};
pub use refdir::RefDirTree;
pub use repo::{RepoConfig, RepoRange};

#[derive(Clone, Debug, Deserialize)]
struct RawConfig {
    repo: Vec<RepoConfig>,
    namespace: Vec<NamespaceConfig>,
}

/// A cursor handed between namespace operations: the namespace an op
/// is being resolved against, how many path components deep into it,
/// and the subpath still to resolve within that namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    pub ns: usize,
    pub depth: usize,
    pub residual: String,
}

pub struct Config {
    pub repos: Vec<RepoConfig>,
    repo_index: HashMap<String, usize>,
    pub namespaces: Vec<NamespaceConfig>,
    ns_index: HashMap<String, usize>,
    root_ns: usize,
}

impl Config {
    /// `MARFSCONFIGRC` env var, else `$HOME/.marfsconfigrc`, else
    /// `/etc/marfsconfigrc`.
    pub fn default_path() -> MarfsResult<PathBuf> {
        if let Ok(p) = std::env::var("MARFSCONFIGRC") {
            return Ok(PathBuf::from(p));
        }
        if let Ok(home) = std::env::var("HOME") {
            let candidate = Path::new(&home).join(".marfsconfigrc");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
        Ok(PathBuf::from("/etc/marfsconfigrc"))
    }

    pub fn load(path: &Path) -> MarfsResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> MarfsResult<Self> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| MarfsError::ConfigInvalid(format!("parse error: {e}")))?;

        let mut repo_index = HashMap::new();
        for (i, repo) in raw.repo.iter().enumerate() {
            if repo_index.insert(repo.name.clone(), i).is_some() {
                return Err(MarfsError::ConfigInvalid(format!("duplicate repo name '{}'", repo.name)));
            }
        }

        let mut ns_index = HashMap::new();
        for (i, ns) in raw.namespace.iter().enumerate() {
            if ns_index.insert(ns.id.clone(), i).is_some() {
                return Err(MarfsError::ConfigInvalid(format!("duplicate namespace id '{}'", ns.id)));
            }
        }

        let root_ns = raw
            .namespace
            .iter()
            .position(|ns| ns.mnt_path == "/")
            .ok_or_else(|| MarfsError::ConfigInvalid("config has no namespace mounted at '/'".into()))?;

        let cfg = Self { repos: raw.repo, repo_index, namespaces: raw.namespace, ns_index, root_ns };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> MarfsResult<()> {
        for repo in &self.repos {
            repo.validate()?;
        }
        for ns in &self.namespaces {
            if !self.repo_index.contains_key(&ns.iwrite_repo) {
                return Err(MarfsError::ConfigInvalid(format!(
                    "namespace '{}': iwrite_repo '{}' does not exist",
                    ns.id, ns.iwrite_repo
                )));
            }
            for (_, repo_name) in &ns.repo_range {
                if !self.repo_index.contains_key(repo_name) {
                    return Err(MarfsError::ConfigInvalid(format!(
                        "namespace '{}': repo_range references unknown repo '{repo_name}'",
                        ns.id
                    )));
                }
            }
            if let Some(target) = &ns.ghost_target {
                if !self.ns_index.contains_key(target) {
                    return Err(MarfsError::ConfigInvalid(format!(
                        "namespace '{}': ghost_target '{target}' does not exist",
                        ns.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn repo_by_name(&self, name: &str) -> Option<&RepoConfig> {
        self.repo_index.get(name).map(|&i| &self.repos[i])
    }

    pub fn ns_by_id(&self, id: &str) -> Option<&NamespaceConfig> {
        self.ns_index.get(id).map(|&i| &self.namespaces[i])
    }

    /// Resolve `ns`'s ghost chain to the real namespace that owns its
    /// data and metadata, retaining the ghost's own permission overlay
    /// at the caller's discretion (the ghost's `bperms`/`iperms` are
    /// NOT substituted here -- only the storage target is).
    pub fn resolve_ghost(&self, mut idx: usize) -> MarfsResult<usize> {
        let mut hops = 0;
        while let Some(target) = &self.namespaces[idx].ghost_target {
            idx = *self
                .ns_index
                .get(target)
                .ok_or_else(|| MarfsError::ConfigInvalid(format!("dangling ghost_target '{target}'")))?;
            hops += 1;
            if hops > self.namespaces.len() {
                return Err(MarfsError::ConfigInvalid("ghost namespace chain forms a cycle".into()));
            }
        }
        Ok(idx)
    }

    /// Walk `path`'s '/' components starting from the root namespace,
    /// crossing into subspaces by mount-path prefix match. Does not
    /// resolve ghosts or symlinks; `linkchk` is accepted for interface
    /// parity but symlink resolution is the MDAL's responsibility (it
    /// alone knows the on-disk link target).
    pub fn traverse(&self, path: &str, _linkchk: bool) -> MarfsResult<Position> {
        let mut ns = self.root_ns;
        let mut depth = 0usize;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        let mut residual_start = 0usize;

        for (i, _component) in components.iter().enumerate() {
            let candidate_path = format!("/{}", components[..=i].join("/"));
            if let Some(&child) = self.ns_index.get(&candidate_path).or_else(|| {
                self.namespaces.iter().enumerate().find(|(_, n)| n.mnt_path == candidate_path).map(|(idx, _)| idx).as_ref()
            }) {
                ns = child;
                depth += 1;
                residual_start = i + 1;
            } else {
                break;
            }
        }

        let residual = components[residual_start..].join("/");
        Ok(Position { ns, depth, residual })
    }

    pub fn root_ns(&self) -> usize {
        self.root_ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text() -> &'static str {
        r#"
[[repo]]
name = "repo1"
dal = "POSIX"
host_template = "host0"
host_count = 1
host_offset = 0
n = 10
e = 2
chunk_size = 1073741824
max_pack_file_count = 1024
max_pack_file_size = 1048576
compression = 0
correction = 0
encryption = 0

[[namespace]]
id = "root"
alias = "root"
mnt_path = "/"
md_path = "/md/root"
bperms = 255
iperms = 255
iwrite_repo = "repo1"
repo_range = []
trash_md_path = "/md/root/.trash"
fsinfo_path = "/md/root/.fsinfo"
dir_mdal = "posix"
file_mdal = "posix"
refbreadth = 16
refdepth = 2
refdigits = 2

[[namespace]]
id = "proj1"
alias = "proj1"
mnt_path = "/proj1"
md_path = "/md/proj1"
bperms = 255
iperms = 255
iwrite_repo = "repo1"
repo_range = []
trash_md_path = "/md/proj1/.trash"
fsinfo_path = "/md/proj1/.fsinfo"
dir_mdal = "posix"
file_mdal = "posix"
refbreadth = 16
refdepth = 2
refdigits = 2
"#
    }

    #[test]
    fn parses_and_validates_sample_config() {
        let cfg = Config::parse(sample_text()).unwrap();
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.namespaces.len(), 2);
    }

    #[test]
    fn traverse_crosses_into_subspace() {
        let cfg = Config::parse(sample_text()).unwrap();
        let pos = cfg.traverse("/proj1/some/file.txt", false).unwrap();
        assert_eq!(cfg.namespaces[pos.ns].id, "proj1");
        assert_eq!(pos.residual, "some/file.txt");
    }

    #[test]
    fn traverse_stays_at_root_for_unknown_subspace() {
        let cfg = Config::parse(sample_text()).unwrap();
        let pos = cfg.traverse("/unknown/file.txt", false).unwrap();
        assert_eq!(cfg.namespaces[pos.ns].id, "root");
        assert_eq!(pos.residual, "unknown/file.txt");
    }

    #[test]
    fn rejects_dangling_repo_reference() {
        let bad = sample_text().replace("iwrite_repo = \"repo1\"", "iwrite_repo = \"ghost-repo\"");
        assert!(Config::parse(&bad).is_err());
    }

    #[test]
    fn config_without_root_namespace_is_rejected() {
        let bad = sample_text().replace("mnt_path = \"/\"\n", "mnt_path = \"/notroot\"\n");
        assert!(Config::parse(&bad).is_err());
    }
}

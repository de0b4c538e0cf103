//! Clone-or-open, read, commit and push for the artefact repository
//!
//! The remote is the system of record. Opening a cached clone force-pulls,
//! and every write force-pushes, so the local working copy never carries
//! state the remote does not have.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use super::tree::{parse_ls_tree, TreeEntry};
use super::{CommitId, Git};
use crate::error::{CatalogError, Result};

/// Credentials for an HTTP(S) remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    /// Sent as the password of an empty username
    Token(String),
}

impl Credentials {
    fn header(&self) -> String {
        let pair = match self {
            Self::Basic { username, password } => format!("{}:{}", username, password),
            Self::Token(token) => format!(":{}", token),
        };

        format!("Authorization: Basic {}", STANDARD.encode(pair))
    }
}

/// Author and committer recorded on every write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "softpack".to_string(),
            email: "softpack@localhost".to_string(),
        }
    }
}

/// How to obtain the artefact repository
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Remote URL (or local path) of the repository
    pub remote: String,
    /// On-disk cache; an ephemeral temporary clone is used when None
    pub cache: Option<PathBuf>,
    pub credentials: Option<Credentials>,
    pub identity: CommitIdentity,
}

impl CloneOptions {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
            ..Default::default()
        }
    }

    pub fn with_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache = Some(dir.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Git context carrying identity and credentials, not yet rooted
    fn git(&self) -> Git {
        let mut git = Git::default()
            .with_env("GIT_AUTHOR_NAME", &self.identity.name)
            .with_env("GIT_AUTHOR_EMAIL", &self.identity.email)
            .with_env("GIT_COMMITTER_NAME", &self.identity.name)
            .with_env("GIT_COMMITTER_EMAIL", &self.identity.email)
            .with_env("GIT_CONFIG_KEY_0", "commit.gpgsign")
            .with_env("GIT_CONFIG_VALUE_0", "false");

        match &self.credentials {
            Some(credentials) => {
                git = git
                    .with_env("GIT_CONFIG_COUNT", "2")
                    .with_env("GIT_CONFIG_KEY_1", "http.extraHeader")
                    .with_env("GIT_CONFIG_VALUE_1", credentials.header());
            }
            None => git = git.with_env("GIT_CONFIG_COUNT", "1"),
        }

        git
    }
}

/// A local clone of the artefact repository
pub struct GitRepository {
    git: Git,
    workdir: PathBuf,
    /// Keeps an ephemeral clone alive; removed on drop
    _ephemeral: Option<TempDir>,
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("workdir", &self.workdir)
            .field("ephemeral", &self._ephemeral.is_some())
            .finish()
    }
}

impl GitRepository {
    /// Open a cached clone of the remote, or clone it fresh
    ///
    /// Returns the repository and its head; the head is None when the
    /// remote has no commits yet.
    pub fn open(options: &CloneOptions) -> Result<(Self, Option<CommitId>)> {
        let base = options.git();

        match &options.cache {
            Some(dir) if is_clone_of(&base.at(dir), dir, &options.remote) => {
                tracing::debug!("opening cached artefact repo");

                let repo = Self {
                    git: base.at(dir),
                    workdir: dir.clone(),
                    _ephemeral: None,
                };

                tracing::debug!("updating artefact repo");

                let head = repo.pull()?;
                Ok((repo, head))
            }
            Some(dir) => {
                let repo = Self::replace_cache(&base, &options.remote, dir)?;
                let head = repo.head();
                Ok((repo, head))
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("softpack-artefacts-")
                    .tempdir()?;
                let dir = tmp.path().to_path_buf();
                let repo = Self::clone_into(&base, &options.remote, &dir, Some(tmp))?;
                let head = repo.head();
                Ok((repo, head))
            }
        }
    }

    /// Fresh clone into `dir`, replacing whatever it held
    ///
    /// The clone is made next to `dir` and moved into place, so a failed
    /// clone leaves the old contents untouched.
    fn replace_cache(base: &Git, remote: &str, dir: &Path) -> Result<Self> {
        let parent = match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let staging = tempfile::Builder::new()
            .prefix(".softpack-clone-")
            .tempdir_in(parent)?;
        let target = staging.path().join("repo");
        base.output(&["clone", "--quiet", "--", remote, &target.to_string_lossy()])?;

        if dir.exists() {
            tracing::warn!(
                "Replacing artefact cache {} with a fresh clone of {}",
                dir.display(),
                remote
            );
            fs::remove_dir_all(dir)?;
        }
        fs::rename(&target, dir)?;

        Self::cloned(base, remote, dir, None)
    }

    fn clone_into(
        base: &Git,
        remote: &str,
        dir: &Path,
        ephemeral: Option<TempDir>,
    ) -> Result<Self> {
        let target = dir.to_string_lossy();
        base.output(&["clone", "--quiet", "--", remote, &target])?;

        Self::cloned(base, remote, dir, ephemeral)
    }

    fn cloned(base: &Git, remote: &str, dir: &Path, ephemeral: Option<TempDir>) -> Result<Self> {
        let repo = Self {
            git: base.at(dir),
            workdir: dir.to_path_buf(),
            _ephemeral: ephemeral,
        };

        if repo.head().is_none() {
            tracing::info!("artefact repository {} is empty", remote);
        }

        Ok(repo)
    }

    /// Location of the working copy
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Current local head, None for an unborn branch
    pub fn head(&self) -> Option<CommitId> {
        self.git
            .run_optional(&["rev-parse", "--verify", "--quiet", "HEAD^{commit}"])
    }

    /// Name of the branch HEAD points at (may be unborn)
    pub fn branch(&self) -> Result<String> {
        self.git.run(&["symbolic-ref", "--short", "HEAD"])
    }

    /// Force-converge with the remote branch, discarding local changes
    pub fn pull(&self) -> Result<Option<CommitId>> {
        self.git.run(&["fetch", "--quiet", "--prune", "origin"])?;

        let branch = self.branch()?;
        let remote_ref = format!("refs/remotes/origin/{}", branch);
        let remote_commit = format!("{}^{{commit}}", remote_ref);

        if self
            .git
            .run_optional(&["rev-parse", "--verify", "--quiet", &remote_commit])
            .is_some()
        {
            self.git.run(&["reset", "--hard", "--quiet", &remote_ref])?;
            self.git.run(&["clean", "-fdq"])?;
        } else {
            tracing::debug!("remote branch {} has no commits yet", branch);
        }

        Ok(self.head())
    }

    /// List the tree at `path` (relative to the repository root) in `head`
    pub fn read_tree(&self, head: &str, path: &str) -> Result<Vec<TreeEntry>> {
        let spec = if path.is_empty() {
            format!("{}^{{tree}}", head)
        } else {
            format!("{}:{}^{{tree}}", head, path)
        };

        let tree = self
            .git
            .run_optional(&["rev-parse", "--verify", "--quiet", &spec])
            .ok_or_else(|| CatalogError::not_found(path))?;

        let output = self.git.output(&["ls-tree", "-z", "-l", &tree])?;
        parse_ls_tree(&output)
    }

    /// Raw contents of a blob
    pub fn read_blob(&self, oid: &str) -> Result<Vec<u8>> {
        self.git.output(&["cat-file", "blob", oid])
    }

    /// Commit time of the newest commit reachable from `head` that touched `path`
    pub fn last_modified(&self, head: &str, path: &str) -> Result<DateTime<Utc>> {
        let stamp = self
            .git
            .run_optional(&[
                "--literal-pathspecs",
                "log",
                "-1",
                "--format=%ct",
                head,
                "--",
                path,
            ])
            .ok_or_else(|| CatalogError::not_found(path))?;

        let seconds: i64 = stamp.parse().map_err(|_| CatalogError::GitError {
            message: format!("Failed to parse commit time: {}", stamp),
        })?;

        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| CatalogError::GitError {
                message: format!("Commit time out of range: {}", seconds),
            })
    }

    /// Write `contents` to `path` in the working copy, creating directories
    pub fn write_file(&self, path: &str, contents: &mut dyn Read) -> Result<u64> {
        let target = self.workdir.join(path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&target)?;
        Ok(io::copy(contents, &mut file)?)
    }

    /// Stage a single path
    pub fn stage(&self, path: &str) -> Result<()> {
        self.git
            .run(&["--literal-pathspecs", "add", "--", path])
            .map(drop)
    }

    /// Remove every tracked file under `dir` matching `pattern`
    ///
    /// Matching nothing is not an error.
    pub fn remove_glob(&self, dir: &str, pattern: &str) -> Result<()> {
        let spec = format!(":(glob){}/{}", dir, pattern);
        self.git
            .run(&["rm", "-r", "-q", "--ignore-unmatch", "--", &spec])
            .map(drop)
    }

    /// True when the index differs from HEAD (or holds anything on an unborn branch)
    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.git.succeeds(&["diff", "--cached", "--quiet"])?)
    }

    /// Commit the staged index and force-push it to the tracked branch
    ///
    /// Returns None without committing when nothing is staged.
    pub fn commit_and_push(&self, message: &str) -> Result<Option<CommitId>> {
        if !self.has_staged_changes()? {
            return Ok(None);
        }

        self.git
            .run(&["commit", "--quiet", "--no-verify", "-m", message])?;

        let head = self.head().ok_or_else(|| CatalogError::GitError {
            message: "commit did not produce a head".to_string(),
        })?;

        let refspec = format!("HEAD:refs/heads/{}", self.branch()?);
        self.git
            .run(&["push", "--quiet", "--force", "origin", &refspec])
            .map_err(|e| CatalogError::PushRejected {
                message: e.to_string(),
            })?;

        Ok(Some(head))
    }

    /// Roll the branch, index and working copy back to `head`
    pub fn discard_changes(&self, head: Option<&str>) -> Result<()> {
        match head {
            Some(head) => {
                self.git.run(&["reset", "--hard", "--quiet", head])?;
            }
            None => {
                if self.head().is_some() {
                    self.git.run(&["update-ref", "-d", "HEAD"])?;
                }
                self.git.run(&["read-tree", "--empty"])?;
            }
        }

        self.git.run(&["clean", "-fdq"]).map(drop)
    }
}

fn is_clone_of(git: &Git, dir: &Path, remote: &str) -> bool {
    dir.join(".git").is_dir()
        && git
            .run_optional(&["config", "--get", "remote.origin.url"])
            .is_some_and(|url| url == remote)
}

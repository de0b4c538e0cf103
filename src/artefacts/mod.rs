//! Artefact store
//!
//! Treats the artefact git repository as a hierarchical, commit-addressed
//! key/value store. Environments live at
//! `environments/<users|groups>/<owner>/<name>/<file>`.
//!
//! # Locking
//!
//! One `RwLock` guards the head commit and, by convention, the working copy:
//! - Reads (`list`, `get_environment`) take the read lock and only touch
//!   git objects reachable from the held head.
//! - Writes (`add_files`, `remove_environment`, `pull`) take the write lock
//!   for the whole write-commit-push sequence and advance the head only on
//!   success. A failed write rolls the working copy back, so readers keep
//!   seeing the previous consistent head.

mod file;

pub use file::{EnvironmentFile, EnvironmentFiles};

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use parking_lot::RwLock;

use crate::error::{CatalogError, Result};
use crate::git::{CloneOptions, CommitId, EntryKind, GitRepository, TreeEntry};

/// Directory at the repository root holding every environment
pub const ENVIRONMENTS_ROOT: &str = "environments";

const ADD_FILES_MESSAGE: &str = "Successfully written artefact(s)";
const REMOVE_ENVIRONMENT_MESSAGE: &str = "Removed environment";

/// Top-level owner namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Users,
    Groups,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Users, Namespace::Groups];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Users => "users",
            Namespace::Groups => "groups",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "users" => Ok(Namespace::Users),
            "groups" => Ok(Namespace::Groups),
            _ => Err(CatalogError::not_found(s)),
        }
    }
}

/// `namespace/owner/name` key of one environment
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvironmentPath {
    namespace: Namespace,
    owner: String,
    name: String,
}

impl EnvironmentPath {
    pub fn new(namespace: Namespace, owner: &str, name: &str) -> Result<Self> {
        validate_segment(owner)?;
        validate_segment(name)?;

        Ok(Self {
            namespace,
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Parse `users/alice/py-1.0`
    pub fn parse(path: &str) -> Result<Self> {
        let mut parts = path.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(owner), Some(name), None) => {
                Self::new(namespace.parse()?, owner, name)
            }
            _ => Err(CatalogError::not_found(path)),
        }
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Environment name, `base-version` formatted
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `namespace/owner`
    pub fn base(&self) -> String {
        format!("{}/{}", self.namespace, self.owner)
    }

    /// Directory of this environment relative to the repository root
    pub fn repo_dir(&self) -> String {
        format!("{}/{}", ENVIRONMENTS_ROOT, self)
    }
}

impl fmt::Display for EnvironmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.owner, self.name)
    }
}

/// Reject anything that could escape its directory or act as a pathspec
///
/// `.git` in any case is refused too; git silently skips such paths.
pub fn validate_segment(segment: &str) -> Result<()> {
    let invalid = segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.eq_ignore_ascii_case(".git")
        || segment
            .chars()
            .any(|c| matches!(c, '/' | '\\' | '\0' | ':' | '*' | '?' | '[' | ']'));

    if invalid {
        return Err(CatalogError::InvalidPath {
            segment: segment.to_string(),
        });
    }

    Ok(())
}

fn repo_path(segments: &[&str]) -> String {
    let mut path = String::from(ENVIRONMENTS_ROOT);
    for segment in segments {
        path.push('/');
        path.push_str(segment);
    }
    path
}

/// Commit-addressed view over the artefact repository
#[derive(Debug)]
pub struct ArtefactStore {
    repo: GitRepository,
    head: RwLock<Option<CommitId>>,
}

impl ArtefactStore {
    /// Clone or open the repository described by `options`
    pub fn open(options: &CloneOptions) -> Result<Self> {
        let (repo, head) = GitRepository::open(options)?;
        Ok(Self::from_repository(repo, head))
    }

    pub fn from_repository(repo: GitRepository, head: Option<CommitId>) -> Self {
        Self {
            repo,
            head: RwLock::new(head),
        }
    }

    /// Head commit readers currently observe
    pub fn head(&self) -> Option<CommitId> {
        self.head.read().clone()
    }

    /// Names of the children of `environments/<segments...>`, in tree order
    pub fn list(&self, segments: &[&str]) -> Result<Vec<String>> {
        for segment in segments {
            validate_segment(segment)?;
        }

        let head = self.head.read();
        let Some(head) = head.as_deref() else {
            if segments.is_empty() {
                return Ok(Vec::new());
            }
            return Err(CatalogError::not_found(segments.join("/")));
        };

        let entries = self.repo.read_tree(head, &repo_path(segments))?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    /// Every file of an environment at the current head
    ///
    /// Fails as a whole if any single file cannot be read.
    pub fn get_environment(&self, path: &EnvironmentPath) -> Result<EnvironmentFiles> {
        let head = self.head.read();
        let head = head
            .as_deref()
            .ok_or_else(|| CatalogError::not_found(path.to_string()))?;

        let mut files = EnvironmentFiles::new();

        for entry in self.read_environment_tree(head, path)? {
            if entry.kind != EntryKind::Blob {
                tracing::debug!("Skipping non-file entry {} in {}", entry.name, path);
                continue;
            }

            files.insert(self.materialise(head, path, entry)?);
        }

        Ok(files)
    }

    /// One file of an environment at the current head
    ///
    /// Reads only that file's blob and history.
    pub fn get_file(&self, path: &EnvironmentPath, name: &str) -> Result<EnvironmentFile> {
        validate_segment(name)?;

        let head = self.head.read();
        let head = head
            .as_deref()
            .ok_or_else(|| CatalogError::not_found(path.to_string()))?;

        let entry = self
            .read_environment_tree(head, path)?
            .into_iter()
            .find(|entry| entry.kind == EntryKind::Blob && entry.name == name)
            .ok_or_else(|| CatalogError::not_found(format!("{}/{}", path, name)))?;

        self.materialise(head, path, entry)
    }

    fn read_environment_tree(&self, head: &str, path: &EnvironmentPath) -> Result<Vec<TreeEntry>> {
        self.repo
            .read_tree(head, &path.repo_dir())
            .map_err(|e| match e {
                CatalogError::PathNotFound { .. } => CatalogError::not_found(path.to_string()),
                other => other,
            })
    }

    fn materialise(
        &self,
        head: &str,
        path: &EnvironmentPath,
        entry: TreeEntry,
    ) -> Result<EnvironmentFile> {
        let contents = self.repo.read_blob(&entry.oid)?;
        let modified = self
            .repo
            .last_modified(head, &format!("{}/{}", path.repo_dir(), entry.name))?;
        let size = entry.size.unwrap_or(contents.len() as u64);

        Ok(EnvironmentFile::new(entry.name, size, modified, contents))
    }

    /// Write a batch of files into an environment as a single commit
    pub fn add_files<I, S, R>(&self, path: &EnvironmentPath, files: I) -> Result<()>
    where
        I: IntoIterator<Item = (S, R)>,
        S: AsRef<str>,
        R: Read,
    {
        let files: Vec<(S, R)> = files.into_iter().collect();
        for (name, _) in &files {
            validate_segment(name.as_ref())?;
        }

        let dir = path.repo_dir();

        self.write(ADD_FILES_MESSAGE, |repo| {
            for (name, mut reader) in files {
                let file_path = format!("{}/{}", dir, name.as_ref());
                repo.write_file(&file_path, &mut reader)?;
                repo.stage(&file_path)?;
            }
            Ok(())
        })?;

        tracing::info!("Wrote artefacts to {}", path);
        Ok(())
    }

    /// Remove every file of an environment; a missing environment is not an error
    pub fn remove_environment(&self, path: &EnvironmentPath) -> Result<()> {
        let dir = path.repo_dir();

        self.write(REMOVE_ENVIRONMENT_MESSAGE, |repo| repo.remove_glob(&dir, "*"))?;

        tracing::info!("Removed environment {}", path);
        Ok(())
    }

    /// Converge with the remote; returns true when the head moved
    pub fn pull(&self) -> Result<bool> {
        let mut head = self.head.write();
        let updated = self.repo.pull()?;
        let changed = *head != updated;

        if changed {
            tracing::info!("Artefact repo moved {:?} -> {:?}", *head, updated);
        }

        *head = updated;
        Ok(changed)
    }

    /// Run `stage` then commit and push, all under the write lock
    fn write<F>(&self, message: &str, stage: F) -> Result<()>
    where
        F: FnOnce(&GitRepository) -> Result<()>,
    {
        let mut head = self.head.write();

        let result = stage(&self.repo).and_then(|()| self.repo.commit_and_push(message));

        match result {
            Ok(Some(new_head)) => {
                *head = Some(new_head);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!("Nothing to commit for {:?}", message);
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.repo.discard_changes(head.as_deref()) {
                    tracing::error!("Failed to roll back artefact repo: {}", rollback);
                }
                Err(e)
            }
        }
    }
}

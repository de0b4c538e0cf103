//! Git operations for the artefact repository
//!
//! The artefact repository is driven through the `git` executable rather than
//! a linked library. Every invocation goes through [`Git`], which pins the
//! working directory and the environment (credentials, committer identity)
//! so callers only deal in arguments.

mod repository;
mod tree;

pub use repository::{CloneOptions, CommitIdentity, Credentials, GitRepository};
pub use tree::{parse_ls_tree, EntryKind, TreeEntry};

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{CatalogError, Result};

/// Full hex SHA of a commit
pub type CommitId = String;

/// A git invocation context: working directory plus extra environment
#[derive(Debug, Clone, Default)]
pub struct Git {
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl Git {
    /// Create a context rooted at `cwd`
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            envs: Vec::new(),
        }
    }

    /// Same environment, different working directory
    pub fn at(&self, cwd: &Path) -> Self {
        Self {
            cwd: Some(cwd.to_path_buf()),
            envs: self.envs.clone(),
        }
    }

    /// Add an environment variable to every invocation
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null());

        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        cmd
    }

    /// Run a git command and return raw stdout
    pub fn output(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self
            .command(args)
            .output()
            .map_err(|e| CatalogError::GitError {
                message: format!("Failed to execute git: {}", e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CatalogError::GitError {
                message: format!("git {} failed: {}", args.join(" "), stderr.trim()),
            });
        }

        Ok(output.stdout)
    }

    /// Run a git command and return stdout as a trimmed string
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let stdout = self.output(args)?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    /// Run a git command for its exit status alone
    ///
    /// Only failing to start git is an error; a non-zero exit is `false`.
    pub fn succeeds(&self, args: &[&str]) -> Result<bool> {
        let status = self
            .command(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| CatalogError::GitError {
                message: format!("Failed to execute git: {}", e),
            })?;

        Ok(status.success())
    }

    /// Run a git command, returning None if it fails (for optional queries)
    pub fn run_optional(&self, args: &[&str]) -> Option<String> {
        self.run(args).ok().filter(|s| !s.is_empty())
    }
}

//! softpack-frontend: a git-backed catalog of software environments
//!
//! The catalog's system of record is a remote git repository of
//! environment bundles (`environments/<users|groups>/<owner>/<name>/...`).
//! This crate keeps a local clone of it, derives a typed index of every
//! environment with its build status, and pushes that index to live
//! WebSocket subscribers whenever it changes.
//!
//! # Layers
//!
//! - [`git`]: the `git` executable driven as a commit-addressed backend
//! - [`artefacts`]: read/write store over the repository, one writer at a time
//! - [`environments`]: sentinel-file classification and the whole-catalog index
//! - [`socket_server`]: snapshot-then-broadcast notification bus
//! - [`catalog`]: ties the three together; [`server`] exposes it over HTTP
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use softpack_frontend::{ArtefactStore, Catalog, CloneOptions, NotificationBus};
//!
//! let store = ArtefactStore::open(&CloneOptions::new("https://example.com/artefacts.git"))?;
//! let catalog = Arc::new(Catalog::new(store, NotificationBus::default()));
//! let index = catalog.reindex()?;
//! println!("{} environments", index.len());
//! ```

pub mod artefacts;
pub mod catalog;
pub mod cli;
pub mod compressed;
pub mod config;
pub mod environments;
pub mod error;
pub mod git;
pub mod server;
pub mod socket_server;

pub use artefacts::{ArtefactStore, EnvironmentFile, EnvironmentFiles, EnvironmentPath, Namespace};
pub use catalog::{spawn_refresh_task, Catalog};
pub use cli::{Cli, Commands};
pub use compressed::CompressedFile;
pub use config::Config;
pub use environments::{classify, Environment, EnvironmentIndex, Status};
pub use error::{CatalogError, Result};
pub use git::{CloneOptions, CommitIdentity, Credentials, GitRepository};
pub use socket_server::{NotificationBus, Subscription};

//! Sentinel-file state machine
//!
//! ```text
//! module present            -> parse softpack.yml + README.md (+ meta.yml) -> Ready
//! else builder.out present  -> Failed
//! else                      -> Building
//! ```
//!
//! `.built_by_softpack` sets the `softpack` flag regardless of status.
//! Nothing is remembered between rebuilds; every call re-derives the state.

use std::io::Read;

use serde::Deserialize;

use super::{
    Environment, Status, BUILDER_OUT, BUILT_BY_SOFTPACK_FILE, ENVIRONMENTS_FILE, META_FILE,
    MODULE_FILE, README_FILE,
};
use crate::artefacts::{EnvironmentFile, EnvironmentFiles, EnvironmentPath};
use crate::error::{CatalogError, Result};

#[derive(Debug, Default, Deserialize)]
struct DescriptionPackages {
    #[serde(default)]
    description: String,
    #[serde(default)]
    packages: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    tags: Vec<String>,
}

/// Derive the index entry for one environment bundle
pub fn classify(path: &EnvironmentPath, mut files: EnvironmentFiles) -> Result<Environment> {
    let mut env = Environment {
        softpack: files.contains(BUILT_BY_SOFTPACK_FILE),
        ..Default::default()
    };

    if files.contains(MODULE_FILE) {
        parse_environment(path, &mut files, &mut env)?;
        env.status = Status::Ready;
    } else if files.contains(BUILDER_OUT) {
        env.status = Status::Failed;
    } else {
        env.status = Status::Building;
    }

    Ok(env)
}

fn parse_environment(
    path: &EnvironmentPath,
    files: &mut EnvironmentFiles,
    env: &mut Environment,
) -> Result<()> {
    let descriptor = files
        .take(ENVIRONMENTS_FILE)
        .ok_or_else(|| malformed(path, format!("missing {}", ENVIRONMENTS_FILE)))?;
    let readme = files
        .take(README_FILE)
        .ok_or_else(|| malformed(path, format!("missing {}", README_FILE)))?;

    let dp: DescriptionPackages = parse_yaml(path, descriptor)?;
    env.description = dp.description;
    env.packages = dp.packages;

    if let Some(meta) = files.take(META_FILE) {
        let meta: Meta = parse_yaml(path, meta)?;
        env.tags = meta.tags;
    }

    env.readme = readme.into_string();

    Ok(())
}

fn parse_yaml<T: for<'de> Deserialize<'de>>(
    path: &EnvironmentPath,
    mut file: EnvironmentFile,
) -> Result<T> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| malformed(path, format!("{}: {}", file.name(), e)))?;

    serde_yaml::from_str(&contents).map_err(|e| malformed(path, format!("{}: {}", file.name(), e)))
}

fn malformed(path: &EnvironmentPath, reason: String) -> CatalogError {
    CatalogError::MalformedEnvironment {
        path: path.to_string(),
        reason,
    }
}

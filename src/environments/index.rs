//! Whole-catalog index, rebuilt from the artefact store
//!
//! The serialized form is a JSON object keyed by environment path, written in
//! natural order (see [`sort_key`]) rather than map order.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::{classify, Environment};
use crate::artefacts::{ArtefactStore, EnvironmentPath, Namespace};
use crate::error::Result;

/// Width numeric version components are zero-padded to
const NUMBER_WIDTH: usize = 20;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d]+").unwrap());

/// Natural ordering key for an environment
///
/// Lower-cased base name, `-`, every numeric run of the version zero-padded,
/// then the non-numeric runs, NUL, then `namespace/owner`. `py-1.10` sorts
/// after `py-1.9`, and same-named environments group together across owners.
pub fn sort_key(path: &EnvironmentPath) -> String {
    let (name, version) = path.name().rsplit_once('-').unwrap_or((path.name(), ""));

    let mut key = name.to_lowercase();
    key.push('-');

    for number in DIGITS.find_iter(version) {
        let number = number.as_str();
        for _ in number.len()..NUMBER_WIDTH {
            key.push('0');
        }
        key.push_str(number);
    }

    for text in NON_DIGITS.find_iter(version) {
        key.push_str(text.as_str());
    }

    key.push('\0');
    key.push_str(&path.base());
    key
}

/// Immutable map from environment path to its derived entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentIndex {
    entries: BTreeMap<EnvironmentPath, Environment>,
}

impl EnvironmentIndex {
    /// Walk `users` then `groups` and classify every environment
    ///
    /// Best effort: an owner that cannot be listed, or an environment that
    /// cannot be read or classified, is logged and left out. Only a failure
    /// to list a namespace root (other than it not existing) aborts.
    pub fn rebuild(store: &ArtefactStore) -> Result<Self> {
        let mut entries = BTreeMap::new();
        let mut skipped = 0usize;

        for namespace in Namespace::ALL {
            let owners = match store.list(&[namespace.as_str()]) {
                Ok(owners) => owners,
                Err(e) if e.is_not_found() => {
                    tracing::debug!("No {} environments", namespace);
                    continue;
                }
                Err(e) => return Err(e),
            };

            for owner in owners {
                let names = match store.list(&[namespace.as_str(), &owner]) {
                    Ok(names) => names,
                    Err(e) => {
                        tracing::warn!("Skipping {}/{}: {}", namespace, owner, e);
                        skipped += 1;
                        continue;
                    }
                };

                for name in names {
                    let result = EnvironmentPath::new(namespace, &owner, &name).and_then(|path| {
                        let files = store.get_environment(&path)?;
                        let env = classify(&path, files)?;
                        Ok((path, env))
                    });

                    match result {
                        Ok((path, env)) => {
                            entries.insert(path, env);
                        }
                        Err(e) => {
                            tracing::warn!("Skipping {}/{}/{}: {}", namespace, owner, name, e);
                            skipped += 1;
                        }
                    }
                }
            }
        }

        tracing::info!(
            "Indexed {} environments ({} skipped)",
            entries.len(),
            skipped
        );

        Ok(Self { entries })
    }

    pub fn get(&self, path: &EnvironmentPath) -> Option<&Environment> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EnvironmentPath, &Environment)> {
        self.entries.iter()
    }

    /// Entries in natural order
    pub fn sorted(&self) -> Vec<(&EnvironmentPath, &Environment)> {
        let mut sorted: Vec<_> = self
            .entries
            .iter()
            .map(|(path, env)| (sort_key(path), path, env))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        sorted.into_iter().map(|(_, path, env)| (path, env)).collect()
    }

    /// Serialized snapshot as published on the bus
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Serialize for EnvironmentIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, env) in self.sorted() {
            map.serialize_entry(&path.to_string(), env)?;
        }
        map.end()
    }
}

impl FromIterator<(EnvironmentPath, Environment)> for EnvironmentIndex {
    fn from_iter<I: IntoIterator<Item = (EnvironmentPath, Environment)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

//! Environment index
//!
//! Derives typed metadata and a readiness [`Status`] for every environment in
//! the artefact store. The index is rebuilt as a whole and never mutated in
//! place; see [`EnvironmentIndex::rebuild`].

pub mod classify;
pub mod index;

pub use classify::classify;
pub use index::{sort_key, EnvironmentIndex};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Machine-readable descriptor (`description`, `packages`)
pub const ENVIRONMENTS_FILE: &str = "softpack.yml";
/// Written by the builder; on its own it means the build failed
pub const BUILDER_OUT: &str = "builder.out";
/// Written once the environment has been installed as a module
pub const MODULE_FILE: &str = "module";
pub const README_FILE: &str = "README.md";
/// Optional metadata (`tags`)
pub const META_FILE: &str = "meta.yml";
pub const BUILT_BY_SOFTPACK_FILE: &str = ".built_by_softpack";
/// Marks environments imported from an existing module; not used for classification
pub const GENERATED_FROM_MODULE_FILE: &str = ".generated_from_module";

/// Readiness of an environment, derived from its sentinel files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Building = 0,
    Failed = 1,
    Ready = 2,
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Status::Building),
            1 => Ok(Status::Failed),
            2 => Ok(Status::Ready),
            other => Err(serde::de::Error::custom(format!(
                "invalid environment status {}",
                other
            ))),
        }
    }
}

/// One index entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Environment {
    pub tags: Vec<String>,
    pub packages: Vec<String>,
    pub description: String,
    #[serde(rename = "ReadMe")]
    pub readme: String,
    pub status: Status,
    /// Produced by the softpack build pipeline
    #[serde(rename = "SoftPack")]
    pub softpack: bool,
}

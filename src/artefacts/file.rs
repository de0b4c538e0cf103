//! Files materialised from an environment bundle

use std::collections::btree_map::{self, BTreeMap};
use std::io::{self, Cursor, Read};

use chrono::{DateTime, Utc};

/// One file of an environment at a specific commit
///
/// The contents are readable exactly once through [`Read`].
#[derive(Debug)]
pub struct EnvironmentFile {
    name: String,
    size: u64,
    modified: DateTime<Utc>,
    contents: Cursor<Vec<u8>>,
}

impl EnvironmentFile {
    pub fn new(
        name: impl Into<String>,
        size: u64,
        modified: DateTime<Utc>,
        contents: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
            contents: Cursor::new(contents),
        }
    }

    /// A file that has not been committed yet; modified now
    pub fn from_bytes(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        let contents = contents.into();
        Self::new(name, contents.len() as u64, Utc::now(), contents)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Time of the last commit that touched this file
    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Consume the remaining contents
    pub fn into_bytes(mut self) -> Vec<u8> {
        let position = self.contents.position() as usize;
        let mut bytes = self.contents.into_inner();
        bytes.drain(..position.min(bytes.len()));
        bytes
    }

    /// Remaining contents as (lossy) UTF-8
    pub fn into_string(self) -> String {
        match String::from_utf8(self.into_bytes()) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

impl Read for EnvironmentFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.contents.read(buf)
    }
}

/// All files of one environment, keyed by file name
#[derive(Debug, Default)]
pub struct EnvironmentFiles {
    files: BTreeMap<String, EnvironmentFile>,
}

impl EnvironmentFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: EnvironmentFile) {
        self.files.insert(file.name.clone(), file);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&EnvironmentFile> {
        self.files.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut EnvironmentFile> {
        self.files.get_mut(name)
    }

    /// Remove and return a file
    pub fn take(&mut self, name: &str) -> Option<EnvironmentFile> {
        self.files.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, EnvironmentFile> {
        self.files.iter()
    }

    /// Release every open stream
    pub fn close(self) {
        drop(self);
    }
}

impl IntoIterator for EnvironmentFiles {
    type Item = (String, EnvironmentFile);
    type IntoIter = btree_map::IntoIter<String, EnvironmentFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.into_iter()
    }
}

impl FromIterator<EnvironmentFile> for EnvironmentFiles {
    fn from_iter<I: IntoIterator<Item = EnvironmentFile>>(iter: I) -> Self {
        let mut files = Self::new();
        for file in iter {
            files.insert(file);
        }
        files
    }
}

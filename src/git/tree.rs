//! Tree listings (`git ls-tree -z -l`)

use crate::error::{CatalogError, Result};

/// Object type of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Blob,
    Tree,
    /// Submodule gitlink
    Commit,
}

/// One entry of a tree, in git tree order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: EntryKind,
    pub oid: String,
    /// Blob size in bytes; None for trees and gitlinks
    pub size: Option<u64>,
    pub name: String,
}

/// Parse NUL-terminated `ls-tree -l` records
///
/// Each record is `<mode> SP <type> SP <oid> SP+ <size> TAB <name>`, where
/// size is right-aligned and `-` for anything that is not a blob.
pub fn parse_ls_tree(output: &[u8]) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();

    for record in output.split(|b| *b == 0) {
        if record.is_empty() {
            continue;
        }

        let record = String::from_utf8_lossy(record);
        let (meta, name) = record.split_once('\t').ok_or_else(|| malformed(&record))?;
        let mut fields = meta.split_whitespace();

        let (Some(mode), Some(kind), Some(oid), Some(size)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(&record));
        };

        let kind = match kind {
            "blob" => EntryKind::Blob,
            "tree" => EntryKind::Tree,
            "commit" => EntryKind::Commit,
            _ => return Err(malformed(&record)),
        };

        entries.push(TreeEntry {
            mode: mode.to_string(),
            kind,
            oid: oid.to_string(),
            size: size.parse().ok(),
            name: name.to_string(),
        });
    }

    Ok(entries)
}

fn malformed(record: &str) -> CatalogError {
    CatalogError::GitError {
        message: format!("Unexpected ls-tree output: {:?}", record),
    }
}

use crate::fold::FoldedText;
use fsearch_query_parser::Field;
use serde::Serialize;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// One indexed filesystem item. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: u64,
    /// File name component, lossy UTF-8
    pub name: String,
    /// Full path, lossy UTF-8
    pub path: String,
    pub size: u64,
    /// Seconds since the Unix epoch, 0 when unavailable
    pub mtime: u64,
    /// NFKC copies, only kept when they differ from `name` / `path`
    #[serde(skip)]
    folded_name: Option<Box<FoldedText>>,
    #[serde(skip)]
    folded_path: Option<Box<FoldedText>>,
}

impl Entry {
    pub fn new(id: u64, path: &Path, size: u64, mtime: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        let path = path.to_string_lossy().into_owned();

        Self {
            id,
            folded_name: FoldedText::new(&name).map(Box::new),
            folded_path: FoldedText::new(&path).map(Box::new),
            name,
            path,
            size,
            mtime,
        }
    }

    /// Reads size and modification time from `metadata`.
    pub fn from_metadata(id: u64, path: &Path, metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        Self::new(id, path, metadata.len(), mtime)
    }

    /// Text of a text field, `None` for numeric fields and for the
    /// extension of a name without a `.`
    #[inline]
    pub fn text(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => Some(&self.name),
            Field::Path => Some(&self.path),
            Field::Extension => self.extension(),
            Field::Size | Field::Mtime => None,
        }
    }

    /// Part of the name after its last `.`
    pub fn extension(&self) -> Option<&str> {
        self.extension_start().map(|start| &self.name[start..])
    }

    /// Byte offset of the extension within `name`
    #[inline]
    pub fn extension_start(&self) -> Option<usize> {
        self.name.rfind('.').map(|dot| dot + 1)
    }

    /// NFKC form of a field's text when it differs from the text itself
    #[inline]
    pub fn folded(&self, field: Field) -> Option<&FoldedText> {
        match field {
            Field::Name => self.folded_name.as_deref(),
            Field::Path => self.folded_path.as_deref(),
            Field::Extension | Field::Size | Field::Mtime => None,
        }
    }

    /// Value of a numeric field, `None` for text fields
    #[inline]
    pub fn number(&self, field: Field) -> Option<u64> {
        match field {
            Field::Size => Some(self.size),
            Field::Mtime => Some(self.mtime),
            Field::Name | Field::Path | Field::Extension => None,
        }
    }
}

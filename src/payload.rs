//! Clipboard payload: the format-tagged bundle exchanged by both engines.
//!
//! A payload is an insertion-ordered set of `(format, bytes)` items with
//! unique format tags. Engines hold payloads by value; handing one to
//! another component always clones.

use serde::{Deserialize, Serialize};

/// Format tag of a single clipboard item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardFormat {
    Text,
    Rtf,
    Html,
    ImagePng,
    /// Staged file names. Presence of this format makes a transfer
    /// file-bearing: it claims a staging directory.
    FileList,
    FileContents,
}

/// One `(format, bytes)` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipboardItem {
    pub format: ClipboardFormat,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

/// Insertion-ordered clipboard payload with unique format tags.
///
/// Serialized as a plain list of items. Duplicate tags in incoming data
/// collapse to the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<ClipboardItem>", into = "Vec<ClipboardItem>")]
pub struct ClipboardPayload {
    items: Vec<ClipboardItem>,
}

impl ClipboardPayload {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Insert or replace the bytes for `format`.
    ///
    /// Replacing keeps the item's original position.
    pub fn set(&mut self, format: ClipboardFormat, data: Vec<u8>) {
        match self.items.iter_mut().find(|item| item.format == format) {
            Some(item) => item.data = data,
            None => self.items.push(ClipboardItem { format, data }),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, format: ClipboardFormat, data: impl Into<Vec<u8>>) -> Self {
        self.set(format, data.into());
        self
    }

    pub fn exists(&self, format: ClipboardFormat) -> bool {
        self.items.iter().any(|item| item.format == format)
    }

    pub fn get(&self, format: ClipboardFormat) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|item| item.format == format)
            .map(|item| item.data.as_slice())
    }

    /// Whether the payload carries files and so needs a staging directory.
    pub fn has_files(&self) -> bool {
        self.exists(ClipboardFormat::FileList)
    }

    pub fn formats(&self) -> impl Iterator<Item = ClipboardFormat> + '_ {
        self.items.iter().map(|item| item.format)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl From<Vec<ClipboardItem>> for ClipboardPayload {
    fn from(items: Vec<ClipboardItem>) -> Self {
        let mut payload = Self::new();
        for item in items {
            payload.set(item.format, item.data);
        }
        payload
    }
}

impl From<ClipboardPayload> for Vec<ClipboardItem> {
    fn from(payload: ClipboardPayload) -> Self {
        payload.items
    }
}

//! # Attachment Store
//!
//! Holds attachment bytes outside the reducer. The session state only keeps
//! a [`FileId`]; the bytes are looked up when the request is built and
//! released when the turn finishes.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::FilePart;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(Uuid);

impl FileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Attachment {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads a file from disk, guessing the MIME type from its extension.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());
        let mime = guess_mime(path).to_string();
        Ok(Self { name, mime, bytes })
    }
}

impl From<Attachment> for FilePart {
    fn from(attachment: Attachment) -> Self {
        FilePart {
            file_name: attachment.name,
            mime: attachment.mime,
            bytes: attachment.bytes,
        }
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt" | "md") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Default)]
pub struct FileStore {
    files: HashMap<FileId, Attachment>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, attachment: Attachment) -> FileId {
        let id = FileId::new();
        debug!("Stored attachment {} ({})", id, attachment.name);
        self.files.insert(id, attachment);
        id
    }

    pub fn get(&self, id: FileId) -> Option<&Attachment> {
        self.files.get(&id)
    }

    pub fn remove(&mut self, id: FileId) -> Option<Attachment> {
        let removed = self.files.remove(&id);
        if removed.is_some() {
            debug!("Released attachment {}", id);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

//! Reading user-selected files into something a turn can carry: plain text
//! becomes an [`Attachment`], images become `data:` URIs.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use tracing::debug;

use crate::core::message::Attachment;

pub const TEXT_EXTENSIONS: &[&str] = &["txt", "csv", "md"];
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Text,
    Image { mime: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadedAttachment {
    Text(Attachment),
    Image { name: String, data_uri: String },
}

#[derive(Debug)]
pub enum AttachmentError {
    Unsupported { name: String },
    Read { path: PathBuf, source: std::io::Error },
    Decode { name: String, reason: &'static str },
}

impl fmt::Display for AttachmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachmentError::Unsupported { name } => {
                let images: Vec<&str> = IMAGE_TYPES.iter().map(|(ext, _)| *ext).collect();
                write!(
                    f,
                    "Unsupported file type: {name} (text: {}; images: {})",
                    TEXT_EXTENSIONS.join(", "),
                    images.join(", ")
                )
            }
            AttachmentError::Read { path, source } => {
                write!(f, "Failed to read {}: {source}", path.display())
            }
            AttachmentError::Decode { name, reason } => {
                write!(f, "Could not decode {name}: {reason}")
            }
        }
    }
}

impl std::error::Error for AttachmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttachmentError::Read { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Decide how a file would be attached, from its extension alone.
pub fn classify(path: &Path) -> Result<AttachmentKind, AttachmentError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if TEXT_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(AttachmentKind::Text);
    }
    IMAGE_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| AttachmentKind::Image { mime })
        .ok_or_else(|| AttachmentError::Unsupported {
            name: display_name(path),
        })
}

/// Decode file bytes as text.
///
/// A UTF-8 or UTF-16 byte order mark selects the encoding. Without one the
/// bytes are read as UTF-8, falling back to Latin-1. Data with NUL bytes and
/// no BOM is treated as binary and rejected.
pub fn decode_text(name: &str, bytes: &[u8]) -> Result<String, AttachmentError> {
    let decode_error = |reason| AttachmentError::Decode {
        name: name.to_string(),
        reason,
    };

    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8(rest.to_vec()).map_err(|_| decode_error("invalid UTF-8"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes).ok_or_else(|| decode_error("invalid UTF-16"));
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes).ok_or_else(|| decode_error("invalid UTF-16"));
    }
    if memchr::memchr(0, bytes).is_some() {
        return Err(decode_error("file looks binary"));
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).ok()
}

pub fn image_data_uri(mime: &str, bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Turn already-read file bytes into an attachment, using `path` for the
/// name and type.
pub fn load_from_bytes(path: &Path, bytes: &[u8]) -> Result<LoadedAttachment, AttachmentError> {
    let name = display_name(path);
    match classify(path)? {
        AttachmentKind::Text => {
            let content = decode_text(&name, bytes)?;
            Ok(LoadedAttachment::Text(Attachment::new(name, content)))
        }
        AttachmentKind::Image { mime } => Ok(LoadedAttachment::Image {
            data_uri: image_data_uri(mime, bytes),
            name,
        }),
    }
}

#[async_trait::async_trait]
pub trait AttachmentReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<LoadedAttachment, AttachmentError>;
}

/// Reads attachments from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsAttachmentReader;

#[async_trait::async_trait]
impl AttachmentReader for FsAttachmentReader {
    async fn read(&self, path: &Path) -> Result<LoadedAttachment, AttachmentError> {
        // Reject before touching the disk.
        classify(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| AttachmentError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read attachment");
        load_from_bytes(path, &bytes)
    }
}

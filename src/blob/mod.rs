//! Image blob storage
//!
//! Uploads are validated into an [`ImageUpload`] before they reach a
//! [`BlobStore`]. Stored images are addressed by a pathname of the form
//! `glacier-images/{unix_millis}-{file name}`.

pub mod fs;
pub mod http;

pub use self::fs::FsBlobStore;
pub use self::http::HttpBlobStore;

use crate::error::BlobError;
use crate::records::Timestamp;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

/// Largest accepted upload, 50 MiB
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Directory prefix for every stored image
pub const IMAGE_PREFIX: &str = "glacier-images";

/// A validated image upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    file_name: String,
    content_type: &'static str,
    bytes: Vec<u8>,
}

impl ImageUpload {
    /// Validate an upload
    ///
    /// The file must be non-empty, at most [`MAX_UPLOAD_BYTES`] long and
    /// carry an image extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, BlobError> {
        let file_name = file_name.into();

        if bytes.is_empty() {
            return Err(BlobError::InvalidImage(format!("{} is empty", file_name)));
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(BlobError::InvalidImage(format!(
                "{} is {} bytes, limit is {}",
                file_name,
                bytes.len(),
                MAX_UPLOAD_BYTES
            )));
        }
        let content_type = content_type_for(&file_name).ok_or_else(|| {
            BlobError::InvalidImage(format!("{} is not a supported image type", file_name))
        })?;

        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Read and validate an image file from disk
    pub fn from_path(path: &Path) -> Result<Self, BlobError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                BlobError::InvalidImage(format!("{} has no usable file name", path.display()))
            })?
            .to_string();
        let bytes = std::fs::read(path)?;
        Self::new(file_name, bytes)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// MIME type for a supported image extension
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let extension = Path::new(file_name)
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

/// Storage pathname for an upload made at `now`
///
/// Characters outside `[A-Za-z0-9._-]` in the file name become `_`.
pub fn blob_pathname(file_name: &str, now: Timestamp) -> String {
    let sanitized: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}-{}", IMAGE_PREFIX, now.timestamp_millis(), sanitized)
}

/// Where an upload ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    /// Public URL of the stored image
    pub url: String,
    pub pathname: String,
    pub size: usize,
}

pub type BlobFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BlobError>> + Send + 'a>>;

/// Trait for image storage implementations
pub trait BlobStore: Send + Sync {
    fn put<'a>(&'a self, pathname: &'a str, upload: &'a ImageUpload) -> BlobFuture<'a, StoredBlob>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_upload_accepts_images() {
        let upload = ImageUpload::new("Franz-Josef.JPG", vec![0xFF, 0xD8, 0xFF]).unwrap();
        assert_eq!(upload.content_type(), "image/jpeg");
        assert_eq!(upload.len(), 3);

        for name in ["a.png", "b.gif", "c.webp", "d.tif", "e.TIFF", "f.jpeg"] {
            assert!(ImageUpload::new(name, vec![1]).is_ok(), "{} rejected", name);
        }
    }

    #[test]
    fn test_upload_rejects_non_images() {
        for name in ["notes.txt", "archive.zip", "no_extension", ".png.exe"] {
            assert!(matches!(
                ImageUpload::new(name, vec![1]),
                Err(BlobError::InvalidImage(_))
            ));
        }
    }

    #[test]
    fn test_upload_rejects_empty_and_oversized() {
        assert!(matches!(
            ImageUpload::new("a.png", Vec::new()),
            Err(BlobError::InvalidImage(_))
        ));
        assert!(ImageUpload::new("a.png", vec![0; MAX_UPLOAD_BYTES]).is_ok());
        assert!(matches!(
            ImageUpload::new("a.png", vec![0; MAX_UPLOAD_BYTES + 1]),
            Err(BlobError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_blob_pathname() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(
            blob_pathname("perito moreno (2024).png", now),
            "glacier-images/1700000000123-perito_moreno__2024_.png"
        );
        assert_eq!(
            blob_pathname("../../etc/passwd.png", now),
            "glacier-images/1700000000123-.._.._etc_passwd.png"
        );
    }

    #[test]
    fn test_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aletsch.png");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let upload = ImageUpload::from_path(&path).unwrap();
        assert_eq!(upload.file_name(), "aletsch.png");
        assert_eq!(upload.bytes(), &[1, 2, 3]);

        assert!(matches!(
            ImageUpload::from_path(&dir.path().join("missing.png")),
            Err(BlobError::Io(_))
        ));
    }
}

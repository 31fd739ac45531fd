use crate::blob::{BlobFuture, BlobStore, ImageUpload, StoredBlob};
use crate::error::BlobError;
use log::debug;
use std::path::{Component, Path, PathBuf};

/// Stores images under a local directory
///
/// URLs point at `public_base` when one is configured, otherwise at the
/// written file as a `file://` URL.
pub struct FsBlobStore {
    root: PathBuf,
    public_base: Option<String>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_base: None,
        }
    }

    pub fn with_public_base(mut self, public_base: impl Into<String>) -> Self {
        self.public_base = Some(public_base.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_path(&self, pathname: &str) -> Result<PathBuf, BlobError> {
        let relative = Path::new(pathname);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !safe || pathname.is_empty() {
            return Err(BlobError::Rejected(format!(
                "pathname '{}' escapes the blob root",
                pathname
            )));
        }
        Ok(self.root.join(relative))
    }

    fn url_for(&self, pathname: &str, path: &Path) -> String {
        match &self.public_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), pathname),
            None => format!("file://{}", path.display()),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn put<'a>(&'a self, pathname: &'a str, upload: &'a ImageUpload) -> BlobFuture<'a, StoredBlob> {
        Box::pin(async move {
            let path = self.target_path(pathname)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, upload.bytes()).await?;

            let canonical = tokio::fs::canonicalize(&path).await.ok();
            let path = canonical.unwrap_or(path);
            debug!("Stored {} bytes at {}", upload.len(), path.display());

            Ok(StoredBlob {
                url: self.url_for(pathname, &path),
                pathname: pathname.to_string(),
                size: upload.len(),
            })
        })
    }
}

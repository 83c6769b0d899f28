//! Storage for uploaded sighting photos.
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Turns raw upload bytes into a stable reference string.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, bytes: &[u8], ext: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    fn from_ext(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            _ => None,
        }
    }

    fn magic(&self) -> &'static [u8] {
        match self {
            ImageKind::Jpeg => &[0xFF, 0xD8, 0xFF],
            ImageKind::Png => &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
        }
    }
}

/// Writes each upload to its own file under one directory.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn store(&self, bytes: &[u8], ext: &str) -> Result<String> {
        let kind = ImageKind::from_ext(ext)
            .ok_or_else(|| anyhow::anyhow!("unsupported file type '{}'", ext))?;

        if bytes.is_empty() {
            anyhow::bail!("empty image upload");
        }
        if !bytes.starts_with(kind.magic()) {
            anyhow::bail!("image content does not match extension '{}'", ext);
        }

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create storage directory {:?}", self.root))?;

        let file_path = self
            .root
            .join(format!("{}.{}", uuid::Uuid::now_v7(), kind.extension()));
        fs::write(&file_path, bytes)
            .await
            .with_context(|| format!("Failed to write image {:?}", file_path))?;

        tracing::debug!("Stored {} byte image at {:?}", bytes.len(), file_path);
        Ok(file_path.to_string_lossy().to_string())
    }
}

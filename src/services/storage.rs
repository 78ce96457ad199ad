//! On-disk storage
//!
//! Blueprint contents live in `{blueprints_dir}/{file_id}-{version}.txt`.
//! Avatars and thumbnails live under `{medias_dir}/avatars` and
//! `{medias_dir}/thumbnails` and are served as `/medias/...`.

use anyhow::{bail, Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// A file id or media name is safe when it cannot escape its directory
fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !name.starts_with('.')
}

/// Version contents of every blueprint
#[derive(Debug, Clone)]
pub struct BlueprintStorage {
    root: PathBuf,
}

impl BlueprintStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, file_id: &str, version: i64) -> Result<PathBuf> {
        if !is_safe_name(file_id) || file_id.contains('.') {
            bail!("Invalid blueprint file id: {:?}", file_id);
        }
        Ok(self.root.join(format!("{}-{}.txt", file_id, version)))
    }

    pub async fn write(&self, file_id: &str, version: i64, content: &str) -> Result<()> {
        let path = self.path(file_id, version)?;
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create directory {:?}", self.root))?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write blueprint file {:?}", path))
    }

    /// `None` when the file is missing
    pub async fn read(&self, file_id: &str, version: i64) -> Result<Option<String>> {
        let path = self.path(file_id, version)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read blueprint file {:?}", path)),
        }
    }

    /// Deleting a missing file is not an error
    pub async fn delete(&self, file_id: &str, version: i64) -> Result<()> {
        let path = self.path(file_id, version)?;
        remove_if_exists(&path).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Avatar,
    Thumbnail,
}

impl MediaKind {
    fn dir(&self) -> &'static str {
        match self {
            MediaKind::Avatar => "avatars",
            MediaKind::Thumbnail => "thumbnails",
        }
    }
}

/// File extension for an accepted image content type
pub fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Uploaded images
#[derive(Debug, Clone)]
pub struct MediaStorage {
    root: PathBuf,
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an image and return its name relative to the medias root,
    /// e.g. `avatars/0f7c...png`.
    pub async fn save(&self, kind: MediaKind, data: &[u8], content_type: &str) -> Result<String> {
        let Some(ext) = image_extension(content_type) else {
            bail!("Unsupported image type: {}", content_type);
        };

        let dir = self.root.join(kind.dir());
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        fs::write(dir.join(&filename), data)
            .await
            .with_context(|| format!("Failed to save media {}", filename))?;

        Ok(format!("{}/{}", kind.dir(), filename))
    }

    /// Remove a previously saved image; unknown or unsafe names are ignored
    pub async fn delete(&self, relative: &str) -> Result<()> {
        let Some((dir, name)) = relative.split_once('/') else {
            return Ok(());
        };
        if ![MediaKind::Avatar.dir(), MediaKind::Thumbnail.dir()].contains(&dir) || !is_safe_name(name) {
            tracing::warn!("Refusing to delete media outside storage: {}", relative);
            return Ok(());
        }
        remove_if_exists(&self.root.join(dir).join(name)).await
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {:?}", path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_blueprint_files() {
        let dir = TempDir::new().unwrap();
        let storage = BlueprintStorage::new(dir.path().join("blueprints"));

        storage.write("abc123", 1, "Begin Object\nEnd Object").await.unwrap();
        storage.write("abc123", 2, "Begin Object\nX\nEnd Object").await.unwrap();

        assert_eq!(
            storage.read("abc123", 1).await.unwrap().as_deref(),
            Some("Begin Object\nEnd Object")
        );
        assert!(dir.path().join("blueprints/abc123-2.txt").exists());

        storage.delete("abc123", 2).await.unwrap();
        storage.delete("abc123", 2).await.unwrap();
        assert_eq!(storage.read("abc123", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_blueprint_file_id_must_be_safe() {
        let dir = TempDir::new().unwrap();
        let storage = BlueprintStorage::new(dir.path());

        assert!(storage.write("../escape", 1, "x").await.is_err());
        assert!(storage.read("a/b", 1).await.is_err());
        assert!(storage.read("", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_media_save_and_delete() {
        let dir = TempDir::new().unwrap();
        let storage = MediaStorage::new(dir.path());

        let name = storage
            .save(MediaKind::Avatar, b"\x89PNG", "image/png")
            .await
            .unwrap();
        assert!(name.starts_with("avatars/"));
        assert!(name.ends_with(".png"));
        assert!(dir.path().join(&name).exists());

        storage.delete(&name).await.unwrap();
        assert!(!dir.path().join(&name).exists());

        assert!(storage.save(MediaKind::Thumbnail, b"x", "text/html").await.is_err());
        storage.delete("../../etc/passwd").await.unwrap();
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(image_extension("image/jpeg"), Some("jpg"));
        assert_eq!(image_extension("image/webp; charset=binary"), Some("webp"));
        assert_eq!(image_extension("image/svg+xml"), None);
    }
}

//! Spool of images sent to the controlling room, waiting to be attached to
//! the sender's next post.
//!
//! File names are SHA-256 hashes of the user and event IDs, so nothing a
//! chat user controls ends up in a path.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tokio::fs;

/// Hard cap for any stored image, whatever the service allows.
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageSizeError {
    #[error("Image too large for Mastodon. Please shrink to below {0} bytes")]
    ServiceLimit(u64),
    #[error("Image is too large. Please shrink to below {0} bytes")]
    HardLimit(u64),
}

pub fn check_image_size(size: u64, service_limit: u64) -> Result<(), ImageSizeError> {
    if size > service_limit {
        return Err(ImageSizeError::ServiceLimit(service_limit));
    }
    if size > MAX_IMAGE_BYTES {
        return Err(ImageSizeError::HardLimit(MAX_IMAGE_BYTES));
    }
    Ok(())
}

/// Per-user image directories below a private temporary directory that is
/// removed on drop.
pub struct ImageStore {
    dir: TempDir,
    count_limit: usize,
}

impl ImageStore {
    pub fn create(parent: &Path, count_limit: usize) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("feedroom")
            .tempdir_in(parent)
            .with_context(|| format!("Failed to create image dir in {}", parent.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))
                .context("Failed to restrict image dir permissions")?;
        }

        Ok(Self { dir, count_limit })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn user_dir(&self, user: &str) -> PathBuf {
        self.dir.path().join(sha256_hex(user))
    }

    pub fn image_path(&self, user: &str, event_id: &str) -> PathBuf {
        self.user_dir(user).join(sha256_hex(event_id))
    }

    /// Store an image for `user`. Fails once the user has `count_limit` images.
    pub async fn save(&self, user: &str, event_id: &str, bytes: &[u8]) -> Result<PathBuf> {
        let user_dir = self.user_dir(user);
        fs::create_dir_all(&user_dir)
            .await
            .with_context(|| format!("Failed to create {}", user_dir.display()))?;

        if self.stored_count(&user_dir).await? >= self.count_limit {
            bail!("Too many files stored. {} is the limit.", self.count_limit);
        }

        let path = self.image_path(user, event_id);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move image into {}", path.display()))?;
        Ok(path)
    }

    /// Remove one image. Returns whether it existed.
    pub async fn remove(&self, user: &str, event_id: &str) -> Result<bool> {
        match fs::remove_file(self.image_path(user, event_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to delete image"),
        }
    }

    /// Stored images of `user`, at most `count_limit` of them.
    pub async fn images_for(&self, user: &str) -> Result<Vec<PathBuf>> {
        let mut entries = match fs::read_dir(self.user_dir(user)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to list user images"),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none() {
                images.push(path);
            }
        }
        images.sort();
        images.truncate(self.count_limit);
        Ok(images)
    }

    pub async fn clear_user(&self, user: &str) -> Result<()> {
        match fs::remove_dir_all(self.user_dir(user)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e).context("Failed to clear user images"),
            _ => Ok(()),
        }
    }

    async fn stored_count(&self, user_dir: &Path) -> Result<usize> {
        let mut entries = fs::read_dir(user_dir).await?;
        let mut count = 0;
        while entries.next_entry().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

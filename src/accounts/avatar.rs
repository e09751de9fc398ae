//! Avatar file cleanup.
//!
//! Records only hold a path. When an avatar is replaced or its owner purged,
//! the old file is removed on the task pool, and only if it lives under the
//! configured uploads directory.

use std::io;
use std::path::{Component, Path, PathBuf};

use crate::tasks::{SubmitError, TaskPool};

#[derive(Debug, Clone, Default)]
pub struct AvatarFiles {
    root: Option<PathBuf>,
}

impl AvatarFiles {
    /// `None` disables deletion entirely.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.map(|r| clean(&r)).filter(|r| !r.as_os_str().is_empty()),
        }
    }

    /// The file an avatar path refers to, if it may be deleted.
    pub fn resolve(&self, avatar: &str) -> Option<PathBuf> {
        let root = self.root.as_ref()?;
        let avatar = avatar.trim();
        if avatar.is_empty() {
            return None;
        }

        let path = Path::new(avatar);
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return None;
        }
        let path = clean(path);
        (path.starts_with(root) && path != *root).then_some(path)
    }

    /// Queue removal of `avatar` on the pool. Paths outside the uploads
    /// directory are left alone and reported as done.
    pub fn remove_later(&self, pool: &TaskPool, avatar: &str) -> Result<(), SubmitError> {
        let Some(path) = self.resolve(avatar) else {
            if !avatar.trim().is_empty() {
                tracing::debug!(avatar = %avatar, "Avatar outside uploads dir, keeping file");
            }
            return Ok(());
        };

        pool.submit_as("avatar_cleanup", async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Old avatar removed"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to remove old avatar"
                ),
            }
        })
    }
}

fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

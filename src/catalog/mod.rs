use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

pub mod clip_name;

pub use clip_name::clip_bounds_from_title;

/// One entry of a catalog folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Opaque reference an external player can resolve to the media
    pub media_ref: String,
    /// Display name, expected to follow the clip name format
    pub title: String,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    /// The browsed path does not exist; normal for days without detections
    #[error("catalog path not found: {0}")]
    NotFound(String),

    /// The catalog could not be reached; retried by the resolver schedule
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    /// The media behind a reference exists but cannot be read back
    #[error("media unreadable: {0}")]
    MediaUnreadable(String),
}

/// Listing access to the remote media catalog.
///
/// The feed never touches media bytes; it browses folder listings and has a
/// matched reference validated before linking it.
#[async_trait]
pub trait CatalogBrowser: Send + Sync {
    /// List the children of a folder path like
    /// `Front Door/Low resolution/2025/6/14/Person`
    async fn list_children(&self, path: &str) -> Result<Vec<CatalogEntry>, CatalogError>;

    /// Check that the media behind a reference can actually be served
    async fn validate_media(&self, media_ref: &str) -> Result<(), CatalogError>;
}

/// Catalog browser over a local recording tree, laid out the way cameras
/// export clips: `<camera>/<tier>/<year>/<month>/<day>/<label>/<clip>`
pub struct FsCatalogBrowser {
    root: PathBuf,
}

impl FsCatalogBrowser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, CatalogError> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CatalogError::NotFound(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl CatalogBrowser for FsCatalogBrowser {
    async fn list_children(&self, path: &str) -> Result<Vec<CatalogEntry>, CatalogError> {
        let folder = self.resolve(path)?;
        if !folder.is_dir() {
            return Err(CatalogError::NotFound(path.to_string()));
        }

        let mut reader = tokio::fs::read_dir(&folder)
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", folder.display(), e)))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("{}: {}", folder.display(), e)))?
        {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            let title = Path::new(name.as_ref())
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone().into_owned());

            entries.push(CatalogEntry {
                media_ref: format!("{}/{}", path, name),
                title,
            });
        }

        entries.sort_by(|a, b| a.media_ref.cmp(&b.media_ref));
        Ok(entries)
    }

    async fn validate_media(&self, media_ref: &str) -> Result<(), CatalogError> {
        let file = self.resolve(media_ref)?;
        let meta = tokio::fs::metadata(&file)
            .await
            .map_err(|e| CatalogError::MediaUnreadable(format!("{}: {}", file.display(), e)))?;

        if !meta.is_file() || meta.len() == 0 {
            return Err(CatalogError::MediaUnreadable(format!(
                "{}: empty or not a file",
                file.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_folder_reports_not_found() {
        let dir = std::env::temp_dir().join(format!("catalog-test-{}", uuid::Uuid::new_v4()));
        let browser = FsCatalogBrowser::new(&dir);

        let err = browser
            .list_children("Cam/Low resolution/2025/6/14/Person")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }

    #[tokio::test]
    async fn lists_clip_entries_with_titles() {
        let dir = std::env::temp_dir().join(format!("catalog-test-{}", uuid::Uuid::new_v4()));
        let folder = dir.join("Cam/Low resolution/2025/6/14/Person");
        tokio::fs::create_dir_all(&folder).await.unwrap();
        tokio::fs::write(folder.join("14:23:05 0:00:21 Person.mp4"), b"clip")
            .await
            .unwrap();

        let browser = FsCatalogBrowser::new(&dir);
        let entries = browser
            .list_children("Cam/Low resolution/2025/6/14/Person")
            .await
            .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "14:23:05 0:00:21 Person");
        assert!(entries[0].media_ref.ends_with(".mp4"));

        browser.validate_media(&entries[0].media_ref).await.unwrap();
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn empty_media_fails_validation() {
        let dir = std::env::temp_dir().join(format!("catalog-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("broken.mp4"), b"").await.unwrap();

        let browser = FsCatalogBrowser::new(&dir);
        let err = browser.validate_media("broken.mp4").await.unwrap_err();
        assert!(matches!(err, CatalogError::MediaUnreadable(_)));
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn path_escapes_are_rejected() {
        let browser = FsCatalogBrowser::new("/tmp");
        let err = browser.list_children("../etc").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// Key → file lookup the controller loads and saves through. The engine
/// treats it as an opaque directory; implementations decide the layout.
pub trait AssetResolver: Send + Sync {
    fn image_path(&self, key: &str) -> Result<PathBuf>;
    fn annotation_path(&self, key: &str) -> Result<PathBuf>;

    fn annotation_exists(&self, key: &str) -> bool {
        self.annotation_path(key).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Reject ids that are not a plain `*.png` file name.
pub fn validate_image_id(id: &str) -> Result<()> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    let stem_len = id.len().saturating_sub(".png".len());
    if !valid_chars || !id.ends_with(".png") || stem_len == 0 || id.contains("..") {
        return Err(EngineError::InvalidImageId(id.to_string()));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    pub has_label: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LibraryStats {
    pub images: usize,
    pub labeled: usize,
    pub unlabeled: usize,
}

// ============================================================================
// DIRECTORY LIBRARY
// ============================================================================

/// `<root>/images/<id>` paired with `<root>/annotations/<id>`.
#[derive(Clone, Debug)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open `root`, creating the two sub-directories if missing.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let lib = Self::new(root);
        fs::create_dir_all(lib.images_dir())?;
        fs::create_dir_all(lib.annotations_dir())?;
        Ok(lib)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    pub fn annotations_dir(&self) -> PathBuf {
        self.root.join("annotations")
    }

    /// Every image id, sorted, with whether an annotation exists for it.
    pub fn list_images(&self) -> Result<Vec<ImageInfo>> {
        let labels = list_png(&self.annotations_dir())?;
        let images = list_png(&self.images_dir())?
            .into_iter()
            .map(|id| ImageInfo {
                has_label: labels.binary_search(&id).is_ok(),
                id,
            })
            .collect();
        Ok(images)
    }

    /// First image without an annotation, in id order.
    pub fn next_unlabeled(&self) -> Result<Option<String>> {
        Ok(self
            .list_images()?
            .into_iter()
            .find(|info| !info.has_label)
            .map(|info| info.id))
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        let images = self.list_images()?;
        let labeled = images.iter().filter(|i| i.has_label).count();
        Ok(LibraryStats {
            images: images.len(),
            labeled,
            unlabeled: images.len() - labeled,
        })
    }
}

impl AssetResolver for DirectoryLibrary {
    fn image_path(&self, key: &str) -> Result<PathBuf> {
        validate_image_id(key)?;
        Ok(self.images_dir().join(key))
    }

    fn annotation_path(&self, key: &str) -> Result<PathBuf> {
        validate_image_id(key)?;
        Ok(self.annotations_dir().join(key))
    }
}

/// Sorted `*.png` file names in `dir`. A missing directory is empty.
pub(crate) fn list_png(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if validate_image_id(name).is_ok() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

//! Clip resolution: path -> owned readable stream
//!
//! Relative paths are looked up below an asset root (a leading `assets/` is
//! dropped), absolute paths are handed to the engine untouched.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use clip_core::{ClipError, ClipResult};

/// Prefix callers commonly keep on packaged asset paths
const ASSETS_PREFIX: &str = "assets/";

/// Where an opened clip lives
#[derive(Debug)]
pub enum ClipLocator {
    /// Open descriptor; closed when the stream is dropped
    Descriptor { file: File, offset: u64, length: u64 },
    /// Path the engine resolves itself
    Uri(PathBuf),
}

/// An opened clip, owned by its session for the session's whole life
#[derive(Debug)]
pub struct ClipStream {
    path: String,
    locator: ClipLocator,
}

impl ClipStream {
    pub fn from_file(path: impl Into<String>, file: File, offset: u64, length: u64) -> Self {
        Self {
            path: path.into(),
            locator: ClipLocator::Descriptor {
                file,
                offset,
                length,
            },
        }
    }

    pub fn from_uri(path: impl Into<String>, uri: PathBuf) -> Self {
        Self {
            path: path.into(),
            locator: ClipLocator::Uri(uri),
        }
    }

    /// Path as the caller requested it
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn locator(&self) -> &ClipLocator {
        &self.locator
    }

    /// Byte length when known (descriptor-backed streams only)
    pub fn length(&self) -> Option<u64> {
        match &self.locator {
            ClipLocator::Descriptor { length, .. } => Some(*length),
            ClipLocator::Uri(_) => None,
        }
    }
}

/// Opaque "open clip by path" capability
pub trait AssetSource: Send + Sync {
    fn open(&self, path: &str) -> ClipResult<ClipStream>;
}

/// Asset source rooted at a directory
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> ClipResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ClipError::AssetNotFound(root.display().to_string()));
        }
        Ok(Self { root })
    }
}

impl AssetSource for DirAssetSource {
    fn open(&self, path: &str) -> ClipResult<ClipStream> {
        if path.is_empty() {
            return Err(ClipError::AssetNotFound(String::new()));
        }
        if Path::new(path).is_absolute() {
            return Ok(ClipStream::from_uri(path, PathBuf::from(path)));
        }

        let relative = path.strip_prefix(ASSETS_PREFIX).unwrap_or(path);
        let full = self.root.join(relative);
        let file = File::open(&full).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ClipError::AssetNotFound(path.to_string()),
            _ => ClipError::Io(e),
        })?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(ClipError::AssetNotFound(path.to_string()));
        }

        log::trace!("[Assets] opened {} ({} bytes)", full.display(), metadata.len());
        Ok(ClipStream::from_file(path, file, 0, metadata.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("click.ogg"), b"OggS-not-really").unwrap();
        std::fs::create_dir(dir.path().join("sfx")).unwrap();
        dir
    }

    #[test]
    fn test_open_relative() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path()).unwrap();
        let stream = source.open("click.ogg").unwrap();
        assert_eq!(stream.path(), "click.ogg");
        assert_eq!(stream.length(), Some(15));
        assert!(matches!(stream.locator(), ClipLocator::Descriptor { offset: 0, .. }));
    }

    #[test]
    fn test_assets_prefix_is_stripped() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path()).unwrap();
        let stream = source.open("assets/click.ogg").unwrap();
        assert_eq!(stream.path(), "assets/click.ogg");
        assert_eq!(stream.length(), Some(15));
    }

    #[test]
    fn test_missing_asset() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path()).unwrap();
        assert!(matches!(source.open("nope.ogg"), Err(ClipError::AssetNotFound(_))));
        assert!(matches!(source.open(""), Err(ClipError::AssetNotFound(_))));
        assert!(matches!(source.open("sfx"), Err(ClipError::AssetNotFound(_))));
    }

    #[test]
    fn test_absolute_path_passes_through() {
        let dir = asset_dir();
        let source = DirAssetSource::new(dir.path()).unwrap();
        let absolute = dir.path().join("elsewhere.ogg");
        let stream = source.open(absolute.to_str().unwrap()).unwrap();
        assert!(matches!(stream.locator(), ClipLocator::Uri(p) if *p == absolute));
        assert_eq!(stream.length(), None);
    }

    #[test]
    fn test_root_must_exist() {
        assert!(DirAssetSource::new("/definitely/not/here").is_err());
    }
}

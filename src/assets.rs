// src/assets.rs

//! Pixel data for the static-texture benchmarks.
//!
//! Assets are raw dumps (or block-compressed images) named by the benchmark
//! that uploads them. `DataDirectory` reads them from disk; `SyntheticAssets`
//! produces correctly sized placeholder data so the suite can run on a
//! machine without the data files.

use crate::device::PixelFormat;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Installed location of the data files.
pub const SYSTEM_DATA_DIR: &str = "/usr/share/glmemperf/data";

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("asset {path} holds {actual} bytes, {expected} needed for {width}x{height} {format}")]
    Truncated {
        path: PathBuf,
        width: u32,
        height: u32,
        format: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("data directory {0} does not exist")]
    MissingDirectory(PathBuf),
}

/// Source of texture data by file name.
pub trait AssetSource {
    /// Loads `file` holding a `width` x `height` image in `format`.
    fn load(
        &self,
        file: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, AssetError>;

    /// Where the data comes from, for the log.
    fn describe(&self) -> String;
}

/// Asset files under a directory on disk.
#[derive(Debug, Clone)]
pub struct DataDirectory {
    root: PathBuf,
}

impl DataDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DataDirectory { root: root.into() }
    }

    /// Finds the data directory: the explicit path if given, else `./data`,
    /// else the installed location. An explicit path must exist.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<Self>, AssetError> {
        if let Some(path) = explicit {
            if !path.is_dir() {
                return Err(AssetError::MissingDirectory(path.to_path_buf()));
            }
            return Ok(Some(DataDirectory::new(path)));
        }
        Ok([Path::new("data"), Path::new(SYSTEM_DATA_DIR)]
            .into_iter()
            .find(|p| p.is_dir())
            .map(DataDirectory::new))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for DataDirectory {
    fn load(
        &self,
        file: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, AssetError> {
        let path = self.root.join(file);
        let data = fs::read(&path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?;
        let expected = format.data_size(width, height);
        if data.len() < expected {
            return Err(AssetError::Truncated {
                path,
                width,
                height,
                format: format.name(),
                expected,
                actual: data.len(),
            });
        }
        debug!("Loaded {} ({} bytes)", path.display(), data.len());
        Ok(data)
    }

    fn describe(&self) -> String {
        format!("data directory {}", self.root.display())
    }
}

/// Generated stand-ins for the data files.
///
/// Uncompressed formats get an `x ^ y` pattern; block formats get a fixed
/// byte pattern of the exact compressed size.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticAssets;

impl AssetSource for SyntheticAssets {
    fn load(
        &self,
        file: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Vec<u8>, AssetError> {
        let size = format.data_size(width, height);
        let data = match format.bytes_per_pixel() {
            Some(bpp) => {
                let mut data = Vec::with_capacity(size);
                for y in 0..height {
                    for x in 0..width {
                        let v = (x ^ y) as u8;
                        data.extend(std::iter::repeat(v).take(bpp));
                    }
                }
                data
            }
            None => (0..size).map(|i| (i % 251) as u8).collect(),
        };
        info!("Synthesized {} ({}x{} {})", file, width, height, format.name());
        Ok(data)
    }

    fn describe(&self) -> String {
        "synthetic placeholder data".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("glmemperf-assets-{}-{}", tag, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_synthetic_assets_have_exact_size() {
        let assets = SyntheticAssets;
        let rgb = assets.load("x.raw", 127, 127, PixelFormat::Rgb565).unwrap();
        assert_eq!(rgb.len(), 127 * 127 * 2);
        let etc = assets.load("x.raw", 128, 128, PixelFormat::Etc1).unwrap();
        assert_eq!(etc.len(), PixelFormat::Etc1.data_size(128, 128));
    }

    #[test]
    fn test_data_directory_reads_and_validates() {
        let dir = scratch_dir("read");
        fs::write(dir.join("ok.raw"), vec![7u8; 4 * 4 * 2]).unwrap();
        fs::write(dir.join("short.raw"), vec![7u8; 3]).unwrap();
        let assets = DataDirectory::new(&dir);

        let data = assets.load("ok.raw", 4, 4, PixelFormat::Rgb565).unwrap();
        assert_eq!(data.len(), 32);
        assert!(matches!(
            assets.load("short.raw", 4, 4, PixelFormat::Rgb565),
            Err(AssetError::Truncated { expected: 32, actual: 3, .. })
        ));
        assert!(matches!(
            assets.load("missing.raw", 4, 4, PixelFormat::Rgb565),
            Err(AssetError::Io { .. })
        ));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_locate_prefers_explicit_directory() {
        let dir = scratch_dir("locate");
        let found = DataDirectory::locate(Some(&dir)).unwrap().unwrap();
        assert_eq!(found.root(), dir.as_path());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_explicit_directory_is_an_error() {
        let dir = scratch_dir("missing").join("nope");
        match DataDirectory::locate(Some(&dir)) {
            Err(AssetError::MissingDirectory(path)) => assert_eq!(path, dir),
            other => panic!("expected MissingDirectory, got {:?}", other.map(|d| d.is_some())),
        }
        fs::remove_dir_all(dir.parent().unwrap()).unwrap();
        fs::remove_dir_all(&dir).unwrap();
    }
}

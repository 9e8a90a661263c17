// src/config.rs

//! Run options.
//!
//! Options come from three layers: the defaults below, an optional JSON
//! file, and command-line flags. Every field has a default, so a file only
//! needs the settings it changes.

use crate::device::Capabilities;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read options file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported pixel depth {0}, expected 16 or 32")]
    BitsPerPixel(u32),
    #[error("window size {0}x{1} is empty")]
    WindowSize(u32, u32),
}

/// Which `GraphicsDevice` implementation the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// X11 window with an EGL context.
    Egl,
    /// In-process recording device.
    Headless,
}

impl Default for DriverKind {
    fn default() -> Self {
        #[cfg(use_egl_display)]
        {
            DriverKind::Egl
        }
        #[cfg(not(use_egl_display))]
        {
            DriverKind::Headless
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    /// Window surface depth; also the depth of the first pixmap blit.
    pub bits_per_pixel: u32,
    pub verbose: bool,
    /// Minimum measured time per benchmark.
    pub min_time_secs: u64,
    pub list_only: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub window_width: u32,
    pub window_height: u32,
    /// Asset directory. Searched for when unset.
    pub data_dir: Option<PathBuf>,
    pub driver: DriverKind,
    /// What the headless device advertises. Lets a dry run exercise the
    /// skip paths of missing extensions.
    pub headless_capabilities: Capabilities,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            bits_per_pixel: 16,
            verbose: false,
            min_time_secs: 1,
            list_only: false,
            include: Vec::new(),
            exclude: Vec::new(),
            window_width: 800,
            window_height: 480,
            data_dir: None,
            driver: DriverKind::default(),
            headless_capabilities: Capabilities::all(),
        }
    }
}

impl Options {
    /// Reads options from a JSON file; missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let options: Options =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.bits_per_pixel, 16 | 32) {
            return Err(ConfigError::BitsPerPixel(self.bits_per_pixel));
        }
        if self.window_width == 0 || self.window_height == 0 {
            return Err(ConfigError::WindowSize(self.window_width, self.window_height));
        }
        Ok(())
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_secs(self.min_time_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "glmemperf-{}-{}.json",
            name,
            std::process::id()
        ));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.bits_per_pixel, 16);
        assert_eq!(options.min_duration(), Duration::from_secs(1));
        assert_eq!((options.window_width, options.window_height), (800, 480));
        assert!(options.include.is_empty() && options.exclude.is_empty());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = write_temp(
            "partial",
            r#"{ "bits_per_pixel": 32, "exclude": ["cpu"], "driver": "headless" }"#,
        );
        let options = Options::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(options.bits_per_pixel, 32);
        assert_eq!(options.exclude, vec!["cpu".to_string()]);
        assert_eq!(options.driver, DriverKind::Headless);
        assert_eq!(options.min_time_secs, 1);
        assert_eq!(options.headless_capabilities, Capabilities::all());
    }

    #[test]
    fn test_headless_capabilities_from_flag_names() {
        let path = write_temp(
            "caps",
            r#"{ "headless_capabilities": "SHM_IMAGE | TEXTURE_FROM_PIXMAP" }"#,
        );
        let options = Options::load(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(
            options.headless_capabilities,
            Capabilities::SHM_IMAGE | Capabilities::TEXTURE_FROM_PIXMAP
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        let path = write_temp("depth", r#"{ "bits_per_pixel": 24 }"#);
        let err = Options::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::BitsPerPixel(24)));

        let path = write_temp("syntax", "{ bits_per_pixel");
        let err = Options::load(&path).unwrap_err();
        fs::remove_file(&path).unwrap();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let missing = Path::new("/nonexistent/glmemperf.json");
        assert!(matches!(
            Options::load(missing).unwrap_err(),
            ConfigError::Read { .. }
        ));
    }
}

//! Live parameter access.
//!
//! The capture loop re-reads the configured device path on every
//! iteration, so a corrected or swapped path takes effect without a
//! restart. Sources implement [`ParamSource`].

use crate::capture::{ConfigError, FileConfig};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A re-readable view of the live configuration.
pub trait ParamSource {
    /// Returns the currently configured device path, if one is set.
    fn device_path(&self) -> Option<String>;
}

/// Parameters that never change.
#[derive(Debug, Clone)]
pub struct StaticParams {
    device_path: String,
}

impl StaticParams {
    /// Always reports `device_path`.
    pub fn new(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
        }
    }
}

impl ParamSource for StaticParams {
    fn device_path(&self) -> Option<String> {
        Some(self.device_path.clone())
    }
}

/// Reads `[camera] video_device` from a TOML file.
///
/// The file is re-parsed only when its modification time changes. If the
/// file becomes unreadable or invalid, the last good value is kept.
#[derive(Debug)]
pub struct FileParams {
    path: PathBuf,
    cache: RefCell<Cached>,
}

#[derive(Debug, Default)]
struct Cached {
    modified: Option<SystemTime>,
    device_path: Option<String>,
}

impl FileParams {
    /// Opens `path` and reads the initial value.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let config = FileConfig::from_file(&path)?;
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        Ok(Self {
            path,
            cache: RefCell::new(Cached {
                modified,
                device_path: Some(config.camera.device_path),
            }),
        })
    }

    fn refresh(&self) {
        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::trace!(path = %self.path.display(), error = %e, "Parameter file not readable");
                return;
            }
        };

        let mut cache = self.cache.borrow_mut();
        if cache.modified == Some(modified) {
            return;
        }
        cache.modified = Some(modified);

        match FileConfig::from_file(&self.path) {
            Ok(config) => {
                if cache.device_path.as_deref() != Some(config.camera.device_path.as_str()) {
                    tracing::info!(
                        video_device = %config.camera.device_path,
                        "Parameter file changed"
                    );
                }
                cache.device_path = Some(config.camera.device_path);
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring invalid parameter file");
            }
        }
    }
}

impl ParamSource for FileParams {
    fn device_path(&self) -> Option<String> {
        self.refresh();
        self.cache.borrow().device_path.clone()
    }
}

/// Replays a fixed sequence of device paths, one per read.
///
/// Once the sequence is exhausted the last value repeats.
#[derive(Debug)]
pub struct ScriptedParams {
    values: RefCell<VecDeque<String>>,
    last: RefCell<Option<String>>,
}

impl ScriptedParams {
    /// Replays `values` in order.
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: RefCell::new(values.into_iter().map(Into::into).collect()),
            last: RefCell::new(None),
        }
    }
}

impl ParamSource for ScriptedParams {
    fn device_path(&self) -> Option<String> {
        if let Some(next) = self.values.borrow_mut().pop_front() {
            *self.last.borrow_mut() = Some(next);
        }
        self.last.borrow().clone()
    }
}

impl<T: ParamSource + ?Sized> ParamSource for &T {
    fn device_path(&self) -> Option<String> {
        (**self).device_path()
    }
}

impl<T: ParamSource + ?Sized> ParamSource for Box<T> {
    fn device_path(&self) -> Option<String> {
        (**self).device_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scripted_params_repeat_last_value() {
        let params = ScriptedParams::new(["/dev/video0", "/dev/video1"]);

        assert_eq!(params.device_path().as_deref(), Some("/dev/video0"));
        assert_eq!(params.device_path().as_deref(), Some("/dev/video1"));
        assert_eq!(params.device_path().as_deref(), Some("/dev/video1"));
    }

    #[test]
    fn test_file_params_reads_device() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\nvideo_device = \"/dev/video2\"").unwrap();

        let params = FileParams::new(file.path()).unwrap();
        assert_eq!(params.device_path().as_deref(), Some("/dev/video2"));
    }

    #[test]
    fn test_file_params_picks_up_changes() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[camera]\nvideo_device = \"/dev/video2\"\n").unwrap();
        let params = FileParams::new(file.path()).unwrap();

        std::fs::write(file.path(), "[camera]\nvideo_device = \"/dev/video3\"\n").unwrap();
        // Force a distinct mtime even on coarse-grained filesystems.
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(params.device_path().as_deref(), Some("/dev/video3"));
    }

    #[test]
    fn test_file_params_keeps_last_good_value() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[camera]\nvideo_device = \"/dev/video2\"\n").unwrap();
        let params = FileParams::new(file.path()).unwrap();

        std::fs::write(file.path(), "[camera\n").unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(params.device_path().as_deref(), Some("/dev/video2"));
    }
}

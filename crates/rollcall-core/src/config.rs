use crate::matcher::DEFAULT_TOLERANCE;
use crate::session::{SessionConfig, DEFAULT_DOWNSCALE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Runtime configuration shared by the daemon and the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum Euclidean distance for a positive match.
    ///
    /// ArcFace embeddings are L2-normalized, so distance `d` corresponds to
    /// cosine similarity `1 - d²/2`. The default 0.4 demands similarity of
    /// at least 0.92, which live captures rarely reach; values around
    /// 1.0 to 1.2 (similarity 0.5 to 0.28) are typical for this model.
    pub tolerance: f32,
    /// Reference images, one per identity (`{identity}.jpg|png`).
    pub image_dir: PathBuf,
    /// Labeled attendance snapshots.
    pub captured_dir: PathBuf,
    /// CSV attendance ledger.
    pub ledger_path: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    /// Scale factor applied before face extraction.
    pub downscale: f32,
    /// Frames discarded after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
}

/// Optional TOML overrides; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    tolerance: Option<f32>,
    image_dir: Option<PathBuf>,
    captured_dir: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    camera_device: Option<String>,
    downscale: Option<f32>,
    warmup_frames: Option<usize>,
}

impl Config {
    /// Defaults under `$XDG_DATA_HOME/rollcall` (or `~/.local/share/rollcall`).
    pub fn defaults() -> Self {
        let data_dir = default_data_dir();
        Self {
            tolerance: DEFAULT_TOLERANCE,
            image_dir: data_dir.join("faces"),
            captured_dir: data_dir.join("captures"),
            ledger_path: data_dir.join("attendance.csv"),
            model_dir: data_dir.join("models"),
            camera_device: "/dev/video0".to_string(),
            downscale: DEFAULT_DOWNSCALE,
            warmup_frames: 4,
        }
    }

    /// Defaults, then the TOML file named by `ROLLCALL_CONFIG` (if set),
    /// then `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::defaults();
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.merge_file(Path::new(&path))?;
        }
        config.merge_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.image_dir {
            self.image_dir = v;
        }
        if let Some(v) = file.captured_dir {
            self.captured_dir = v;
        }
        if let Some(v) = file.ledger_path {
            self.ledger_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.downscale {
            self.downscale = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        tracing::debug!(path = %path.display(), "config file applied");
        Ok(())
    }

    /// Apply environment overrides. Unparseable numbers are ignored.
    fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        self.tolerance = parse_or(var("ROLLCALL_TOLERANCE"), self.tolerance);
        self.downscale = parse_or(var("ROLLCALL_DOWNSCALE"), self.downscale);
        self.warmup_frames = parse_or(var("ROLLCALL_WARMUP_FRAMES"), self.warmup_frames);

        if let Some(v) = var("ROLLCALL_IMAGE_DIR") {
            self.image_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_CAPTURED_DIR") {
            self.captured_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(ConfigError::Invalid {
                key: "tolerance",
                reason: format!("{} is not a finite, non-negative distance", self.tolerance),
            });
        }
        if !(self.downscale > 0.0 && self.downscale <= 1.0) {
            return Err(ConfigError::Invalid {
                key: "downscale",
                reason: format!("{} is not in (0, 1]", self.downscale),
            });
        }
        Ok(())
    }

    /// The subset used by [`crate::CaptureSession`].
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            tolerance: self.tolerance,
            downscale: self.downscale,
            image_dir: self.image_dir.clone(),
            captured_dir: self.captured_dir.clone(),
            ledger_path: self.ledger_path.clone(),
        }
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `$HOME/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::defaults();
        assert_eq!(c.tolerance, 0.4);
        assert_eq!(c.downscale, 0.25);
        assert!(c.ledger_path.ends_with("rollcall/attendance.csv"));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_env_overrides_and_ignores_garbage() {
        let mut c = Config::defaults();
        c.merge_env(env(&[
            ("ROLLCALL_TOLERANCE", "0.55"),
            ("ROLLCALL_DOWNSCALE", "half"),
            ("ROLLCALL_LEDGER_PATH", "/srv/kiosk/ledger.csv"),
        ]));
        assert_eq!(c.tolerance, 0.55);
        assert_eq!(c.downscale, 0.25);
        assert_eq!(c.ledger_path, PathBuf::from("/srv/kiosk/ledger.csv"));
    }

    #[test]
    fn test_file_then_env_precedence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "tolerance = 0.3\ncamera_device = \"/dev/video4\"\n").unwrap();

        let mut c = Config::defaults();
        c.merge_file(&path).unwrap();
        c.merge_env(env(&[("ROLLCALL_TOLERANCE", "0.35")]));

        assert_eq!(c.tolerance, 0.35);
        assert_eq!(c.camera_device, "/dev/video4");
    }

    #[test]
    fn test_bad_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "tolerence = 0.3\n").unwrap();

        let mut c = Config::defaults();
        assert!(matches!(c.merge_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validation() {
        let mut c = Config::defaults();
        c.tolerance = -0.1;
        assert!(c.validate().is_err());

        let mut c = Config::defaults();
        c.downscale = 0.0;
        assert!(c.validate().is_err());
        c.downscale = 1.0;
        assert!(c.validate().is_ok());
    }
}

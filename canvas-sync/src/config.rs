use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::{self, OwnedFormatItem};
use time::{OffsetDateTime, UtcOffset};

const SETTINGS_DIR_NAME: &str = "canvas-sync";
const SETTINGS_FILE_NAME: &str = "settings.yaml";
const DEFAULT_TIME_FMT: &str = "[year]-[month]-[day] [hour]-[minute]";
const DEFAULT_UTC_OFFSET: &str = "Z";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid settings file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid utc_offset {value:?}: expected Z or +HH:MM")]
    InvalidOffset { value: String },
    #[error("invalid time_fmt {value:?}: {reason}")]
    InvalidTimeFormat { value: String, reason: String },
    #[error("course {course} refers to unknown token {token:?}")]
    UnknownToken { course: u64, token: String },
    #[error("no settings file given and no config directory available")]
    NoDefaultPath,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Settings {
    /// API root, e.g. `https://canvas.example.edu/api/v1/`.
    pub base_url: String,
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default = "default_time_fmt")]
    pub time_fmt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub courses: Vec<CourseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CourseConfig {
    pub id: u64,
    pub access_token: String,
    /// Local directory name; derived from the remote course on first run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Mirror the module view instead of the file tree.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub modules: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rclone: Vec<MirrorDestination>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct MirrorDestination {
    pub drive: String,
    pub path: String,
}

impl MirrorDestination {
    pub fn remote_spec(&self) -> String {
        format!("{}:{}", self.drive, self.path)
    }
}

impl Settings {
    pub fn token_for(&self, course: &CourseConfig) -> Result<&str, ConfigError> {
        self.tokens
            .get(&course.access_token)
            .map(String::as_str)
            .ok_or_else(|| ConfigError::UnknownToken {
                course: course.id,
                token: course.access_token.clone(),
            })
    }

    pub fn stamp_format(&self) -> Result<StampFormat, ConfigError> {
        StampFormat::new(&self.utc_offset, &self.time_fmt)
    }

    /// Checks everything that would otherwise only fail mid-run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stamp_format()?;
        for course in &self.courses {
            self.token_for(course)?;
        }
        Ok(())
    }
}

/// A settings file on disk, remembered so derived values can be written back.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
    pub settings: Settings,
}

impl SettingsFile {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let settings: Settings = serde_yaml::from_str(&raw)?;
        Ok(Self {
            path: path.to_path_buf(),
            settings,
        })
    }

    pub async fn save(&self) -> Result<(), ConfigError> {
        let raw = serde_yaml::to_string(&self.settings)?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|source| ConfigError::Write {
                path: self.path.clone(),
                source,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root that holds one directory per course. Relative `base_dir` values are
    /// taken relative to the settings file.
    pub fn base_dir(&self) -> PathBuf {
        let settings_dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        match &self.settings.base_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => settings_dir.join(dir),
            None => settings_dir,
        }
    }
}

pub fn default_settings_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
        .ok_or(ConfigError::NoDefaultPath)
}

/// Renders the human-readable timestamps used in collision suffixes.
#[derive(Debug, Clone)]
pub struct StampFormat {
    offset: UtcOffset,
    format: OwnedFormatItem,
}

impl StampFormat {
    pub fn new(utc_offset: &str, time_fmt: &str) -> Result<Self, ConfigError> {
        let offset = parse_utc_offset(utc_offset)?;
        let format = format_description::parse_owned::<2>(time_fmt).map_err(|err| {
            ConfigError::InvalidTimeFormat {
                value: time_fmt.to_string(),
                reason: err.to_string(),
            }
        })?;
        Ok(Self { offset, format })
    }

    pub fn stamp(&self, at: OffsetDateTime) -> Result<String, time::error::Format> {
        at.to_offset(self.offset).format(&self.format)
    }
}

fn parse_utc_offset(value: &str) -> Result<UtcOffset, ConfigError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }
    let invalid = || ConfigError::InvalidOffset {
        value: value.to_string(),
    };
    let description = format_description::parse("[offset_hour sign:mandatory]:[offset_minute]")
        .map_err(|_| invalid())?;
    UtcOffset::parse(trimmed, &description).map_err(|_| invalid())
}

fn default_utc_offset() -> String {
    DEFAULT_UTC_OFFSET.to_string()
}

fn default_time_fmt() -> String {
    DEFAULT_TIME_FMT.to_string()
}

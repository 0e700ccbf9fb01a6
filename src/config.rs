//! Configuration for mediarun paths and step tooling.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MEDIARUN_HOME, MEDIARUN_EVENTS_DIR, MEDIARUN_ARCHIVE_ROOT,
//!    MEDIARUN_ASSETS_DIR)
//! 2. Config file (.mediarun/config.yaml)
//! 3. Defaults (~/.mediarun)
//!
//! Config file discovery:
//! - Searches current directory and parents for .mediarun/config.yaml
//! - `paths.home` is relative to the .mediarun/ directory, other paths to the
//!   project root containing it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

const CONFIG_DIR: &str = ".mediarun";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub whisper: Option<WhisperConfig>,
    /// Extra or overriding steps backed by external commands
    #[serde(default)]
    pub steps: HashMap<String, StepCommand>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to .mediarun/)
    pub home: Option<String>,
    /// Event directories
    pub events: Option<String>,
    /// Long-term archive root
    pub archive: Option<String>,
    /// Backgrounds, logos and fonts for thumbnails
    pub assets: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhisperConfig {
    pub binary: Option<String>,
    pub models_dir: Option<String>,
    pub ffmpeg: Option<String>,
    pub threads: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// A step implemented by an external program
#[derive(Debug, Clone, Deserialize)]
pub struct StepCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Engine state directory
    pub home: PathBuf,
    /// Directory holding one subdirectory per event
    pub events_dir: PathBuf,
    /// Where the archive step copies finished events
    pub archive_root: PathBuf,
    /// Shared thumbnail assets (`backgrounds/`, `logos/`, `fonts/`)
    pub assets_dir: PathBuf,
    /// Subtitle tooling
    pub whisper: WhisperSettings,
    /// Command-backed steps
    pub steps: HashMap<String, StepCommand>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WhisperSettings {
    pub binary: String,
    pub models_dir: PathBuf,
    pub ffmpeg: String,
    pub threads: u32,
    pub timeout_seconds: u64,
}

impl Default for WhisperSettings {
    fn default() -> Self {
        Self {
            binary: "whisper-cli".to_string(),
            models_dir: PathBuf::from("models"),
            ffmpeg: "ffmpeg".to_string(),
            threads: 4,
            timeout_seconds: 3600,
        }
    }
}

impl WhisperSettings {
    fn from_config(config: Option<&WhisperConfig>, base: &Path, home: &Path) -> Self {
        let defaults = Self::default();
        let Some(config) = config else {
            return Self {
                models_dir: home.join("models"),
                ..defaults
            };
        };

        Self {
            binary: config.binary.clone().unwrap_or(defaults.binary),
            models_dir: config
                .models_dir
                .as_deref()
                .map(|dir| resolve_path(base, dir))
                .unwrap_or_else(|| home.join("models")),
            ffmpeg: config.ffmpeg.clone().unwrap_or(defaults.ffmpeg),
            threads: config.threads.unwrap_or(defaults.threads),
            timeout_seconds: config.timeout_seconds.unwrap_or(defaults.timeout_seconds),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Resolve configuration starting discovery at `start`
fn load_config_from(start: &Path, default_home: PathBuf) -> Result<ResolvedConfig> {
    let config_file = find_config_file(start);

    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    // .mediarun/ and the project root containing it
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = env_path("MEDIARUN_HOME")
        .or_else(|| paths.home.as_deref().map(|h| resolve_path(config_dir, h)))
        .unwrap_or(default_home);

    let events_dir = env_path("MEDIARUN_EVENTS_DIR")
        .or_else(|| paths.events.as_deref().map(|p| resolve_path(base_dir, p)))
        .unwrap_or_else(|| home.join("events"));

    let archive_root = env_path("MEDIARUN_ARCHIVE_ROOT")
        .or_else(|| paths.archive.as_deref().map(|p| resolve_path(base_dir, p)))
        .unwrap_or_else(|| home.join("archive"));

    let assets_dir = env_path("MEDIARUN_ASSETS_DIR")
        .or_else(|| paths.assets.as_deref().map(|p| resolve_path(base_dir, p)))
        .unwrap_or_else(|| home.join("assets"));

    let whisper = WhisperSettings::from_config(
        file.as_ref().and_then(|f| f.whisper.as_ref()),
        base_dir,
        &home,
    );

    let steps = file.map(|f| f.steps).unwrap_or_default();

    Ok(ResolvedConfig {
        home,
        events_dir,
        archive_root,
        assets_dir,
        whisper,
        steps,
        config_file,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR);
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    load_config_from(&cwd, default_home)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration, bypassing the cache
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the events directory
pub fn events_dir() -> Result<PathBuf> {
    Ok(config()?.events_dir.clone())
}

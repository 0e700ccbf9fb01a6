//! Event repository: where event configurations live.
//!
//! The executor only needs [`EventRepository::load`]. [`FileEventRepository`]
//! additionally creates events, lists them and attaches input videos.
//!
//! Layout:
//!
//! ```text
//! <events_dir>/<event_id>/event.yaml
//! <events_dir>/<event_id>/input/
//! <events_dir>/<event_id>/output/
//! <events_dir>/<event_id>/logs/
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::fs;
use tracing::info;

use crate::domain::{EventConfig, OrderedMap};

const EVENT_FILE: &str = "event.yaml";

/// Video containers accepted by `attach_video`
pub const SUPPORTED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "flv", "webm"];

/// Source of event configurations
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load an event's configuration; `None` if the event does not exist
    async fn load(&self, event_id: &str) -> Result<Option<EventConfig>>;

    /// Working directory of an event
    fn event_dir(&self, event_id: &str) -> PathBuf;
}

/// Parameters for a new event
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub title: String,
    pub speaker: String,
    pub series: Option<String>,
    pub scripture: Option<String>,
    pub language: Option<String>,
    pub whisper_model: Option<String>,
    /// Step toggles; catalog defaults when `None`
    pub modules: Option<OrderedMap<bool>>,
}

/// Repository storing each event as YAML in its own directory
#[derive(Debug, Clone)]
pub struct FileEventRepository {
    events_dir: PathBuf,
}

impl FileEventRepository {
    pub fn new(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            events_dir: events_dir.into(),
        }
    }

    pub fn events_dir(&self) -> &Path {
        &self.events_dir
    }

    fn event_file(&self, event_id: &str) -> PathBuf {
        self.event_dir(event_id).join(EVENT_FILE)
    }

    /// Create a new event with its directory structure
    pub async fn create(&self, new: NewEvent) -> Result<EventConfig> {
        self.create_at(new, Local::now()).await
    }

    async fn create_at(&self, new: NewEvent, now: DateTime<Local>) -> Result<EventConfig> {
        if new.title.trim().is_empty() {
            anyhow::bail!("Event title cannot be empty");
        }

        let base_id = event_id_for(&now, &new.title);
        let mut event_id = base_id.clone();
        let mut counter = 2;
        while fs::try_exists(self.event_dir(&event_id)).await.unwrap_or(false) {
            event_id = format!("{}-{}", base_id, counter);
            counter += 1;
        }

        let mut event = EventConfig::new(event_id.clone(), new.title, new.speaker);
        event.series = new.series;
        event.scripture = new.scripture;
        if let Some(language) = new.language {
            event.language = language;
        }
        if let Some(model) = new.whisper_model {
            event.whisper_model = model;
        }
        if let Some(modules) = new.modules {
            event.modules = modules;
        }

        let event_dir = self.event_dir(&event_id);
        for sub in ["input", "output", "logs"] {
            let dir = event_dir.join(sub);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        self.save(&event).await?;
        info!(event_id = %event.id, "Event created");

        Ok(event)
    }

    /// Write an event's configuration
    pub async fn save(&self, event: &EventConfig) -> Result<()> {
        let path = self.event_file(&event.id);
        let yaml = serde_yaml::to_string(event).context("Failed to serialize event")?;

        fs::write(&path, yaml)
            .await
            .with_context(|| format!("Failed to write event file: {}", path.display()))
    }

    /// All event ids, sorted (ids start with their date, so this is chronological)
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();

        if !fs::try_exists(&self.events_dir).await.unwrap_or(false) {
            return Ok(ids);
        }

        let mut entries = fs::read_dir(&self.events_dir)
            .await
            .with_context(|| format!("Failed to read events directory: {}", self.events_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if fs::try_exists(entry.path().join(EVENT_FILE)).await.unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Copy a video into the event's `input/` directory and record it.
    ///
    /// Returns the destination path.
    pub async fn attach_video(&self, event_id: &str, source: &Path) -> Result<PathBuf> {
        let mut event = self
            .load(event_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Event not found: {}", event_id))?;

        validate_video(source).await?;

        let input_dir = self.event_dir(event_id).join("input");
        fs::create_dir_all(&input_dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", input_dir.display()))?;

        let dest = unique_destination(&input_dir, source).await?;
        fs::copy(source, &dest)
            .await
            .with_context(|| format!("Failed to copy {} to {}", source.display(), dest.display()))?;

        event.inputs.video_files.push(dest.clone());
        self.save(&event).await?;

        info!(event_id, video = %dest.display(), "Video attached");
        Ok(dest)
    }
}

#[async_trait]
impl EventRepository for FileEventRepository {
    async fn load(&self, event_id: &str) -> Result<Option<EventConfig>> {
        // Ids are directory names; anything path-like cannot name an event
        if event_id.is_empty() || event_id.contains(['/', '\\']) || event_id.starts_with('.') {
            return Ok(None);
        }

        let path = self.event_file(event_id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read event file: {}", path.display()))
            }
        };

        let mut event: EventConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse event file: {}", path.display()))?;

        // The directory name is authoritative
        event.id = event_id.to_string();
        Ok(Some(event))
    }

    fn event_dir(&self, event_id: &str) -> PathBuf {
        self.events_dir.join(event_id)
    }
}

/// `<YYYY-MM-DD_HHMM>_<slug>`
fn event_id_for(now: &DateTime<Local>, title: &str) -> String {
    format!("{}_{}", now.format("%Y-%m-%d_%H%M"), slugify(title))
}

/// Lowercase ASCII words joined by `-`
fn slugify(title: &str) -> String {
    let slug = title
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");

    if slug.is_empty() {
        "event".to_string()
    } else {
        slug
    }
}

async fn validate_video(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("File not found: {}", path.display()))?;

    if !metadata.is_file() {
        anyhow::bail!("Path is not a file: {}", path.display());
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if !SUPPORTED_VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        anyhow::bail!(
            "Unsupported format: .{}. Supported: {}",
            extension,
            SUPPORTED_VIDEO_EXTENSIONS.join(", ")
        );
    }

    if metadata.len() == 0 {
        anyhow::bail!("File is empty (0 bytes): {}", path.display());
    }

    Ok(())
}

/// `name.ext`, then `name_1.ext`, `name_2.ext`, ... until unused
async fn unique_destination(dir: &Path, source: &Path) -> Result<PathBuf> {
    let file_name = source
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid file path: {}", source.display()))?;
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut dest = dir.join(file_name);
    let mut counter = 1;
    while fs::try_exists(&dest).await.unwrap_or(false) {
        dest = dir.join(format!("{}_{}.{}", stem, counter, extension));
        counter += 1;
    }

    Ok(dest)
}

//! Archive step: copy the event directory to long-term storage.
//!
//! Destination is `<archive_root>/<year>/<event_id>`. The local copy is kept,
//! since the event's ledger lives inside it. A destination inside the event
//! directory is refused.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Local};
use tokio::fs;
use tracing::info;

use crate::core::{StepContext, StepHandler};
use crate::domain::StepResult;

pub struct ArchiveHandler {
    archive_root: PathBuf,
}

impl ArchiveHandler {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
        }
    }

    /// Where an event is archived in a given year
    pub fn destination(&self, event_id: &str, year: i32) -> PathBuf {
        self.archive_root.join(year.to_string()).join(event_id)
    }
}

#[async_trait]
impl StepHandler for ArchiveHandler {
    fn name(&self) -> &str {
        "archive"
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let source = ctx.event_dir();
        if !fs::try_exists(source).await.unwrap_or(false) {
            return Ok(StepResult::failed(format!(
                "Event path not found: {}",
                source.display()
            )));
        }

        let dest = self.destination(&ctx.event_id, Local::now().year());
        if normalize(&dest).await.starts_with(normalize(source).await) {
            return Ok(StepResult::failed(format!(
                "Archive destination {} is inside the event directory {}",
                dest.display(),
                source.display()
            )));
        }

        info!(event_id = %ctx.event_id, dest = %dest.display(), "Archiving event");

        let files = copy_tree(source, &dest).await?;

        Ok(StepResult::success("Archived successfully")
            .with_output("archive_path", dest.display().to_string())
            .with_output("files_copied", files))
    }
}

/// Canonical form of a path that may not exist yet: the nearest existing
/// ancestor is canonicalized and the missing components re-appended
async fn normalize(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        if let Ok(base) = fs::canonicalize(existing).await {
            return missing.iter().rev().fold(base, |acc, part| acc.join(part));
        }

        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            return path.to_path_buf();
        };
        missing.push(name.to_os_string());
        existing = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
    }
}

/// Recursively copy `source` into `dest`, overwriting existing files.
///
/// Returns the number of files copied.
async fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0u64;
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((from_dir, to_dir)) = pending.pop() {
        fs::create_dir_all(&to_dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", to_dir.display()))?;

        let mut entries = fs::read_dir(&from_dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", from_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = to_dir.join(entry.file_name());
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                pending.push((from, to));
            } else if file_type.is_file() {
                fs::copy(&from, &to)
                    .await
                    .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
                copied += 1;
            }
        }
    }

    Ok(copied)
}

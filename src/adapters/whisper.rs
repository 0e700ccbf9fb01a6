//! Subtitle generation with whisper.cpp.
//!
//! Spawns the whisper CLI on the event's first input video and collects the
//! `.srt` / `.vtt` files it writes into the event's `output/` directory. If
//! whisper cannot read the container directly, the audio track is extracted
//! with ffmpeg and transcription is retried once. Both attempts share one
//! `timeout_seconds` deadline, and the extracted audio is removed afterwards.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use super::tail;
use crate::config::WhisperSettings;
use crate::core::{StepContext, StepHandler};
use crate::domain::StepResult;

/// Subtitle formats requested from whisper, with their CLI flags
const FORMATS: &[(&str, &str)] = &[("srt", "-osrt"), ("vtt", "-ovtt")];

/// Model size -> GGML file name
pub fn model_file(model: &str) -> Option<&'static str> {
    match model {
        "tiny" => Some("ggml-tiny.bin"),
        "base" => Some("ggml-base.bin"),
        "small" => Some("ggml-small.bin"),
        "medium" => Some("ggml-medium.bin"),
        "large" => Some("ggml-large-v3.bin"),
        _ => None,
    }
}

/// Handler for the `subtitles` step
pub struct WhisperHandler {
    settings: WhisperSettings,
}

impl WhisperHandler {
    pub fn new(settings: WhisperSettings) -> Self {
        Self { settings }
    }

    fn model_path(&self, model: &str) -> Result<PathBuf> {
        let file = model_file(model).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown whisper model '{}'. Expected one of: tiny, base, small, medium, large",
                model
            )
        })?;
        Ok(self.settings.models_dir.join(file))
    }

    /// Build the whisper command line
    fn build_args(&self, model_path: &Path, input: &Path, output_base: &Path, language: &str) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            model_path.display().to_string(),
            "-f".to_string(),
            input.display().to_string(),
            "-of".to_string(),
            output_base.display().to_string(),
            "-t".to_string(),
            self.settings.threads.to_string(),
        ];

        if language != "auto" {
            args.push("-l".to_string());
            args.push(language.to_string());
        }

        for (_, flag) in FORMATS {
            args.push(flag.to_string());
        }

        args
    }

    fn limit(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_seconds)
    }

    async fn transcribe(&self, args: &[String], deadline: Instant) -> Result<()> {
        let output = timeout_at(
            deadline,
            Command::new(&self.settings.binary)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("Transcription timed out after {:?}", self.limit()))?
        .with_context(|| format!("Failed to spawn whisper binary '{}'", self.settings.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "whisper exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                tail(&stderr, 500)
            );
        }

        Ok(())
    }

    /// Extract a 16 kHz mono WAV track with ffmpeg
    async fn extract_audio(&self, video: &Path, output_dir: &Path, deadline: Instant) -> Result<PathBuf> {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        let audio_path = output_dir.join(format!("{}_audio.wav", stem));

        let output = timeout_at(
            deadline,
            Command::new(&self.settings.ffmpeg)
                .arg("-i")
                .arg(video)
                .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1", "-y"])
                .arg(&audio_path)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .with_context(|| format!("Transcription timed out after {:?}", self.limit()))?
        .with_context(|| format!("Failed to spawn ffmpeg binary '{}'", self.settings.ffmpeg))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Audio extraction failed: {}", tail(&stderr, 500));
        }

        Ok(audio_path)
    }

    /// Retry on an extracted audio track, removing the track afterwards
    async fn transcribe_audio(
        &self,
        video: &Path,
        output_dir: &Path,
        model_path: &Path,
        output_base: &Path,
        language: &str,
        deadline: Instant,
    ) -> Result<()> {
        let audio = self.extract_audio(video, output_dir, deadline).await?;
        let args = self.build_args(model_path, &audio, output_base, language);
        let result = self.transcribe(&args, deadline).await;

        if let Err(e) = tokio::fs::remove_file(&audio).await {
            warn!(path = %audio.display(), error = %e, "Failed to remove extracted audio");
        }

        result
    }
}

#[async_trait]
impl StepHandler for WhisperHandler {
    fn name(&self) -> &str {
        "subtitles"
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let Some(video) = ctx.event.primary_video() else {
            return Ok(StepResult::failed("No input video found"));
        };

        let model = ctx.event.whisper_model.as_str();
        let language = ctx.event.language.as_str();
        let model_path = self.model_path(model)?;

        if !tokio::fs::try_exists(&model_path).await.unwrap_or(false) {
            return Ok(StepResult::failed(format!(
                "Model '{}' not found at {}. Please download it first.",
                model,
                model_path.display()
            )));
        }

        let output_dir = ctx.output_dir();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "subtitles".to_string());
        let output_base = output_dir.join(&stem);

        info!(model, language, video = %video.display(), "Generating subtitles");

        let deadline = Instant::now() + self.limit();
        let args = self.build_args(&model_path, video, &output_base, language);
        if let Err(e) = self.transcribe(&args, deadline).await {
            if Instant::now() >= deadline {
                return Err(e);
            }
            warn!(error = %e, "Direct transcription failed, retrying on extracted audio");
            self.transcribe_audio(video, &output_dir, &model_path, &output_base, language, deadline)
                .await?;
        }

        let mut files = serde_json::Map::new();
        for (ext, _) in FORMATS {
            let path = output_dir.join(format!("{}.{}", stem, ext));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                files.insert(ext.to_string(), path.display().to_string().into());
            }
        }

        if files.is_empty() {
            return Ok(StepResult::failed("No subtitle files generated"));
        }

        Ok(StepResult::success("Subtitles generated successfully")
            .with_output("model", model)
            .with_output("language", language)
            .with_output("output_files", serde_json::Value::Object(files)))
    }
}

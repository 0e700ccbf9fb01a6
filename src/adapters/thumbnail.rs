//! Thumbnail composition.
//!
//! Layers a 1280x720 thumbnail from the shared assets directory:
//! background (first `backgrounds/*.jpg` or `*.png`, else a solid blue),
//! the event title with a black outline, the scripture reference, and a
//! logo (first `logos/*.png`) in the top-right corner. The result is written
//! to `output/thumbnail.jpg`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use tracing::{info, warn};

use crate::core::{StepContext, StepHandler};
use crate::domain::StepResult;

pub const WIDTH: u32 = 1280;
pub const HEIGHT: u32 = 720;

const FALLBACK_BACKGROUND: Rgba<u8> = Rgba([41, 98, 255, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

const MARGIN: i32 = 50;
const TITLE_SIZE: f32 = 72.0;
const SCRIPTURE_SIZE: f32 = 48.0;
const SCRIPTURE_OFFSET: i32 = 150;
const STROKE: i32 = 3;
/// Horizontal space kept free of title text
const TITLE_RESERVE: u32 = 500;
const LOGO_MAX: u32 = 150;
const LOGO_INSET: i64 = 30;
const JPEG_QUALITY: u8 = 95;

pub const OUTPUT_FILE: &str = "thumbnail.jpg";

/// Handler for the `thumbnail_compose` step
pub struct ThumbnailComposeHandler {
    assets_dir: PathBuf,
}

impl ThumbnailComposeHandler {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }
}

#[async_trait]
impl StepHandler for ThumbnailComposeHandler {
    fn name(&self) -> &str {
        "thumbnail_compose"
    }

    async fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let output_dir = ctx.output_dir();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

        let output = output_dir.join(OUTPUT_FILE);
        let layers = Layers {
            title: ctx.event.title.clone(),
            scripture: ctx.event.scripture.clone().filter(|s| !s.trim().is_empty()),
            assets_dir: self.assets_dir.clone(),
        };

        info!(title = %layers.title, output = %output.display(), "Composing thumbnail");

        let target = output.clone();
        let composed = tokio::task::spawn_blocking(move || layers.compose(&target))
            .await
            .context("Thumbnail composition task failed")?;

        match composed {
            Ok(text_rendered) => Ok(StepResult::success("Thumbnail composed successfully")
                .with_output("output_file", output.display().to_string())
                .with_output("text_rendered", text_rendered)),
            Err(e) => Ok(StepResult::failed(format!("{:#}", e))),
        }
    }
}

/// Inputs to one composition
struct Layers {
    title: String,
    scripture: Option<String>,
    assets_dir: PathBuf,
}

impl Layers {
    /// Compose and save the thumbnail; returns whether text was drawn
    fn compose(&self, output: &Path) -> Result<bool> {
        let mut canvas = self.background()?;

        let text_rendered = match self.fonts() {
            Some((bold, regular)) => {
                self.draw_text(&mut canvas, &bold, &regular);
                true
            }
            None => false,
        };

        if let Some(logo) = first_image(&self.assets_dir.join("logos"), &["png"]) {
            let logo = image::open(&logo)
                .with_context(|| format!("Failed to open logo: {}", logo.display()))?
                .resize(LOGO_MAX, LOGO_MAX, FilterType::Lanczos3)
                .to_rgba8();
            let x = i64::from(WIDTH) - i64::from(logo.width()) - LOGO_INSET;
            imageops::overlay(&mut canvas, &logo, x, LOGO_INSET);
        }

        save_jpeg(canvas, output)?;
        Ok(text_rendered)
    }

    fn background(&self) -> Result<RgbaImage> {
        let Some(path) = first_image(&self.assets_dir.join("backgrounds"), &["jpg", "png"]) else {
            return Ok(RgbaImage::from_pixel(WIDTH, HEIGHT, FALLBACK_BACKGROUND));
        };

        let background = image::open(&path)
            .with_context(|| format!("Failed to open background: {}", path.display()))?;
        Ok(background
            .resize_exact(WIDTH, HEIGHT, FilterType::Lanczos3)
            .to_rgba8())
    }

    fn fonts(&self) -> Option<(FontVec, FontVec)> {
        let fonts_dir = self.assets_dir.join("fonts");
        match (load_font(&fonts_dir.join("bold.ttf")), load_font(&fonts_dir.join("regular.ttf"))) {
            (Ok(bold), Ok(regular)) => Some((bold, regular)),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %format!("{:#}", e), "Fonts unavailable, composing without text");
                None
            }
        }
    }

    fn draw_text(&self, canvas: &mut RgbaImage, bold: &FontVec, regular: &FontVec) {
        let title_scale = PxScale::from(TITLE_SIZE);
        let line_height = bold.as_scaled(title_scale).height().ceil() as i32 + 4;
        let lines = wrap_words(&self.title, WIDTH - TITLE_RESERVE, |text| {
            text_size(title_scale, bold, text).0
        });

        for (i, line) in lines.iter().enumerate() {
            let y = MARGIN + i as i32 * line_height;
            for dx in -STROKE..=STROKE {
                for dy in -STROKE..=STROKE {
                    draw_text_mut(canvas, BLACK, MARGIN + dx, y + dy, title_scale, bold, line);
                }
            }
            draw_text_mut(canvas, WHITE, MARGIN, y, title_scale, bold, line);
        }

        if let Some(scripture) = &self.scripture {
            let y = MARGIN + SCRIPTURE_OFFSET;
            draw_text_mut(canvas, WHITE, MARGIN, y, PxScale::from(SCRIPTURE_SIZE), regular, scripture);
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read font: {}", path.display()))?;
    FontVec::try_from_vec(data).with_context(|| format!("Invalid font file: {}", path.display()))
}

/// First file in `dir` with one of `extensions`, tried in that order
fn first_image(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    extensions.iter().find_map(|ext| {
        files
            .iter()
            .find(|path| path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext)))
            .cloned()
    })
}

/// Greedy word wrap; a single word wider than `max_width` gets its own line
fn wrap_words(text: &str, max_width: u32, measure: impl Fn(&str) -> u32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };

        if measure(&candidate) <= max_width || current.is_empty() {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn save_jpeg(canvas: RgbaImage, output: &Path) -> Result<()> {
    let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
    let file = File::create(output)
        .with_context(|| format!("Failed to create thumbnail: {}", output.display()))?;
    let mut writer = BufWriter::new(file);

    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY))
        .with_context(|| format!("Failed to encode thumbnail: {}", output.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to write thumbnail: {}", output.display()))
}

//! Built-in step handlers.
//!
//! Handlers wrap the work a step relies on (speech-to-text, thumbnail
//! composition, archive storage, arbitrary commands) behind [`StepHandler`].
//!
//! [`StepHandler`]: crate::core::StepHandler

pub mod archive;
pub mod command;
pub mod placeholder;
pub mod thumbnail;
pub mod whisper;

pub use archive::ArchiveHandler;
pub use command::CommandHandler;
pub use placeholder::PlaceholderHandler;
pub use thumbnail::ThumbnailComposeHandler;
pub use whisper::WhisperHandler;

/// Keep at most the last `max_chars` characters of tool output
pub(crate) fn tail(output: &str, max_chars: usize) -> String {
    let trimmed = output.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

//! Speech synthesis.
//!
//! The synthesis backend is consumed through a narrow contract: plain text
//! in, one encoded audio blob out. Synthesis failure is always non-fatal to
//! the chat flow; the audio portion of the response is simply omitted.

mod azure;

pub use azure::AzureTts;

use crate::error::Error;
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

/// 2xx responses smaller than this are treated as failed synthesis.
pub const MIN_AUDIO_BYTES: usize = 100;

/// Text-to-speech backend.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize the full reply text to encoded audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, Error>;

    /// Provider name for logs.
    fn provider_name(&self) -> &str;
}

static EMOJI_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        "[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\
         \u{1F1E0}-\u{1F1FF}\u{2600}-\u{26FF}\u{2700}-\u{27BF}\
         \u{1F900}-\u{1F9FF}\u{1FA70}-\u{1FAFF}]+",
    )
    .unwrap()
});

static MARKUP_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new("[*_#`~>]+").unwrap());

static WHITESPACE_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Derive a speech-safe utterance from a generated reply.
///
/// Strips emoji and markdown markup that the synthesis voice would read
/// aloud or choke on, and collapses runs of whitespace.
pub fn speech_safe(text: &str) -> String {
    let without_emoji = EMOJI_PATTERN.replace_all(text, "");
    let without_markup = MARKUP_PATTERN.replace_all(&without_emoji, "");
    WHITESPACE_PATTERN
        .replace_all(&without_markup, " ")
        .trim()
        .to_string()
}

//! Generation backend abstraction.
//!
//! The backend produces a lazy, finite, non-restartable sequence of text
//! deltas whose concatenation is the full reply. Deltas are delivered over
//! a bounded channel so the HTTP handler can relay them as they arrive.

mod gemini;

pub use gemini::GeminiGenerator;

use crate::error::Error;
use crate::session::{Part, Turn};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stream of reply deltas. An `Err` item terminates the stream.
pub type DeltaStream = mpsc::Receiver<Result<String, Error>>;

/// Generative text backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    /// Stream a reply for the new turn given the composed system
    /// instruction and the prior transcript.
    ///
    /// Errors returned here occurred before any delta was produced;
    /// mid-stream failures arrive as an `Err` item on the channel.
    async fn stream_reply(
        &self,
        system: &str,
        history: &[Turn],
        latest: &[Part],
    ) -> Result<DeltaStream, Error>;

    /// Single-shot completion used by background analysis.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, Error>;
}

//! Stream multiplexer.
//!
//! One logical response carries an open-ended text stream followed by at
//! most one binary payload, over a transport that only understands a single
//! byte stream. There is no length prefix: a reserved sentinel string
//! delimits the text portion from the base64 audio portion.
//!
//! Protocol:
//! 1. Text deltas are emitted verbatim, as they arrive.
//! 2. After the text is exhausted, the sentinel is emitted exactly once —
//!    and only if a usable audio blob follows.
//! 3. The audio follows as one contiguous base64 unit, then the channel
//!    closes. Clean end-of-stream without a sentinel means "no audio".
//! 4. A generation failure mid-stream aborts the body, so the client's
//!    reader observes an error rather than a clean text-only reply.

use crate::tts::MIN_AUDIO_BYTES;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use base64::Engine;
use futures_util::Stream;

/// Reserved marker between the text portion and the audio portion.
///
/// Generated content never contains it; the client treats everything after
/// it as one base64 audio blob.
pub const AUDIO_SEPARATOR: &str = "---YOYO_AUDIO_SEPARATOR---";

/// Frame the deferred audio payload.
///
/// Returns the sentinel plus base64 audio when the blob is usable, `None`
/// when synthesis failed or produced an implausibly small payload — in
/// which case the sentinel must not appear at all.
pub fn audio_frame(audio: Option<Vec<u8>>) -> Option<String> {
    let audio = audio?;
    if audio.len() < MIN_AUDIO_BYTES {
        tracing::warn!(bytes = audio.len(), "discarding implausibly small audio payload");
        return None;
    }

    let encoded = base64::engine::general_purpose::STANDARD.encode(&audio);
    Some(format!("{AUDIO_SEPARATOR}{encoded}"))
}

/// Wrap a fragment stream as a streamed plain-text HTTP response.
///
/// An `Err` item aborts the chunked body mid-transfer; text already
/// flushed stands.
pub fn streaming_response<S, E>(stream: S) -> Response
where
    S: Stream<Item = Result<String, E>> + Send + 'static,
    E: Into<axum::BoxError>,
{
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .expect("static response parts are valid")
}

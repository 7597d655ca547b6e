//! Google Gemini generation backend.
//!
//! Streams replies via `streamGenerateContent?alt=sse` and serves the
//! single-shot `generateContent` call used by profile enrichment.

use super::{DeltaStream, TextGenerator};
use crate::config::GeminiConfig;
use crate::error::Error;
use crate::session::{Part, Role, Turn};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Timeout for the next SSE chunk; a stalled upstream stream is treated as
/// a mid-stream failure rather than blocking the response forever.
const CHUNK_TIMEOUT_SECS: u64 = 30;

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineRequestData,
    },
}

#[derive(Debug, Serialize)]
struct InlineRequestData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i64,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

fn safety_settings() -> Vec<SafetySetting> {
    // The companion talks to children; block thresholds are pinned rather
    // than configurable.
    const CATEGORIES: [&str; 4] = [
        "HARM_CATEGORY_HARASSMENT",
        "HARM_CATEGORY_HATE_SPEECH",
        "HARM_CATEGORY_SEXUALLY_EXPLICIT",
        "HARM_CATEGORY_DANGEROUS_CONTENT",
    ];
    CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category,
            threshold: "BLOCK_ONLY_HIGH",
        })
        .collect()
}

/// Gemini API client.
pub struct GeminiGenerator {
    api_key: String,
    model: String,
    client: Client,
}

impl GeminiGenerator {
    /// Create a new generator.
    ///
    /// Fails when no API key is configured; the server cannot serve chat
    /// without its generation backend.
    pub fn new(config: &GeminiConfig) -> Result<Self, Error> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY is not set".into()))?;

        Ok(Self {
            api_key,
            model: config.model.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        })
    }

    fn part_to_request(part: &Part) -> RequestPart {
        match part {
            Part::Plain(text) => RequestPart::Text { text: text.clone() },
            Part::Text { text } => RequestPart::Text { text: text.clone() },
            Part::Inline { inline_data } => RequestPart::Inline {
                inline_data: InlineRequestData {
                    mime_type: inline_data.mime_type.clone(),
                    data: inline_data.data.clone(),
                },
            },
        }
    }

    fn build_request(system: &str, history: &[Turn], latest: &[Part]) -> GenerateContentRequest {
        let mut contents: Vec<Content> = history
            .iter()
            .map(|turn| Content {
                role: Some(turn.role.as_str().to_string()),
                parts: turn.parts.iter().map(Self::part_to_request).collect(),
            })
            .collect();

        contents.push(Content {
            role: Some(Role::User.as_str().to_string()),
            parts: latest.iter().map(Self::part_to_request).collect(),
        });

        GenerateContentRequest {
            contents,
            system_instruction: Some(Content {
                role: None,
                parts: vec![RequestPart::Text {
                    text: system.to_string(),
                }],
            }),
            generation_config: GenerationConfig {
                temperature: 0.9,
                max_output_tokens: 2048,
            },
            safety_settings: safety_settings(),
        }
    }

    /// Extract text deltas from one SSE `data:` payload.
    fn extract_deltas(payload: &str) -> Result<Vec<String>, Error> {
        let chunk: GenerateContentResponse = serde_json::from_str(payload)
            .map_err(|e| Error::UpstreamGeneration(format!("unparseable stream chunk: {e}")))?;

        if let Some(err) = chunk.error {
            return Err(Error::UpstreamGeneration(err.message));
        }

        let mut deltas = Vec::new();
        for candidate in chunk.candidates.unwrap_or_default() {
            let parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
            for part in parts {
                if let Some(text) = part.text {
                    if !text.is_empty() {
                        deltas.push(text);
                    }
                }
            }
        }
        Ok(deltas)
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn stream_reply(
        &self,
        system: &str,
        history: &[Turn],
        latest: &[Part],
    ) -> Result<DeltaStream, Error> {
        let request = Self::build_request(system, history, latest);
        let url = format!(
            "{API_BASE}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamGeneration(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamGeneration(format!(
                "API error ({}): {body}",
                status.as_u16()
            )));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let chunk_timeout = Duration::from_secs(CHUNK_TIMEOUT_SECS);

            loop {
                let chunk = match tokio::time::timeout(chunk_timeout, stream.next()).await {
                    Ok(Some(Ok(chunk))) => chunk,
                    Ok(Some(Err(e))) => {
                        let _ = tx
                            .send(Err(Error::UpstreamGeneration(format!(
                                "stream transport error: {e}"
                            ))))
                            .await;
                        return;
                    }
                    Ok(None) => return, // clean end of stream
                    Err(_) => {
                        let _ = tx
                            .send(Err(Error::UpstreamGeneration(format!(
                                "stream stalled for {CHUNK_TIMEOUT_SECS}s"
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // Complete SSE events are separated by a blank line.
                while let Some(pos) = buffer.find("\n\n") {
                    let event = buffer[..pos].to_string();
                    buffer.drain(..pos + 2);

                    for line in event.lines() {
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim();
                        if payload.is_empty() {
                            continue;
                        }

                        match Self::extract_deltas(payload) {
                            Ok(deltas) => {
                                for delta in deltas {
                                    if tx.send(Ok(delta)).await.is_err() {
                                        // Client went away; stop consuming.
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, Error> {
        let request =
            Self::build_request(system, &[], &[Part::Plain(prompt.to_string())]);
        let url = format!(
            "{API_BASE}/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::UpstreamGeneration(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamGeneration(format!(
                "API error ({}): {body}",
                status.as_u16()
            )));
        }

        let result: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamGeneration(format!("unparseable response: {e}")))?;

        if let Some(err) = result.error {
            return Err(Error::UpstreamGeneration(err.message));
        }

        let text = result
            .candidates
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<String>();

        if text.is_empty() {
            return Err(Error::UpstreamGeneration("empty response".into()));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InlineData;

    fn generator() -> GeminiGenerator {
        GeminiGenerator::new(&GeminiConfig {
            api_key: Some("test-key".into()),
            model: "gemini-2.5-flash".into(),
        })
        .unwrap()
    }

    #[test]
    fn requires_api_key() {
        let result = GeminiGenerator::new(&GeminiConfig {
            api_key: None,
            model: "gemini-2.5-flash".into(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn builds_request_with_history_and_roles() {
        let history = vec![
            Turn::text(Role::User, "你好"),
            Turn::text(Role::Model, "嗨！"),
        ];
        let latest = vec![Part::Plain("彩虹是什麼？".into())];
        let request = GeminiGenerator::build_request("persona", &history, &latest);

        assert_eq!(request.contents.len(), 3);
        assert_eq!(request.contents[0].role.as_deref(), Some("user"));
        assert_eq!(request.contents[1].role.as_deref(), Some("model"));
        assert_eq!(request.contents[2].role.as_deref(), Some("user"));
        assert!(request.system_instruction.is_some());
        assert_eq!(request.safety_settings.len(), 4);
    }

    #[test]
    fn inline_parts_serialize_camel_case() {
        let latest = vec![Part::Inline {
            inline_data: InlineData {
                mime_type: "image/png".into(),
                data: "aGk=".into(),
            },
        }];
        let request = GeminiGenerator::build_request("persona", &[], &latest);
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"inlineData\""));
        assert!(json.contains("\"mimeType\":\"image/png\""));
    }

    #[test]
    fn extracts_deltas_from_chunk() {
        let payload = r#"{"candidates":[{"content":{"parts":[{"text":"哇！"},{"text":"彩虹"}]}}]}"#;
        let deltas = GeminiGenerator::extract_deltas(payload).unwrap();
        assert_eq!(deltas, vec!["哇！".to_string(), "彩虹".to_string()]);
    }

    #[test]
    fn chunk_error_becomes_generation_failure() {
        let payload = r#"{"error":{"message":"quota exhausted"}}"#;
        let err = GeminiGenerator::extract_deltas(payload).unwrap_err();
        assert!(matches!(err, Error::UpstreamGeneration(_)));
    }

    #[test]
    fn empty_candidates_yield_no_deltas() {
        let deltas = GeminiGenerator::extract_deltas("{}").unwrap();
        assert!(deltas.is_empty());
        let _ = generator();
    }
}

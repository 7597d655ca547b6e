//! Azure Speech REST synthesis.

use super::{TextToSpeech, MIN_AUDIO_BYTES};
use crate::config::SpeechConfig;
use crate::error::Error;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const OUTPUT_FORMAT: &str = "audio-16khz-32kbitrate-mono-mp3";

/// Azure Cognitive Services TTS client.
///
/// Calls the regional REST endpoint with an SSML body; no SDK dependency.
pub struct AzureTts {
    key: String,
    region: String,
    voice: String,
    client: Client,
}

impl AzureTts {
    /// Create a client when credentials are configured.
    ///
    /// Returns `None` when key or region is missing; the caller runs
    /// text-only in that case.
    pub fn from_config(config: &SpeechConfig) -> Option<Self> {
        let (Some(key), Some(region)) = (config.key.clone(), config.region.clone()) else {
            tracing::warn!("SPEECH_KEY or SPEECH_REGION not set, speech synthesis disabled");
            return None;
        };

        Some(Self {
            key,
            region,
            voice: config.voice.clone(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.region
        )
    }

    fn build_ssml(&self, text: &str) -> String {
        let escaped = escape_xml(text);
        format!(
            "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' \
             xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='zh-TW'>\
             <voice name='{}'>\
             <mstts:express-as style='cheerful' styledegree='1.1'>\
             <prosody rate='0%' pitch='0%'>{escaped}</prosody>\
             </mstts:express-as>\
             </voice></speak>",
            self.voice
        )
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

#[async_trait]
impl TextToSpeech for AzureTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, Error> {
        if text.is_empty() {
            return Err(Error::Synthesis("nothing to synthesize".into()));
        }

        let ssml = self.build_ssml(text);

        let response = self
            .client
            .post(self.endpoint())
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "yoyo-server")
            .body(ssml)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "API error ({}): {body}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("failed to read audio body: {e}")))?;

        // A 2xx with a token-sized body is an error page, not audio.
        if bytes.len() < MIN_AUDIO_BYTES {
            return Err(Error::Synthesis(format!(
                "implausibly small audio payload ({} bytes)",
                bytes.len()
            )));
        }

        tracing::info!(
            chars = text.chars().count(),
            bytes = bytes.len(),
            "speech synthesized"
        );
        Ok(bytes.to_vec())
    }

    fn provider_name(&self) -> &str {
        "azure"
    }
}

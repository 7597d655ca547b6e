//! Background profile enrichment.
//!
//! After a turn's response has been fully sent, a detached task extracts
//! durable facts about the user from the most recent turns and merges them
//! into the stored profile. The task never blocks the client response and
//! never lets a failure escape: on any parse or backend error the stored
//! profile is left untouched.

use crate::error::Error;
use crate::generate::TextGenerator;
use crate::session::{Profile, SessionStore, Turn};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

/// How many recent turns the analysis sees.
const WINDOW_TURNS: usize = 6;

const ANALYSIS_SYSTEM: &str = "\
你是一個資訊擷取模組。根據對話內容，整理出關於這位小朋友的長期事實\
（例如：name、age、likes、dislikes、pet、family）。\
只輸出一個 JSON 物件，key 用英文、value 用對話原文的語言。\
把新事實加入已知資料；同一個 key 以最新的對話為準。\
如果沒有任何新事實，輸出空物件 {}。不要輸出任何其他文字。";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^```(?:json)?\s*|\s*```$").unwrap());

/// Extracts and merges durable user facts after each completed turn.
pub struct ProfileEnricher {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn SessionStore>,
}

impl ProfileEnricher {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn SessionStore>) -> Self {
        Self { generator, store }
    }

    /// Run one enrichment pass. Errors are logged and contained.
    pub async fn run(&self, user_id: &str, transcript: &[Turn]) {
        if let Err(e) = self.try_run(user_id, transcript).await {
            tracing::warn!(user_id, error = %e, "profile enrichment skipped");
        }
    }

    async fn try_run(&self, user_id: &str, transcript: &[Turn]) -> Result<(), Error> {
        let window: Vec<&Turn> = transcript
            .iter()
            .rev()
            .take(WINDOW_TURNS)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        if window.is_empty() {
            return Ok(());
        }

        // Re-read at task start: the response that spawned us may race the
        // user's next turn; last writer wins by design.
        let existing = self.store.load_profile(user_id).await.unwrap_or_default();
        let prompt = Self::build_prompt(&existing, &window);

        let raw = self
            .generator
            .complete(ANALYSIS_SYSTEM, &prompt)
            .await
            .map_err(|e| Error::Enrichment(e.to_string()))?;

        let incoming = Self::parse_facts(&raw)?;
        if incoming.is_empty() {
            tracing::debug!(user_id, "no new facts extracted");
            return Ok(());
        }

        let mut merged = existing;
        merged.merge(&incoming);
        self.store.save_profile(user_id, &merged).await;
        tracing::info!(user_id, facts = merged.0.len(), "profile updated");
        Ok(())
    }

    fn build_prompt(existing: &Profile, window: &[&Turn]) -> String {
        let known = serde_json::to_string(existing).unwrap_or_else(|_| "{}".into());
        let conversation = window
            .iter()
            .map(|turn| format!("{}: {}", turn.role.as_str(), turn.text_content()))
            .collect::<Vec<_>>()
            .join("\n");

        format!("已知資料：{known}\n\n最近的對話：\n{conversation}")
    }

    /// Parse the analysis output strictly as a JSON object.
    ///
    /// Tolerates a markdown code fence around the object; anything else is
    /// an enrichment failure.
    fn parse_facts(raw: &str) -> Result<Profile, Error> {
        let cleaned = CODE_FENCE.replace_all(raw.trim(), "");
        let value: serde_json::Value = serde_json::from_str(cleaned.trim())
            .map_err(|e| Error::Enrichment(format!("unparseable analysis output: {e}")))?;

        match value {
            serde_json::Value::Object(map) => Ok(Profile(map)),
            other => Err(Error::Enrichment(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

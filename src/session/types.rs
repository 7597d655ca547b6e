//! Conversation and profile types.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Message role in a conversation turn.
///
/// Follows the generation backend's convention: the assistant side is
/// "model", not "assistant".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant (model) reply
    Model,
}

impl Role {
    /// String representation used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// Inline attachment payload (base64 image data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One part of a turn: plain text or an inline attachment.
///
/// Clients send text parts either as bare strings or `{"text": ...}`
/// objects; attachments arrive as `{"inline_data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    /// Bare string text part
    Plain(String),
    /// Object-form text part
    Text { text: String },
    /// Inline attachment (image)
    Inline { inline_data: InlineData },
}

impl Part {
    /// Text content, if this is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Plain(s) => Some(s),
            Self::Text { text } => Some(text),
            Self::Inline { .. } => None,
        }
    }

    /// Whether the part carries any usable content.
    ///
    /// Empty text is not usable; inline attachments count even before
    /// validation (a bad attachment degrades to a placeholder, it does not
    /// empty the turn).
    pub fn is_resolvable(&self) -> bool {
        match self {
            Self::Plain(s) => !s.trim().is_empty(),
            Self::Text { text } => !text.trim().is_empty(),
            Self::Inline { .. } => true,
        }
    }

    /// Validate an inline attachment's base64 payload, degrading to a
    /// placeholder text part when it cannot be decoded.
    pub fn resolve(self) -> Part {
        match self {
            Self::Inline { inline_data } => {
                match base64::engine::general_purpose::STANDARD.decode(&inline_data.data) {
                    Ok(_) => Self::Inline { inline_data },
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping undecodable inline attachment");
                        Self::Plain("(圖片處理失敗)".to_string())
                    }
                }
            }
            other => other,
        }
    }
}

/// One exchange unit in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    /// Create a plain-text turn.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part::Plain(content.into())],
        }
    }

    /// All text content of this turn, joined.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Validate attachments and drop unusable parts.
    ///
    /// Returns `None` when nothing resolvable remains; such turns are
    /// dropped before reaching the generation backend.
    pub fn resolve(self) -> Option<Turn> {
        let parts: Vec<Part> = self
            .parts
            .into_iter()
            .filter(Part::is_resolvable)
            .map(Part::resolve)
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(Turn {
                role: self.role,
                parts,
            })
        }
    }
}

/// Durable facts extracted about a user (name, likes, pet, ...).
///
/// A monotonically merged superset: enrichment adds keys and updates
/// values, it never replaces the map wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Profile(pub serde_json::Map<String, serde_json::Value>);

impl Profile {
    /// Whether any facts are known.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge newly extracted facts into this profile.
    ///
    /// New keys are added; on conflict the incoming (latest) value wins.
    pub fn merge(&mut self, incoming: &Profile) {
        for (key, value) in &incoming.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Render the profile as a background block for the system instruction.
    pub fn summary(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }

        let facts = self
            .0
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                format!("- {k}: {rendered}")
            })
            .collect::<Vec<_>>()
            .join("\n");

        Some(format!("關於這位小朋友，你已經知道：\n{facts}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"user\"").unwrap(),
            Role::User
        );
    }

    #[test]
    fn part_deserializes_all_forms() {
        let plain: Part = serde_json::from_str("\"Hi\"").unwrap();
        assert_eq!(plain.as_text(), Some("Hi"));

        let obj: Part = serde_json::from_str(r#"{"text": "Hello"}"#).unwrap();
        assert_eq!(obj.as_text(), Some("Hello"));

        let inline: Part = serde_json::from_str(
            r#"{"inline_data": {"mime_type": "image/png", "data": "aGk="}}"#,
        )
        .unwrap();
        assert!(inline.as_text().is_none());
        assert!(inline.is_resolvable());
    }

    #[test]
    fn empty_text_part_is_not_resolvable() {
        assert!(!Part::Plain("   ".into()).is_resolvable());
        assert!(Part::Plain("hi".into()).is_resolvable());
    }

    #[test]
    fn bad_attachment_degrades_to_placeholder() {
        let part = Part::Inline {
            inline_data: InlineData {
                mime_type: "image/png".into(),
                data: "not base64 !!!".into(),
            },
        };
        let resolved = part.resolve();
        assert_eq!(resolved.as_text(), Some("(圖片處理失敗)"));
    }

    #[test]
    fn turn_with_no_usable_parts_is_dropped() {
        let turn = Turn {
            role: Role::User,
            parts: vec![Part::Plain(String::new())],
        };
        assert!(turn.resolve().is_none());
    }

    #[test]
    fn turn_text_content_joins_parts() {
        let turn = Turn {
            role: Role::User,
            parts: vec![Part::Plain("我們來".into()), Part::Plain("玩遊戲".into())],
        };
        assert_eq!(turn.text_content(), "我們來 玩遊戲");
    }

    #[test]
    fn profile_merge_latest_wins() {
        let mut profile = Profile::default();
        profile.0.insert("name".into(), "小明".into());
        profile.0.insert("pet".into(), "cat".into());

        let mut incoming = Profile::default();
        incoming.0.insert("pet".into(), "dog".into());
        incoming.0.insert("likes".into(), "恐龍".into());

        profile.merge(&incoming);
        assert_eq!(profile.0["name"], "小明");
        assert_eq!(profile.0["pet"], "dog");
        assert_eq!(profile.0["likes"], "恐龍");
    }

    #[test]
    fn profile_merge_is_idempotent() {
        let mut profile = Profile::default();
        profile.0.insert("name".into(), "小明".into());

        let snapshot = profile.clone();
        let incoming = profile.clone();
        profile.merge(&incoming);
        assert_eq!(profile, snapshot);
    }

    #[test]
    fn profile_summary_renders_facts() {
        let mut profile = Profile::default();
        profile.0.insert("name".into(), "小明".into());
        let summary = profile.summary().unwrap();
        assert!(summary.contains("name: 小明"));
        assert!(Profile::default().summary().is_none());
    }
}

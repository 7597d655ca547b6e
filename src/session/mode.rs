//! Game-mode overlay.
//!
//! A per-user flag with its own short, absolute TTL, toggled by keyword
//! phrases in the latest user turn. While active, an auxiliary instruction
//! block is appended to the composed system instruction for every turn.
//! The composed instruction itself is never persisted; it is rebuilt each
//! turn from the flag and the stored profile, so an expired overlay cannot
//! poison later turns.

use super::store::SessionStore;
use crate::config::GameConfig;

/// Auxiliary instructions appended while game mode is active.
const GAME_INSTRUCTIONS: &str = "\
【遊戲模式】現在進入猜謎遊戲時間！\n\
- 每次出一道適合兒童的謎語或問題，等小朋友回答。\n\
- 答對了要熱情地稱讚，答錯了給一個有趣的提示再讓他猜一次。\n\
- 保持輕鬆好玩，一次只出一題。\n\
- 小朋友說不玩了就回到平常的聊天。";

/// Keyword-driven overlay state machine.
pub struct GameMode {
    start_phrases: Vec<String>,
    exit_phrases: Vec<String>,
}

impl GameMode {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            start_phrases: config.start_phrases.clone(),
            exit_phrases: config.exit_phrases.clone(),
        }
    }

    /// The instruction block applied while the overlay is active.
    pub fn instructions(&self) -> &'static str {
        GAME_INSTRUCTIONS
    }

    fn matches_any(text: &str, phrases: &[String]) -> bool {
        phrases.iter().any(|p| !p.is_empty() && text.contains(p.as_str()))
    }

    /// Evaluate the overlay for the current turn.
    ///
    /// Applies keyword transitions against the stored flag and returns
    /// whether the overlay is active for this turn. The TTL is set once at
    /// activation; neither continued activity nor a repeated start phrase
    /// refreshes it (absolute expiry).
    pub async fn evaluate(
        &self,
        store: &dyn SessionStore,
        user_id: &str,
        latest_user_text: &str,
    ) -> bool {
        let active = store.mode_active(user_id).await;

        if active && Self::matches_any(latest_user_text, &self.exit_phrases) {
            store.clear_mode(user_id).await;
            tracing::info!(user_id, "game mode exited");
            return false;
        }

        if !active && Self::matches_any(latest_user_text, &self.start_phrases) {
            store.activate_mode(user_id).await;
            tracing::info!(user_id, "game mode activated");
            return true;
        }

        active
    }
}

//! Response orchestration.
//!
//! One request is one logical task: load session state, compose the
//! effective instruction, relay generation deltas through the stream
//! multiplexer, defer a single synthesis call to the end of the text
//! stream, persist the transcript, and fire off enrichment without waiting
//! for it.

use crate::enrichment::ProfileEnricher;
use crate::error::Error;
use crate::generate::TextGenerator;
use crate::session::{GameMode, Role, SessionStore, Turn};
use crate::stream::audio_frame;
use crate::tts::{speech_safe, TextToSpeech};
use crate::config::GameConfig;
use async_stream::stream;
use futures_util::Stream;
use std::sync::Arc;

/// Base persona for every turn. Overlay and profile context are appended
/// per turn and never persisted.
const SYSTEM_INSTRUCTION: &str = "\
你是名為「祐祐」的AI知識夥伴，一個充滿好奇心、溫暖且富有想像力的朋友，\
專為8~12歲兒童設計。你的目標是成為一個能啟發孩子、鼓勵他們探索世界的好夥伴。\n\
- 如果孩子傳來圖片，先針對圖片內容給出具體的、鼓勵性的讚美。\n\
- 當孩子感到沮喪或不確定時，先給予溫暖的安慰和鼓勵。\n\
- 解釋知識時用充滿驚奇和想像力的語言，並用提問引導他們思考。\n\
- 回答完可以提出一個相關的、有趣的小問題或活動建議。\n\
- 語言必須簡單、正面、充滿善意，絕不生成不適合兒童的內容，\
也絕不提及你是 AI 或模型。\n\
- 用自然的口語回答，不要使用表情符號或任何標記格式，中文回應盡量不超過100字。";

/// Drives one conversation turn end to end.
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    tts: Option<Arc<dyn TextToSpeech>>,
    store: Arc<dyn SessionStore>,
    game: GameMode,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        tts: Option<Arc<dyn TextToSpeech>>,
        store: Arc<dyn SessionStore>,
        game_config: &GameConfig,
    ) -> Self {
        Self {
            generator,
            tts,
            store,
            game: GameMode::new(game_config),
        }
    }

    /// Handle one conversation turn, returning the response fragment
    /// stream per the multiplexer protocol.
    ///
    /// Errors returned here occurred before anything was streamed and map
    /// to a plain HTTP error. Once the stream is underway, a generation
    /// failure is yielded as the terminal `Err` item, which aborts the
    /// response body without retracting already-sent text.
    pub async fn handle_turn(
        &self,
        user_id: &str,
        history: Vec<Turn>,
    ) -> Result<impl Stream<Item = Result<String, Error>> + Send + 'static, Error> {
        if user_id.trim().is_empty() {
            return Err(Error::InvalidRequest("userId is required".into()));
        }
        if history.is_empty() {
            return Err(Error::InvalidRequest("history must not be empty".into()));
        }

        let mut history = history;
        let latest = history
            .pop()
            .and_then(Turn::resolve)
            .ok_or_else(|| Error::InvalidRequest("latest turn has no usable content".into()))?;

        if latest.role != Role::User {
            return Err(Error::InvalidRequest("latest turn must be a user turn".into()));
        }

        // Server-side transcript is authoritative; the client-supplied
        // context is the fallback when the store has nothing (new session
        // or degraded persistence).
        let context = match self.store.load(user_id).await {
            Some(stored) => stored,
            None => history
                .into_iter()
                .filter_map(Turn::resolve)
                .collect(),
        };

        let mode_active = self
            .game
            .evaluate(self.store.as_ref(), user_id, &latest.text_content())
            .await;

        let system = self.compose_instruction(user_id, mode_active).await;

        tracing::info!(
            user_id,
            context_turns = context.len(),
            mode_active,
            backend = self.generator.name(),
            "handling turn"
        );

        let mut deltas = self
            .generator
            .stream_reply(&system, &context, &latest.parts)
            .await?;

        let generator = Arc::clone(&self.generator);
        let tts = self.tts.clone();
        let store = Arc::clone(&self.store);
        let user_id = user_id.to_string();

        Ok(stream! {
            let mut reply = String::new();

            while let Some(item) = deltas.recv().await {
                match item {
                    Ok(delta) => {
                        reply.push_str(&delta);
                        yield Ok(delta);
                    }
                    Err(e) => {
                        // Text already flushed stands; the terminal error
                        // aborts the body so the client does not mistake
                        // the truncation for a complete text-only reply.
                        tracing::error!(user_id, error = %e, "generation failed mid-stream");
                        yield Err(e);
                        return;
                    }
                }
            }

            if reply.is_empty() {
                return;
            }

            // Exactly one synthesis call per turn, on the accumulated
            // reply. Failure only costs the audio portion.
            let audio = match &tts {
                Some(tts) => {
                    let utterance = speech_safe(&reply);
                    if utterance.is_empty() {
                        None
                    } else {
                        match tts.synthesize(&utterance).await {
                            Ok(audio) => Some(audio),
                            Err(e) => {
                                tracing::warn!(user_id, error = %e, "synthesis failed, omitting audio");
                                None
                            }
                        }
                    }
                }
                None => None,
            };

            if let Some(frame) = audio_frame(audio) {
                yield Ok(frame);
            }

            // Persist unconditionally (synthesis outcome does not matter).
            let mut updated = context;
            updated.push(latest);
            updated.push(Turn::text(Role::Model, reply));
            store.save(&user_id, &updated).await;

            // Fire and forget; enrichment never delays the response.
            let enricher = ProfileEnricher::new(generator, store);
            tokio::spawn(async move {
                enricher.run(&user_id, &updated).await;
            });
        })
    }

    /// Compose the effective system instruction for this turn:
    /// base persona + profile background + overlay instructions.
    async fn compose_instruction(&self, user_id: &str, mode_active: bool) -> String {
        let mut system = String::from(SYSTEM_INSTRUCTION);

        if let Some(summary) = self
            .store
            .load_profile(user_id)
            .await
            .and_then(|p| p.summary())
        {
            system.push_str("\n\n");
            system.push_str(&summary);
        }

        if mode_active {
            system.push_str("\n\n");
            system.push_str(self.game.instructions());
        }

        system
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::DeltaStream;
    use crate::session::{MemorySessionStore, Part, Profile};
    use crate::stream::AUDIO_SEPARATOR;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Fake generator that streams a canned reply word by word and records
    /// the system instructions it was given.
    struct FakeGenerator {
        reply: String,
        analysis: String,
        systems: Mutex<Vec<String>>,
        fail_mid_stream: bool,
    }

    impl FakeGenerator {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                analysis: "{}".to_string(),
                systems: Mutex::new(Vec::new()),
                fail_mid_stream: false,
            }
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        fn name(&self) -> &str {
            "fake"
        }

        async fn stream_reply(
            &self,
            system: &str,
            _history: &[Turn],
            _latest: &[Part],
        ) -> Result<DeltaStream, Error> {
            self.systems.lock().unwrap().push(system.to_string());

            let (tx, rx) = mpsc::channel(8);
            let reply = self.reply.clone();
            let fail = self.fail_mid_stream;
            tokio::spawn(async move {
                let mut first = true;
                for word in reply.split_whitespace() {
                    if tx.send(Ok(format!("{word} "))).await.is_err() {
                        return;
                    }
                    if fail && first {
                        let _ = tx
                            .send(Err(Error::UpstreamGeneration("boom".into())))
                            .await;
                        return;
                    }
                    first = false;
                }
            });
            Ok(rx)
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, Error> {
            Ok(self.analysis.clone())
        }
    }

    /// TTS fake returning a fixed blob or an error.
    struct FakeTts {
        audio: Result<Vec<u8>, String>,
    }

    #[async_trait]
    impl TextToSpeech for FakeTts {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, Error> {
            self.audio
                .clone()
                .map_err(Error::Synthesis)
        }

        fn provider_name(&self) -> &str {
            "fake"
        }
    }

    fn orchestrator(
        generator: Arc<FakeGenerator>,
        tts: Option<Arc<FakeTts>>,
        store: Arc<MemorySessionStore>,
    ) -> Orchestrator {
        Orchestrator::new(
            generator,
            tts.map(|t| t as Arc<dyn TextToSpeech>),
            store,
            &GameConfig::default(),
        )
    }

    async fn collect(
        stream: impl Stream<Item = Result<String, Error>> + Send,
    ) -> (Vec<String>, Option<Error>) {
        futures_util::pin_mut!(stream);
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => return (fragments, Some(e)),
            }
        }
        (fragments, None)
    }

    fn user_turn(text: &str) -> Vec<Turn> {
        vec![Turn::text(Role::User, text)]
    }

    #[tokio::test]
    async fn text_streams_before_sentinel() {
        let generator = Arc::new(FakeGenerator::new("哇 好棒"));
        let tts = Arc::new(FakeTts {
            audio: Ok(vec![1u8; 300]),
        });
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, Some(tts), store);

        let stream = orch.handle_turn("u1", user_turn("你好")).await.unwrap();
        let (fragments, error) = collect(stream).await;
        assert!(error.is_none());

        let sentinel_at = fragments
            .iter()
            .position(|f| f.contains(AUDIO_SEPARATOR))
            .unwrap();
        assert!(sentinel_at > 0, "text must precede the sentinel");
        assert_eq!(sentinel_at, fragments.len() - 1, "audio frame is terminal");

        let joined = fragments.join("");
        assert_eq!(joined.matches(AUDIO_SEPARATOR).count(), 1);
    }

    #[tokio::test]
    async fn synthesis_failure_omits_sentinel() {
        let generator = Arc::new(FakeGenerator::new("哇 好棒"));
        let tts = Arc::new(FakeTts {
            audio: Err("500 from synthesis".into()),
        });
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, Some(tts), store.clone());

        let stream = orch.handle_turn("u1", user_turn("你好")).await.unwrap();
        let (fragments, error) = collect(stream).await;
        let joined = fragments.join("");

        assert!(error.is_none(), "synthesis failure only costs the audio");
        assert!(!joined.contains(AUDIO_SEPARATOR));
        assert!(joined.contains("哇"));
        // transcript persisted despite the failure
        assert!(store.load("u1").await.is_some());
    }

    #[tokio::test]
    async fn no_tts_configured_means_text_only() {
        let generator = Arc::new(FakeGenerator::new("你好 呀"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store);

        let stream = orch.handle_turn("u1", user_turn("嗨")).await.unwrap();
        let (fragments, error) = collect(stream).await;
        assert!(error.is_none());
        assert!(!fragments.join("").contains(AUDIO_SEPARATOR));
    }

    #[tokio::test]
    async fn second_turn_sees_first_exchange() {
        let generator = Arc::new(FakeGenerator::new("我記得囉"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store.clone());

        let stream = orch.handle_turn("u1", user_turn("我喜歡恐龍")).await.unwrap();
        collect(stream).await;

        let transcript = store.load("u1").await.unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].text_content(), "我喜歡恐龍");
        assert_eq!(transcript[1].role, Role::Model);

        // second turn: context comes from the store, not the request
        let stream = orch.handle_turn("u1", user_turn("我剛說我喜歡什麼？")).await.unwrap();
        collect(stream).await;
        let transcript = store.load("u1").await.unwrap();
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript[0].text_content(), "我喜歡恐龍");
    }

    #[tokio::test]
    async fn store_unavailable_still_streams() {
        let generator = Arc::new(FakeGenerator::new("沒問題"));
        let store = Arc::new(MemorySessionStore::new());
        store.set_unavailable(true);
        let orch = orchestrator(generator, None, store);

        let stream = orch.handle_turn("u1", user_turn("Hi")).await.unwrap();
        let (fragments, error) = collect(stream).await;
        assert!(error.is_none());
        assert!(fragments.join("").contains("沒問題"));
    }

    #[tokio::test]
    async fn empty_history_is_rejected() {
        let generator = Arc::new(FakeGenerator::new("x"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store);

        let Err(err) = orch.handle_turn("u1", Vec::new()).await else {
            panic!("expected rejection");
        };
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn missing_user_id_is_rejected() {
        let generator = Arc::new(FakeGenerator::new("x"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store);

        let Err(err) = orch.handle_turn("  ", user_turn("hi")).await else {
            panic!("expected rejection");
        };
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn blank_final_turn_is_rejected() {
        let generator = Arc::new(FakeGenerator::new("x"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store);

        let Err(err) = orch.handle_turn("u1", vec![Turn::text(Role::User, "   ")]).await else {
            panic!("expected rejection");
        };
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn mid_stream_failure_surfaces_terminal_error_and_skips_persist() {
        let mut generator = FakeGenerator::new("第一句 第二句 第三句");
        generator.fail_mid_stream = true;
        let generator = Arc::new(generator);
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store.clone());

        let stream = orch.handle_turn("u1", user_turn("你好")).await.unwrap();
        let (fragments, error) = collect(stream).await;
        let joined = fragments.join("");

        assert!(joined.contains("第一句"), "flushed text is not retracted");
        assert!(!joined.contains(AUDIO_SEPARATOR));
        assert!(
            matches!(error, Some(Error::UpstreamGeneration(_))),
            "truncation must not read as a clean text-only reply"
        );
        assert!(store.load("u1").await.is_none());
    }

    #[tokio::test]
    async fn game_mode_instructions_follow_overlay_state() {
        let generator = Arc::new(FakeGenerator::new("好哦"));
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator.clone(), None, store);

        // activation turn applies the overlay
        let stream = orch.handle_turn("u1", user_turn("我們來玩遊戲")).await.unwrap();
        collect(stream).await;
        assert!(generator.systems.lock().unwrap()[0].contains("遊戲模式"));

        // stays applied on ordinary turns
        let stream = orch.handle_turn("u1", user_turn("是大象嗎")).await.unwrap();
        collect(stream).await;
        assert!(generator.systems.lock().unwrap()[1].contains("遊戲模式"));

        // exit phrase removes it for that same turn
        let stream = orch.handle_turn("u1", user_turn("不玩了")).await.unwrap();
        collect(stream).await;
        assert!(!generator.systems.lock().unwrap()[2].contains("遊戲模式"));
    }

    #[tokio::test]
    async fn profile_background_is_injected() {
        let generator = Arc::new(FakeGenerator::new("嗨"));
        let store = Arc::new(MemorySessionStore::new());
        let mut profile = Profile::default();
        profile.0.insert("name".into(), "小明".into());
        store.save_profile("u1", &profile).await;

        let orch = orchestrator(generator.clone(), None, store);
        let stream = orch.handle_turn("u1", user_turn("你好")).await.unwrap();
        collect(stream).await;

        let system = generator.systems.lock().unwrap()[0].clone();
        assert!(system.contains("name: 小明"));
    }

    #[tokio::test]
    async fn enrichment_runs_detached_after_response() {
        let mut generator = FakeGenerator::new("你好");
        generator.analysis = r#"{"likes": "恐龍"}"#.to_string();
        let generator = Arc::new(generator);
        let store = Arc::new(MemorySessionStore::new());
        let orch = orchestrator(generator, None, store.clone());

        let stream = orch.handle_turn("u1", user_turn("我喜歡恐龍")).await.unwrap();
        collect(stream).await;

        // detached task; give it a moment
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let profile = store.load_profile("u1").await.unwrap();
        assert_eq!(profile.0["likes"], "恐龍");
    }
}

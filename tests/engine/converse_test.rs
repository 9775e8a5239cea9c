//! End-to-end engine tests with a scripted backend and a fake index.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use sabai::engine::prompt::NO_FOLLOWUP_SENTINEL;
use sabai::engine::{
    ConversationEngine, EngineSettings, APOLOGY_REPLY, EMPTY_QUERY_REPLY, FOLLOWUP_PREFIX,
};
use sabai::providers::{GenerativeBackend, ProviderError};
use sabai::retrieval::{ContextIndex, RetrievalError};
use sabai::store::{SessionStore, Turn, DEFAULT_RISK_LABEL};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Backend that pops scripted replies and records the prompts it saw.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn seen_prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt lock").clone()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        self.prompts
            .lock()
            .expect("prompt lock")
            .push(prompt.to_owned());
        self.replies
            .lock()
            .expect("reply lock")
            .pop_front()
            .unwrap_or_else(|| Ok("คำตอบ".to_owned()))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// Index returning fixed passages, or failing on demand.
struct FakeIndex {
    passages: Vec<String>,
    fail: bool,
}

#[async_trait]
impl ContextIndex for FakeIndex {
    async fn search(&self, _query: &str, k: usize) -> Result<Vec<String>, RetrievalError> {
        if self.fail {
            return Err(RetrievalError::Database(sqlx::Error::PoolClosed));
        }
        Ok(self.passages.iter().take(k).cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

async fn setup_store() -> SessionStore {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");

    let schema = include_str!("../../migrations/001_schema.sql");
    sqlx::raw_sql(schema)
        .execute(&pool)
        .await
        .expect("schema should apply");

    SessionStore::new(pool)
}

fn engine_with(
    backend: Arc<ScriptedBackend>,
    index: FakeIndex,
    store: SessionStore,
) -> ConversationEngine {
    ConversationEngine::new(backend, Arc::new(index), store, EngineSettings::default())
}

fn plain_index() -> FakeIndex {
    FakeIndex {
        passages: vec!["เบาหวานเกิดจากระดับน้ำตาลในเลือดสูง".to_owned()],
        fail: false,
    }
}

async fn seed_turns(store: &SessionStore, user: &str, count: usize) {
    for i in 0..count {
        let turn = Turn::exchange(user, &format!("คำถาม {i}"), &format!("คำตอบ {i}"));
        store
            .append_turn(user, &turn, None)
            .await
            .expect("seed turn should persist");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_turn_answers_and_persists() {
    let backend = ScriptedBackend::new(vec![Ok("ดูแลสุขภาพนะคะ".to_owned())]);
    let store = setup_store().await;
    let engine = engine_with(Arc::clone(&backend), plain_index(), store.clone());

    let reply = engine
        .converse("user-1", "เบาหวานคืออะไร")
        .await
        .expect("converse should succeed");

    assert_eq!(reply.response, "ดูแลสุขภาพนะคะ");
    assert_eq!(reply.risk_label, None);

    // No prior history: only the answer prompt goes to the backend.
    let prompts = backend.seen_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("เบาหวานคืออะไร"));
    assert!(prompts[0].contains("เบาหวานเกิดจากระดับน้ำตาลในเลือดสูง"));

    let count = store.turn_count("user-1").await.expect("count");
    assert_eq!(count, 1);
    let turns = store.recent_turns("user-1", 10).await.expect("turns");
    assert_eq!(turns[0].query.as_deref(), Some("เบาหวานคืออะไร"));
    assert_eq!(turns[0].response.as_deref(), Some("ดูแลสุขภาพนะคะ"));
}

#[tokio::test]
async fn whitespace_query_gets_the_fixed_reply_without_persisting() {
    let backend = ScriptedBackend::new(vec![]);
    let store = setup_store().await;
    let engine = engine_with(Arc::clone(&backend), plain_index(), store.clone());

    let reply = engine.converse("user-1", "   ").await.expect("converse");
    assert_eq!(reply.response, EMPTY_QUERY_REPLY);
    assert!(backend.seen_prompts().is_empty());
    assert_eq!(store.turn_count("user-1").await.expect("count"), 0);
}

#[tokio::test]
async fn generation_failure_substitutes_the_apology_and_still_persists() {
    let backend = ScriptedBackend::new(vec![Err(ProviderError::EmptyCompletion)]);
    let store = setup_store().await;
    let engine = engine_with(backend, plain_index(), store.clone());

    let reply = engine.converse("user-1", "ปวดหัว").await.expect("converse");
    assert_eq!(reply.response, APOLOGY_REPLY);

    // The failed turn is still on record, reflecting what the user saw.
    let turns = store.recent_turns("user-1", 10).await.expect("turns");
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].response.as_deref(), Some(APOLOGY_REPLY));
}

#[tokio::test]
async fn retrieval_failure_degrades_to_an_unaugmented_prompt() {
    let backend = ScriptedBackend::new(vec![Ok("ตอบได้ค่ะ".to_owned())]);
    let failing = FakeIndex {
        passages: Vec::new(),
        fail: true,
    };
    let store = setup_store().await;
    let engine = engine_with(Arc::clone(&backend), failing, store);

    let reply = engine.converse("user-1", "ความดันสูง").await.expect("converse");
    assert_eq!(reply.response, "ตอบได้ค่ะ");

    let prompts = backend.seen_prompts();
    assert!(prompts[0].contains("ความดันสูง"));
}

#[tokio::test]
async fn followup_question_is_appended_when_history_exists() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 1).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok("คุณนอนหลับเพียงพอไหมคะ?".to_owned()),
    ]);
    let engine = engine_with(backend, plain_index(), store);

    let reply = engine.converse("user-1", "เหนื่อยง่าย").await.expect("converse");
    assert_eq!(
        reply.response,
        format!("คำตอบหลัก\n\n{FOLLOWUP_PREFIX}คุณนอนหลับเพียงพอไหมคะ?")
    );
}

#[tokio::test]
async fn sentinel_followup_is_suppressed() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 1).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok(NO_FOLLOWUP_SENTINEL.to_owned()),
    ]);
    let engine = engine_with(backend, plain_index(), store);

    let reply = engine.converse("user-1", "สบายดี").await.expect("converse");
    assert_eq!(reply.response, "คำตอบหลัก");
    assert!(!reply.response.contains(FOLLOWUP_PREFIX));
}

#[tokio::test]
async fn classification_fires_at_the_turn_multiple_and_persists_the_verdict() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 5).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok(NO_FOLLOWUP_SENTINEL.to_owned()),
        Ok("red\nมีประวัติครอบครัวและไม่ออกกำลังกาย".to_owned()),
    ]);
    let engine = engine_with(Arc::clone(&backend), plain_index(), store.clone());

    let reply = engine.converse("user-1", "กินหวานทุกวัน").await.expect("converse");

    let label = reply.risk_label.expect("classification should have fired");
    assert!(label.contains("แดง (red)"));
    assert!(reply.response.contains(&format!("[{label}]")));

    // The verdict lands on the session together with the appended turn.
    let stored = store
        .risk_label("user-1")
        .await
        .expect("risk read")
        .expect("session exists");
    assert_eq!(stored, label);
    assert_ne!(stored, DEFAULT_RISK_LABEL);
    assert_eq!(store.turn_count("user-1").await.expect("count"), 6);

    // Three backend calls: answer, follow-up, classification.
    assert_eq!(backend.seen_prompts().len(), 3);
}

#[tokio::test]
async fn classification_does_not_fire_off_the_multiple() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 4).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok(NO_FOLLOWUP_SENTINEL.to_owned()),
    ]);
    let engine = engine_with(Arc::clone(&backend), plain_index(), store.clone());

    let reply = engine.converse("user-1", "คำถามที่ห้า").await.expect("converse");
    assert_eq!(reply.risk_label, None);
    assert_eq!(
        store.risk_label("user-1").await.expect("risk").as_deref(),
        Some(DEFAULT_RISK_LABEL)
    );
    // Answer + follow-up only.
    assert_eq!(backend.seen_prompts().len(), 2);
}

#[tokio::test]
async fn unparsable_verdict_is_surfaced_but_not_recorded() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 5).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok(NO_FOLLOWUP_SENTINEL.to_owned()),
        Ok("ระดับปานกลาง\nอธิบายไม่ตรงรูปแบบ".to_owned()),
    ]);
    let engine = engine_with(backend, plain_index(), store.clone());

    let reply = engine.converse("user-1", "กินเค็มบ่อย").await.expect("converse");
    let label = reply.risk_label.expect("normalized verdict is surfaced");
    assert_eq!(label, "ไม่สามารถระบุระดับความเสี่ยงได้");

    // The stored label keeps its previous value rather than the fallback.
    assert_eq!(
        store.risk_label("user-1").await.expect("risk").as_deref(),
        Some(DEFAULT_RISK_LABEL)
    );
}

#[tokio::test]
async fn classification_backend_failure_is_absorbed_and_retried_later() {
    let store = setup_store().await;
    seed_turns(&store, "user-1", 5).await;

    let backend = ScriptedBackend::new(vec![
        Ok("คำตอบหลัก".to_owned()),
        Ok(NO_FOLLOWUP_SENTINEL.to_owned()),
        Err(ProviderError::Parse("boom".to_owned())),
    ]);
    let engine = engine_with(backend, plain_index(), store.clone());

    let reply = engine.converse("user-1", "นอนดึกทุกวัน").await.expect("converse");
    assert_eq!(reply.risk_label, None);
    assert!(!reply.response.contains("ระดับความเสี่ยง"));
    assert_eq!(
        store.risk_label("user-1").await.expect("risk").as_deref(),
        Some(DEFAULT_RISK_LABEL)
    );
    // The turn itself still persisted.
    assert_eq!(store.turn_count("user-1").await.expect("count"), 6);
}

#[tokio::test]
async fn start_chat_creates_the_session_idempotently() {
    let backend = ScriptedBackend::new(vec![]);
    let store = setup_store().await;
    let engine = engine_with(backend, plain_index(), store.clone());

    let first = engine.start_chat("user-1").await.expect("start");
    assert!(first.response.contains("สวัสดี!"));
    assert_eq!(first.previous_risk, None);

    let turns = store.recent_turns("user-1", 10).await.expect("turns");
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].sender.as_deref(), Some("bot"));

    // A second start appends a greeting instead of overwriting history.
    engine.start_chat("user-1").await.expect("second start");
    assert_eq!(store.turn_count("user-1").await.expect("count"), 2);
}

#[tokio::test]
async fn start_chat_surfaces_a_previously_recorded_risk() {
    let backend = ScriptedBackend::new(vec![]);
    let store = setup_store().await;
    store.ensure_session("user-1").await.expect("session");
    store
        .update_risk("user-1", "ระดับความเสี่ยง: **แดง (red)** เหตุผล: สูบบุหรี่")
        .await
        .expect("risk update");

    let engine = engine_with(backend, plain_index(), store);
    let reply = engine.start_chat("user-1").await.expect("start");

    let previous = reply.previous_risk.expect("previous risk surfaced");
    assert!(previous.contains("แดง (red)"));
    assert!(reply.response.contains(&previous));
}

#[tokio::test]
async fn start_chat_greets_by_directory_name() {
    let backend = ScriptedBackend::new(vec![]);
    let store = setup_store().await;
    sqlx::query("INSERT INTO users (user_id, name) VALUES ('user-1', 'สมชาย')")
        .execute(store.pool())
        .await
        .expect("user insert");

    let engine = engine_with(backend, plain_index(), store);
    let reply = engine.start_chat("user-1").await.expect("start");
    assert!(reply.response.contains("สวัสดี! สมชาย"));
}

#[tokio::test]
async fn new_chat_resets_and_confirms_in_thai() {
    let backend = ScriptedBackend::new(vec![]);
    let store = setup_store().await;
    seed_turns(&store, "user-1", 3).await;

    let engine = engine_with(backend, plain_index(), store.clone());
    let response = engine.new_chat("user-1").await.expect("reset");
    assert!(response.contains("เริ่มแชทใหม่แล้วค่ะ"));
    assert_eq!(store.turn_count("user-1").await.expect("count"), 0);
}

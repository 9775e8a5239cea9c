//! The Conversation & Risk-Escalation Engine.
//!
//! Orchestrates one inbound turn: retrieve reference passages, format the
//! history window, compose the answer prompt, call the generative backend,
//! optionally request a follow-up question, fire periodic risk
//! classification, and persist the turn. Per-turn failures of the external
//! collaborators are absorbed into fixed Thai replies; only session-store
//! read failures propagate to the caller.

pub mod history;
pub mod policy;
pub mod prompt;
pub mod risk;

use std::sync::Arc;

use tracing::{info, warn};

use crate::providers::GenerativeBackend;
use crate::retrieval::ContextIndex;
use crate::store::{SessionStore, StoreError, Turn, DEFAULT_RISK_LABEL};

use self::risk::{RiskError, RiskLevel, RiskOutcome};

// ---------------------------------------------------------------------------
// Fixed replies (Thai-pinned, matching the prompt templates)
// ---------------------------------------------------------------------------

/// Reply for an empty or whitespace-only query.
pub const EMPTY_QUERY_REPLY: &str = "ฉันไม่ได้ยินคุณเลยค่ะ ช่วยพูดอีกครั้งได้ไหมคะ?";
/// Apology substituted when generation fails or produces no text.
pub const APOLOGY_REPLY: &str = "ขอโทษค่ะ ฉันไม่สามารถประมวลผลคำขอของคุณได้ในขณะนี้";
/// Confirmation after an archive-and-reset.
pub const NEW_CHAT_REPLY: &str = "เริ่มแชทใหม่แล้วค่ะ! กรุณาอธิบายอาการหรือความกังวลของคุณ";
/// Note appended after a completed risk analysis.
pub const ANALYSIS_COMPLETE_NOTE: &str =
    "การวิเคราะห์เสร็จสิ้น หากมีข้อสงสัยเพิ่มเติมกรุณาเริ่มการสนทนาใหม่";
/// Prefix for an appended follow-up question.
pub const FOLLOWUP_PREFIX: &str = "คำถามถัดไป: ";
/// Fallback display name when the directory has no entry for the user.
pub const DEFAULT_USER_NAME: &str = "คุณ";

// ---------------------------------------------------------------------------
// Settings and replies
// ---------------------------------------------------------------------------

/// Engine tuning knobs, resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of prior turns in the prompt history window.
    pub history_window: usize,
    /// Classification fires every `risk_interval` completed turns.
    pub risk_interval: u64,
    /// Passages fetched per retrieval call.
    pub retrieval_fan_out: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            history_window: 5,
            risk_interval: 5,
            retrieval_fan_out: 5,
        }
    }
}

/// The engine's answer to one conversational turn.
#[derive(Debug, Clone)]
pub struct ConverseReply {
    /// Full reply text shown to the user.
    pub response: String,
    /// Risk assessment produced this turn, if classification fired.
    pub risk_label: Option<String>,
}

/// The engine's answer to an explicit session start.
#[derive(Debug, Clone)]
pub struct StartReply {
    /// Greeting text shown to the user.
    pub response: String,
    /// Previously recorded risk label for returning users.
    pub previous_risk: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Conversation engine with explicitly injected collaborators.
pub struct ConversationEngine {
    backend: Arc<dyn GenerativeBackend>,
    index: Arc<dyn ContextIndex>,
    store: SessionStore,
    settings: EngineSettings,
}

impl ConversationEngine {
    /// Build an engine from its collaborators.
    pub fn new(
        backend: Arc<dyn GenerativeBackend>,
        index: Arc<dyn ContextIndex>,
        store: SessionStore,
        settings: EngineSettings,
    ) -> Self {
        Self {
            backend,
            index,
            store,
            settings,
        }
    }

    /// Access the underlying session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Handle one conversational turn for `user_id`.
    ///
    /// The trigger policy is evaluated on the pre-turn count, so the
    /// in-flight turn does not count toward its own classification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when session-store reads fail; backend and
    /// retrieval failures are absorbed into fixed replies instead.
    pub async fn converse(&self, user_id: &str, query: &str) -> Result<ConverseReply, StoreError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(ConverseReply {
                response: EMPTY_QUERY_REPLY.to_owned(),
                risk_label: None,
            });
        }

        let context = self.retrieve_context(query).await;
        let window = self
            .store
            .recent_turns(user_id, self.settings.history_window)
            .await?;
        let formatted_history = history::format_window(&window);

        let answer_prompt = prompt::answer_prompt(query, &context, &formatted_history);
        let mut reply = match self.backend.generate(&answer_prompt).await {
            Ok(text) => text,
            Err(err) => {
                warn!(user_id, error = %err, "answer generation failed");
                APOLOGY_REPLY.to_owned()
            }
        };

        if policy::should_follow_up(&formatted_history) {
            if let Some(question) = self.followup_question(&formatted_history).await {
                reply.push_str("\n\n");
                reply.push_str(FOLLOWUP_PREFIX);
                reply.push_str(&question);
            }
        }

        let pre_turn_count = self.store.turn_count(user_id).await?;
        let mut assessment = None;
        let mut persisted_label = None;
        if policy::should_classify(pre_turn_count, self.settings.risk_interval) {
            match self.classify_risk(user_id).await {
                Ok(RiskOutcome::Verdict(verdict)) => {
                    let text = verdict.assessment();
                    reply.push_str(&format!("\n\n[{text}]"));
                    reply.push_str("\n\n");
                    reply.push_str(ANALYSIS_COMPLETE_NOTE);
                    if verdict.level != RiskLevel::Unspecified {
                        persisted_label = Some(text.clone());
                    }
                    info!(user_id, level = verdict.level.as_str(), "risk classified");
                    assessment = Some(text);
                }
                Ok(RiskOutcome::Pending) => {
                    info!(user_id, pre_turn_count, "risk classification pending");
                }
                Err(err) => {
                    // Distinct from an unparsable verdict: nothing is recorded,
                    // the next trigger retries.
                    warn!(user_id, error = %err, "risk classification failed");
                }
            }
        }

        let turn = Turn::exchange(user_id, query, &reply);
        if let Err(err) = self
            .store
            .append_turn(user_id, &turn, persisted_label.as_deref())
            .await
        {
            warn!(user_id, error = %err, "failed to persist turn");
        }

        Ok(ConverseReply {
            response: reply,
            risk_label: assessment,
        })
    }

    /// Start (or resume) a conversation with a bot greeting.
    ///
    /// First contact creates the session with a single greeting turn;
    /// returning users get the greeting appended, with their last-known
    /// risk label surfaced when one was recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read or written.
    pub async fn start_chat(&self, user_id: &str) -> Result<StartReply, StoreError> {
        let name = self
            .store
            .lookup_name(user_id)
            .await?
            .unwrap_or_else(|| DEFAULT_USER_NAME.to_owned());

        let previous_risk = self
            .store
            .risk_label(user_id)
            .await?
            .filter(|label| label != DEFAULT_RISK_LABEL);

        let mut greeting = format!(
            "สวัสดี! {name} วันนี้คุณรู้สึกอย่างไรบ้าง? กรุณาอธิบายอาการหรือความกังวลของคุณ"
        );
        if let Some(risk) = &previous_risk {
            greeting.push_str(&format!(
                "\n\nจากการสนทนาครั้งก่อน คุณอยู่ในกลุ่มความเสี่ยง: {risk}"
            ));
        }

        let turn = Turn::greeting(user_id, &greeting);
        self.store.append_turn(user_id, &turn, None).await?;

        Ok(StartReply {
            response: greeting,
            previous_risk,
        })
    }

    /// Archive the current session (when non-empty) and start a fresh one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the reset transaction fails.
    pub async fn new_chat(&self, user_id: &str) -> Result<String, StoreError> {
        self.store.archive_and_reset(user_id).await?;
        Ok(NEW_CHAT_REPLY.to_owned())
    }

    /// Fetch a single persisted message by numeric index or turn identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UserNotFound`] / [`StoreError::MessageNotFound`]
    /// as structured outcomes for the HTTP layer.
    pub async fn get_message(&self, user_id: &str, message_id: &str) -> Result<String, StoreError> {
        self.store.find_message(user_id, message_id).await
    }

    // ── Internal steps ──────────────────────────────────────────

    /// Retrieve reference passages, degrading to an empty context on failure.
    async fn retrieve_context(&self, query: &str) -> String {
        match self
            .index
            .search(query, self.settings.retrieval_fan_out)
            .await
        {
            Ok(passages) => passages.join("\n"),
            Err(err) => {
                warn!(error = %err, "context retrieval failed, continuing without context");
                String::new()
            }
        }
    }

    /// Request a follow-up question and normalize the sentinel.
    ///
    /// Failures are absorbed: a turn never fails because the optional
    /// follow-up call did.
    async fn followup_question(&self, formatted_history: &str) -> Option<String> {
        let followup_prompt = prompt::followup_prompt(formatted_history);
        match self.backend.generate(&followup_prompt).await {
            Ok(text) => prompt::normalize_followup(&text),
            Err(err) => {
                warn!(error = %err, "follow-up generation failed");
                None
            }
        }
    }

    /// Classify risk over the recent history window.
    async fn classify_risk(&self, user_id: &str) -> Result<RiskOutcome, RiskError> {
        let window = self
            .store
            .recent_turns(user_id, self.settings.history_window)
            .await?;
        if window.len() < self.settings.history_window {
            return Ok(RiskOutcome::Pending);
        }

        let recent = history::format_window(&window);
        let classification_prompt = risk::classification_prompt(&recent);
        let raw = self.backend.generate(&classification_prompt).await?;
        Ok(RiskOutcome::Verdict(risk::parse_verdict(&raw)))
    }
}

//! Periodic risk classification over the recent history window.
//!
//! The classifier constrains the model's first output line to exactly one of
//! two literal tokens (`green` / `red`) with a rationale on the following
//! lines. Anything else is normalized to an unspecified verdict with a fixed
//! Thai message; a malformed verdict is never surfaced or persisted as if it
//! were valid. Backend failures are a distinct outcome so the caller can
//! retry at the next trigger instead of recording a permanent label.

use crate::providers::ProviderError;

/// Fixed assessment text when the model's verdict cannot be parsed.
pub const UNPARSABLE_ASSESSMENT: &str = "ไม่สามารถระบุระดับความเสี่ยงได้";

/// Coarse risk bucket parsed from the classifier's first line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    /// `green` — low risk.
    Low,
    /// `red` — high risk.
    High,
    /// First line was neither literal token.
    Unspecified,
}

impl RiskLevel {
    /// The literal classification token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "green",
            Self::High => "red",
            Self::Unspecified => "unspecified",
        }
    }

    /// Bilingual display name used in assessments shown to the user.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Low => "เขียว (green)",
            Self::High => "แดง (red)",
            Self::Unspecified => "ไม่ระบุ",
        }
    }
}

/// A classification verdict: the risk bucket plus its rationale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskVerdict {
    /// Parsed risk bucket.
    pub level: RiskLevel,
    /// Free-text rationale from the model (empty when unparsable).
    pub rationale: String,
}

impl RiskVerdict {
    /// Full assessment text recorded on the session and shown to the user.
    pub fn assessment(&self) -> String {
        match self.level {
            RiskLevel::Unspecified => UNPARSABLE_ASSESSMENT.to_owned(),
            _ => format!(
                "ระดับความเสี่ยง: **{}** เหตุผล: {}",
                self.level.display_name(),
                self.rationale
            ),
        }
    }
}

/// Outcome of a classification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskOutcome {
    /// A verdict was produced (possibly normalized to unspecified).
    Verdict(RiskVerdict),
    /// Fewer turns than the window size: insufficient data, try later.
    Pending,
}

/// Errors from a classification attempt, distinct from an unparsable verdict.
#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    /// The generative backend call failed; retry at the next trigger.
    #[error("risk classification backend failure: {0}")]
    Backend(#[from] ProviderError),
    /// Reading the history window failed; retry at the next trigger.
    #[error("risk classification store failure: {0}")]
    Store(#[from] crate::store::StoreError),
}

/// Compose the classification prompt over the formatted recent turns.
pub fn classification_prompt(recent_history: &str) -> String {
    format!(
        "Analyze the user's health from the conversation history and classify them as:\n\
         - \"green\" (low risk)\n\
         - \"red\" (high risk)\n\
         \n\
         ### Risk Classification Criteria:\n\
         - Green (Low Risk): No symptoms indicating NCDs, good health behaviors, regular exercise, healthy diet.\n\
         - Red (High Risk): Symptoms possibly related to NCDs, family history of NCDs, lack of exercise, unbalanced diet, smoking, regular alcohol consumption.\n\
         \n\
         -------------------------\n\
         ### Conversation History:\n\
         {recent_history}\n\
         \n\
         ### Instructions:\n\
         1. First line of your response must be ONLY ONE of these exact words: \"green\" or \"red\" based on your analysis.\n\
         2. On the next line, explain WHY you classified them this way in Thai language.\n\
         3. Provide specific health-related reasons based on their conversation history."
    )
}

/// Parse raw classifier output into a verdict.
///
/// Splits on the first line break; the first line, trimmed and lower-cased,
/// must equal `green` or `red`. Any other first line normalizes to
/// [`RiskLevel::Unspecified`] with an empty rationale.
pub fn parse_verdict(raw: &str) -> RiskVerdict {
    let mut lines = raw.trim().splitn(2, '\n');
    let first = lines.next().unwrap_or_default().trim().to_lowercase();
    let rationale = lines.next().unwrap_or_default().trim().to_owned();

    match first.as_str() {
        "green" => RiskVerdict {
            level: RiskLevel::Low,
            rationale,
        },
        "red" => RiskVerdict {
            level: RiskLevel::High,
            rationale,
        },
        _ => RiskVerdict {
            level: RiskLevel::Unspecified,
            rationale: String::new(),
        },
    }
}

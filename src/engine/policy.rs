//! Turn-count trigger policy.
//!
//! The turn count is always derived from the persisted turn-sequence length
//! (see [`crate::store::SessionStore::turn_count`]); this module only decides
//! what fires at a given count.

/// Whether risk classification fires at the given pre-turn count.
///
/// Fires exactly when the count accumulated by prior turns is a positive
/// multiple of `interval` — evaluated before the in-flight turn is appended.
/// The periodic check (rather than a one-shot threshold) re-classifies as the
/// conversation grows while bounding model-call cost.
///
/// An interval of zero disables classification entirely.
pub fn should_classify(pre_turn_count: u64, interval: u64) -> bool {
    pre_turn_count > 0
        && pre_turn_count
            .checked_rem(interval)
            .is_some_and(|rem| rem == 0)
}

/// Whether a follow-up question should be requested this turn.
///
/// Follow-ups only make sense once there is prior context to clarify.
pub fn should_follow_up(formatted_history: &str) -> bool {
    !formatted_history.is_empty()
}

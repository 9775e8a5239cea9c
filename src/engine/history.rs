//! History window formatting for prompt assembly.

use crate::store::Turn;

/// Placeholder when a turn has no recorded query.
pub const UNKNOWN_QUERY: &str = "ไม่ทราบคำถาม";
/// Placeholder when a turn has no recorded response.
pub const UNKNOWN_RESPONSE: &str = "ไม่มีคำตอบ";

/// Render a window of turns as prompt history.
///
/// One line per turn, `"<query> <response>"`, oldest first. Missing fields
/// fall back to the Thai placeholders. An empty window renders as an empty
/// string, which downstream templates treat as "no prior context".
pub fn format_window(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let query = turn.query.as_deref().unwrap_or(UNKNOWN_QUERY);
            let response = turn.response.as_deref().unwrap_or(UNKNOWN_RESPONSE);
            format!("{query} {response}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

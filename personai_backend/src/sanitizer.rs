//! Post-processing for raw backend text.

use crate::prompt::PROMPT_ECHO_MARKERS;

/// Strips prompt headers the model sometimes echoes back, then normalizes whitespace:
/// every line is trimmed, blank lines are dropped and the rest is joined with `\n`.
pub fn clean(raw: &str) -> String {
    let mut cleaned = raw.to_string();
    // Removing one marker can splice the halves of another together; repeat until none remain.
    while PROMPT_ECHO_MARKERS
        .iter()
        .any(|marker| cleaned.contains(marker))
    {
        for marker in PROMPT_ECHO_MARKERS {
            cleaned = cleaned.replace(marker, "");
        }
    }

    cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

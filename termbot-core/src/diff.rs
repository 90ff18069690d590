// ABOUTME: UTF-8 codepoint-safe incremental-diff computation for the Output Scheduler
// ABOUTME: Falls back to the trailing N lines of the new capture when it isn't an extension of the last one

const DEFAULT_FALLBACK_LINES: usize = 30;

/// Normalize line endings and trim trailing blank lines.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n");
    unified.trim_end_matches('\n').to_string()
}

/// Compute what should be emitted for a new capture relative to the
/// previously emitted text, in claude/incremental mode.
///
/// If `new` is a proper extension of `previous` (common prefix measured in
/// UTF-8 code points), returns the suffix. Otherwise falls back to the
/// trailing `fallback_lines` lines of `new` (the pane likely scrolled).
pub fn incremental_tail(previous: &str, new: &str, fallback_lines: Option<usize>) -> String {
    let previous = normalize(previous);
    let new_norm = normalize(new);

    let prev_chars: Vec<char> = previous.chars().collect();
    let new_chars: Vec<char> = new_norm.chars().collect();

    let common = prev_chars
        .iter()
        .zip(new_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();

    if common == prev_chars.len() {
        new_chars[common..].iter().collect()
    } else {
        trailing_lines(&new_norm, fallback_lines.unwrap_or(DEFAULT_FALLBACK_LINES))
    }
}

fn trailing_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

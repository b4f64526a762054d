/// Shorten `text` to at most `max_chars` characters for log output, marking
/// the cut with `...` and folding newlines so each preview stays on one line.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text
        .chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

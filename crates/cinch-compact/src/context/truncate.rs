//! Head/tail truncation that keeps the shape of a payload.
//!
//! Tool output usually carries its most useful lines at both ends (a command
//! echo at the top, an error or summary at the bottom), so content is cut
//! from the middle and replaced with a marker that states how much was
//! dropped.

use super::budget::TokenEstimator;

/// Attempts at shrinking a byte budget before falling back to a plain prefix.
const MAX_FIT_ITERATIONS: usize = 16;

/// Each retry shrinks the byte budget by this factor.
const SHRINK_FACTOR: f64 = 0.85;

fn truncation_marker(omitted_bytes: usize) -> String {
    format!("\n[... {omitted_bytes} bytes truncated ...]\n")
}

/// Keep the head and tail of `text` within `max_bytes`, joined by a marker.
///
/// Cuts snap to a nearby line break when one is within a quarter of each
/// half. Inputs too small to hold the marker get a plain prefix.
pub fn middle_truncate(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    // Sized for the worst case so the final marker never overshoots.
    let marker_len = truncation_marker(text.len()).len();
    if max_bytes <= marker_len {
        let (head, _) = text.split_at(floor_char_boundary(text, max_bytes));
        return head.to_string();
    }

    let available = max_bytes - marker_len;
    let head_len = available / 2;
    let tail_len = available - head_len;

    let mut head_end = floor_char_boundary(text, head_len);
    let mut tail_start = ceil_char_boundary(text, text.len() - tail_len);

    let head_window_start = floor_char_boundary(text, head_end.saturating_sub(head_len / 4));
    if let Some(pos) = text
        .get(head_window_start..head_end)
        .and_then(|window| window.rfind('\n'))
    {
        head_end = head_window_start + pos + 1;
    }

    let tail_window_end = ceil_char_boundary(text, tail_start + tail_len / 4);
    if let Some(pos) = text
        .get(tail_start..tail_window_end)
        .and_then(|window| window.find('\n'))
    {
        tail_start += pos + 1;
    }

    let (head, _) = text.split_at(head_end);
    let (_, tail) = text.split_at(tail_start);
    format!("{head}{}{tail}", truncation_marker(tail_start - head_end))
}

/// Truncate `text` so the estimator sizes it at no more than `max_tokens`.
///
/// Text the estimator cannot size is returned unchanged.
pub fn truncate_to_tokens(text: &str, max_tokens: usize, estimator: &dyn TokenEstimator) -> String {
    if max_tokens == 0 {
        return String::new();
    }
    let Some(tokens) = estimator.estimate_text(text) else {
        return text.to_string();
    };
    if tokens <= max_tokens {
        return text.to_string();
    }

    let mut max_bytes = (text.len() as f64 * max_tokens as f64 / tokens as f64) as usize;
    for _ in 0..MAX_FIT_ITERATIONS {
        let candidate = middle_truncate(text, max_bytes);
        match estimator.estimate_text(&candidate) {
            Some(t) if t > max_tokens => {}
            _ => return candidate,
        }
        max_bytes = (max_bytes as f64 * SHRINK_FACTOR) as usize;
    }

    let (head, _) = text.split_at(floor_char_boundary(text, max_bytes));
    head.to_string()
}

/// Largest byte index `<= pos` that is a char boundary.
fn floor_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut i = pos;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest byte index `>= pos` that is a char boundary.
fn ceil_char_boundary(s: &str, pos: usize) -> usize {
    if pos >= s.len() {
        return s.len();
    }
    let mut i = pos;
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

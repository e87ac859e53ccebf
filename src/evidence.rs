//! Evidence snippet helpers: char-aware context windows around matches and
//! length-bounded truncation that prefers a sentence boundary.
//!
//! All positions here are *character* offsets. Transcript text is mostly
//! CJK, so byte slicing would panic on non-boundaries.

/// Extract a window of `pad` characters on each side of the span
/// `[start, end)` (char offsets), trimmed of surrounding whitespace.
pub fn char_window(chars: &[char], start: usize, end: usize, pad: usize) -> String {
    let from = start.saturating_sub(pad);
    let to = end.saturating_add(pad).min(chars.len());
    chars[from..to].iter().collect::<String>().trim().to_string()
}

/// Like [`char_window`], but the span is given in byte offsets into `text`
/// (as produced by regex matches).
pub fn byte_span_window(text: &str, byte_start: usize, byte_end: usize, pad: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = text[..byte_start].chars().count();
    let end = start + text[byte_start..byte_end].chars().count();
    char_window(&chars, start, end, pad)
}

/// Sentence boundaries recognized when truncating quotes.
const SENTENCE_ENDS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

/// Truncate `quote` to at most `max_len` characters. When the cut would land
/// mid-sentence, prefer the last sentence boundary past half the limit. The
/// result never exceeds `max_len` characters.
pub fn truncate_quote(quote: &str, max_len: usize) -> String {
    let chars: Vec<char> = quote.chars().collect();
    if chars.len() <= max_len {
        return quote.to_string();
    }

    let head = &chars[..max_len];
    let boundary = head
        .iter()
        .rposition(|c| SENTENCE_ENDS.contains(c))
        .map(|i| i + 1);

    match boundary {
        Some(cut) if cut * 2 > max_len => head[..cut].iter().collect(),
        _ => head.iter().collect(),
    }
}

/// Number of characters in `s` (evidence limits are char counts, not bytes).
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_pads_both_sides() {
        let chars: Vec<char> = "abcdefghij".chars().collect();
        assert_eq!(char_window(&chars, 4, 5, 2), "cdefg");
        // Clipped at the edges.
        assert_eq!(char_window(&chars, 0, 2, 5), "abcdefg");
    }

    #[test]
    fn byte_span_window_handles_cjk() {
        let text = "我是益盟操盘手专员，耽误您两分钟";
        let start = text.find("专员").unwrap();
        let end = start + "专员".len();
        let w = byte_span_window(text, start, end, 3);
        assert_eq!(w, "盟操盘手专员，耽误");
    }

    #[test]
    fn short_quote_untouched() {
        assert_eq!(truncate_quote("短句。", 200), "短句。");
    }

    #[test]
    fn long_quote_cut_to_exact_limit_without_boundary() {
        let quote: String = std::iter::repeat('字').take(350).collect();
        let cut = truncate_quote(&quote, 200);
        assert_eq!(char_len(&cut), 200);
    }

    #[test]
    fn prefers_sentence_boundary_past_half() {
        let mut quote = String::new();
        quote.push_str(&"前".repeat(150));
        quote.push('。');
        quote.push_str(&"后".repeat(100));
        let cut = truncate_quote(&quote, 200);
        assert_eq!(char_len(&cut), 151);
        assert!(cut.ends_with('。'));
    }

    #[test]
    fn ignores_boundary_before_half() {
        let mut quote = String::new();
        quote.push_str("头。");
        quote.push_str(&"尾".repeat(300));
        let cut = truncate_quote(&quote, 200);
        assert_eq!(char_len(&cut), 200);
    }
}

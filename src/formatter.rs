//! Content formatting — turns one email into an ordered thread of posts.
//!
//! The body is whitespace-normalized, prefixed with the subject, and split
//! into segments that fit the platform limit. Splits prefer paragraph
//! boundaries, then sentence boundaries, then whitespace, and only cut
//! mid-word as a last resort. When a thread has more than one segment,
//! every segment carries a trailing ` n/total` continuation marker that is
//! budgeted inside the limit.

use std::sync::OnceLock;

use regex::Regex;

/// Bluesky per-post character limit.
pub const POST_MAX_CHARS: usize = 300;

/// Segment text when a message has neither subject nor body. A thread must
/// never be empty.
const EMPTY_PLACEHOLDER: &str = "(no content)";

/// Build the ordered thread segments for one message.
///
/// The subject is prefixed to the body when present; paragraph-preferred
/// splitting gives the subject its own leading segment when it does not fit
/// together with the first paragraph.
pub fn format_thread(subject: &str, body: &str, limit: usize) -> Vec<String> {
    let subject = normalize_whitespace(subject);
    let body = normalize_whitespace(body);

    let text = match (subject.is_empty(), body.is_empty()) {
        (true, true) => EMPTY_PLACEHOLDER.to_string(),
        (false, true) => subject,
        (true, false) => body,
        (false, false) => format!("{subject}\n\n{body}"),
    };

    split_segments(&text, limit)
}

/// Normalize message whitespace before splitting: strip leading indentation
/// per line, blank out whitespace-only lines (including zero-width and soft
/// hyphen characters common in HTML mail), and collapse runs of blank lines.
pub fn normalize_whitespace(text: &str) -> String {
    static LEADING: OnceLock<Regex> = OnceLock::new();
    static INVISIBLE_LINE: OnceLock<Regex> = OnceLock::new();
    static NEWLINE_RUNS: OnceLock<Regex> = OnceLock::new();

    let leading = LEADING.get_or_init(|| Regex::new(r"(?m)^[ \t]+").unwrap());
    let invisible = INVISIBLE_LINE.get_or_init(|| {
        Regex::new(r"(?m)^[\s\x{200B}-\x{200D}\x{FEFF}\x{00AD}]+$").unwrap()
    });
    let runs = NEWLINE_RUNS.get_or_init(|| Regex::new(r"\n{3,}").unwrap());

    let text = leading.replace_all(text, "");
    let text = invisible.replace_all(&text, "");
    let text = runs.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Split `text` into segments of at most `limit` characters, marker included.
fn split_segments(text: &str, limit: usize) -> Vec<String> {
    if char_len(text) <= limit {
        return vec![text.to_string()];
    }

    // The marker width depends on the final segment count, which depends on
    // the content budget, which depends on the marker width. Start from a
    // lower bound and re-split until the count stops growing.
    let mut total = char_len(text).div_ceil(limit).max(2);
    loop {
        let budget = limit.saturating_sub(marker_width(total)).max(1);
        let pieces = split_plain(text, budget);
        if pieces.len() <= total {
            let total = pieces.len();
            if total == 1 {
                // Normalization and trimming brought it under the budget.
                return pieces;
            }
            return pieces
                .into_iter()
                .enumerate()
                .map(|(i, piece)| format!("{piece} {}/{total}", i + 1))
                .collect();
        }
        total = pieces.len();
    }
}

/// Widest marker for a thread of `total` segments, including the leading space.
fn marker_width(total: usize) -> usize {
    format!(" {total}/{total}").chars().count()
}

/// Split text into pieces of at most `budget` characters, without markers.
/// Whole paragraphs are packed greedily; an oversized paragraph falls back
/// to sentence packing.
fn split_plain(text: &str, budget: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if char_len(paragraph) > budget {
            flush(&mut pieces, &mut current);
            pieces.extend(split_oversized(paragraph, budget));
            continue;
        }
        let sep = if current.is_empty() { 0 } else { 2 };
        if char_len(&current) + sep + char_len(paragraph) <= budget {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
        } else {
            flush(&mut pieces, &mut current);
            current.push_str(paragraph);
        }
    }
    flush(&mut pieces, &mut current);

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }
    pieces
}

/// Split a paragraph that exceeds the budget: pack sentences, falling back
/// to whitespace (and finally mid-word) splits for oversized sentences.
fn split_oversized(paragraph: &str, budget: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(paragraph) {
        if char_len(sentence) > budget {
            flush(&mut pieces, &mut current);
            pieces.extend(split_words(sentence, budget));
            continue;
        }
        let sep = if current.is_empty() { 0 } else { 1 };
        if char_len(&current) + sep + char_len(sentence) <= budget {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(sentence);
        } else {
            flush(&mut pieces, &mut current);
            current.push_str(sentence);
        }
    }
    flush(&mut pieces, &mut current);
    pieces
}

/// Split on sentence-ending punctuation followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() && matches!(prev, Some('.' | '!' | '?')) {
            let sentence = text[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i;
        }
        prev = Some(ch);
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Split at whitespace within the budget, cutting mid-word only when a
/// budget-sized window contains no whitespace at all.
fn split_words(text: &str, budget: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text.trim();

    while !remaining.is_empty() {
        if char_len(remaining) <= budget {
            pieces.push(remaining.to_string());
            break;
        }
        let cut = remaining
            .char_indices()
            .nth(budget)
            .map_or(remaining.len(), |(i, _)| i);
        let window = &remaining[..cut];
        let split_at = window
            .rfind(char::is_whitespace)
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        pieces.push(remaining[..split_at].trim_end().to_string());
        remaining = remaining[split_at..].trim_start();
    }
    pieces
}

fn flush(pieces: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        pieces.push(std::mem::take(current));
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strip a trailing ` n/total` continuation marker, if present.
    fn strip_marker(segment: &str) -> &str {
        static MARKER: OnceLock<Regex> = OnceLock::new();
        let re = MARKER.get_or_init(|| Regex::new(r" \d+/\d+$").unwrap());
        match re.find(segment) {
            Some(m) => &segment[..m.start()],
            None => segment,
        }
    }

    /// All non-whitespace characters, in order.
    fn content_only(text: &str) -> String {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    }

    // ── Normalization ───────────────────────────────────────────────

    #[test]
    fn normalize_strips_leading_indentation() {
        assert_eq!(normalize_whitespace("  hello\n\tworld"), "hello\nworld");
    }

    #[test]
    fn normalize_collapses_blank_line_runs() {
        assert_eq!(normalize_whitespace("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn normalize_blanks_invisible_only_lines() {
        let text = "a\n\u{200b}\u{200c}\nb";
        assert_eq!(normalize_whitespace(text), "a\n\nb");
    }

    #[test]
    fn normalize_trims_ends() {
        assert_eq!(normalize_whitespace("\n\n  hi  \n\n"), "hi");
    }

    // ── Segment counts at the boundary ──────────────────────────────

    #[test]
    fn body_exactly_at_limit_is_one_segment() {
        let body = "a".repeat(300);
        let segments = format_thread("", &body, 300);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0], body);
    }

    #[test]
    fn one_char_over_limit_is_two_segments() {
        let body = "a".repeat(301);
        let segments = format_thread("", &body, 300);
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert!(segment.chars().count() <= 300);
        }
        assert!(segments[0].ends_with(" 1/2"));
        assert!(segments[1].ends_with(" 2/2"));
    }

    #[test]
    fn single_segment_carries_no_marker() {
        let segments = format_thread("", "Hello world", 300);
        assert_eq!(segments, vec!["Hello world"]);
    }

    #[test]
    fn six_hundred_chars_at_limit_300_gives_two_segments() {
        // 600 characters of body: two 290-char paragraphs joined by a run
        // of blank lines that normalization collapses.
        let body = format!("{}{}{}", "a".repeat(290), "\n".repeat(20), "b".repeat(290));
        assert_eq!(body.chars().count(), 600);

        let segments = format_thread("", &body, 300);
        assert_eq!(segments.len(), 2);
        for segment in &segments {
            assert!(segment.chars().count() <= 300);
        }
        assert!(segments[0].starts_with('a'));
        assert!(segments[1].starts_with('b'));
    }

    // ── Splitting preferences ───────────────────────────────────────

    #[test]
    fn prefers_paragraph_boundaries() {
        let body = format!("{}\n\n{}", "a".repeat(150), "b".repeat(150));
        let segments = format_thread("", &body, 200);
        assert_eq!(segments.len(), 2);
        assert_eq!(strip_marker(&segments[0]), "a".repeat(150));
        assert_eq!(strip_marker(&segments[1]), "b".repeat(150));
    }

    #[test]
    fn packs_multiple_paragraphs_into_one_segment() {
        let body = "first para\n\nsecond para";
        let segments = format_thread("", body, 300);
        assert_eq!(segments, vec!["first para\n\nsecond para"]);
    }

    #[test]
    fn falls_back_to_sentence_boundaries() {
        let body = format!("{}. {}.", "a".repeat(140), "b".repeat(140));
        let segments = format_thread("", &body, 200);
        assert_eq!(segments.len(), 2);
        assert_eq!(strip_marker(&segments[0]), format!("{}.", "a".repeat(140)));
        assert_eq!(strip_marker(&segments[1]), format!("{}.", "b".repeat(140)));
    }

    #[test]
    fn falls_back_to_whitespace_within_a_sentence() {
        let words = std::iter::repeat_n("word", 100)
            .collect::<Vec<_>>()
            .join(" ");
        let segments = format_thread("", &words, 100);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.chars().count() <= 100);
            // No word was cut
            for word in strip_marker(segment).split_whitespace() {
                assert_eq!(word, "word");
            }
        }
    }

    #[test]
    fn cuts_mid_word_only_as_last_resort() {
        let body = "x".repeat(500);
        let segments = format_thread("", &body, 100);
        assert!(segments.len() >= 5);
        for segment in &segments {
            assert!(segment.chars().count() <= 100);
        }
    }

    // ── Markers ─────────────────────────────────────────────────────

    #[test]
    fn every_segment_of_a_thread_is_numbered() {
        let body = "a".repeat(1000);
        let segments = format_thread("", &body, 300);
        let total = segments.len();
        for (i, segment) in segments.iter().enumerate() {
            assert!(
                segment.ends_with(&format!(" {}/{total}", i + 1)),
                "segment {i} missing marker: {segment:?}"
            );
        }
    }

    #[test]
    fn marker_budget_holds_for_double_digit_threads() {
        let body = "a".repeat(3500);
        let segments = format_thread("", &body, 300);
        assert!(segments.len() >= 12);
        for segment in &segments {
            assert!(segment.chars().count() <= 300, "over limit: {segment:?}");
        }
    }

    // ── Subject handling ────────────────────────────────────────────

    #[test]
    fn subject_prefixes_first_segment_when_it_fits() {
        let segments = format_thread("Update", "All systems normal.", 300);
        assert_eq!(segments, vec!["Update\n\nAll systems normal."]);
    }

    #[test]
    fn subject_gets_its_own_segment_when_body_is_large() {
        let body = "b".repeat(290);
        let segments = format_thread("A fairly long subject line", &body, 300);
        assert_eq!(segments.len(), 2);
        assert_eq!(strip_marker(&segments[0]), "A fairly long subject line");
        assert_eq!(strip_marker(&segments[1]), body);
    }

    #[test]
    fn empty_body_yields_subject_only_segment() {
        let segments = format_thread("Just a subject", "", 300);
        assert_eq!(segments, vec!["Just a subject"]);
    }

    #[test]
    fn empty_subject_and_body_yields_placeholder() {
        let segments = format_thread("", "   \n\n  ", 300);
        assert_eq!(segments, vec!["(no content)"]);
    }

    // ── Round trip ──────────────────────────────────────────────────

    #[test]
    fn concatenated_segments_reproduce_content() {
        let subject = "Quarterly update";
        let body = "First paragraph with some detail. It has two sentences.\n\n\
                    Second paragraph is here.\n\n\
                    Third paragraph rounds things out with a bit more text to push \
                    the thread over a single post.";
        let segments = format_thread(subject, body, 120);
        assert!(segments.len() > 1);

        let rejoined: String = segments
            .iter()
            .map(|s| strip_marker(s))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(
            content_only(&rejoined),
            content_only(&format!("{subject} {body}"))
        );
    }

    #[test]
    fn round_trip_survives_mid_word_cuts() {
        let body = "y".repeat(950);
        let segments = format_thread("", &body, 300);
        let rejoined: String = segments.iter().map(|s| strip_marker(s)).collect();
        assert_eq!(content_only(&rejoined), body);
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let body = "héllo wörld ".repeat(40);
        let segments = format_thread("", &body, 100);
        for segment in &segments {
            assert!(segment.chars().count() <= 100);
        }
        let rejoined: String = segments
            .iter()
            .map(|s| strip_marker(s))
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(content_only(&rejoined), content_only(&body));
    }
}

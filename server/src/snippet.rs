use search_core::Lemmatizer;
use std::collections::HashSet;

/// Characters kept on each side of the first match.
pub const WINDOW: usize = 150;
/// Length of the leading excerpt used when no lemma occurs literally in the text.
pub const FALLBACK: usize = 300;

/// Excerpt of `text` around the first literal occurrence of the rarest lemma that
/// occurs at all, with query words wrapped in `<b>`.
pub fn build(lemmatizer: &dyn Lemmatizer, text: &str, rarest_first: &[String], query: &HashSet<String>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let hit = rarest_first
        .iter()
        .find_map(|lemma| find_case_insensitive(&chars, lemma).map(|at| (at, lemma.chars().count())));
    let excerpt: String = match hit {
        Some((at, len)) => {
            let start = at.saturating_sub(WINDOW);
            let end = (at + len + WINDOW).min(chars.len());
            chars[start..end].iter().collect()
        }
        None => chars.iter().take(FALLBACK).collect(),
    };
    highlight(lemmatizer, &excerpt, query)
}

/// Char index of the first case-insensitive occurrence of `needle`.
pub fn find_case_insensitive(haystack: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(&needle)
            .all(|(a, b)| a == b || a.to_lowercase().eq(b.to_lowercase()))
    })
}

/// Rejoin the words of `snippet` with single spaces, bolding each maximal run of
/// words whose lemmas intersect `query`.
pub fn highlight(lemmatizer: &dyn Lemmatizer, snippet: &str, query: &HashSet<String>) -> String {
    let mut out = String::with_capacity(snippet.len() + 16);
    let mut open = false;
    for word in snippet.split_whitespace() {
        let hit = lemmatizer.lemma_set(word).iter().any(|l| query.contains(l));
        if !out.is_empty() {
            if open && !hit {
                out.push_str("</b>");
                open = false;
            }
            out.push(' ');
        }
        if hit && !open {
            out.push_str("<b>");
            open = true;
        }
        out.push_str(word);
    }
    if open {
        out.push_str("</b>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_core::StemmingLemmatizer;

    fn query(lemmatizer: &StemmingLemmatizer, q: &str) -> HashSet<String> {
        lemmatizer.lemma_set(q)
    }

    #[test]
    fn runs_share_one_bold_span() {
        let l = StemmingLemmatizer::default();
        let q = query(&l, "rust crabs");
        assert_eq!(highlight(&l, "Rust  crabs walk\nsideways", &q), "<b>Rust crabs</b> walk sideways");
        assert_eq!(highlight(&l, "a crab and rust", &q), "a <b>crab</b> and <b>rust</b>");
        assert_eq!(highlight(&l, "", &q), "");
    }

    #[test]
    fn window_clips_to_text_bounds() {
        let l = StemmingLemmatizer::default();
        let text = format!("{} rust {}", "x".repeat(400), "y".repeat(400));
        let q = query(&l, "rust");
        let snippet = build(&l, &text, &["rust".to_string()], &q);
        // 150 chars before, the match, 150 after; the padding words are single tokens
        let plain = snippet.replace("<b>", "").replace("</b>", "");
        assert!(snippet.contains("<b>rust</b>"));
        assert_eq!(plain.chars().count(), WINDOW + "rust".len() + WINDOW);

        let short = build(&l, "Rust is fun", &["rust".to_string()], &q);
        assert_eq!(short, "<b>Rust</b> is fun");
    }

    #[test]
    fn falls_back_to_leading_text() {
        let l = StemmingLemmatizer::default();
        let text = "word ".repeat(100);
        let snippet = build(&l, &text, &["absent".to_string()], &HashSet::new());
        assert!(snippet.chars().count() <= FALLBACK);
        assert!(snippet.starts_with("word word"));
        assert!(!snippet.contains("<b>"));
    }

    #[test]
    fn case_insensitive_search_is_char_based() {
        let hay: Vec<char> = "Ёлка и КОТ".chars().collect();
        assert_eq!(find_case_insensitive(&hay, "кот"), Some(7));
        assert_eq!(find_case_insensitive(&hay, "ёлка"), Some(0));
        assert_eq!(find_case_insensitive(&hay, "пёс"), None);
        assert_eq!(find_case_insensitive(&hay, ""), None);
    }
}

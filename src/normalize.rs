//! Question canonicalization and cache-key derivation.
//!
//! Shoppers ask the same question dozens of ways per stream ("多少钱？",
//! "多少钱呀", "多少钱"). The cache keys on a canonical form so those all
//! collapse to one entry, with an optional context token (typically the
//! product origin) folded in so identical questions about different
//! referents never share an answer.

use sha2::{Digest, Sha256};

// Sentence punctuation stripped outright: CJK and ASCII variants plus the
// bracket/quote pairs the original catalog data uses.
const PUNCTUATION: &[char] = &[
    '？', '?', '！', '!', '。', '.', '，', ',', '、', '；', ';', '：', ':', '“', '”', '‘', '’',
    '"', '\'', '（', '）', '(', ')', '【', '】', '[', ']',
];

// Tone particles carrying no semantic content in a product question.
const PARTICLES: &[char] = &['吗', '呢', '啊', '哦', '嘛', '呀', '哇', '哈'];

/// Canonicalize a question: trim, strip punctuation, fold the `么` particle
/// variant into `吗`, strip tone particles, collapse whitespace, lowercase.
///
/// The `么` fold happens before particle stripping, which makes the whole
/// function idempotent: the output contains no particles to re-fold.
pub fn normalize_question(text: &str) -> String {
    let mut kept = String::with_capacity(text.len());
    for c in text.trim().chars() {
        if PUNCTUATION.contains(&c) {
            continue;
        }
        let c = if c == '么' { '吗' } else { c };
        if PARTICLES.contains(&c) {
            continue;
        }
        kept.push(c);
    }
    kept.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Content address for a question within a session.
///
/// SHA-256 over the canonical form, with the disambiguating context token
/// (e.g. product origin) appended when present so "哪里产的" about two
/// different products cannot collide.
pub fn cache_key(question: &str, context: Option<&str>) -> String {
    let normalized = normalize_question(question);
    let composite = match context {
        Some(token) if !token.is_empty() => format!("{normalized}|origin:{token}"),
        _ => normalized,
    };
    let mut hasher = Sha256::new();
    hasher.update(composite.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_punctuation_and_particles() {
        assert_eq!(normalize_question("多少钱？"), "多少钱");
        assert_eq!(normalize_question("多少钱呀"), "多少钱");
        assert_eq!(normalize_question("  甜不甜啊！  "), "甜不甜");
    }

    #[test]
    fn folds_me_particle_variant() {
        // 什么/什吗 ask the same thing once the particle is folded
        assert_eq!(normalize_question("什么"), normalize_question("什吗"));
    }

    #[test]
    fn collapses_whitespace_and_lowercases() {
        assert_eq!(normalize_question("Fuji   APPLE  price"), "fuji apple price");
    }

    #[test]
    fn idempotent() {
        for input in [
            "多少钱？",
            "什么时候发货呢？",
            "甜不甜啊",
            "  Fuji  Apple 多少钱呀？ ",
            "",
        ] {
            let once = normalize_question(input);
            assert_eq!(normalize_question(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn key_stable_across_phrasings() {
        assert_eq!(cache_key("多少钱？", None), cache_key("多少钱呀", None));
        assert_eq!(
            cache_key("多少钱？", Some("云南")),
            cache_key("多少钱呀", Some("云南"))
        );
    }

    #[test]
    fn context_token_separates_keys() {
        let plain = cache_key("哪里产的", None);
        let yunnan = cache_key("哪里产的", Some("云南"));
        let shandong = cache_key("哪里产的", Some("山东"));
        assert_ne!(plain, yunnan);
        assert_ne!(yunnan, shandong);
        // empty token behaves like no token
        assert_eq!(plain, cache_key("哪里产的", Some("")));
    }
}

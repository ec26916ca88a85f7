//! Title normalization and token matching.
//!
//! Everything here is pure and locale-independent: planning must produce
//! byte-identical output for identical inputs regardless of iteration order
//! or host locale.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use unicode_normalization::UnicodeNormalization;

/// Apostrophe-like code points collapsed before punctuation stripping, so
/// `don't` becomes `dont` rather than `don t`.
const APOSTROPHES: [char; 4] = ['\'', '\u{2019}', '\u{02BC}', '`'];

/// Number words mapped onto digits for token equivalence ("2" == "two").
const NUMBER_WORDS: [(&str, &str); 21] = [
    ("zero", "0"),
    ("one", "1"),
    ("two", "2"),
    ("three", "3"),
    ("four", "4"),
    ("five", "5"),
    ("six", "6"),
    ("seven", "7"),
    ("eight", "8"),
    ("nine", "9"),
    ("ten", "10"),
    ("eleven", "11"),
    ("twelve", "12"),
    ("thirteen", "13"),
    ("fourteen", "14"),
    ("fifteen", "15"),
    ("sixteen", "16"),
    ("seventeen", "17"),
    ("eighteen", "18"),
    ("nineteen", "19"),
    ("twenty", "20"),
];

/// NFC, lowercase, punctuation stripped, whitespace collapsed.
pub fn normalize_title(raw: &str) -> String {
    let nfc: String = raw.nfc().collect();
    let mut cleaned = String::with_capacity(nfc.len());
    for c in nfc.chars() {
        if APOSTROPHES.contains(&c) {
            continue;
        }
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                cleaned.push(lower);
            }
        } else {
            cleaned.push(' ');
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized tokens with number-word equivalence applied.
pub fn tokens(raw: &str) -> Vec<String> {
    normalize_title(raw)
        .split_whitespace()
        .map(canonical_token)
        .collect()
}

fn canonical_token(token: &str) -> String {
    for (word, digit) in NUMBER_WORDS {
        if token == word {
            return digit.to_string();
        }
    }
    token.to_string()
}

fn multiset(tokens: &[String]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Token multiset overlap: `|A ∩ B| / max(|A|, |B|)` in `[0, 1]`.
pub fn token_score(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let counts_a = multiset(a);
    let counts_b = multiset(b);
    let mut intersection = 0usize;
    for (token, count_a) in &counts_a {
        if let Some(count_b) = counts_b.get(token) {
            intersection += (*count_a).min(*count_b);
        }
    }
    intersection as f64 / a.len().max(b.len()) as f64
}

/// Case-insensitive natural comparison: embedded digit runs compare
/// numerically, so `S2` sorts before `S10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ca = a.chars().peekable();
    let mut cb = b.chars().peekable();

    loop {
        match (ca.peek().copied(), cb.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                if x.is_ascii_digit() && y.is_ascii_digit() {
                    let run_a = take_digit_run(&mut ca);
                    let run_b = take_digit_run(&mut cb);
                    // Compare as numbers: strip leading zeros, then by
                    // length, then lexically.
                    let na = run_a.trim_start_matches('0');
                    let nb = run_b.trim_start_matches('0');
                    let ord = na
                        .len()
                        .cmp(&nb.len())
                        .then_with(|| na.cmp(nb))
                        .then_with(|| run_a.len().cmp(&run_b.len()));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                } else {
                    let la: Vec<char> = x.to_lowercase().collect();
                    let lb: Vec<char> = y.to_lowercase().collect();
                    let ord = la.cmp(&lb);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    ca.next();
                    cb.next();
                }
            }
        }
    }
}

fn take_digit_run(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek() {
        if c.is_ascii_digit() {
            run.push(*c);
            chars.next();
        } else {
            break;
        }
    }
    run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_punctuation_and_apostrophes() {
        assert_eq!(normalize_title("Danger Mouse!"), "danger mouse");
        assert_eq!(normalize_title("Don't Stop"), "dont stop");
        assert_eq!(normalize_title("Mighty Pups, Charged Up:"), "mighty pups charged up");
        assert_eq!(normalize_title("  A \t B  "), "a b");
    }

    #[test]
    fn number_word_equivalence() {
        assert_eq!(tokens("Part Two"), vec!["part", "2"]);
        assert_eq!(token_score(&tokens("Part 2"), &tokens("Part Two")), 1.0);
    }

    #[test]
    fn score_is_overlap_over_max() {
        let a = tokens("Car In A Tree");
        let b = tokens("Car In A Tree");
        assert_eq!(token_score(&a, &b), 1.0);

        let c = tokens("Car In Tree");
        let score = token_score(&a, &c);
        assert!((score - 0.75).abs() < 1e-9);

        assert_eq!(token_score(&a, &[]), 0.0);
    }

    #[test]
    fn natural_sort_orders_numeric_runs() {
        assert_eq!(natural_cmp("S2", "S10"), Ordering::Less);
        assert_eq!(natural_cmp("s10", "S2"), Ordering::Greater);
        assert_eq!(natural_cmp("a02", "a2"), Ordering::Greater);
        assert_eq!(natural_cmp("Alpha", "alpha"), Ordering::Equal);
        assert_eq!(natural_cmp("ep1x", "ep1y"), Ordering::Less);
    }
}

//! Fuzzy name similarity on a 0-100 scale

use std::collections::BTreeSet;

use rapidfuzz::fuzz;

/// Drop non-ASCII characters, replace every other non-word character with a
/// space, then lowercase and trim
fn full_process(s: &str) -> String {
    s.chars()
        .filter(char::is_ascii)
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .to_ascii_lowercase()
        .trim()
        .to_string()
}

/// Round a 0.0-1.0 similarity to a percentage, ties to even
fn percent(similarity: f64) -> u8 {
    (similarity * 100.0).round_ties_even().clamp(0.0, 100.0) as u8
}

/// Indel similarity: 2 * LCS / (len(a) + len(b)) as a percentage.
/// Either side empty scores 0.
pub fn ratio(a: &str, b: &str) -> u8 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    percent(fuzz::ratio(a.chars(), b.chars()))
}

/// Order-independent comparison over word sets. Shared words are compared
/// against each side's shared-plus-leftover words, so a name that is a word
/// subset of the other scores 100.
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    let p1 = full_process(a);
    let p2 = full_process(b);
    if p1.is_empty() || p2.is_empty() {
        return 0;
    }

    let t1: BTreeSet<&str> = p1.split_whitespace().collect();
    let t2: BTreeSet<&str> = p2.split_whitespace().collect();

    let sect = t1.intersection(&t2).copied().collect::<Vec<_>>().join(" ");
    let diff_1to2 = t1.difference(&t2).copied().collect::<Vec<_>>().join(" ");
    let diff_2to1 = t2.difference(&t1).copied().collect::<Vec<_>>().join(" ");

    let combined_1to2 = format!("{} {}", sect, diff_1to2).trim().to_string();
    let combined_2to1 = format!("{} {}", sect, diff_2to1).trim().to_string();

    ratio(&sect, &combined_1to2)
        .max(ratio(&sect, &combined_2to1))
        .max(ratio(&combined_1to2, &combined_2to1))
}

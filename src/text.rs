// Handle text rules shared by every stage

use crate::config::ConfusionPair;
use crate::consts::{DOT_LOOKALIKES, MAX_HANDLE_LEN, SEPARATORS};

/// Lowercase form used for every comparison and for the duplicate index.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Turn a raw engine read into a handle candidate.
///
/// Drops whitespace and characters a handle cannot contain, strips leading
/// separators and trailing dots. Trailing underscores survive. Returns
/// `None` when nothing usable is left.
pub fn clean(raw: &str) -> Option<String> {
    let text: String = normalize(raw)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || SEPARATORS.contains(c))
        .collect();
    let text = text
        .trim_start_matches(|c| SEPARATORS.contains(&c))
        .trim_end_matches('.');

    if text.is_empty() || text.chars().count() > MAX_HANDLE_LEN {
        return None;
    }
    if !text.chars().any(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(text.to_string())
}

/// Why a string is not an acceptable handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatViolation {
    Empty,
    TooLong,
    InvalidCharacter(char),
    LeadingSeparator,
    TrailingDot,
    ConsecutiveDots,
}

/// Check the platform's handle rules. A trailing underscore is allowed.
pub fn validate_handle(text: &str) -> Result<(), FormatViolation> {
    let first = text.chars().next().ok_or(FormatViolation::Empty)?;
    if text.chars().count() > MAX_HANDLE_LEN {
        return Err(FormatViolation::TooLong);
    }
    if let Some(bad) = text
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || SEPARATORS.contains(c)))
    {
        return Err(FormatViolation::InvalidCharacter(bad));
    }
    if !first.is_ascii_alphanumeric() {
        return Err(FormatViolation::LeadingSeparator);
    }
    if text.ends_with('.') {
        return Err(FormatViolation::TrailingDot);
    }
    if text.contains("..") {
        return Err(FormatViolation::ConsecutiveDots);
    }
    Ok(())
}

pub fn is_valid_handle(text: &str) -> bool {
    validate_handle(text).is_ok()
}

/// Levenshtein distance over the normalized strings.
pub fn edit_distance(a: &str, b: &str) -> usize {
    strsim::levenshtein(&normalize(a), &normalize(b))
}

pub fn separator_count(text: &str) -> usize {
    text.chars().filter(|c| SEPARATORS.contains(c)).count()
}

/// `dotted` equals `plain` except that it carries a `.` where `plain` has a
/// dot look-alike (`o`, `0`) or nothing at all.
pub fn is_dotted_sibling(dotted: &str, plain: &str) -> bool {
    if dotted == plain || !dotted.contains('.') {
        return false;
    }
    let dotted: Vec<char> = dotted.chars().collect();
    let plain: Vec<char> = plain.chars().collect();
    let dots = dotted.iter().filter(|&&c| c == '.').count();
    // every extra character on the dotted side must be a dot
    if dotted.len() < plain.len() || dotted.len() - plain.len() > dots {
        return false;
    }
    dotted_match(&dotted, &plain)
}

/// Reachability over `(dotted prefix, plain prefix)` pairs, one row at a
/// time. `reach[j]` holds when `dotted[..i]` explains `plain[..j]`.
fn dotted_match(dotted: &[char], plain: &[char]) -> bool {
    let mut reach = vec![false; plain.len() + 1];
    reach[0] = true;

    for &d in dotted {
        let mut next = vec![false; plain.len() + 1];
        for (j, _) in reach.iter().enumerate().filter(|(_, r)| **r) {
            let p = plain.get(j).copied();
            if p == Some(d) {
                next[j + 1] = true;
            }
            if d == '.' {
                // dot dropped by the other read, or read as a look-alike letter
                next[j] = true;
                if p.is_some_and(|p| DOT_LOOKALIKES.contains(&p)) {
                    next[j + 1] = true;
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reach = next;
    }
    reach[plain.len()]
}

/// Whether `fixed` is `misread_text` with exactly one table substitution
/// applied. Returns the pair that explains the difference.
pub fn confusion_substitution<'a>(
    misread_text: &str,
    fixed: &str,
    table: &'a [ConfusionPair],
) -> Option<&'a ConfusionPair> {
    table.iter().find(|pair| {
        !pair.misread.is_empty()
            && misread_text
                .match_indices(pair.misread.as_str())
                .any(|(at, _)| {
                    let mut candidate = String::with_capacity(misread_text.len());
                    candidate.push_str(&misread_text[..at]);
                    candidate.push_str(&pair.correct);
                    candidate.push_str(&misread_text[at + pair.misread.len()..]);
                    candidate == fixed
                })
    })
}

/// Patterns that suggest a garbled read rather than a real handle.
pub fn has_unusual_pattern(text: &str) -> bool {
    if text.is_empty() {
        return true;
    }

    let mut run = 0;
    for c in text.chars() {
        if SEPARATORS.contains(&c) {
            run += 1;
            if run >= 4 {
                return true;
            }
        } else {
            run = 0;
        }
    }

    let len = text.chars().count();
    if separator_count(text) * 2 > len {
        return true;
    }

    len > 5 && !text.chars().any(|c| "aeiou".contains(c.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsensusConfig;

    #[test]
    fn clean_keeps_trailing_underscore() {
        assert_eq!(clean("  @Brand_X_ ").as_deref(), Some("brand_x_"));
        assert_eq!(clean("._user.name.").as_deref(), Some("user.name"));
        assert_eq!(clean("...___"), None);
        assert_eq!(clean(""), None);
    }

    #[test]
    fn format_rules() {
        assert!(is_valid_handle("abc_"));
        assert!(is_valid_handle("a.b_c9"));
        assert_eq!(validate_handle("_abc."), Err(FormatViolation::LeadingSeparator));
        assert_eq!(validate_handle("abc."), Err(FormatViolation::TrailingDot));
        assert_eq!(validate_handle("ab..cd"), Err(FormatViolation::ConsecutiveDots));
        assert_eq!(validate_handle("Abc"), Err(FormatViolation::InvalidCharacter('A')));
        assert_eq!(validate_handle(""), Err(FormatViolation::Empty));
        assert_eq!(validate_handle(&"a".repeat(31)), Err(FormatViolation::TooLong));
        assert!(is_valid_handle(&"a".repeat(30)));
    }

    #[test]
    fn dotted_sibling_handles_dropped_and_misread_dots() {
        assert!(is_dotted_sibling("user.name", "username"));
        assert!(is_dotted_sibling("user.name", "useroname"));
        assert!(is_dotted_sibling("user.one", "userone"));
        assert!(is_dotted_sibling("a.b.c", "abc"));
        assert!(!is_dotted_sibling("username", "user.name"));
        assert!(!is_dotted_sibling("user.name", "user.name"));
        assert!(!is_dotted_sibling("user.nama", "username"));
        assert!(!is_dotted_sibling("brand_x", "brandx"));
    }

    #[test]
    fn dotted_sibling_stays_fast_on_dot_runs() {
        let dotted = format!("a{}x", ".".repeat(27));
        let plain = format!("a{}y", "o".repeat(13));
        let start = std::time::Instant::now();
        assert!(!is_dotted_sibling(&dotted, &plain));
        assert!(is_dotted_sibling(&dotted, &format!("a{}x", "o".repeat(13))));
        assert!(start.elapsed() < std::time::Duration::from_millis(50));
    }

    #[test]
    fn confusion_substitution_checks_every_occurrence() {
        let table = ConsensusConfig::default().confusions;
        let pair = confusion_substitution("tfx_shop", "ffx_shop", &table).unwrap();
        assert_eq!(pair.misread, "tf");
        assert!(confusion_substitution("rnarn", "rnam", &table).is_some());
        assert!(confusion_substitution("ffx_shop", "tfx_shop", &table).is_none());
        assert!(confusion_substitution("abc", "xyz", &table).is_none());
    }

    #[test]
    fn unusual_patterns() {
        assert!(has_unusual_pattern("a...._b"));
        assert!(has_unusual_pattern("a._._"));
        assert!(has_unusual_pattern("xkcdbvw"));
        assert!(!has_unusual_pattern("brand_x"));
    }

    #[test]
    fn edit_distance_ignores_case() {
        assert_eq!(edit_distance("User", "user"), 0);
        assert_eq!(edit_distance("brand_x", "brandx"), 1);
    }
}

//! Rule-based warranty scoring and metadata guesses over extracted text.
//!
//! Scoring is local and cheap: independent weighted substring checks against
//! the lower-cased text. Checks are not mutually exclusive; weights
//! accumulate. The score gates nothing on its own; it feeds the combined
//! decision in `classify`.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::FieldGuesses;

/// Minimum accumulated score counted as a heuristic pass.
pub const HEURISTIC_PASS: i32 = 3;

/// Weighted patterns checked independently against the lower-cased text.
const PATTERNS: &[(&str, i32)] = &[
    ("warranty", 2),
    ("limited warranty", 2),
    ("extended warranty", 2),
    ("warranty period", 2),
    ("coverage period", 2),
    ("guarantee", 2),
    ("proof of purchase", 2),
    ("purchase date", 1),
    ("date of purchase", 1),
    ("serial number", 1),
    ("model number", 1),
    ("receipt", 1),
    ("invoice", 1),
    ("retailer", 1),
    ("valid for", 1),
    ("terms and conditions", 1),
];

/// Score text for warranty-likelihood. Returns the accumulated score and
/// the patterns that matched.
pub fn score(text: &str) -> (i32, Vec<&'static str>) {
    let haystack = text.to_lowercase();
    let mut total = 0;
    let mut matched = Vec::new();
    for (pattern, weight) in PATTERNS {
        if haystack.contains(pattern) {
            total += weight;
            matched.push(*pattern);
        }
    }
    (total, matched)
}

pub fn passes(score: i32) -> bool {
    score >= HEURISTIC_PASS
}

/// Pull best-effort document metadata from the extracted text.
pub fn guess_fields(text: &str) -> FieldGuesses {
    FieldGuesses {
        product_name: guess_product_name(text),
        purchase_date: guess_labeled_date(text, purchase_date_re()),
        expiration_date: guess_labeled_date(text, expiration_date_re()),
    }
}

// A date in any of the shapes these documents actually use:
// 2024-03-01, 01/03/2024, 1.3.24, March 1, 2024.
const DATE: &str = r"(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|[A-Za-z]{3,9}\.? \d{1,2},? \d{4})";

fn purchase_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(?:purchase date|date of purchase|order date|purchased on|bought on)\s*:?\s*({})",
            DATE
        ))
        .expect("purchase date pattern is valid")
    })
}

fn expiration_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?i)(?:warranty expires|expiration date|expires on|valid until|valid through|coverage ends)\s*:?\s*({})",
            DATE
        ))
        .expect("expiration date pattern is valid")
    })
}

fn guess_labeled_date(text: &str, re: &Regex) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn product_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:product|product name|model|item)\s*:\s*(.{3,80}?)\s*$")
            .expect("product name pattern is valid")
    })
}

fn guess_product_name(text: &str) -> Option<String> {
    product_name_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_accumulate_across_independent_checks() {
        let (total, matched) = score("Limited Warranty. Keep your receipt as proof of purchase.");
        // "warranty", "limited warranty", "proof of purchase", "receipt"
        assert_eq!(total, 7);
        assert_eq!(matched.len(), 4);
    }

    #[test]
    fn unrelated_text_scores_zero() {
        let (total, matched) = score("Quarterly all-hands agenda and notes.");
        assert_eq!(total, 0);
        assert!(matched.is_empty());
    }

    #[test]
    fn pass_threshold() {
        assert!(!passes(2));
        assert!(passes(3));
        assert!(passes(10));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let (total, _) = score("WARRANTY PERIOD: 24 MONTHS");
        assert!(total >= 4);
    }

    #[test]
    fn purchase_date_guess() {
        let guesses = guess_fields("Purchase date: 2024-03-01\nThanks for your order.");
        assert_eq!(guesses.purchase_date.as_deref(), Some("2024-03-01"));
    }

    #[test]
    fn expiration_date_guess_text_month() {
        let guesses = guess_fields("Your warranty expires March 1, 2026.");
        assert_eq!(guesses.expiration_date.as_deref(), Some("March 1, 2026"));
    }

    #[test]
    fn product_name_guess() {
        let guesses = guess_fields("Product: Kitchen Mixer KM-500\nSerial number: X1\n");
        assert_eq!(guesses.product_name.as_deref(), Some("Kitchen Mixer KM-500"));
    }

    #[test]
    fn guesses_absent_when_text_has_none() {
        let guesses = guess_fields("nothing to see here");
        assert_eq!(guesses, FieldGuesses::default());
    }
}

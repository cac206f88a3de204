//! Name canonicalization and ticker-format parsing (§4.1).
//!
//! Every function here is total, deterministic and side-effect-free: same
//! input always yields the same output, empty input never panics, and
//! nothing here touches the cache, network, or clock. The resolver cascade
//! (`crate::resolver`) calls these once per resolve to build its variant
//! lists before touching the cache or network.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::FormatType;

/// Suffix tokens stripped from a company name, longest-first so that e.g.
/// `"SPONSORED ADR"` is removed whole rather than leaving a dangling `"ADR"`
/// pass strip it again. Order here is significant.
const SUFFIX_TOKENS: &[&str] = &[
    "SPONSORED ADR",
    "UNSPONSORED ADR",
    "INCORPORATED",
    "CORPORATION",
    "HOLDINGS",
    "LIMITED",
    "COMPANY",
    "ORDINARY",
    "COMMON",
    "REGISTERED",
    "CLASS A",
    "CLASS B",
    "CLASS C",
    "CL A",
    "CL B",
    "CL C",
    "CORP",
    "INC",
    "LTD",
    "PLC",
    "LLC",
    "LLP",
    "ADR",
    "ADS",
    "GDR",
    "REG",
    "CO",
    "AG",
    "SA",
    "NV",
    "SE",
    "AB",
    "AS",
    "KK",
    "BV",
    "CV",
    "LP",
];

static PUNCTUATION_EXCEPT_AMPERSAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9&\s]").expect("static regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

static BLOOMBERG_TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9/.\-]+\s+[A-Z]{2}$").expect("static regex"));
static REUTERS_TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9/\-]+\.[A-Z]{1,2}$").expect("static regex"));
static YAHOO_DASH_TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]+-[A-Z]$").expect("static regex"));

fn suffix_regex_for(token: &str) -> Regex {
    // Word-boundary bounded, anchored to the end of the (already-trimmed)
    // string so "CO" never eats the tail of "CISCO".
    let escaped = regex::escape(token);
    Regex::new(&format!(r"(?:^|\s){escaped}$")).expect("constructed from escaped literal")
}

/// Uppercase, strip punctuation (keeping `&`), collapse whitespace, then
/// repeatedly strip trailing suffix tokens to a fixed point.
#[must_use]
pub fn canonicalize_name(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }
    let upper = name.to_uppercase();
    let no_punct = PUNCTUATION_EXCEPT_AMPERSAND.replace_all(&upper, " ");
    let mut collapsed = WHITESPACE_RUN.replace_all(&no_punct, " ").trim().to_string();

    loop {
        let before = collapsed.clone();
        for token in SUFFIX_TOKENS {
            let re = suffix_regex_for(token);
            if let Some(m) = re.find(&collapsed) {
                collapsed.truncate(m.start());
                collapsed = collapsed.trim_end().to_string();
            }
        }
        if collapsed == before {
            break;
        }
    }
    collapsed
}

/// `[original_upper, normalized, first_word (if >=3 chars), normalized_without_leading_THE]`,
/// de-duplicated, specificity-descending (longest string first).
#[must_use]
pub fn name_variants(name: &str) -> Vec<String> {
    if name.trim().is_empty() {
        return Vec::new();
    }
    let original_upper = name.to_uppercase().trim().to_string();
    let normalized = canonicalize_name(name);
    let first_word = normalized
        .split_whitespace()
        .next()
        .filter(|w| w.len() >= 3)
        .map(ToString::to_string);
    let without_the = normalized
        .strip_prefix("THE ")
        .map(|rest| rest.trim().to_string());

    let mut variants = vec![original_upper, normalized];
    variants.extend(first_word);
    variants.extend(without_the);

    let mut seen = std::collections::HashSet::new();
    let mut out: Vec<String> = variants
        .into_iter()
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect();
    out.sort_by_key(|v| std::cmp::Reverse(v.len()));
    out
}

/// Classify a ticker string into a coarse format, for observability only
/// (§4.4 "Format observability") — never used to reorder the cascade.
#[must_use]
pub fn detect_format(ticker: &str) -> FormatType {
    let t = ticker.trim();
    if t.is_empty() {
        return FormatType::Plain;
    }
    let upper = t.to_uppercase();
    if BLOOMBERG_TICKER.is_match(&upper) {
        FormatType::Bloomberg
    } else if REUTERS_TICKER.is_match(&upper) {
        FormatType::Reuters
    } else if YAHOO_DASH_TICKER.is_match(&upper) {
        FormatType::YahooDash
    } else if upper.chars().all(|c| c.is_ascii_digit()) {
        FormatType::Numeric
    } else {
        FormatType::Plain
    }
}

/// Parsed ticker: the root symbol with any exchange suffix stripped, and a
/// country/exchange hint when the format carried one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTicker {
    pub root: String,
    pub hint: Option<String>,
}

/// Detects format by regex in priority order (Bloomberg, Reuters/Yahoo
/// dotted, Yahoo dash, local/numeric) and strips any exchange suffix,
/// returning a country/exchange hint when the format encodes one.
///
/// `parse_ticker("NVDA US") == ("NVDA", Some("US"))`,
/// `parse_ticker("BRK-B") == ("BRK-B", None)`.
#[must_use]
pub fn parse_ticker(ticker: &str) -> ParsedTicker {
    let t = ticker.trim();
    if t.is_empty() {
        return ParsedTicker { root: String::new(), hint: None };
    }
    let upper = t.to_uppercase();

    match detect_format(&upper) {
        FormatType::Bloomberg => {
            let mut parts = upper.rsplitn(2, char::is_whitespace);
            let code = parts.next().unwrap_or_default();
            let root = parts.next().unwrap_or(&upper).trim().to_string();
            let hint = crate::core::currency::bloomberg_country_hint(code)
                .map(ToString::to_string)
                .or_else(|| Some(code.to_string()));
            ParsedTicker { root, hint }
        }
        FormatType::Reuters => {
            let (root, suffix) = upper.rsplit_once('.').unwrap_or((upper.as_str(), ""));
            ParsedTicker {
                root: root.to_string(),
                hint: Some(suffix.to_string()),
            }
        }
        FormatType::YahooDash | FormatType::Numeric | FormatType::Plain => {
            ParsedTicker { root: upper, hint: None }
        }
    }
}

/// `original -> root -> {/,-,.} substitutions -> separator-stripped`,
/// de-duplicated, original-order preserved.
#[must_use]
pub fn generate_variants(ticker: &str) -> Vec<String> {
    let t = ticker.trim();
    if t.is_empty() {
        return Vec::new();
    }
    let upper = t.to_uppercase();
    let parsed = parse_ticker(&upper);

    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut push = |s: String, out: &mut Vec<String>, seen: &mut std::collections::HashSet<String>| {
        if !s.is_empty() && seen.insert(s.clone()) {
            out.push(s);
        }
    };

    push(upper.clone(), &mut out, &mut seen);
    push(parsed.root.clone(), &mut out, &mut seen);

    const SEPARATORS: [char; 3] = ['/', '-', '.'];
    for &from in &SEPARATORS {
        if parsed.root.contains(from) {
            for &to in &SEPARATORS {
                if to != from {
                    push(parsed.root.replace(from, &to.to_string()), &mut out, &mut seen);
                }
            }
            push(parsed.root.replace(from, ""), &mut out, &mut seen);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_known_synonyms_to_same_string() {
        assert_eq!(canonicalize_name("NVIDIA CORP"), canonicalize_name("NVIDIA Corporation"));
        assert_eq!(canonicalize_name("NVIDIA CORP"), "NVIDIA");
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonicalize_name("Vanguard S&P 500 ETF, Inc.");
        let twice = canonicalize_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_name_yields_empty_variants() {
        assert!(name_variants("").is_empty());
        assert_eq!(canonicalize_name(""), "");
    }

    #[test]
    fn bloomberg_ticker_splits_root_and_country() {
        let parsed = parse_ticker("NVDA US");
        assert_eq!(parsed.root, "NVDA");
        assert_eq!(parsed.hint.as_deref(), Some("US"));
    }

    #[test]
    fn yahoo_dash_ticker_is_preserved_whole() {
        let parsed = parse_ticker("BRK-B");
        assert_eq!(parsed.root, "BRK-B");
        assert_eq!(parsed.hint, None);
    }

    #[test]
    fn reuters_dotted_ticker_splits_suffix() {
        let parsed = parse_ticker("VOD.L");
        assert_eq!(parsed.root, "VOD");
        assert_eq!(parsed.hint.as_deref(), Some("L"));
    }

    #[test]
    fn generate_variants_has_no_duplicates_and_contains_input() {
        let variants = generate_variants("BRK-B");
        let mut sorted = variants.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), variants.len());
        assert!(variants.contains(&"BRK-B".to_string()));
    }

    #[test]
    fn empty_ticker_yields_no_variants() {
        assert!(generate_variants("").is_empty());
        let parsed = parse_ticker("");
        assert_eq!(parsed.root, "");
        assert_eq!(parsed.hint, None);
    }

    #[test]
    fn detect_format_classifies_each_shape() {
        assert_eq!(detect_format("NVDA US"), FormatType::Bloomberg);
        assert_eq!(detect_format("VOD.L"), FormatType::Reuters);
        assert_eq!(detect_format("BRK-B"), FormatType::YahooDash);
        assert_eq!(detect_format("1234"), FormatType::Numeric);
        assert_eq!(detect_format("NVDA"), FormatType::Plain);
    }
}

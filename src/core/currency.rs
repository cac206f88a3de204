//! Static lookup tables used by the normalizer's ticker parser (§4.1) to turn
//! an exchange-style suffix into a country or currency hint.
//!
//! These are hints only: they seed `currency_source=inferred` on a
//! [`crate::core::types::Alias`] contribution when the API itself didn't say
//! so explicitly. Nothing downstream trusts them for settlement-accurate
//! currency conversion — the engine has no currency-conversion Non-goal to
//! honor here (§1) and treats input prices as authoritative regardless.

use std::{collections::HashMap, sync::LazyLock};

/// Bloomberg two-letter exchange code → ISO-3166 country hint, exactly the
/// map enumerated in §4.1. Deliberately small and fixed; the spec's Open
/// Questions explicitly decline to prescribe anything wider than this.
const BLOOMBERG_COUNTRY_HINT_RAW: &[(&str, &str)] = &[
    ("US", "US"),
    ("TT", "TW"),
    ("LN", "GB"),
    ("GR", "DE"),
    ("FP", "FR"),
    ("JP", "JP"),
    ("HK", "HK"),
    ("CN", "CA"),
    ("AU", "AU"),
];

pub static BLOOMBERG_COUNTRY_HINT: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| BLOOMBERG_COUNTRY_HINT_RAW.iter().copied().collect());

#[must_use]
pub fn bloomberg_country_hint(code: &str) -> Option<&'static str> {
    BLOOMBERG_COUNTRY_HINT.get(code.to_ascii_uppercase().as_str()).copied()
}

/// Reuters/Yahoo-style dotted exchange suffix → currency hint. Not named by
/// the spec (§9 open question: "does not prescribe the inference table
/// beyond the Bloomberg code map"); kept intentionally small and treated
/// purely as `currency_source=inferred` seed data, never as ground truth.
const EXCHANGE_SUFFIX_CURRENCY_RAW: &[(&str, &str)] = &[
    ("L", "GBP"),
    ("DE", "EUR"),
    ("PA", "EUR"),
    ("AS", "EUR"),
    ("MI", "EUR"),
    ("MC", "EUR"),
    ("SW", "CHF"),
    ("T", "JPY"),
    ("HK", "HKD"),
    ("AX", "AUD"),
    ("TO", "CAD"),
];

pub static EXCHANGE_SUFFIX_CURRENCY: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| EXCHANGE_SUFFIX_CURRENCY_RAW.iter().copied().collect());

#[must_use]
pub fn exchange_suffix_currency(suffix: &str) -> Option<&'static str> {
    EXCHANGE_SUFFIX_CURRENCY.get(suffix.to_ascii_uppercase().as_str()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bloomberg_hint_is_case_insensitive() {
        assert_eq!(bloomberg_country_hint("us"), Some("US"));
        assert_eq!(bloomberg_country_hint("tt"), Some("TW"));
    }

    #[test]
    fn unknown_code_has_no_hint() {
        assert_eq!(bloomberg_country_hint("ZZ"), None);
    }

    #[test]
    fn exchange_suffix_hints_known_currencies() {
        assert_eq!(exchange_suffix_currency("L"), Some("GBP"));
        assert_eq!(exchange_suffix_currency("sw"), Some("CHF"));
    }
}

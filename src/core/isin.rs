//! ISIN shape and checksum validation.
//!
//! `CC + 9 alphanumeric + 1 check digit`, `CC` an ISO-3166 alpha-2 code.
//! The data-model invariant in §3 only requires the shape (length, letter
//! prefix, alphanumeric body); the trailing check digit is a Luhn variant
//! over each character's numeric value (letters expand to two digits,
//! `A`=10 .. `Z`=35) and is validated separately so callers can choose how
//! strict to be with third-party-supplied ISINs.

/// `len == 12`, first two chars alphabetic, remaining 10 alphanumeric.
#[must_use]
pub fn has_valid_shape(isin: &str) -> bool {
    if isin.len() != 12 || !isin.is_ascii() {
        return false;
    }
    let bytes = isin.as_bytes();
    bytes[0].is_ascii_alphabetic()
        && bytes[1].is_ascii_alphabetic()
        && bytes[2..].iter().all(u8::is_ascii_alphanumeric)
}

/// Validate the trailing check digit using the standard ISIN (modified
/// Luhn) algorithm. Requires [`has_valid_shape`] to already hold.
#[must_use]
pub fn is_checksum_valid(isin: &str) -> bool {
    if !has_valid_shape(isin) {
        return false;
    }
    let Some(expanded) = expand_digits(isin) else {
        return false;
    };
    luhn_mod10(&expanded)
}

/// Structural + checksum validity in one call.
#[must_use]
pub fn is_valid(isin: &str) -> bool {
    has_valid_shape(isin) && is_checksum_valid(isin)
}

fn expand_digits(isin: &str) -> Option<String> {
    let mut out = String::with_capacity(isin.len() * 2);
    for ch in isin.chars() {
        if ch.is_ascii_digit() {
            out.push(ch);
        } else if ch.is_ascii_uppercase() {
            let value = u32::from(ch as u8 - b'A') + 10;
            out.push_str(&value.to_string());
        } else {
            return None;
        }
    }
    Some(out)
}

fn luhn_mod10(digits: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false; // rightmost digit is the check digit itself, never doubled
    for ch in digits.chars().rev() {
        let Some(mut d) = ch.to_digit(10) else {
            return false;
        };
        if double {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
        double = !double;
    }
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_requires_twelve_chars() {
        assert!(!has_valid_shape("US67066G104"));
        assert!(!has_valid_shape("US67066G10400"));
    }

    #[test]
    fn shape_requires_alpha_country_code() {
        assert!(!has_valid_shape("1267066G1040"));
    }

    #[test]
    fn nvidia_isin_is_shape_valid() {
        assert!(has_valid_shape("US67066G1040"));
    }

    #[test]
    fn nvidia_isin_passes_checksum() {
        // US67066G1040 is NVIDIA's real, published ISIN.
        assert!(is_checksum_valid("US67066G1040"));
    }

    #[test]
    fn garbled_checksum_is_rejected() {
        assert!(!is_checksum_valid("US67066G1041"));
    }
}

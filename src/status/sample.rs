//! Cleanup and validation of raw poll samples.
//!
//! Probes and data sources hand back text. These helpers decide whether a
//! sample is usable and coerce garbage to the unknown marker instead of
//! failing.

/// Marker stored in place of a sample that is not a number.
pub const UNKNOWN_SAMPLE: &str = "U";

/// Parse a numeric sample. Accepts surrounding whitespace, a sign, a
/// fractional part and an exponent. Rejects `inf`, `nan` and hex literals.
pub fn numeric_value(s: &str) -> Option<f64> {
    let t = s.trim();
    let body = t.strip_prefix(['+', '-']).unwrap_or(t);

    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(i) => (&body[..i], Some(&body[i + 1..])),
        None => (body, None),
    };

    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((i, f)) => (i, f),
        None => (mantissa, ""),
    };

    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !all_digits(int_part) || !all_digits(frac_part) {
        return None;
    }

    if let Some(exp) = exponent {
        let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        if digits.is_empty() || !all_digits(digits) {
            return None;
        }
    }

    t.parse::<f64>().ok()
}

/// True if `s` is a plain numeric sample.
pub fn is_numeric(s: &str) -> bool {
    numeric_value(s).is_some()
}

/// True if `s` is a hex byte string such as `0A`, `AB:CD:EF`.
///
/// Multi-byte strings need two digits per group and single colons between
/// groups. A lone group may have one or two digits.
pub fn is_hexadecimal(s: &str) -> bool {
    let t = s.trim();
    if t.is_empty() {
        return false;
    }

    let is_hex_group = |g: &str| g.bytes().all(|b| b.is_ascii_hexdigit());
    let groups: Vec<&str> = t.split(':').collect();

    if let [single] = groups.as_slice() {
        return (1..=2).contains(&single.len()) && is_hex_group(single);
    }

    groups.iter().all(|g| g.len() == 2 && is_hex_group(g))
}

/// Strip quotes from a sample and trim trailing junk.
///
/// Anything that is not numeric, hex or the unknown marker is cut back to
/// its last digit (or `U`), so `'123abc'` becomes `123`.
pub fn strip_quotes(result: &str) -> String {
    let t = result.trim().trim_matches(['\'', '"']);

    if is_numeric(t) || is_hexadecimal(t) || t == UNKNOWN_SAMPLE {
        return t.to_string();
    }

    match t.rfind(|c: char| c.is_ascii_digit() || c == 'U') {
        // the match is ASCII so `i` is a char boundary
        Some(i) => t[..=i].to_string(),
        None => t.to_string(),
    }
}

/// Decide whether a sample is usable.
///
/// A single value with no delimiters must be numeric, otherwise it is
/// replaced by [`UNKNOWN_SAMPLE`]. Multi-value samples (`name:value` pairs
/// separated by spaces, or `!`-delimited) are accepted when they contain
/// no spaces, or when there is exactly one more delimiter than spaces.
/// That is a fixed-format heuristic rather than a parser; keep it as is,
/// downstream consumers rely on it.
pub fn validate_result(result: &mut String) -> bool {
    let colons = result.matches(':').count();
    let bangs = result.matches('!').count();
    let spaces = result.matches(' ').count();

    if colons == 0 && bangs == 0 && spaces == 0 {
        if is_numeric(result) {
            return true;
        }
        *result = UNKNOWN_SAMPLE.to_string();
        return false;
    }

    if colons > 0 || bangs > 0 {
        if spaces == 0 {
            return true;
        }
        let delims = if colons > 0 { colons } else { bangs };
        return spaces + 1 == delims;
    }

    is_numeric(result)
}

/// Numeric value of a sample, with anything unusable counted as zero.
pub fn sample_or_zero(s: &str) -> f64 {
    numeric_value(s).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_numeric() {
        assert!(is_numeric("12"));
        assert!(is_numeric("12.345"));
        assert!(is_numeric("-0.5"));
        assert!(is_numeric(".5"));
        assert!(is_numeric("1e3"));
        assert!(is_numeric(" 42 "));
        assert!(!is_numeric(""));
        assert!(!is_numeric("."));
        assert!(!is_numeric("U"));
        assert!(!is_numeric("inf"));
        assert!(!is_numeric("NaN"));
        assert!(!is_numeric("0x1A"));
        assert!(!is_numeric("1e"));
        assert!(!is_numeric("12abc"));
    }

    #[test]
    fn test_is_hexadecimal() {
        assert!(is_hexadecimal("AB:CD:EF"));
        assert!(is_hexadecimal("ab:0f"));
        assert!(is_hexadecimal("F"));
        assert!(is_hexadecimal(" 0a "));
        assert!(!is_hexadecimal("AB:CD:E"));
        assert!(!is_hexadecimal("AB:CD:"));
        assert!(!is_hexadecimal("AB::CD"));
        assert!(!is_hexadecimal("ABCD"));
        assert!(!is_hexadecimal("GZ"));
        assert!(!is_hexadecimal(""));
        assert!(!is_hexadecimal("   "));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("'123abc'"), "123");
        assert_eq!(strip_quotes("\"42\""), "42");
        assert_eq!(strip_quotes("  '3.14'  "), "3.14");
        assert_eq!(strip_quotes("'AB:CD'"), "AB:CD");
        assert_eq!(strip_quotes("U"), "U");
        assert_eq!(strip_quotes("17 ms"), "17");
        assert_eq!(strip_quotes("no digits"), "no digits");
    }

    #[test]
    fn test_validate_result_single_value() {
        let mut value = "12.5".to_string();
        assert!(validate_result(&mut value));
        assert_eq!(value, "12.5");

        let mut value = "notanumber".to_string();
        assert!(!validate_result(&mut value));
        assert_eq!(value, "U");

        let mut value = String::new();
        assert!(!validate_result(&mut value));
        assert_eq!(value, "U");
    }

    #[test]
    fn test_validate_result_multi_value() {
        let mut value = "in:10 out:20".to_string();
        assert!(validate_result(&mut value));

        let mut value = "in:10".to_string();
        assert!(validate_result(&mut value));

        let mut value = "a!1 b!2".to_string();
        assert!(validate_result(&mut value));

        // one delimiter is missing its pair
        let mut value = "in:10 out 20".to_string();
        assert!(!validate_result(&mut value));
        assert_eq!(value, "in:10 out 20");
    }

    #[test]
    fn test_validate_result_spaces_without_delimiters() {
        let mut value = "1 2".to_string();
        assert!(!validate_result(&mut value));
        assert_eq!(value, "1 2");
    }

    #[test]
    fn test_sample_or_zero() {
        assert_eq!(sample_or_zero("4.5"), 4.5);
        assert_eq!(sample_or_zero("U"), 0.0);
        assert_eq!(sample_or_zero("down"), 0.0);
    }
}

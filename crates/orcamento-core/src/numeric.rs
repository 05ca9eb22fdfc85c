//! Locale numeric normalisation for Brazilian-formatted monetary values.
//!
//! The spending service emits amounts as strings such as `"1.234,56"`:
//! `.` groups thousands and `,` separates decimals. Some rows carry plain
//! JSON numbers instead, and blank cells arrive as `null` or `""`.
//!
//! # Rules
//!
//! - JSON number → returned unchanged
//! - `null`, absent, or blank string → `0.0`
//! - String → drop every `.`, turn the first `,` into `.`, then parse the
//!   longest numeric prefix (`"12,5abc"` → `12.5`)
//! - Anything that still does not parse, or parses to a non-finite value → `0.0`
//!
//! None of these functions can fail. One malformed cell must never abort a
//! multi-year stream.

use serde_json::Value;

/// Normalise an optional JSON value into a finite `f64`.
pub fn normalize_amount(value: Option<&Value>) -> f64 {
    match value {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(n)) => finite_or_zero(n.as_f64().unwrap_or(0.0)),
        Some(Value::String(s)) => parse_locale_decimal(s),
        Some(_) => 0.0,
    }
}

/// Parse a locale-formatted decimal string (`"1.234,56"` → `1234.56`).
pub fn parse_locale_decimal(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }

    let canonical = s.replace('.', "").replacen(',', ".", 1);
    leading_float(&canonical).map(finite_or_zero).unwrap_or(0.0)
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Parse the longest prefix of `s` that forms a decimal float.
///
/// Accepts an optional sign, digits with at most one `.`, and an optional
/// exponent. Returns `None` when no digit is found before the first
/// unexpected character.
fn leading_float(s: &str) -> Option<f64> {
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }

    let mut digits = 0;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => digits += 1,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if digits == 0 {
        return None;
    }

    // Exponent only counts when at least one digit follows it.
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse().ok()
}

/// Parse an integer-like JSON value (`12`, `"06"`, `"2021"`).
///
/// Returns `None` for absent, blank, or non-integral input.
pub fn parse_integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

//! Validation and evaluation of two-operand integer arithmetic, the
//! server's one piece of business logic. Failures never raise: they surface
//! as the textual sentinels `ERROR` and `NaN` inside a normal reply.

use std::sync::LazyLock;

use regex::Regex;

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]+)([+\-*/])([0-9]+)$").expect("expression pattern compiles")
});

/// Strips all whitespace, interior included, so `" 3 + 4 "` validates the
/// same as `"3+4"`.
pub fn normalize(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Anchored match of `<digits><op><digits>` with `op` one of `+ - * /`.
pub fn validate(text: &str) -> bool {
    EXPRESSION.is_match(text)
}

/// Computes a validated expression with wrapping 32-bit arithmetic.
///
/// Division truncates toward zero; dividing by zero yields `"NaN"`. An
/// operand too large for `i32` or an operator outside the grammar yields
/// `"ERROR"` instead of a fault.
pub fn evaluate(text: &str) -> String {
    let captures = match EXPRESSION.captures(text) {
        Some(captures) => captures,
        None => return "ERROR".to_string(),
    };

    let (lhs, rhs): (i32, i32) = match (captures[1].parse(), captures[3].parse()) {
        (Ok(lhs), Ok(rhs)) => (lhs, rhs),
        _ => return "ERROR".to_string(),
    };

    let result = match &captures[2] {
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" => {
            if rhs == 0 {
                return "NaN".to_string();
            }
            lhs.wrapping_div(rhs)
        }
        _ => return "ERROR".to_string(),
    };

    result.to_string()
}

/// Normalizes, validates, and evaluates free text, collapsing validation
/// failure into the `ERROR` sentinel.
pub fn solve(text: &str) -> String {
    let normalized = normalize(text);
    if !validate(&normalized) {
        return "ERROR".to_string();
    }
    evaluate(&normalized)
}

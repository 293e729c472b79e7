use crate::ast::{Field, NumericPredicate};
use chrono::NaiveDate;

const SECONDS_PER_DAY: u64 = 86_400;

/// Parses the value of a `size:` or `mtime:` term.
///
/// Accepted forms: `N`, `=N`, `<N`, `<=N`, `>N`, `>=N` and `A..B` with
/// either end optional. Sizes also take `A-B`; dates contain `-`, so `mtime`
/// ranges need `..`. A value may denote an interval (a calendar day for
/// `mtime`), comparisons use the interval edge that makes them strict.
pub(crate) fn parse_predicate(field: Field, text: &str) -> Result<NumericPredicate, String> {
    if let Some((low, high)) = split_range(field, text) {
        if low.is_empty() && high.is_empty() {
            return Err(format!("empty {field} range"));
        }

        let min = if low.is_empty() {
            0
        } else {
            parse_value(field, low)?.0
        };
        let max = if high.is_empty() {
            u64::MAX
        } else {
            parse_value(field, high)?.1
        };

        return Ok(NumericPredicate::between(min, max));
    }

    let (op, rest) = split_operator(text);
    let (low, high) = parse_value(field, rest)?;

    let predicate = match op {
        "<" => match low.checked_sub(1) {
            Some(max) => NumericPredicate::between(0, max),
            None => NumericPredicate::between(1, 0),
        },
        "<=" => NumericPredicate::between(0, high),
        ">" => match high.checked_add(1) {
            Some(min) => NumericPredicate::between(min, u64::MAX),
            None => NumericPredicate::between(1, 0),
        },
        ">=" => NumericPredicate::between(low, u64::MAX),
        _ => NumericPredicate::between(low, high),
    };

    Ok(predicate)
}

fn split_range(field: Field, text: &str) -> Option<(&str, &str)> {
    text.split_once("..").or_else(|| match field {
        Field::Size => text.split_once('-'),
        _ => None,
    })
}

fn split_operator(text: &str) -> (&str, &str) {
    for op in ["<=", ">=", "<", ">", "="] {
        if let Some(rest) = text.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", text)
}

fn parse_value(field: Field, text: &str) -> Result<(u64, u64), String> {
    if text.is_empty() {
        return Err(format!("missing {field} value"));
    }

    let parsed = match field {
        Field::Size => parse_size(text).map(|n| (n, n)),
        Field::Mtime => parse_mtime(text),
        Field::Name | Field::Path | Field::Extension => None,
    };

    parsed.ok_or_else(|| format!("invalid {field} value '{text}'"))
}

fn parse_size(text: &str) -> Option<u64> {
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        _ => return None,
    };

    if number.contains('.') {
        let value: f64 = number.parse().ok()?;
        let bytes = (value * multiplier as f64).round();
        if !bytes.is_finite() || bytes < 0.0 || bytes >= u64::MAX as f64 {
            return None;
        }
        return Some(bytes as u64);
    }

    number.parse::<u64>().ok()?.checked_mul(multiplier)
}

/// Unix seconds, or a `YYYY-MM-DD` UTC day
fn parse_mtime(text: &str) -> Option<(u64, u64)> {
    if text.bytes().all(|b| b.is_ascii_digit()) {
        let seconds = text.parse().ok()?;
        return Some((seconds, seconds));
    }

    let day = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let start = day.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    let start = u64::try_from(start).ok()?;
    Some((start, start + SECONDS_PER_DAY - 1))
}

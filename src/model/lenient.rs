//! Forgiving deserializers for numbers that arrive from model output.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Int(u64),
    Float(f64),
    Text(String),
}

/// Accept `20`, `20.0`, `"20"` or `null` for an optional count.
/// Negative or unparseable values become `None`.
pub(crate) fn opt_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseNumber>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(LooseNumber::Int(n)) => u32::try_from(n).ok(),
        Some(LooseNumber::Float(f)) if f.is_finite() && f >= 0.0 => {
            u32::try_from(f.round() as u64).ok()
        }
        Some(LooseNumber::Float(_)) => None,
        Some(LooseNumber::Text(s)) => s.trim().replace(',', "").parse().ok(),
    })
}

/// Accept `85`, `85.5`, `"85"` or `null` for an optional score.
pub(crate) fn opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseNumber>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(LooseNumber::Int(n)) => Some(n as f64),
        Some(LooseNumber::Float(f)) if f.is_finite() => Some(f),
        Some(LooseNumber::Float(_)) => None,
        Some(LooseNumber::Text(s)) => s.trim().trim_end_matches('%').parse().ok(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseDecimal {
    Exact(Decimal),
    Text(String),
}

/// Accept `24500`, `24500.5`, `"24500"`, `"24,500"`, `"$24,500.00"` or
/// `"USD 24500"` for an optional amount. Anything else becomes `None`.
pub(crate) fn opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<LooseDecimal>::deserialize(deserializer)?;
    Ok(match raw {
        None => None,
        Some(LooseDecimal::Exact(d)) => Some(d),
        Some(LooseDecimal::Text(s)) => parse_amount(&s),
    })
}

fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '_' | '$' | '€' | '£' | '¥'))
        .collect();
    let cleaned = strip_currency_code(&cleaned);
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(cleaned).ok()
}

/// Drop a leading or trailing three-letter ISO code such as `USD`.
fn strip_currency_code(s: &str) -> &str {
    let is_code = |part: &str| part.len() == 3 && part.bytes().all(|b| b.is_ascii_uppercase());
    let s = match s.get(..3) {
        Some(head) if is_code(head) => &s[3..],
        _ => s,
    };
    match s.len().checked_sub(3).and_then(|at| s.get(at..)) {
        Some(tail) if is_code(tail) => &s[..s.len() - 3],
        _ => s,
    }
}

//! Conversion of Kubernetes resource quantities to floating point
//!
//! Quantities such as `500m`, `128Mi` or `1e3` are converted to an
//! approximate `f64` in the base unit of the resource (cores for CPU,
//! bytes for memory). Precision loss is acceptable for monitoring.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

/// Errors raised while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,
    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),
    #[error("unknown suffix {suffix:?} in quantity {quantity:?}")]
    UnknownSuffix { quantity: String, suffix: String },
    #[error("invalid exponent in quantity {0:?}")]
    InvalidExponent(String),
}

/// Parse a quantity into its approximate value in base units
pub fn parse_quantity(raw: &str) -> Result<f64, QuantityError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    let (number, suffix) = split_number(s);
    let value = parse_number(number).ok_or_else(|| QuantityError::InvalidNumber(s.to_string()))?;
    apply_suffix(s, value, suffix)
}

/// Approximate value of an optional quantity, `0.0` when absent
pub fn approximate_f64(quantity: Option<&Quantity>) -> Result<f64, QuantityError> {
    match quantity {
        Some(q) => parse_quantity(&q.0),
        None => Ok(0.0),
    }
}

/// Split at the end of the leading `[+-]digits[.digits]` run
fn split_number(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn parse_number(number: &str) -> Option<f64> {
    let unsigned = number.trim_start_matches(['+', '-']);
    if unsigned.len() + 1 < number.len() {
        return None;
    }

    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next().unwrap_or_default();
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.contains('.') {
        return None;
    }

    number.parse::<f64>().ok()
}

/// Scale `value` by the factor a suffix denotes
fn apply_suffix(quantity: &str, value: f64, suffix: &str) -> Result<f64, QuantityError> {
    let exponent = match suffix {
        "" => 0,
        "Ki" => return Ok(value * 1024f64),
        "Mi" => return Ok(value * 1024f64.powi(2)),
        "Gi" => return Ok(value * 1024f64.powi(3)),
        "Ti" => return Ok(value * 1024f64.powi(4)),
        "Pi" => return Ok(value * 1024f64.powi(5)),
        "Ei" => return Ok(value * 1024f64.powi(6)),
        "n" => -9,
        "u" => -6,
        "m" => -3,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        "P" => 15,
        "E" => 18,
        other if other.starts_with(['e', 'E']) => other[1..]
            .parse::<i32>()
            .map_err(|_| QuantityError::InvalidExponent(quantity.to_string()))?,
        other => {
            return Err(QuantityError::UnknownSuffix {
                quantity: quantity.to_string(),
                suffix: other.to_string(),
            })
        }
    };

    // Dividing by an exact power of ten keeps values like 500m exact
    if exponent < 0 {
        Ok(value / 10f64.powi(-exponent))
    } else {
        Ok(value * 10f64.powi(exponent))
    }
}

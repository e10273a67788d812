//! Display formatting for sales amounts.

use thiserror::Error;

/// One lakh = 100,000 currency units.
pub const LAKH: f64 = 100_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("cannot format negative amount {0} in lakh")]
    Negative(f64),
    #[error("cannot format non-finite amount {0} in lakh")]
    NotFinite(f64),
}

/// Format an amount in lakh with two decimals, e.g. `250000` -> `"2.50 Lakh"`.
///
/// Negative and non-finite amounts are rejected rather than rendered.
pub fn format_lakh(value: f64) -> Result<String, FormatError> {
    if !value.is_finite() {
        return Err(FormatError::NotFinite(value));
    }
    if value < 0.0 {
        return Err(FormatError::Negative(value));
    }
    // Normalise -0.0 so it renders as "0.00 Lakh"
    let value = if value == 0.0 { 0.0 } else { value };
    Ok(format!("{:.2} Lakh", value / LAKH))
}

//! Errors produced while constructing value types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("amount must not be negative: {0}")]
    Negative(String),

    #[error("amount is not a finite number: {0}")]
    NotFinite(String),

    #[error("amount has more than {max} decimal places: {input}")]
    TooPrecise { input: String, max: u32 },

    #[error("amount overflows: {0}")]
    Overflow(String),

    #[error("invalid amount: {0}")]
    Invalid(String),
}

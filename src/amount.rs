// src/amount.rs
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::MutationError;

/// Number of decimal places carried by a cashback amount.
pub const DECIMALS: u8 = 2;

const SCALE: i64 = 100;

/// A non-negative monetary amount stored in minor units (cents).
///
/// Display amounts arrive as floating point from clients; they are converted
/// once at the edge and all ledger arithmetic is done on integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Largest representable amount (fits a Postgres BIGINT).
    pub const MAX: Amount = Amount(i64::MAX);

    pub fn from_minor(minor: i64) -> Result<Self, MutationError> {
        if minor < 0 {
            return Err(MutationError::InvalidAmount);
        }
        Ok(Self(minor))
    }

    /// Converts a client-supplied display amount, e.g. `100.50`.
    ///
    /// Rejects NaN, infinities, non-positive values and anything that rounds to zero.
    pub fn from_display(display: f64) -> Result<Self, MutationError> {
        if !display.is_finite() || display <= 0.0 {
            return Err(MutationError::InvalidAmount);
        }

        let minor = (display * SCALE as f64).round();
        if minor < 1.0 || minor >= i64::MAX as f64 {
            return Err(MutationError::InvalidAmount);
        }

        Ok(Self(minor as i64))
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    pub fn to_display(&self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Returns `None` when the result would be negative.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        match self.0.checked_sub(other.0) {
            Some(v) if v >= 0 => Some(Amount(v)),
            _ => None,
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / SCALE, self.0 % SCALE)
    }
}

use crate::error::{BookingError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};

/// Number of decimal places in the settlement currency's minor unit.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A monetary value in the settlement currency.
///
/// This is a wrapper around `rust_decimal::Decimal`. Arithmetic is exact; rounding to the
/// currency's minor unit only happens through [`Money::round2`] so that callers decide where
/// precision is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Builds a strictly positive amount, as required for rates and charges.
    pub fn positive(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(BookingError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    /// Converts an integer amount of minor units (e.g. cents) into money.
    pub fn from_minor_units(units: i64) -> Self {
        Self(Decimal::new(units, MINOR_UNIT_SCALE))
    }

    /// Converts to integer minor units, failing if precision would be lost.
    pub fn to_minor_units(self) -> Result<i64> {
        let scaled = self.0 * Decimal::ONE_HUNDRED;
        if scaled.fract() != Decimal::ZERO {
            return Err(BookingError::ValidationError(format!(
                "{self} has more precision than the currency minor unit"
            )));
        }
        scaled.to_i64().ok_or_else(|| {
            BookingError::ValidationError(format!("{self} does not fit in minor units"))
        })
    }

    /// Rounds half away from zero to the minor unit.
    pub fn round2(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Money {
    type Output = Self;
    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

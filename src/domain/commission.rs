use super::money::Money;
use crate::error::{BookingError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of splitting a booking's price between the platform and the companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub total_amount: Money,
    pub platform_fee: Money,
    pub companion_earnings: Money,
}

/// Computes the booking total, the platform fee and the companion's earnings.
///
/// Earnings are derived by subtraction and never rounded on their own, so
/// `platform_fee + companion_earnings == total_amount` holds exactly.
pub fn compute_split(
    hourly_rate: Money,
    duration_hours: u32,
    commission_percentage: Decimal,
) -> Result<Split> {
    if duration_hours < 1 {
        return Err(BookingError::ValidationError(
            "Duration must be at least one hour".to_string(),
        ));
    }
    if commission_percentage < Decimal::ZERO || commission_percentage > Decimal::ONE_HUNDRED {
        return Err(BookingError::ValidationError(format!(
            "Commission percentage {commission_percentage} is outside [0, 100]"
        )));
    }
    if hourly_rate < Money::ZERO {
        return Err(BookingError::ValidationError(
            "Hourly rate cannot be negative".to_string(),
        ));
    }

    let total_amount = (hourly_rate * Decimal::from(duration_hours)).round2();
    let platform_fee = (total_amount * (commission_percentage / Decimal::ONE_HUNDRED)).round2();
    let companion_earnings = total_amount - platform_fee;

    Ok(Split {
        total_amount,
        platform_fee,
        companion_earnings,
    })
}

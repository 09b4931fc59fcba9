use super::actor::Role;
use super::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The slice of a user profile the booking flow reads.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Profile {
    pub id: String,
    pub role: Role,
    pub email: String,
    /// Only companions have a rate.
    pub hourly_rate: Option<Money>,
    /// Verified payee sub-account at the gateway, if the companion completed onboarding.
    pub subaccount_code: Option<String>,
    pub booking_count: u32,
}

impl Profile {
    pub fn client(id: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            role: Role::Client,
            email: email.to_string(),
            hourly_rate: None,
            subaccount_code: None,
            booking_count: 0,
        }
    }

    pub fn companion(id: &str, email: &str, hourly_rate: Money) -> Self {
        Self {
            id: id.to_string(),
            role: Role::Companion,
            email: email.to_string(),
            hourly_rate: Some(hourly_rate),
            subaccount_code: None,
            booking_count: 0,
        }
    }

    pub fn with_subaccount(mut self, code: &str) -> Self {
        self.subaccount_code = Some(code.to_string());
        self
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
pub struct PlatformSettings {
    pub commission_percentage: Decimal,
}

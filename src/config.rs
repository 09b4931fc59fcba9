use crate::error::{BookingError, Result};
use chrono::Duration;

/// Tunables of the booking engine and the expiration sweep.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a booking may wait for the companion before the sweep expires it.
    pub expiration_window: Duration,
    /// Upper bound on any single gateway call. Hitting it counts as a gateway error.
    pub gateway_timeout: std::time::Duration,
    /// Read-modify-write attempts before giving up with `ConcurrentModification`.
    pub max_write_attempts: u32,
    /// Bookings handled in parallel by one sweep.
    pub sweep_concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expiration_window: Duration::hours(24),
            gateway_timeout: std::time::Duration::from_secs(10),
            max_write_attempts: 3,
            sweep_concurrency: 8,
        }
    }
}

impl EngineConfig {
    pub fn new(
        expiration_window: Duration,
        gateway_timeout: std::time::Duration,
        max_write_attempts: u32,
        sweep_concurrency: usize,
    ) -> Result<Self> {
        if expiration_window <= Duration::zero() {
            return Err(BookingError::ValidationError(
                "Expiration window must be positive".to_string(),
            ));
        }
        if gateway_timeout.is_zero() {
            return Err(BookingError::ValidationError(
                "Gateway timeout must be positive".to_string(),
            ));
        }
        if max_write_attempts == 0 || sweep_concurrency == 0 {
            return Err(BookingError::ValidationError(
                "Write attempts and sweep concurrency must be at least one".to_string(),
            ));
        }

        Ok(Self {
            expiration_window,
            gateway_timeout,
            max_write_attempts,
            sweep_concurrency,
        })
    }
}

/// Connection settings for the HTTPS payment gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: std::time::Duration,
}

impl GatewayConfig {
    pub fn new(base_url: &str, secret_key: &str, timeout: std::time::Duration) -> Result<Self> {
        if secret_key.trim().is_empty() {
            return Err(BookingError::ValidationError(
                "Gateway secret key is empty".to_string(),
            ));
        }
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(BookingError::ValidationError(format!(
                "Gateway URL {base_url} must be http(s)"
            )));
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            timeout,
        })
    }
}

use super::{
    ConfigError, ConfigResult, Environment, ADMIN_PARTY, RETRY_BACKOFF, RETRY_COUNT, RETRY_DELAY,
};
use crate::retry::{RetryPolicy, DEFAULT_BACKOFF, DEFAULT_DELAY_SECS, DEFAULT_TRIES};
use std::time::Duration;

/// Connection-independent store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// Connect without credentials (local/test deployments).
    pub admin_party: bool,
    pub retry: RetryPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            admin_party: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreSettings {
    /// Reads `ADMIN_PARTY`, `RETRY_COUNT`, `RETRY_DELAY` and `RETRY_BACKOFF`.
    ///
    /// # Errors
    /// - Returns an error when a retry variable is not a non-negative integer.
    /// - Returns an error when `RETRY_COUNT` or `RETRY_BACKOFF` is zero.
    pub fn from_env(env: &dyn Environment) -> ConfigResult<Self> {
        let admin_party = env
            .var(ADMIN_PARTY)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let tries = read_integer(env, RETRY_COUNT, u64::from(DEFAULT_TRIES), 1)?;
        let delay_secs = read_integer(env, RETRY_DELAY, DEFAULT_DELAY_SECS, 0)?;
        let backoff = read_integer(env, RETRY_BACKOFF, u64::from(DEFAULT_BACKOFF), 1)?;

        Ok(Self {
            admin_party,
            retry: RetryPolicy::new(
                clamp_u32(tries),
                Duration::from_secs(delay_secs),
                clamp_u32(backoff),
            ),
        })
    }
}

fn read_integer(
    env: &dyn Environment,
    variable: &str,
    default: u64,
    minimum: u64,
) -> ConfigResult<u64> {
    let Some(raw) = env.var(variable) else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidInteger {
            variable: variable.to_string(),
            value: raw.clone(),
        })?;
    if value < minimum {
        return Err(ConfigError::OutOfRange {
            variable: variable.to_string(),
            value,
            minimum,
        });
    }
    Ok(value)
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

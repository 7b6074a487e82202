use std::time::Duration;

use crate::{DcsandboxError, DcsandboxResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The smallest accepted CPU count.
pub const MIN_CPUS: f64 = 1.0;

/// The largest accepted CPU count unless overridden by configuration.
pub const DEFAULT_MAX_CPUS: f64 = 32.0;

/// The smallest accepted sandbox timeout, in minutes.
pub const MIN_TIMEOUT_MINUTES: u64 = 30;

/// The largest accepted sandbox timeout, in minutes.
pub const MAX_TIMEOUT_MINUTES: u64 = 3600;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a memory size string into bytes.
///
/// The accepted grammar is `^\d+[KMGT]?$`, case-insensitive. A bare number is
/// bytes; `K`, `M`, `G`, `T` are powers of 1024. Anything else is rejected,
/// including two-letter units like `KB` and embedded whitespace.
///
/// ## Examples
///
/// ```
/// use dcsandbox::utils::parse_memory_size;
///
/// assert_eq!(parse_memory_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
/// assert_eq!(parse_memory_size("512m").unwrap(), 512 * 1024 * 1024);
/// assert_eq!(parse_memory_size("1024").unwrap(), 1024);
/// assert!(parse_memory_size("1KB").is_err());
/// ```
pub fn parse_memory_size(input: &str) -> DcsandboxResult<u64> {
    let invalid = || DcsandboxError::InvalidMemory(input.to_string());

    let (digits, unit) = match input.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => input.split_at(idx),
        None => (input, ""),
    };

    if digits.is_empty() {
        return Err(invalid());
    }

    let value: u64 = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }

    let multiplier: u64 = match unit.to_ascii_uppercase().as_str() {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return Err(invalid()),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(invalid)
}

/// Validates a CPU count against `[min, max]` and converts it to millicores.
pub fn cpus_to_millicores(cpus: f64, max_cpus: f64) -> DcsandboxResult<u32> {
    if !cpus.is_finite() || cpus < MIN_CPUS || cpus > max_cpus {
        return Err(DcsandboxError::InvalidCpu(cpus, MIN_CPUS, max_cpus));
    }
    Ok((cpus * 1000.0).round() as u32)
}

/// Converts millicores to the nano-CPU unit the container runtime expects.
pub fn millicores_to_nano_cpus(millicores: u32) -> i64 {
    i64::from(millicores) * 1_000_000
}

/// Validates a sandbox timeout in minutes and converts it to seconds.
pub fn timeout_minutes_to_seconds(minutes: u64) -> DcsandboxResult<u64> {
    if !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&minutes) {
        return Err(DcsandboxError::InvalidTimeout(
            minutes,
            MIN_TIMEOUT_MINUTES,
            MAX_TIMEOUT_MINUTES,
        ));
    }
    Ok(minutes * 60)
}

/// Parses an interval string of the form `N{s,m,h,d}` into a [`Duration`].
///
/// Used by the `cleanup.inactiveTimeout` configuration key.
pub fn parse_interval(input: &str) -> DcsandboxResult<Duration> {
    let invalid = || DcsandboxError::Config(format!("invalid interval: {:?}", input));

    let Some(unit) = input.chars().last() else {
        return Err(invalid());
    };
    let digits = &input[..input.len() - unit.len_utf8()];
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let seconds = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        'd' => value * 86400,
        _ => return Err(invalid()),
    };

    Ok(Duration::from_secs(seconds))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

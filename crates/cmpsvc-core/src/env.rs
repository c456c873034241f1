//! Environment variable utilities
//!
//! All service variables share the `CMPSVC_` prefix; callers pass the
//! suffix only.
//!
//! ```ignore
//! use cmpsvc_core::env::{env_get, env_get_bool};
//!
//! let port: u16 = env_get("PORT", 9999);          // CMPSVC_PORT
//! let report = env_get_bool("REPORT", true);      // CMPSVC_REPORT
//! ```

use std::str::FromStr;

/// Prefix shared by every service variable
pub const ENV_PREFIX: &str = "CMPSVC_";

/// Full variable name for a suffix
#[inline]
pub fn env_name(suffix: &str) -> String {
    format!("{}{}", ENV_PREFIX, suffix)
}

fn raw(suffix: &str) -> Option<String> {
    std::env::var(env_name(suffix)).ok()
}

/// Parse `CMPSVC_<suffix>` as `T`, or return `default`
///
/// Unset and unparsable values both fall back to the default.
#[inline]
pub fn env_get<T: FromStr>(suffix: &str, default: T) -> T {
    env_get_opt(suffix).unwrap_or(default)
}

/// Parse `CMPSVC_<suffix>` as `T` if set and valid
#[inline]
pub fn env_get_opt<T: FromStr>(suffix: &str) -> Option<T> {
    raw(suffix).and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" (any case) are true, "0",
/// "false", "no", "off" are false, anything else keeps the default
#[inline]
pub fn env_get_bool(suffix: &str, default: bool) -> bool {
    match raw(suffix).map(|v| v.trim().to_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// String value, or `default`
#[inline]
pub fn env_get_str(suffix: &str, default: &str) -> String {
    raw(suffix).unwrap_or_else(|| default.to_string())
}

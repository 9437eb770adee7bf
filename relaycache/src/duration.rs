//! Parsing/formatting for the `Time-To-Live` header (§4.5, §6.1): a
//! signed-integer-with-unit duration form accepting `ns, us, ms, s, m, h`
//! (e.g. `1h30m`). Backed by `humantime`, which accepts exactly that
//! grammar plus a couple of units the spec doesn't require (days, weeks);
//! the extra leniency is harmless.

use std::time::Duration;

use crate::error::CacheError;

pub fn parse_ttl(text: &str) -> Result<Duration, CacheError> {
    humantime::parse_duration(text)
        .map_err(|e| CacheError::invalid_argument(format!("bad Time-To-Live {text:?}: {e}")))
}

pub fn format_ttl(ttl: Duration) -> String {
    humantime::format_duration(ttl).to_string()
}

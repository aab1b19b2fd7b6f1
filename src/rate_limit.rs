//! Client-side rate limits for remote API calls.
//!
//! Google Drive enforces per-user request quotas. Staying under them is
//! cheaper than bouncing off them and backing off.

use std::{fmt, str::FromStr, time::Duration};

use leaky_bucket::RateLimiter;

use crate::prelude::*;

/// A rate limit like "10/s" or "600/m".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateLimit {
    /// The maximum number of requests allowed in each period.
    pub max_requests: usize,

    /// The period, as a unit suffix: `s`, `m` or `h`.
    pub unit: char,
}

impl RateLimit {
    /// How long is one period?
    pub fn period(&self) -> Duration {
        match self.unit {
            'm' => Duration::from_secs(60),
            'h' => Duration::from_secs(60 * 60),
            _ => Duration::from_secs(1),
        }
    }

    /// Create a [`RateLimiter`] for this rate limit.
    ///
    /// The bucket starts full, so a short run can burst up to `max_requests`
    /// immediately.
    pub fn to_rate_limiter(&self) -> RateLimiter {
        RateLimiter::builder()
            .initial(self.max_requests)
            .refill(self.max_requests)
            .max(self.max_requests)
            .interval(self.period())
            .build()
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_requests, self.unit)
    }
}

impl FromStr for RateLimit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |s: &str| -> Result<_> {
            let (count, unit) = s
                .split_once('/')
                .ok_or_else(|| anyhow!("expected COUNT/UNIT"))?;
            let max_requests = count.trim().parse::<usize>()?;
            if max_requests == 0 {
                return Err(anyhow!("rate limit must allow at least one request"));
            }
            let unit = match unit.trim() {
                "s" => 's',
                "m" => 'm',
                "h" => 'h',
                other => return Err(anyhow!("unsupported period {:?}", other)),
            };
            Ok(Self { max_requests, unit })
        };
        parse(s).with_context(|| format!("Failed to parse rate limit: {:?}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_limits() {
        for (input, requests, period_secs) in
            [("10/s", 10, 1), ("600/m", 600, 60), ("5000/h", 5000, 3600)]
        {
            let limit = RateLimit::from_str(input).unwrap();
            assert_eq!(limit.max_requests, requests);
            assert_eq!(limit.period(), Duration::from_secs(period_secs));
            assert_eq!(limit.to_string(), input);
        }
    }

    #[test]
    fn rejects_bad_limits() {
        assert!(RateLimit::from_str("10/fortnight").is_err());
        assert!(RateLimit::from_str("ten/s").is_err());
        assert!(RateLimit::from_str("0/s").is_err());
        assert!(RateLimit::from_str("10").is_err());
    }
}

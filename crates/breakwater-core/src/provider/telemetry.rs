//! Rate-limit telemetry parsed from provider response headers.
//!
//! Infura-style gateways publish `x-ratelimit-*` headers; compute-metered
//! gateways publish `x-alchemy-compute-units-*`. Absence of any header only
//! skips the corresponding update, it never fails the call.

use reqwest::header::HeaderMap;

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_CU_USED: &str = "x-alchemy-compute-units-used";
const HEADER_CU_REMAINING: &str = "x-alchemy-compute-units-remaining";

/// Snapshot of the provider-reported rate-limit position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitTelemetry {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Seconds until the provider-side window resets.
    pub reset_seconds: Option<u64>,
    pub compute_units_used: Option<u64>,
    pub compute_units_remaining: Option<u64>,
}

impl RateLimitTelemetry {
    /// Extracts whatever telemetry the response carries.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: parse_numeric(headers, HEADER_LIMIT),
            remaining: parse_numeric(headers, HEADER_REMAINING),
            reset_seconds: parse_numeric(headers, HEADER_RESET),
            compute_units_used: parse_numeric(headers, HEADER_CU_USED),
            compute_units_remaining: parse_numeric(headers, HEADER_CU_REMAINING),
        }
    }

    /// Returns `true` when the response carried no telemetry at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() &&
            self.remaining.is_none() &&
            self.reset_seconds.is_none() &&
            self.compute_units_used.is_none() &&
            self.compute_units_remaining.is_none()
    }

    /// Provider-reported utilization in `0.0..=1.0`, when derivable.
    #[must_use]
    pub fn utilization(&self) -> Option<f64> {
        match (self.limit, self.remaining) {
            (Some(limit), Some(remaining)) if limit > 0 => {
                Some(1.0 - (remaining.min(limit) as f64 / limit as f64))
            }
            _ => match (self.compute_units_used, self.compute_units_remaining) {
                (Some(used), Some(remaining)) if used + remaining > 0 => {
                    Some(used as f64 / (used + remaining) as f64)
                }
                _ => None,
            },
        }
    }
}

fn parse_numeric(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        // Some gateways send fractional reset values; take the integer part.
        .and_then(|text| text.split('.').next())
        .and_then(|text| text.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn parses_infura_style_headers() {
        let telemetry = RateLimitTelemetry::from_headers(&headers(&[
            (HEADER_LIMIT, "500"),
            (HEADER_REMAINING, "125"),
            (HEADER_RESET, "12.5"),
        ]));

        assert_eq!(telemetry.limit, Some(500));
        assert_eq!(telemetry.remaining, Some(125));
        assert_eq!(telemetry.reset_seconds, Some(12));
        assert_eq!(telemetry.utilization(), Some(0.75));
    }

    #[test]
    fn parses_compute_unit_headers() {
        let telemetry = RateLimitTelemetry::from_headers(&headers(&[
            (HEADER_CU_USED, "300"),
            (HEADER_CU_REMAINING, "700"),
        ]));

        assert_eq!(telemetry.compute_units_used, Some(300));
        assert_eq!(telemetry.compute_units_remaining, Some(700));
        assert_eq!(telemetry.utilization(), Some(0.3));
    }

    #[test]
    fn missing_headers_are_not_an_error() {
        let telemetry = RateLimitTelemetry::from_headers(&HeaderMap::new());
        assert!(telemetry.is_empty());
        assert_eq!(telemetry.utilization(), None);
    }

    #[test]
    fn garbage_values_are_skipped() {
        let telemetry = RateLimitTelemetry::from_headers(&headers(&[
            (HEADER_LIMIT, "not-a-number"),
            (HEADER_REMAINING, "10"),
        ]));
        assert_eq!(telemetry.limit, None);
        assert_eq!(telemetry.remaining, Some(10));
        assert_eq!(telemetry.utilization(), None);
    }
}

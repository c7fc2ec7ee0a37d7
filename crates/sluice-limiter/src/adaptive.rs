use crate::bucket::TokenBucket;
use sluice_core::{ApiError, ApiResult};
use std::sync::Arc;

/// Rate-limit hints parsed out of a response's headers.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct RateHints {
    limit: Option<f64>,
    remaining: Option<f64>,
    reset: Option<f64>,
}

impl RateHints {
    /// The provider-suggested sustainable rate, in tokens per second.
    ///
    /// A `limit` header wins; without one, `remaining / reset` is used
    /// when both are present and usable.
    fn candidate_rate(&self) -> Option<f64> {
        if let Some(limit) = self.limit {
            return Some(limit);
        }
        match (self.remaining, self.reset) {
            (Some(remaining), Some(reset)) if reset > 0.0 => Some(remaining / reset),
            _ => None,
        }
    }
}

/// Configuration for an [`AdaptiveLimiter`].
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    pub(crate) safety_factor: f64,
    pub(crate) min_rate: f64,
    pub(crate) allow_increase: bool,
}

impl AdaptiveConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> AdaptiveConfigBuilder {
        AdaptiveConfigBuilder::new()
    }
}

/// Builder for [`AdaptiveConfig`].
#[derive(Debug)]
pub struct AdaptiveConfigBuilder {
    safety_factor: f64,
    min_rate: f64,
    allow_increase: bool,
}

impl Default for AdaptiveConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - safety_factor: 1.0 (use the provider hint as-is)
    /// - min_rate: 1.0
    /// - allow_increase: false (never exceed the bucket's original rate)
    pub fn new() -> Self {
        Self {
            safety_factor: 1.0,
            min_rate: 1.0,
            allow_increase: false,
        }
    }

    /// Sets the fraction of the provider hint to actually use, in (0, 1].
    pub fn safety_factor(mut self, factor: f64) -> Self {
        self.safety_factor = factor;
        self
    }

    /// Sets the floor the adjusted rate never goes below.
    pub fn min_rate(mut self, min_rate: f64) -> Self {
        self.min_rate = min_rate;
        self
    }

    /// Allows hints to raise the rate above the bucket's original rate.
    pub fn allow_increase(mut self, allow: bool) -> Self {
        self.allow_increase = allow;
        self
    }

    /// Validates the configuration and wraps the given bucket.
    pub fn build(self, bucket: Arc<TokenBucket>) -> ApiResult<AdaptiveLimiter> {
        if !(self.safety_factor > 0.0 && self.safety_factor <= 1.0) {
            return Err(ApiError::invalid_argument(format!(
                "safety_factor must be in (0, 1], got {}",
                self.safety_factor
            )));
        }
        if !self.min_rate.is_finite() || self.min_rate < 1.0 {
            return Err(ApiError::invalid_argument(format!(
                "min_rate must be at least 1, got {}",
                self.min_rate
            )));
        }
        Ok(AdaptiveLimiter {
            bucket,
            config: AdaptiveConfig {
                safety_factor: self.safety_factor,
                min_rate: self.min_rate,
                allow_increase: self.allow_increase,
            },
        })
    }
}

/// Adjusts a [`TokenBucket`]'s refill rate from response-header feedback.
///
/// Understands both the `X-RateLimit-*` and `RateLimit-*` header families
/// (case-insensitive). A credible hint is scaled by the safety factor,
/// floored at `min_rate`, and capped at the bucket's original rate unless
/// increases are explicitly allowed. Responses without usable hints leave
/// the rate untouched.
pub struct AdaptiveLimiter {
    bucket: Arc<TokenBucket>,
    config: AdaptiveConfig,
}

impl std::fmt::Debug for AdaptiveLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveLimiter")
            .field("bucket", &self.bucket)
            .field("config", &self.config)
            .finish()
    }
}

impl AdaptiveLimiter {
    /// The wrapped bucket.
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }

    /// Feeds a response's headers to the limiter.
    ///
    /// Returns the new rate when a credible hint changed it, `None`
    /// otherwise. Header values that fail to parse are ignored.
    pub fn update_from_headers<'a, I>(&self, headers: I) -> Option<f64>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let hints = parse_rate_headers(headers);
        let candidate = hints.candidate_rate()?;
        if !candidate.is_finite() || candidate <= 0.0 {
            return None;
        }

        let ceiling = if self.config.allow_increase {
            f64::INFINITY
        } else {
            self.bucket.original_rate()
        };
        let new_rate = (candidate.min(ceiling) * self.config.safety_factor)
            .max(self.config.min_rate);

        tracing::debug!(
            limiter = %self.bucket.name(),
            candidate,
            new_rate,
            "applying provider rate hint"
        );
        // Validated above: positive and finite.
        self.bucket.set_rate(new_rate).ok()?;
        Some(new_rate)
    }
}

fn parse_rate_headers<'a, I>(headers: I) -> RateHints
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut hints = RateHints::default();
    for (name, value) in headers {
        let name = name.to_ascii_lowercase();
        let field = match name.as_str() {
            "x-ratelimit-limit" | "ratelimit-limit" => &mut hints.limit,
            "x-ratelimit-remaining" | "ratelimit-remaining" => &mut hints.remaining,
            "x-ratelimit-reset" | "ratelimit-reset" => &mut hints.reset,
            _ => continue,
        };
        if let Ok(parsed) = value.trim().parse::<f64>() {
            // Reset values that look like epoch timestamps rather than
            // delta-seconds are not usable as a window length.
            if name.ends_with("reset") && parsed > 86_400.0 {
                continue;
            }
            *field = Some(parsed);
        }
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use std::time::Duration;

    fn limiter(rate: u32, safety: f64) -> AdaptiveLimiter {
        let bucket = Arc::new(
            LimiterConfig::builder()
                .rate(rate)
                .period(Duration::from_secs(1))
                .name("adaptive")
                .build()
                .unwrap(),
        );
        AdaptiveConfig::builder()
            .safety_factor(safety)
            .min_rate(1.0)
            .build(bucket)
            .unwrap()
    }

    #[tokio::test]
    async fn applies_limit_hint_with_safety_factor() {
        let adaptive = limiter(100, 0.5);
        let new_rate = adaptive.update_from_headers([
            ("X-RateLimit-Limit", "60"),
            ("X-RateLimit-Remaining", "3"),
            ("X-RateLimit-Reset", "10"),
        ]);
        assert_eq!(new_rate, Some(30.0));
        assert_eq!(adaptive.bucket().rate(), 30.0);

        // No hints: rate stays where the last update left it.
        let unchanged = adaptive.update_from_headers([("content-type", "application/json")]);
        assert_eq!(unchanged, None);
        assert_eq!(adaptive.bucket().rate(), 30.0);
    }

    #[tokio::test]
    async fn lowercase_standard_family_is_understood() {
        let adaptive = limiter(100, 1.0);
        let new_rate = adaptive.update_from_headers([("ratelimit-limit", "40")]);
        assert_eq!(new_rate, Some(40.0));
    }

    #[tokio::test]
    async fn falls_back_to_remaining_over_reset() {
        let adaptive = limiter(100, 1.0);
        let new_rate = adaptive.update_from_headers([
            ("X-RateLimit-Remaining", "50"),
            ("X-RateLimit-Reset", "10"),
        ]);
        assert_eq!(new_rate, Some(5.0));
    }

    #[tokio::test]
    async fn never_exceeds_original_rate_by_default() {
        let adaptive = limiter(20, 1.0);
        let new_rate = adaptive.update_from_headers([("X-RateLimit-Limit", "500")]);
        assert_eq!(new_rate, Some(20.0));

        let permissive = {
            let bucket = Arc::clone(adaptive.bucket());
            AdaptiveConfig::builder()
                .allow_increase(true)
                .build(bucket)
                .unwrap()
        };
        assert_eq!(
            permissive.update_from_headers([("X-RateLimit-Limit", "500")]),
            Some(500.0)
        );
    }

    #[tokio::test]
    async fn clamps_to_min_rate() {
        let adaptive = limiter(100, 0.5);
        let new_rate = adaptive.update_from_headers([("X-RateLimit-Limit", "1")]);
        assert_eq!(new_rate, Some(1.0));
    }

    #[tokio::test]
    async fn unparsable_values_leave_rate_unchanged() {
        let adaptive = limiter(100, 1.0);
        assert_eq!(
            adaptive.update_from_headers([("X-RateLimit-Limit", "not-a-number")]),
            None
        );
        assert_eq!(adaptive.bucket().rate(), 100.0);
    }

    #[tokio::test]
    async fn epoch_style_reset_is_ignored() {
        let adaptive = limiter(100, 1.0);
        assert_eq!(
            adaptive.update_from_headers([
                ("X-RateLimit-Remaining", "50"),
                ("X-RateLimit-Reset", "1893456000"),
            ]),
            None
        );
    }

    #[test]
    fn builder_validation() {
        let bucket = || {
            Arc::new(
                LimiterConfig::builder()
                    .rate(10)
                    .build()
                    .unwrap(),
            )
        };
        assert!(AdaptiveConfig::builder()
            .safety_factor(0.0)
            .build(bucket())
            .is_err());
        assert!(AdaptiveConfig::builder()
            .safety_factor(1.5)
            .build(bucket())
            .is_err());
        assert!(AdaptiveConfig::builder()
            .min_rate(0.5)
            .build(bucket())
            .is_err());
    }
}

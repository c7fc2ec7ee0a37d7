use crate::bucket::TokenBucket;
use crate::config::LimiterConfig;
use sluice_core::ApiResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A keyed registry of [`TokenBucket`]s, one per endpoint.
///
/// Buckets are created lazily from the registry's default parameters the
/// first time a key is seen. [`update`](EndpointLimiter::update) swaps in
/// a freshly built bucket; callers that already hold the old `Arc` finish
/// their in-flight acquisitions under the old parameters while new
/// lookups see the new ones.
pub struct EndpointLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    defaults: LimiterConfig,
}

impl std::fmt::Debug for EndpointLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointLimiter")
            .field("keys", &self.buckets.read().unwrap().len())
            .finish_non_exhaustive()
    }
}

impl EndpointLimiter {
    /// Creates a registry whose buckets are built from `defaults`.
    ///
    /// The defaults are validated once, here; per-key creation cannot fail
    /// afterwards.
    pub fn new(defaults: LimiterConfig) -> ApiResult<Self> {
        defaults.validate()?;
        Ok(Self {
            buckets: RwLock::new(HashMap::new()),
            defaults,
        })
    }

    /// Returns the bucket for `key`, creating it from the defaults on
    /// first use.
    pub fn limiter_for(&self, key: &str) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.read().unwrap().get(key) {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().unwrap();
        // A racing caller may have created it between the two locks.
        if let Some(bucket) = buckets.get(key) {
            return Arc::clone(bucket);
        }

        tracing::debug!(key, "creating endpoint limiter");
        let bucket = Arc::new(TokenBucket::from_config(self.named_defaults(key)));
        buckets.insert(key.to_string(), Arc::clone(&bucket));
        bucket
    }

    /// Atomically replaces the bucket for `key` with one built from the
    /// given parameters.
    ///
    /// In-flight acquisitions against the previous bucket complete under
    /// its parameters; subsequent [`limiter_for`](Self::limiter_for) calls
    /// return the replacement.
    pub fn update(
        &self,
        key: &str,
        rate: u32,
        period: Duration,
        max_tokens: Option<u32>,
    ) -> ApiResult<Arc<TokenBucket>> {
        let mut builder = LimiterConfig::builder()
            .rate(rate)
            .period(period)
            .name(self.bucket_name(key));
        if let Some(max) = max_tokens {
            builder = builder.max_tokens(max);
        }
        let bucket = Arc::new(builder.build()?);

        tracing::info!(key, rate, "endpoint limiter reconfigured");
        self.buckets
            .write()
            .unwrap()
            .insert(key.to_string(), Arc::clone(&bucket));
        Ok(bucket)
    }

    /// Acquires `cost` tokens from the keyed bucket, then runs `f`.
    pub async fn execute<F, Fut, T>(&self, key: &str, cost: u32, f: F) -> ApiResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let bucket = self.limiter_for(key);
        bucket.execute(cost, f).await
    }

    /// Number of keys with a live bucket.
    pub fn len(&self) -> usize {
        self.buckets.read().unwrap().len()
    }

    /// Whether no bucket has been created yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.read().unwrap().is_empty()
    }

    fn bucket_name(&self, key: &str) -> String {
        format!("{}:{key}", self.defaults.name)
    }

    fn named_defaults(&self, key: &str) -> LimiterConfig {
        let mut config = self.defaults.clone();
        config.name = self.bucket_name(key);
        config
    }
}

//! Timing behavior of the token bucket under a virtual clock.

use sluice_limiter::LimiterConfig;
use std::time::Duration;
use tokio::time::Instant;

fn bucket(rate: u32, max: Option<u32>) -> sluice_limiter::TokenBucket {
    let mut builder = LimiterConfig::builder()
        .rate(rate)
        .period(Duration::from_secs(1))
        .name("pacing");
    if let Some(max) = max {
        builder = builder.max_tokens(max);
    }
    builder.build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn sufficient_tokens_complete_without_sleeping() {
    let bucket = bucket(5, None);
    tokio::time::advance(Duration::from_secs(1)).await;

    let start = Instant::now();
    let out = bucket.execute(3, || async { "fast" }).await.unwrap();
    assert_eq!(out, "fast");
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn empty_bucket_waits_proportionally_to_cost() {
    let bucket = bucket(4, None);

    // Two tokens at 4/s refill in half a second.
    let start = Instant::now();
    bucket.acquire(2).await.unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(490) && elapsed <= Duration::from_millis(600),
        "elapsed {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn sustained_submissions_are_smoothed_to_the_rate() {
    let bucket = bucket(2, None);

    let start = Instant::now();
    let mut outputs = Vec::new();
    for i in 0..5u32 {
        let out = bucket.execute(1, || async move { 2 * i }).await.unwrap();
        outputs.push(out);
    }

    // Five tokens earned at 2/s from an empty bucket.
    assert!(start.elapsed() >= Duration::from_millis(2000), "elapsed {:?}", start.elapsed());
    assert_eq!(outputs, vec![0, 2, 4, 6, 8]);
}

#[tokio::test(start_paused = true)]
async fn burst_capacity_above_rate_is_honored() {
    let bucket = bucket(2, Some(6));

    // Three idle periods accumulate the full burst allowance.
    tokio::time::advance(Duration::from_secs(3)).await;

    let start = Instant::now();
    for _ in 0..6 {
        bucket.acquire(1).await.unwrap();
    }
    assert_eq!(start.elapsed(), Duration::ZERO);

    bucket.acquire(1).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(490));
}

#[tokio::test(start_paused = true)]
async fn concurrent_waiters_all_complete() {
    let bucket = std::sync::Arc::new(bucket(2, None));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..4 {
        let bucket = std::sync::Arc::clone(&bucket);
        handles.push(tokio::spawn(async move { bucket.acquire(1).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Four tokens at 2/s from an empty bucket.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1900), "elapsed {elapsed:?}");
    let tokens = bucket.tokens();
    assert!((0.0..=2.0).contains(&tokens));
}

#[tokio::test(start_paused = true)]
async fn rate_update_takes_effect_for_future_refills() {
    let bucket = bucket(1, None);
    bucket.set_rate(10.0).unwrap();

    let start = Instant::now();
    bucket.acquire(1).await.unwrap();
    assert!(start.elapsed() <= Duration::from_millis(150), "elapsed {:?}", start.elapsed());
}

//! Device cache expiration and identity merging

use mesh_discovery::discovery::{
    DeviceCache, DeviceCacheConfig, DeviceRecord, ManualClock, UpsertOutcome,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::eventually;

fn cache_on(clock: Arc<ManualClock>, sweep_interval: Duration) -> DeviceCache {
    DeviceCache::with_clock(
        DeviceCacheConfig {
            default_max_age: Duration::from_secs(30),
            sweep_interval,
        },
        clock,
    )
}

fn sighting(usn: &str, max_age: u64) -> DeviceRecord {
    DeviceRecord::new(usn, "urn:test:device:sensor:1", "http://192.168.1.50/d.xml")
        .with_max_age(max_age)
}

#[rstest]
#[case(10, 9, true)]
#[case(10, 10, false)]
#[case(10, 11, false)]
#[case(0, 29, true)]
#[case(0, 30, false)]
#[tokio::test]
async fn test_record_lives_until_max_age(
    #[case] max_age: u64,
    #[case] elapsed: u64,
    #[case] alive: bool,
) {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_on(clock.clone(), Duration::from_secs(60));
    cache.upsert(sighting("uuid:s1::x", max_age)).await.unwrap();

    clock.advance(Duration::from_secs(elapsed));
    assert_eq!(cache.lookup("uuid:s1").await.is_some(), alive);
}

#[tokio::test]
async fn test_refresh_extends_the_window() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_on(clock.clone(), Duration::from_secs(60));

    cache.upsert(sighting("uuid:s2::x", 10)).await.unwrap();
    clock.advance(Duration::from_secs(8));
    assert_eq!(
        cache.upsert(sighting("uuid:s2::y", 10)).await.unwrap(),
        UpsertOutcome::Refreshed
    );

    clock.advance(Duration::from_secs(8));
    assert!(cache.lookup("uuid:s2::x").await.is_some());
    assert!(cache.sweep_expired().await.is_empty());
}

#[tokio::test]
async fn test_stale_record_is_revived_not_duplicated() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_on(clock.clone(), Duration::from_secs(60));

    cache.upsert(sighting("uuid:s3::x", 5)).await.unwrap();
    clock.advance(Duration::from_secs(6));
    assert!(cache.lookup("uuid:s3").await.is_none());

    assert_eq!(
        cache.upsert(sighting("uuid:s3::x", 5)).await.unwrap(),
        UpsertOutcome::Revived
    );
    assert_eq!(cache.len().await, 1);
    assert!(cache.lookup("uuid:s3").await.is_some());
}

#[tokio::test]
async fn test_background_sweep_notifies_before_removal() {
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(cache_on(clock.clone(), Duration::from_millis(10)));
    let expired = Arc::new(Mutex::new(Vec::new()));
    let sink = expired.clone();
    cache.on_expired("test", move |record| sink.lock().push(record.usn.clone()));

    cache.upsert(sighting("uuid:short::x", 2)).await.unwrap();
    cache.upsert(sighting("uuid:long::x", 600)).await.unwrap();
    cache.start();
    assert!(cache.is_running());

    clock.advance(Duration::from_secs(3));
    assert!(eventually(|| expired.lock().len() == 1).await);
    assert_eq!(*expired.lock(), vec!["uuid:short::x".to_string()]);

    cache.stop();
    assert!(!cache.is_running());
    let stats = cache.stats().await;
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.total_entries, 1);
}

#[tokio::test]
async fn test_oversized_max_age_keeps_sweep_alive() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_on(clock.clone(), Duration::from_millis(10));
    let expired = Arc::new(Mutex::new(0usize));
    let sink = expired.clone();
    cache.on_expired("test", move |_| *sink.lock() += 1);

    cache.upsert(sighting("uuid:forever::x", u64::MAX)).await.unwrap();
    cache.upsert(sighting("uuid:huge::x", 10_000_000_000_000_000)).await.unwrap();
    cache.upsert(sighting("uuid:brief::x", 1)).await.unwrap();
    cache.start();

    clock.advance(Duration::from_secs(2));
    assert!(eventually(|| *expired.lock() == 1).await);
    assert!(cache.is_running());
    assert!(cache.lookup("uuid:forever").await.is_some());
    assert!(cache.lookup("uuid:huge").await.is_some());
    assert_eq!(cache.len().await, 2);
    cache.stop();
}

#[tokio::test]
async fn test_explicit_removal_does_not_notify() {
    let clock = Arc::new(ManualClock::new());
    let cache = cache_on(clock, Duration::from_secs(60));
    let notified = Arc::new(Mutex::new(0usize));
    let sink = notified.clone();
    cache.on_expired("test", move |_| *sink.lock() += 1);

    cache.upsert(sighting("uuid:gone::x", 10)).await.unwrap();
    assert!(cache.remove("uuid:gone::other").await.is_some());
    assert!(cache.remove("uuid:gone").await.is_none());
    assert_eq!(*notified.lock(), 0);
}

#[tokio::test]
async fn test_invalid_sightings_are_counted() {
    let cache = DeviceCache::new(DeviceCacheConfig::default());
    assert!(cache.upsert(DeviceRecord::new("", "st", "http://a/")).await.is_err());
    assert!(cache.upsert(DeviceRecord::new("uuid:z", "st", "")).await.is_err());
    assert_eq!(cache.stats().await.rejected, 2);
    assert!(cache.is_empty().await);
}

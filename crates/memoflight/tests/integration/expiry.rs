use std::time::Duration;

use memoflight::{CacheConfig, Ttl};

use crate::{CallLog, invocation_counter, setup};

#[tokio::test(start_paused = true)]
async fn test_result_expires_after_ttl() {
    setup();

    let log = CallLog::new();
    let memo = invocation_counter(&log, Duration::ZERO, Ttl::from_millis(1000));

    assert_eq!(memo.call(()).await, Ok(1));

    tokio::time::sleep(Duration::from_millis(990)).await;
    assert_eq!(memo.call(()).await, Ok(1));
    assert_eq!(log.count(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(memo.is_empty());
    assert_eq!(memo.call(()).await, Ok(2));
    assert_eq!(log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ttl_starts_at_success() {
    setup();

    let log = CallLog::new();
    let memo = invocation_counter(&log, Duration::from_millis(50), Ttl::from_millis(100));

    // settles after 50ms, and is reusable until 150ms
    assert_eq!(memo.call(()).await, Ok(1));

    tokio::time::sleep(Duration::from_millis(90)).await;
    assert_eq!(memo.call(()).await, Ok(1));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(memo.call(()).await, Ok(2));
    assert_eq!(log.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_positive_ttl_caches_forever() {
    setup();

    let ttls = [
        Ttl::FOREVER,
        Ttl::from(0u64),
        Ttl::from(-250i64),
        Ttl::from(f64::NAN),
        Ttl::from(Duration::ZERO),
    ];

    for ttl in ttls {
        let log = CallLog::new();
        let memo = invocation_counter(&log, Duration::ZERO, ttl);
        assert!(memo.ttl().is_forever());

        assert_eq!(memo.call(()).await, Ok(1));
        tokio::time::sleep(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(memo.call(()).await, Ok(1));
        assert_eq!(log.count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_timer_keeps_newer_entry() {
    setup();

    let log = CallLog::new();
    let memo = invocation_counter(&log, Duration::ZERO, Ttl::from_millis(1000));

    assert_eq!(memo.call(()).await, Ok(1));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(memo.invalidate(()));
    assert_eq!(memo.call(()).await, Ok(2));

    // the first entry's timer would have fired by now
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(memo.call(()).await, Ok(2));

    // the second entry expires 1000ms after it was computed
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(memo.call(()).await, Ok(3));
    assert_eq!(log.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_clear_drops_cached_results() {
    setup();

    let log = CallLog::new();
    let memo = invocation_counter(&log, Duration::ZERO, Ttl::from_millis(1000));

    assert_eq!(memo.call(()).await, Ok(1));
    memo.clear();
    assert!(memo.is_empty());
    assert_eq!(memo.call(()).await, Ok(2));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(memo.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ttl_from_config() {
    setup();

    let config: CacheConfig = serde_yaml::from_str("name: counter\nttl: 200ms").unwrap();

    let log = CallLog::new();
    let memo = {
        let log = log.clone();
        memoflight::wrap_with_config(
            move |(): ()| {
                log.record(());
                async { Ok::<_, String>(()) }
            },
            config,
        )
    };
    assert_eq!(memo.name(), "counter");

    memo.call(()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    memo.call(()).await.unwrap();
    assert_eq!(log.count(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    memo.call(()).await.unwrap();
    assert_eq!(log.count(), 2);
}

#[test]
fn test_result_expires_after_runtime_shutdown() {
    setup();

    let runtime = || {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    };

    let log = CallLog::new();
    let memo = invocation_counter(&log, Duration::ZERO, Ttl::from_millis(50));

    // the expiry timer dies with this runtime, before it ever fires
    assert_eq!(runtime().block_on(memo.call(())), Ok(1));
    std::thread::sleep(Duration::from_millis(200));

    assert!(memo.is_empty());
    assert_eq!(runtime().block_on(memo.call(())), Ok(2));
    assert_eq!(log.count(), 2);
}

use std::time::Duration;

use memoflight::{Memoized, Ttl};

pub use memoflight_test::{CallLog, Gate, setup};

/// Creates a memoized function that doubles its argument, once `gate` is open.
///
/// Every invocation of the underlying producer is recorded in `log`.
pub fn gated_doubler(
    log: &CallLog<u32>,
    gate: &Gate,
    ttl: Ttl,
) -> Memoized<(u32,), u32, String> {
    let log = log.clone();
    let gate = gate.clone();
    memoflight::wrap(
        move |(n,): (u32,)| {
            log.record(n);
            let gate = gate.clone();
            async move {
                gate.wait().await;
                Ok(n * 2)
            }
        },
        ttl,
    )
}

/// Creates a memoized function without arguments that resolves to the number of times its
/// producer was invoked so far, after `delay`.
pub fn invocation_counter(
    log: &CallLog<()>,
    delay: Duration,
    ttl: Ttl,
) -> Memoized<(), usize, String> {
    let log = log.clone();
    memoflight::wrap(
        move |(): ()| {
            log.record(());
            let invocation = log.count();
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(invocation)
            }
        },
        ttl,
    )
}

/// Lets all tasks that are ready on the current-thread runtime make progress.
pub async fn settle_tasks() {
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }
}

use memoflight::Ttl;

use crate::{CallLog, setup};

fn echo(log: &CallLog<Vec<String>>) -> memoflight::Memoized<Vec<String>, String, String> {
    let log = log.clone();
    memoflight::wrap(
        move |args: Vec<String>| {
            log.record(args.clone());
            async move { Ok(format!("{args:?}")) }
        },
        Ttl::FOREVER,
    )
}

#[tokio::test]
async fn test_zero_arguments_are_isolated() {
    setup();

    let log = CallLog::new();
    let memo = echo(&log);

    assert_eq!(memo.call(vec![]).await.as_deref(), Ok("[]"));
    assert_eq!(memo.call(vec![String::new()]).await.as_deref(), Ok("[\"\"]"));
    assert_eq!(memo.call(vec![]).await.as_deref(), Ok("[]"));
    assert_eq!(memo.call(vec![String::new()]).await.as_deref(), Ok("[\"\"]"));

    assert_eq!(log.count(), 2);
    assert_eq!(memo.len(), 2);
}

#[tokio::test]
async fn test_equal_renderings_share_results() {
    setup();

    let log = CallLog::new();
    let memo = echo(&log);

    let joined = vec!["1,2".to_owned()];
    let split = vec!["1".to_owned(), "2".to_owned()];

    assert_eq!(memo.call(joined.clone()).await.as_deref(), Ok("[\"1,2\"]"));
    // canonicalizes to the same key as above, and is served from the cache
    assert_eq!(memo.call(split).await.as_deref(), Ok("[\"1,2\"]"));
    assert_eq!(log.events(), vec![joined]);
}

#[tokio::test]
async fn test_unit_arguments() {
    setup();

    let log = CallLog::new();
    let memo = {
        let log = log.clone();
        memoflight::wrap(
            move |(): ()| {
                log.record(());
                async { Ok::<_, String>("config") }
            },
            Ttl::FOREVER,
        )
    };

    let (first, second) = futures::join!(memo.call(()), memo.call(()));
    assert_eq!(first, Ok("config"));
    assert_eq!(second, Ok("config"));
    assert_eq!(log.count(), 1);
}

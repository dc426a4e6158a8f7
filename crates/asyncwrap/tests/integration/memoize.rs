use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use asyncwrap::{MemoizeError, Memoizer, memoize, settle_all, transform_errors};
use asyncwrap_test::{delayed, setup};
use futures::future;

#[derive(Clone, Debug, PartialEq)]
enum LookupError {
    NotFound(String),
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dedup_across_threads() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let memo = Memoizer::new({
        let calls = Arc::clone(&calls);
        move |key: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, String>(delayed(50, key.len()).await) }
        }
    });

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let memo = memo.clone();
            let key = if i % 2 == 0 { "even" } else { "odd!" };
            tokio::spawn(async move { memo.call(key.to_owned()).await })
        })
        .collect();

    for task in future::join_all(tasks).await {
        assert_eq!(task.unwrap(), Ok(4));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(memo.len(), 2);
    assert_eq!(memo.in_flight(), 0);
}

#[tokio::test]
async fn test_ttl_with_real_time() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let memo = memoize(
        {
            let calls = Arc::clone(&calls);
            move |_: ()| future::ready(Ok::<_, ()>(calls.fetch_add(1, Ordering::SeqCst)))
        },
        |_: &()| (),
        Some(Duration::from_millis(50)),
    );

    assert_eq!(memo.call(()).await, Ok(0));
    assert_eq!(memo.call(()).await, Ok(0));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(memo.call(()).await, Ok(1));
}

#[tokio::test]
async fn test_memoized_lookups_settle() {
    setup();

    let calls = Arc::new(AtomicUsize::new(0));
    let lookup = {
        let calls = Arc::clone(&calls);
        move |id: u32| {
            calls.fetch_add(1, Ordering::SeqCst);
            future::ready(match id {
                0 => Err(format!("user {id}")),
                id => Ok(id * 10),
            })
        }
    };
    let lookup = transform_errors(lookup, LookupError::NotFound);
    let memo = Memoizer::new(lookup);

    let settled = settle_all([3, 0, 1, 3].map(|id| memo.call(id))).await;
    assert_eq!(settled.results, vec![30, 10, 30]);
    assert_eq!(
        settled.errors,
        vec![MemoizeError::Failed(LookupError::NotFound("user 0".into()))]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // the failed lookup is retried, the others are memoized
    let settled = settle_all([0, 1, 3].map(|id| memo.call(id))).await;
    assert_eq!(settled.results, vec![10, 30]);
    assert_eq!(settled.errors.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

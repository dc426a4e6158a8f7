use asyncwrap::{Settled, settle_all, settle_all_with, try_settle_all_with};
use asyncwrap_test::{delayed, setup};
use futures::future;

async fn failing_task() -> &'static str {
    delayed(10, ()).await;
    panic!("task failed");
}

#[tokio::test]
async fn test_settle_spawned_tasks() {
    setup();

    let tasks = vec![
        tokio::spawn(delayed(30, "first")),
        tokio::spawn(failing_task()),
        tokio::spawn(delayed(20, "third")),
    ];

    let settled =
        settle_all_with(tasks, |err, index| future::ready((index, err.is_panic()))).await;

    assert_eq!(settled.results, vec!["first", "third"]);
    assert_eq!(settled.errors, vec![(1, true)]);
}

#[tokio::test]
async fn test_settle_async_error_transform() {
    setup();

    let futures = vec![
        delayed(20, Err::<u32, _>("timeout")),
        delayed(5, Ok(2)),
        delayed(10, Err("refused")),
        delayed(1, Ok(4)),
    ];

    let settled = settle_all_with(futures, |err, index| async move {
        delayed(5, format!("#{index}: {err}")).await
    })
    .await;

    assert_eq!(
        settled,
        Settled {
            results: vec![2, 4],
            errors: vec!["#0: timeout".to_owned(), "#2: refused".to_owned()],
        }
    );
}

#[tokio::test]
async fn test_settle_all_successful() {
    let settled = settle_all((1..=3).map(|i| delayed(i, Ok::<_, ()>(i)))).await;

    assert_eq!(settled.results, vec![1, 2, 3]);
    assert!(settled.errors.is_empty());
}

#[tokio::test]
async fn test_failing_transform_propagates() {
    let futures = vec![delayed(1, Err::<(), _>("a")), delayed(2, Err("b"))];

    let result = try_settle_all_with(futures, |err, _index| async move {
        Err::<(), _>(format!("could not handle {err}"))
    })
    .await;

    assert_eq!(result, Err("could not handle a".to_owned()));
}

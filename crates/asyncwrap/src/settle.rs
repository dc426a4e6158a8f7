use std::future::Future;

use futures::future;
use serde::Serialize;

/// The outcomes of [`settle_all`], split by success.
///
/// Both vectors keep the relative order of the futures they came from, and together they contain
/// exactly one entry per input future.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Settled<T, V> {
    /// The values of the futures that succeeded.
    pub results: Vec<T>,
    /// The transformed errors of the futures that failed.
    pub errors: Vec<V>,
}

impl<T, V> Default for Settled<T, V> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

enum Outcome<T, V> {
    Fulfilled(T),
    Rejected(V),
}

impl<T, V> Settled<T, V> {
    fn from_outcomes(outcomes: Vec<Outcome<T, V>>) -> Self {
        let mut settled = Self::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Fulfilled(value) => settled.results.push(value),
                Outcome::Rejected(err) => settled.errors.push(err),
            }
        }
        tracing::trace!(
            results = settled.results.len(),
            errors = settled.errors.len(),
            "Settled all futures"
        );
        settled
    }
}

/// Awaits all `futures` concurrently and collects their values and errors.
///
/// Unlike [`try_join_all`](futures::future::try_join_all), this does not stop at the first error.
/// Errors are collected unchanged; see [`settle_all_with`] to transform them.
pub async fn settle_all<I, F, T, E>(futures: I) -> Settled<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    settle_all_with(futures, |err, _index| future::ready(err)).await
}

/// Awaits all `futures` concurrently, passing every error through `err_fn`.
///
/// `err_fn` receives the error and the index of the failed future. It runs as soon as that
/// future fails, concurrently with the futures that are still pending. Synchronous transforms
/// can return [`future::ready`].
pub async fn settle_all_with<I, F, T, E, V, R, EF>(futures: I, err_fn: EF) -> Settled<T, V>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
    EF: Fn(E, usize) -> R,
    R: Future<Output = V>,
{
    let err_fn = &err_fn;
    let outcomes = future::join_all(futures.into_iter().enumerate().map(
        |(index, fut)| async move {
            match fut.await {
                Ok(value) => Outcome::Fulfilled(value),
                Err(err) => Outcome::Rejected(err_fn(err, index).await),
            }
        },
    ))
    .await;

    Settled::from_outcomes(outcomes)
}

/// Like [`settle_all_with`], but with an error transform that can fail itself.
///
/// The first failure of `err_fn` is returned as the error of the whole call, and the remaining
/// futures are dropped.
pub async fn try_settle_all_with<I, F, T, E, V, X, R, EF>(
    futures: I,
    err_fn: EF,
) -> Result<Settled<T, V>, X>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
    EF: Fn(E, usize) -> R,
    R: Future<Output = Result<V, X>>,
{
    let err_fn = &err_fn;
    let outcomes = future::try_join_all(futures.into_iter().enumerate().map(
        |(index, fut)| async move {
            match fut.await {
                Ok(value) => Ok(Outcome::Fulfilled(value)),
                Err(err) => err_fn(err, index).await.map(Outcome::Rejected),
            }
        },
    ))
    .await?;

    Ok(Settled::from_outcomes(outcomes))
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use tokio::time::{self, Duration, Instant};

    use super::*;

    type TestResult = Result<u32, &'static str>;

    fn delayed(ms: u64, result: TestResult) -> BoxFuture<'static, TestResult> {
        async move {
            time::sleep(Duration::from_millis(ms)).await;
            result
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_input_order() {
        // settle in reverse order
        let futures = vec![
            delayed(40, Ok(1)),
            delayed(30, Err("A")),
            delayed(20, Ok(2)),
            delayed(10, Err("B")),
        ];

        let settled =
            settle_all_with(futures, |err, index| future::ready(format!("{err}@{index}"))).await;

        assert_eq!(settled.results, vec![1, 2]);
        assert_eq!(settled.errors, vec!["A@1", "B@3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_keeps_errors() {
        let futures = vec![delayed(5, Err("A")), delayed(1, Ok(1)), delayed(3, Err("B"))];

        let settled = settle_all(futures).await;

        assert_eq!(
            settled,
            Settled {
                results: vec![1],
                errors: vec!["A", "B"],
            }
        );
    }

    #[tokio::test]
    async fn test_empty_input() {
        let settled = settle_all(Vec::<future::Ready<Result<u32, ()>>>::new()).await;
        assert_eq!(settled, Settled::default());

        let missing: Option<Vec<future::Ready<Result<u32, ()>>>> = None;
        let settled = settle_all(missing.into_iter().flatten()).await;
        assert!(settled.results.is_empty());
        assert!(settled.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_concurrently() {
        let start = Instant::now();
        let futures = (0..4).map(|i| delayed(10, if i % 2 == 0 { Ok(i) } else { Err("odd") }));

        let settled = settle_all_with(futures, |err, index| async move {
            time::sleep(Duration::from_millis(10)).await;
            (err, index)
        })
        .await;

        assert_eq!(settled.results, vec![0, 2]);
        assert_eq!(settled.errors, vec![("odd", 1), ("odd", 3)]);
        assert!(start.elapsed() < Duration::from_millis(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_error_transform() {
        let futures = vec![delayed(1, Ok(1)), delayed(2, Err("A")), delayed(3, Err("B"))];

        let result = try_settle_all_with(futures, |err, index| {
            future::ready(if err == "B" {
                Err(format!("cannot handle {err} at {index}"))
            } else {
                Ok(err.to_lowercase())
            })
        })
        .await;

        assert_eq!(result, Err("cannot handle B at 2".to_owned()));
    }

    #[tokio::test]
    async fn test_infallible_error_transform() {
        let futures = vec![future::ready(Err::<u32, _>(404)), future::ready(Ok(7))];

        let result = try_settle_all_with(futures, |status, _index| {
            future::ready(Ok::<_, String>(format!("status {status}")))
        })
        .await;

        let settled = result.unwrap();
        assert_eq!(settled.results, vec![7]);
        assert_eq!(settled.errors, vec!["status 404"]);
    }
}

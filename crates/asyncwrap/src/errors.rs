use futures::TryFuture;
use futures::future::{MapErr, TryFutureExt};

/// Wraps the async function `f` so that its errors are passed through `error_handler`.
///
/// Successful results are returned unchanged. This is useful to turn low-level errors into a
/// domain error type, or to attach context to them.
pub fn transform_errors<A, F, Fut, H, E2>(f: F, error_handler: H) -> impl Fn(A) -> MapErr<Fut, H>
where
    F: Fn(A) -> Fut,
    Fut: TryFuture,
    H: FnOnce(Fut::Error) -> E2 + Clone,
{
    move |arg| f(arg).map_err(error_handler.clone())
}

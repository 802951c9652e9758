// Fail-open execution.
//
// The single place where infrastructure failures turn into permissive
// defaults. Any error or panic from the wrapped operation is logged under
// the caller's label and replaced with the fallback. No retries.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use futures::FutureExt;
use tracing::warn;

/// Await `operation`, returning `fallback` if it errors or panics.
pub async fn run<T, F>(label: &str, fallback: T, operation: F) -> T
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(label = label, error = %format!("{err:#}"), "Operation failed, failing open");
            fallback
        }
        Err(panic) => {
            warn!(
                label = label,
                panic = panic_message(panic.as_ref()),
                "Operation panicked, failing open"
            );
            fallback
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

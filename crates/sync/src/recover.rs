//! The two places where errors stop travelling upwards.
//!
//! Background work has nobody to report to: the failure is logged and the
//! work ends quietly. Everything else in this crate surfaces its errors.

use async_stream::stream;
use futures::Stream;
use std::fmt::Debug;

/// Pass values through until the first error, then emit `default` once and
/// end the stream.
pub fn recover_with<S, T, E>(stream: S, default: T) -> impl Stream<Item = T>
where
    S: Stream<Item = Result<T, E>>,
    E: Debug,
{
    stream! {
        for await item in stream {
            match item {
                Ok(value) => yield value,
                Err(err) => {
                    tracing::warn!(error = ?err, "stream failed, ending with default value");
                    yield default;
                    return;
                },
            }
        }
    }
}

/// Run `future` to completion, logging instead of returning its error.
pub async fn log_and_complete<T, E>(future: impl Future<Output = Result<T, E>>, what: &str) -> Option<T>
where
    E: Debug,
{
    match future.await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::error!(error = ?err, "{what} failed");
            None
        },
    }
}

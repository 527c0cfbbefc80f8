//! Fault translation at the transport boundary
//!
//! Every call that crosses the [`Transport`](crate::traits::Transport)
//! boundary goes through [`call`], which applies the caller's deadline and
//! maps the raw [`RpcStatus`] into the client taxonomy with [`translate`].
//! Call sites never inspect status codes themselves.
//!
//! | Status code | Client error |
//! |-------------|--------------|
//! | `Aborted` | `Conflict` |
//! | `Unavailable` | `Unavailable` |
//! | `DeadlineExceeded`, `Cancelled` | `Transport` |
//! | `Internal`, `Unknown`, `InvalidArgument`, `FailedPrecondition` | `Cluster` |

use crate::error::{Error, Result, RpcStatus, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Map a transport fault onto the client taxonomy
///
/// The original status is kept as the error source.
pub fn translate(status: RpcStatus) -> Error {
    match status.code {
        StatusCode::Aborted => Error::Conflict {
            reason: status.message.clone(),
            source: Some(status),
        },
        StatusCode::Unavailable => Error::Unavailable { source: status },
        StatusCode::DeadlineExceeded | StatusCode::Cancelled => Error::Transport { source: status },
        StatusCode::Internal
        | StatusCode::Unknown
        | StatusCode::InvalidArgument
        | StatusCode::FailedPrecondition => Error::Cluster {
            message: status.message.clone(),
            source: Some(status),
        },
    }
}

/// Await a transport future under an optional deadline
///
/// An elapsed deadline surfaces as a `DeadlineExceeded` status so it flows
/// through [`translate`] like any other fault.
pub async fn with_deadline<F, T>(
    operation: &'static str,
    deadline: Option<Duration>,
    fut: F,
) -> std::result::Result<T, RpcStatus>
where
    F: Future<Output = std::result::Result<T, RpcStatus>>,
{
    match deadline {
        None => fut.await,
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(RpcStatus::deadline_exceeded(format!(
                "{} did not complete within {}ms",
                operation,
                limit.as_millis()
            ))),
        },
    }
}

/// Run one boundary call: deadline, then translation
pub async fn call<F, T>(operation: &'static str, deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, RpcStatus>>,
{
    with_deadline(operation, deadline, fut).await.map_err(|status| {
        debug!(
            target: "lattice::txn",
            operation,
            code = %status.code,
            message = %status.message,
            "Transport fault translated"
        );
        translate(status)
    })
}

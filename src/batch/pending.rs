//! Pending batch requests and the caller-side handle.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use super::error::BatchError;

/// How a request ended, as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    Resolved,
    Rejected,
    /// The outcome was produced but the caller had dropped its handle.
    Unobserved,
}

/// A registered request waiting for the next flush.
///
/// The fetch and its result channel are sealed into one closure, so
/// requests of different value and error types share a group list. The
/// fetch does not start until the executor calls [`PendingRequest::execute`].
pub(crate) struct PendingRequest {
    request_key: String,
    run: Box<dyn FnOnce() -> BoxFuture<'static, Settled> + Send>,
}

impl PendingRequest {
    pub(crate) fn new<T, E, F, Fut>(
        request_key: impl Into<String>,
        fetch: F,
    ) -> (Self, oneshot::Receiver<Result<T, E>>)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let run = Box::new(move || {
            async move {
                let outcome = fetch().await;
                let settled = if outcome.is_ok() {
                    Settled::Resolved
                } else {
                    Settled::Rejected
                };
                // The sender is consumed here, so a caller is settled at most once.
                match sender.send(outcome) {
                    Ok(()) => settled,
                    Err(_) => Settled::Unobserved,
                }
            }
            .boxed()
        });

        let request = Self {
            request_key: request_key.into(),
            run,
        };
        (request, receiver)
    }

    pub(crate) fn request_key(&self) -> &str {
        &self.request_key
    }

    /// Start the fetch. The returned future delivers the outcome to the
    /// caller when it completes.
    pub(crate) fn execute(self) -> BoxFuture<'static, Settled> {
        (self.run)()
    }
}

/// Future returned by `batch_query`; resolves once the request's fetch has
/// settled in a flush.
#[must_use = "batched results are only observable through the returned handle"]
pub struct BatchHandle<T, E> {
    state: HandleState<T, E>,
}

enum HandleState<T, E> {
    Waiting {
        receiver: oneshot::Receiver<Result<T, E>>,
        group_id: String,
        request_key: String,
    },
    Unscheduled,
}

impl<T, E> BatchHandle<T, E> {
    pub(crate) fn waiting(
        receiver: oneshot::Receiver<Result<T, E>>,
        group_id: &str,
        request_key: &str,
    ) -> Self {
        Self {
            state: HandleState::Waiting {
                receiver,
                group_id: group_id.to_string(),
                request_key: request_key.to_string(),
            },
        }
    }

    pub(crate) fn unscheduled() -> Self {
        Self {
            state: HandleState::Unscheduled,
        }
    }
}

impl<T, E> Future for BatchHandle<T, E> {
    type Output = Result<T, BatchError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Waiting {
                receiver,
                group_id,
                request_key,
            } => match Pin::new(receiver).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
                Poll::Ready(Ok(Err(error))) => Poll::Ready(Err(BatchError::Fetch(error))),
                Poll::Ready(Err(_closed)) => Poll::Ready(Err(BatchError::Abandoned {
                    group_id: group_id.clone(),
                    request_key: request_key.clone(),
                })),
            },
            HandleState::Unscheduled => Poll::Ready(Err(BatchError::NoRuntime)),
        }
    }
}

use thiserror::Error;

/// Failure delivered to a single batched request.
#[derive(Debug, Error)]
pub enum BatchError<E> {
    /// The request's own fetch failed.
    #[error("{0}")]
    Fetch(E),
    /// The request was dropped before an outcome was delivered: its fetch
    /// panicked, or the runtime shut down mid-flush.
    #[error("batch request `{request_key}` in group `{group_id}` was abandoned before it settled")]
    Abandoned {
        group_id: String,
        request_key: String,
    },
    /// `batch_query` was called outside a tokio runtime, so no flush could
    /// be scheduled.
    #[error("batch_query requires a running tokio runtime")]
    NoRuntime,
}

impl<E> BatchError<E> {
    pub fn is_fetch(&self) -> bool {
        matches!(self, BatchError::Fetch(_))
    }

    /// The fetch error, if that is what this is.
    pub fn into_fetch(self) -> Option<E> {
        match self {
            BatchError::Fetch(error) => Some(error),
            _ => None,
        }
    }
}

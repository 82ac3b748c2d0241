use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// completion returns a connected sink/future pair for one asynchronous result.
pub(crate) fn completion<T>() -> (CompletionSink<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSink { tx }, Completion { rx })
}

/// CompletionSink delivers exactly one outcome to its [`Completion`].
/// Consuming methods make a second delivery impossible. Dropping the sink
/// without delivering resolves the completion with `ErrConnectionClosed`.
pub(crate) struct CompletionSink<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> CompletionSink<T> {
    pub(crate) fn success(self, value: T) {
        self.resolve(Ok(value));
    }

    pub(crate) fn failure(self, err: Error) {
        self.resolve(Err(err));
    }

    pub(crate) fn resolve(self, result: Result<T>) {
        if self.tx.send(result).is_err() {
            log::trace!("completion dropped before it was resolved");
        }
    }
}

impl<T> fmt::Debug for CompletionSink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink").finish_non_exhaustive()
    }
}

/// Completion is the pending outcome of a negotiation call. The call itself
/// returns immediately; awaiting the completion yields the single success or
/// failure delivered for it.
#[must_use = "a negotiation outcome is only observable by awaiting its Completion"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Completion<T> {
    /// ready returns a completion that is already resolved.
    pub(crate) fn ready(result: Result<T>) -> Self {
        let (sink, completion) = completion();
        sink.resolve(result);
        completion
    }
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(Error::ErrConnectionClosed)))
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}


use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use portable_atomic::AtomicUsize;
use tokio::sync::mpsc;
use waitgroup::WaitGroup;

use crate::error::{Error, Result};

/// Operation is a negotiation step run on the session's queue. Each
/// operation runs at most once.
pub struct Operation(
    pub Box<dyn (FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>) + Send + Sync>,
    pub &'static str,
);

impl Operation {
    pub(crate) fn new(
        op: impl FnMut() -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> + Send + Sync + 'static,
        description: &'static str,
    ) -> Self {
        Self(Box::new(op), description)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Operation")
            .field(&"_")
            .field(&self.1)
            .finish()
    }
}

/// Operations runs enqueued operations one at a time, in FIFO order.
/// Operations still queued when the executor is closed are dropped
/// without being run.
#[derive(Default)]
pub(crate) struct Operations {
    length: Arc<AtomicUsize>,
    ops_tx: Option<mpsc::UnboundedSender<Operation>>,
    close_tx: Option<mpsc::Sender<()>>,
}

impl Operations {
    pub(crate) fn new() -> Self {
        let length = Arc::new(AtomicUsize::new(0));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::channel(1);
        let l = Arc::clone(&length);
        tokio::spawn(async move {
            Operations::start(l, ops_rx, close_rx).await;
        });

        Operations {
            length,
            ops_tx: Some(ops_tx),
            close_tx: Some(close_tx),
        }
    }

    /// enqueue adds a new operation to the end of the queue. It fails with
    /// ErrConnectionClosed once the executor has stopped.
    pub(crate) fn enqueue(&self, op: Operation) -> Result<()> {
        let ops_tx = self.ops_tx.as_ref().ok_or(Error::ErrConnectionClosed)?;
        self.length.fetch_add(1, Ordering::SeqCst);
        if ops_tx.send(op).is_err() {
            self.length.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::ErrConnectionClosed);
        }

        Ok(())
    }

    /// is_empty checks if there are tasks in the queue
    pub(crate) fn is_empty(&self) -> bool {
        self.length.load(Ordering::SeqCst) == 0
    }

    /// done waits until all currently enqueued operations are finished executing.
    pub(crate) async fn done(&self) {
        let wg = WaitGroup::new();
        let mut w = Some(wg.worker());
        let _ = self.enqueue(Operation::new(
            move || {
                let _d = w.take();
                Box::pin(async {})
            },
            "Operation::done",
        ));
        wg.wait().await;
    }

    async fn start(
        length: Arc<AtomicUsize>,
        mut ops_rx: mpsc::UnboundedReceiver<Operation>,
        mut close_rx: mpsc::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = close_rx.recv() => {
                    break;
                }
                result = ops_rx.recv() => {
                    if let Some(mut f) = result {
                        length.fetch_sub(1, Ordering::SeqCst);
                        log::trace!("running operation {}", f.1);
                        f.0().await;
                    } else {
                        break;
                    }
                }
            }
        }

        ops_rx.close();
        let mut dropped = 0usize;
        while let Ok(op) = ops_rx.try_recv() {
            log::trace!("dropping queued operation {}", op.1);
            dropped += 1;
        }
        length.store(0, Ordering::SeqCst);
        if dropped > 0 {
            log::debug!("operations closed with {dropped} queued operation(s) dropped");
        }
    }

    pub(crate) async fn close(&self) -> Result<()> {
        if let Some(close_tx) = &self.close_tx {
            // the executor may already be gone
            let _ = close_tx.send(()).await;
        }
        Ok(())
    }
}

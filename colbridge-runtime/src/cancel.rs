use event_listener::{Event, EventListener};
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug, PartialEq, Eq)]
pub enum Cancellable<T> {
    Ready(T),
    Cancelled,
}

/// Cancellation represents a handle that can cancel pending requests
/// and result streams of the engine.
#[derive(Debug, Clone)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

impl Default for Cancellation {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    #[inline]
    pub fn new() -> Self {
        Cancellation {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Cancel all futures selected with this handle.
    /// Returns false if it was already cancelled.
    #[inline]
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    #[inline]
    pub fn cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    #[inline]
    pub fn select_future<F: Future>(&self, fut: F) -> CancellableFuture<F> {
        let listener = self.inner.event.listen();
        // check flag after registering listener, so a concurrent cancel is never missed.
        let cancelled = self.cancelled();
        CancellableFuture {
            fut,
            listener,
            cancelled,
        }
    }
}

#[derive(Debug)]
struct Inner {
    flag: AtomicBool,
    event: Event,
}

impl Inner {
    #[inline]
    const fn new() -> Self {
        Inner {
            flag: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    #[inline]
    fn cancel(&self) -> bool {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.event.notify(usize::MAX);
            return true;
        }
        false
    }
}

pin_project! {
    pub struct CancellableFuture<F> {
        #[pin]
        fut: F,
        #[pin]
        listener: EventListener,
        cancelled: bool,
    }
}

impl<F: Future> Future for CancellableFuture<F> {
    type Output = Cancellable<F::Output>;
    #[inline]
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if *this.cancelled {
            return Poll::Ready(Cancellable::Cancelled);
        }
        if this.listener.poll(cx).is_ready() {
            *this.cancelled = true;
            return Poll::Ready(Cancellable::Cancelled);
        }
        this.fut.poll(cx).map(Cancellable::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_future() {
        smol::block_on(async {
            let (tx, rx) = flume::bounded::<()>(0);
            let cancel = Cancellation::new();
            {
                let cancel = cancel.clone();
                smol::spawn(async move {
                    smol::Timer::after(Duration::from_millis(5)).await;
                    cancel.cancel();
                })
                .detach();
            }
            let res = cancel.select_future(rx.recv_async()).await;
            assert_eq!(res, Cancellable::Cancelled);
            drop(tx);
        })
    }

    #[test]
    fn test_cancel_before_select() {
        let cancel = Cancellation::new();
        assert!(cancel.cancel());
        assert!(!cancel.cancel());
        let res = smol::block_on(cancel.select_future(async { 1 }));
        assert_eq!(res, Cancellable::Cancelled);
        let ready = smol::block_on(Cancellation::new().select_future(async { 1 }));
        assert_eq!(ready, Cancellable::Ready(1));
    }
}

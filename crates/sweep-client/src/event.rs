//! Multi-consumer notification primitive shared by the RPC peer and the
//! client event stream.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

type Handler<T> = Box<dyn FnMut(&T) -> bool + Send>;

/// Single-producer/multi-consumer notifier.
///
/// Two kinds of consumers are supported: durable handlers registered with
/// [`Event::on`] that stay subscribed for as long as they return `true`, and
/// one-shot awaiters created by [`Event::next`] that receive the next fired
/// value exactly once. [`Event::cancel`] wakes every awaiter with `None` and
/// closes every stream created by [`Event::subscribe`].
pub struct Event<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    handlers: Vec<Handler<T>>,
    awaiters: Vec<oneshot::Sender<T>>,
    cancelled: bool,
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                handlers: Vec::new(),
                awaiters: Vec::new(),
                cancelled: false,
            }),
        }
    }

    /// Register a durable handler.
    ///
    /// The handler is kept subscribed for as long as it returns `true`. A
    /// handler that panics is logged and dropped without affecting delivery
    /// to the remaining consumers.
    pub fn on<F>(&self, handler: F)
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let mut inner = self.inner.lock().expect("event lock poisoned");
        if inner.cancelled {
            return;
        }
        inner.handlers.push(Box::new(handler));
    }

    /// Wait for the next fired value; resolves to `None` once cancelled.
    pub fn next(&self) -> impl Future<Output = Option<T>> + Send
    where
        T: Send,
    {
        let rx = {
            let mut inner = self.inner.lock().expect("event lock poisoned");
            if inner.cancelled {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                inner.awaiters.push(tx);
                Some(rx)
            }
        };
        async move {
            match rx {
                Some(rx) => rx.await.ok(),
                None => None,
            }
        }
    }

    /// Cancel the event: wake every awaiter with `None` and end every
    /// subscriber stream. Registrations made afterwards are inert.
    pub fn cancel(&self) {
        let (handlers, awaiters) = {
            let mut inner = self.inner.lock().expect("event lock poisoned");
            inner.cancelled = true;
            (
                std::mem::take(&mut inner.handlers),
                std::mem::take(&mut inner.awaiters),
            )
        };
        drop(handlers);
        drop(awaiters);
    }
}

impl<T: Clone> Event<T> {
    /// Fire the event, delivering `value` to every durable handler and every
    /// pending awaiter.
    pub fn fire(&self, value: T) {
        let (handlers, awaiters) = {
            let mut inner = self.inner.lock().expect("event lock poisoned");
            (
                std::mem::take(&mut inner.handlers),
                std::mem::take(&mut inner.awaiters),
            )
        };

        // Handlers run outside the lock so they may re-register.
        let mut kept = Vec::with_capacity(handlers.len());
        for mut handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&value))) {
                Ok(true) => kept.push(handler),
                Ok(false) => {}
                Err(_) => warn!("event handler panicked and was dropped"),
            }
        }

        {
            let mut inner = self.inner.lock().expect("event lock poisoned");
            if !inner.cancelled {
                // Handlers registered during the fire keep their relative
                // order after the survivors.
                kept.append(&mut inner.handlers);
                inner.handlers = kept;
            }
        }

        for tx in awaiters {
            let _ = tx.send(value.clone());
        }
    }
}

impl<T: Clone + Send + 'static> Event<T> {
    /// Stream of every value fired after this call.
    ///
    /// The stream ends when the receiver is dropped or the event is
    /// cancelled. Already-cancelled events produce a closed stream.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.on(move |value: &T| tx.send(value.clone()).is_ok());
        rx
    }
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("event lock poisoned");
        f.debug_struct("Event")
            .field("handlers", &inner.handlers.len())
            .field("awaiters", &inner.awaiters.len())
            .field("cancelled", &inner.cancelled)
            .finish()
    }
}

//! One-shot signals shared between threads.
//!
//! Built on `futures::channel::oneshot`. A [`Trigger`] wraps the sending half
//! so any number of holders may race to fire it; only the first value is
//! delivered. Bootstrap waits (peer hello, region known) use a plain
//! receiver. The node's fatal signal is a [`Shared`] receiver so every clone
//! of the node can wait on it or peek at it.

use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

/// Sending half of a one-shot signal
pub struct Trigger<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Trigger<T> {
    /// New trigger and the receiver it resolves
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(sender)),
            },
            receiver,
        )
    }

    /// Fire the signal. Returns `false` (and drops `value`) if it already
    /// fired. A dropped receiver does not make the first fire fail.
    pub fn fire(&self, value: T) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

/// Receiving side of the fatal signal, cloneable
pub type FatalSignal = Shared<oneshot::Receiver<String>>;

/// Trigger for the first fatal worker error and its shared receiver
pub fn fatal_signal() -> (Arc<Trigger<String>>, FatalSignal) {
    let (trigger, receiver) = Trigger::new();
    (Arc::new(trigger), receiver.shared())
}

/// The fatal reason, if the signal already fired
pub fn peek_fatal(signal: &FatalSignal) -> Option<String> {
    match signal.clone().now_or_never() {
        Some(Ok(reason)) => Some(reason),
        _ => None,
    }
}

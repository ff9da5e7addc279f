//! Worker threads and the node's fatal signal.
//!
//! The fault loop and the request server run on named OS threads. Their only
//! way out is an error, which is logged and published on the fatal signal;
//! deciding what to do about it (the daemon exits) is left to the owner.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use futures::channel::oneshot;
use futures::executor::block_on;
use futures::future::{select, Either};

use crate::error::{DsmError, DsmResult};
use crate::signal::{FatalSignal, Trigger};

/// Spawn a named worker whose error is reported to `fatal`
pub fn spawn_worker<F>(
    name: &str,
    fatal: Arc<Trigger<String>>,
    f: F,
) -> DsmResult<JoinHandle<()>>
where
    F: FnOnce() -> DsmResult<()> + Send + 'static,
{
    let thread_name = name.to_string();
    let handle = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            if let Err(e) = f() {
                tracing::error!("{} stopped: {}", thread_name, e);
                fatal.fire(format!("{}: {}", thread_name, e));
            }
        })?;
    Ok(handle)
}

/// Block until `wait` resolves, giving up as soon as a worker has failed
pub fn wait_or_fatal<T>(wait: oneshot::Receiver<T>, fatal: &FatalSignal) -> DsmResult<T> {
    match block_on(select(wait, fatal.clone())) {
        Either::Left((Ok(value), _)) => Ok(value),
        Either::Right((Ok(reason), _)) => Err(DsmError::WorkerFailed(reason)),
        // The context owning the sender went away without firing
        Either::Left((Err(oneshot::Canceled), _)) => Err(DsmError::WorkerFailed(
            "bootstrap signal dropped before it fired".to_string(),
        )),
        Either::Right((Err(oneshot::Canceled), pending)) => match block_on(pending) {
            Ok(value) => Ok(value),
            Err(oneshot::Canceled) => Err(DsmError::WorkerFailed(
                "bootstrap signal dropped before it fired".to_string(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{fatal_signal, peek_fatal};
    use std::time::Duration;

    #[test]
    fn test_worker_error_reaches_fatal_signal() {
        let (trigger, fatal) = fatal_signal();
        let handle = spawn_worker("test-worker", trigger, || {
            Err(DsmError::PeerDisconnected)
        })
        .unwrap();
        handle.join().unwrap();

        let reason = peek_fatal(&fatal).unwrap();
        assert!(reason.starts_with("test-worker"));
        assert!(reason.contains("Peer disconnected"));
    }

    #[test]
    fn test_clean_exit_is_not_fatal() {
        let (trigger, fatal) = fatal_signal();
        spawn_worker("quiet", Arc::clone(&trigger), || Ok(()))
            .unwrap()
            .join()
            .unwrap();
        assert!(!trigger.is_fired());
        assert_eq!(peek_fatal(&fatal), None);
    }

    #[test]
    fn test_wait_or_fatal_returns_value() {
        let (_trigger, fatal) = fatal_signal();
        let (hello, wait) = Trigger::new();

        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            hello.fire(5u32);
        });
        assert_eq!(wait_or_fatal(wait, &fatal).unwrap(), 5);
        setter.join().unwrap();
    }

    #[test]
    fn test_wait_or_fatal_gives_up_on_worker_failure() {
        let (trigger, fatal) = fatal_signal();
        let (_never, wait) = Trigger::<u32>::new();

        let failing = spawn_worker("test-server", trigger, || {
            thread::sleep(Duration::from_millis(20));
            Err(DsmError::PeerDisconnected)
        })
        .unwrap();

        match wait_or_fatal(wait, &fatal) {
            Err(DsmError::WorkerFailed(reason)) => assert!(reason.starts_with("test-server")),
            other => panic!("expected WorkerFailed, got {:?}", other.map(|_| ())),
        }
        failing.join().unwrap();
    }

    #[test]
    fn test_wait_or_fatal_dropped_sender() {
        let (_trigger, fatal) = fatal_signal();
        let (never, wait) = Trigger::<u32>::new();
        drop(never);
        assert!(matches!(
            wait_or_fatal(wait, &fatal),
            Err(DsmError::WorkerFailed(_))
        ));
    }
}

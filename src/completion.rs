//! Completion objects: the result sink a submitted [`crate::command::Command`] resolves into.
//!
//! A completion starts empty and is driven to a final state exactly once by the transport
//! engine, either with [`Completion::succeed`]/[`Completion::succeed_empty`] or
//! [`Completion::fail`]. Callers obtain a completion from [`crate::transport::Transport::submit`]
//! and either block on it ([`Completion::wait`]) from an ordinary thread, or await it
//! ([`Completion::wait_async`]) from the event loop's own runtime.

use crate::error::Error;
use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

/// The result body of a completed command.
#[derive(Debug, Clone)]
pub enum Payload {
    /// No response body (write-without-response, execute write, confirmation).
    Empty,
    /// A single decoded response PDU's raw bytes (read, write, exchange MTU). Multi-PDU
    /// procedures (discovery, read by UUID) accumulate their own `Vec` of decoded entries
    /// around a sequence of single-PDU completions rather than through this type.
    One(Vec<u8>),
}

impl Payload {
    /// Returns the single PDU payload, if this is [`Payload::One`].
    pub fn into_one(self) -> Option<Vec<u8>> {
        match self {
            Self::One(bytes) => Some(bytes),
            Self::Empty => None,
        }
    }
}

struct State {
    /// `None` while the command is still outstanding.
    result: Option<Result<Payload, Error>>,
}

/// A one-shot result sink shared between the caller that submitted a command and the
/// transport engine that will eventually resolve it.
pub struct Completion {
    state: Mutex<State>,
    condvar: Condvar,
    notify: tokio::sync::Notify,
}

impl Completion {
    /// Creates a new, pending completion.
    pub fn new() -> Arc<Self> {
        Arc::new(Self { state: Mutex::new(State { result: None }), condvar: Condvar::new(), notify: tokio::sync::Notify::new() })
    }

    /// Whether a final result has already been recorded.
    pub fn is_done(&self) -> bool {
        self.state.lock().unwrap().result.is_some()
    }

    /// Resolves the completion with a single PDU payload.
    pub fn succeed(&self, bytes: Vec<u8>) {
        self.finish(Ok(Payload::One(bytes)));
    }

    /// Resolves the completion with no payload (write response, confirmation).
    pub fn succeed_empty(&self) {
        self.finish(Ok(Payload::Empty));
    }

    /// Resolves the completion with an error (ATT error response, timeout, cancellation).
    pub fn fail(&self, err: Error) {
        self.finish(Err(err));
    }

    fn finish(&self, result: Result<Payload, Error>) {
        let mut guard = self.state.lock().unwrap();
        if guard.result.is_none() {
            guard.result = Some(result);
        }
        drop(guard);
        self.condvar.notify_all();
        self.notify.notify_waiters();
    }

    /// Peeks the final result without blocking; `None` while the command is outstanding.
    pub fn peek(&self) -> Option<Result<Payload, Error>> {
        self.state.lock().unwrap().result.clone()
    }

    /// Blocks the calling thread until the completion resolves, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Result<Payload, Error> {
        let guard = self.state.lock().unwrap();
        let (mut guard, result) = self.condvar.wait_timeout_while(guard, timeout, |s| s.result.is_none()).unwrap();
        match guard.result.take() {
            Some(r) => r,
            None => {
                debug_assert!(result.timed_out());
                Err(Error::msg(
                    crate::error::ErrorKind::Att(crate::error::AttErrorKind::Timeout),
                    "completion wait timed out",
                ))
            }
        }
    }

    /// Awaits the completion from within the event loop's async runtime.
    pub async fn wait_async(&self, timeout: Duration) -> Result<Payload, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(result) = self.take_if_done() {
                return result;
            }
            let wait = self.notify.notified();
            tokio::select! {
                _ = wait => {}
                _ = tokio::time::sleep_until(deadline) => {
                    if let Some(result) = self.take_if_done() {
                        return result;
                    }
                    return Err(Error::msg(
                        crate::error::ErrorKind::Att(crate::error::AttErrorKind::Timeout),
                        "completion wait timed out",
                    ));
                }
            }
        }
    }

    fn take_if_done(&self) -> Option<Result<Payload, Error>> {
        self.state.lock().unwrap().result.take()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Completion").field("done", &self.is_done()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_wait_returns_once_resolved() {
        let completion = Completion::new();
        let other = completion.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            other.succeed(vec![1, 2, 3]);
        });
        let payload = completion.wait(Duration::from_secs(1)).unwrap();
        assert_eq!(payload.into_one(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn blocking_wait_times_out() {
        let completion = Completion::new();
        let err = completion.wait(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.att_code(), Some(0x81));
    }

    #[tokio::test]
    async fn async_wait_returns_once_resolved() {
        let completion = Completion::new();
        let other = completion.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            other.succeed_empty();
        });
        let payload = completion.wait_async(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(payload, Payload::Empty));
    }
}

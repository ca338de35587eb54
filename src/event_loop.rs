//! The single dedicated worker thread every connection's ATT traffic is driven from.
//!
//! A lazily started, single-threaded tokio runtime lives on its own named OS thread for the
//! lifetime of the process. [`Transport::run`](crate::transport::Transport::run) tasks and
//! every blocking facade call in [`crate::requester`] are scheduled onto it; nothing in this
//! crate ever touches a socket from any other thread.

use std::{sync::mpsc, thread};
use tokio::runtime::Handle;

struct EventLoop {
    handle: Handle,
    // Keeps the worker thread from being detached/dropped; never joined, the thread runs
    // for the lifetime of the process.
    _worker: thread::JoinHandle<()>,
}

impl EventLoop {
    fn start() -> Self {
        let (tx, rx) = mpsc::channel();
        let worker = thread::Builder::new()
            .name("attrib-event-loop".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build the attrib event loop runtime");
                tx.send(runtime.handle().clone()).expect("event loop handle receiver dropped before startup");
                runtime.block_on(futures::future::pending::<()>());
            })
            .expect("failed to spawn the attrib event loop thread");
        let handle = rx.recv().expect("attrib event loop thread exited before reporting its handle");
        Self { handle, _worker: worker }
    }
}

lazy_static::lazy_static! {
    static ref EVENT_LOOP: EventLoop = EventLoop::start();
}

/// Returns a handle to the shared event loop, starting its worker thread on first use.
pub fn handle() -> Handle {
    EVENT_LOOP.handle.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_spawns_and_runs_work() {
        let (tx, rx) = mpsc::channel();
        handle().spawn(async move {
            tx.send(40 + 2).unwrap();
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), 42);
    }
}

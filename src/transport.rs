//! The ATT transport engine: the single point of contention for everything that goes in or
//! out over an L2CAP CID 0x0004 bearer.
//!
//! A [`Transport`] owns a dual queue — requests waiting to be written and, per the
//! Attribute Protocol's single-request-in-flight rule, at most one request actually
//! in flight — plus the subscriber list for server-initiated notifications/indications and
//! the negotiated MTU. All mutable state lives behind one [`std::sync::Mutex`]; the reader
//! and writer halves of the bearer run as two cooperating async loops driven from the same
//! dedicated worker thread (see [`crate::event_loop`]), so lock hold times are always short
//! and non-blocking.
//!
//! Invariants maintained by this module:
//! - I1: at most one ATT request is in flight on the bearer at any time.
//! - I2: every command that is submitted eventually resolves its completion exactly once —
//!   with a response, an ATT error, a timeout, or cancellation.
//! - I3: commands that expect no response (`Write Command`, `Handle Value Confirmation`) are
//!   written as soon as possible and never wait behind a request.
//! - I4: once the transport is marked stale (socket hangup, fatal I/O error) no further
//!   command may be submitted and everything outstanding fails immediately.
//! - I5: the scratch receive buffer is always at least as large as the last negotiated MTU.

use crate::{
    codec::{self, opcode},
    command::Command,
    completion::Completion,
    error::{AttErrorKind, Error, ErrorKind, IoErrorKind},
    handle::Handle,
};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default ATT MTU before any `Exchange MTU` procedure has completed.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Per-request timeout, per the Attribute Protocol's `T_RSP` (30s).
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Callback invoked for every notification or indication received on a subscribed handle.
pub type NotifyCallback = Box<dyn Fn(Handle, &[u8]) + Send + Sync>;

/// Lifecycle hooks invoked as a connection's state changes, overridable by whatever the
/// caller hands to [`crate::requester::Requester::connect_with_handler`].
///
/// Expressed as a trait object rather than a fixed set of callbacks, matching how the rest
/// of this crate exposes polymorphism over a small capability set.
pub trait EventHandler: Send + Sync {
    /// Invoked once the bearer is connected and MTU exchange has completed.
    fn on_connect(&self, _mtu: u16) {}
    /// Invoked when connecting fails before a bearer is ever established.
    fn on_connect_failed(&self, _err: &Error) {}
    /// Invoked when an established bearer is lost, for any reason (peer hangup, local
    /// [`crate::requester::Requester::disconnect`], fatal I/O error).
    fn on_disconnect(&self) {}
    /// Invoked for every `Handle Value Notification`, whether or not a
    /// [`Transport::subscribe`] callback is also registered for `handle`.
    fn on_notification(&self, handle: Handle, value: &[u8]) {
        log::debug!("notification on {handle}: {value:?}");
    }
    /// Invoked for every `Handle Value Indication`, whether or not a
    /// [`Transport::subscribe`] callback is also registered for `handle`.
    fn on_indication(&self, handle: Handle, value: &[u8]) {
        log::debug!("indication on {handle}: {value:?}");
    }
}

pub(crate) struct NoopHandler;
impl EventHandler for NoopHandler {}

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle returned by [`Transport::subscribe`], used to [`Transport::unsubscribe`] later.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    handle: Handle,
    callback: NotifyCallback,
}

struct Inner {
    /// Requests and commands waiting to be written to the socket, in submission order.
    outgoing: VecDeque<Command>,
    /// The single request currently in flight, awaiting its matching response.
    awaiting: Option<Command>,
    subscriptions: Vec<Subscription>,
    mtu: u16,
    /// Set once the bearer has failed; blocks further submissions (I4).
    stale: Option<Error>,
    /// Lifecycle hook observer; defaults to a no-op until [`Transport::set_handler`] installs
    /// the caller's own.
    handler: Arc<dyn EventHandler>,
}

/// The ATT transport engine for one connected bearer.
pub struct Transport {
    inner: Mutex<Inner>,
    /// Signalled whenever new work is queued, so the writer loop can wake from idle.
    woken: tokio::sync::Notify,
}

impl Transport {
    /// Creates a new transport with the default (un-negotiated) ATT MTU.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                outgoing: VecDeque::new(),
                awaiting: None,
                subscriptions: Vec::new(),
                mtu: DEFAULT_ATT_MTU,
                stale: None,
                handler: Arc::new(NoopHandler),
            }),
            woken: tokio::sync::Notify::new(),
        })
    }

    /// Installs the lifecycle hook observer notifications and indications are reported to.
    pub fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        self.inner.lock().unwrap().handler = handler;
    }

    /// Queues an already-encoded PDU for transmission, returning the completion the caller
    /// should wait on for its result.
    pub fn submit(self: &Arc<Self>, pdu: Vec<u8>) -> Arc<Completion> {
        let (command, completion) = Command::new(pdu);
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = &inner.stale {
            drop(inner);
            completion.fail(err.clone());
            return completion;
        }
        inner.outgoing.push_back(command);
        drop(inner);
        self.woken.notify_one();
        completion
    }

    /// Cancels a command by id, whether still queued or already sent and awaiting a reply.
    /// A still-queued command is removed and destroyed outright. The currently-sent head of
    /// the request queue instead has its callback swapped for a fresh, unobserved one and
    /// keeps its slot, so ordering (I3) and the single-request-in-flight rule (I1) are
    /// preserved; the peer's eventual reply is then swallowed rather than delivered. Returns
    /// `false` if the command was already resolved or is not found.
    pub fn cancel(&self, id: u64) -> bool {
        let aborted = || Error::msg(ErrorKind::Att(AttErrorKind::Aborted), "command cancelled");

        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.outgoing.iter().position(|c| c.id == id) {
            let command = inner.outgoing.remove(pos).unwrap();
            drop(inner);
            command.completion.fail(aborted());
            return true;
        }
        if let Some(command) = inner.awaiting.as_mut().filter(|c| c.id == id) {
            let swallowed = std::mem::replace(&mut command.completion, Completion::new());
            drop(inner);
            swallowed.fail(aborted());
            return true;
        }
        false
    }

    /// Fails every queued and in-flight command with `err`, without tearing down the bearer.
    pub fn cancel_all(&self, err: Error) {
        let mut inner = self.inner.lock().unwrap();
        let queued: Vec<Command> = inner.outgoing.drain(..).collect();
        let awaiting = inner.awaiting.take();
        drop(inner);
        for command in queued {
            command.completion.fail(err.clone());
        }
        if let Some(command) = awaiting {
            command.completion.fail(err);
        }
    }

    /// Registers a callback for notifications/indications on `handle`.
    pub fn subscribe(&self, handle: Handle, callback: NotifyCallback) -> SubscriptionId {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().unwrap().subscriptions.push(Subscription { id, handle, callback });
        id
    }

    /// Removes a single subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().unwrap().subscriptions.retain(|s| s.id != id);
    }

    /// Removes every subscription on this transport.
    pub fn unsubscribe_all(&self) {
        self.inner.lock().unwrap().subscriptions.clear();
    }

    /// Updates the negotiated ATT MTU, used to size the next read's scratch buffer.
    pub fn set_mtu(&self, mtu: u16) {
        self.inner.lock().unwrap().mtu = mtu;
    }

    /// The current negotiated ATT MTU.
    pub fn mtu(&self) -> u16 {
        self.inner.lock().unwrap().mtu
    }

    /// The size, in bytes, of the scratch buffer the reader loop allocates for the next PDU.
    pub fn get_buffer(&self) -> usize {
        self.mtu() as usize
    }

    /// Whether the transport has been marked stale (socket hangup or fatal I/O error).
    pub fn is_stale(&self) -> bool {
        self.inner.lock().unwrap().stale.is_some()
    }

    fn mark_stale(&self, err: Error) {
        let mut inner = self.inner.lock().unwrap();
        if inner.stale.is_none() {
            inner.stale = Some(err);
        }
    }

    /// Drives this transport's reader and writer loops to completion over `socket`. Returns
    /// once the bearer hangs up or hits a fatal I/O error; the transport is marked stale and
    /// every outstanding command fails before this function returns.
    pub async fn run<S>(self: Arc<Self>, socket: S) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(socket);
        let mut read_task = {
            let this = self.clone();
            tokio::spawn(async move { this.read_loop(reader).await })
        };
        let mut write_task = {
            let this = self.clone();
            tokio::spawn(async move { this.write_loop(writer).await })
        };
        let timeout_task = {
            let this = self.clone();
            tokio::spawn(async move { this.timeout_loop().await })
        };

        let join_err = |e: tokio::task::JoinError| Error::msg(ErrorKind::Io(IoErrorKind::Os(0)), e.to_string());
        let result = tokio::select! {
            r = &mut read_task => { write_task.abort(); r.unwrap_or_else(|e| Err(join_err(e))) }
            r = &mut write_task => { read_task.abort(); r.unwrap_or_else(|e| Err(join_err(e))) }
        };
        timeout_task.abort();

        let err = result.clone().unwrap_err_or(|| {
            Error::msg(ErrorKind::Io(IoErrorKind::ResetByPeer), "bearer closed")
        });
        self.mark_stale(err.clone());
        self.cancel_all(err);
        result
    }

    async fn read_loop<R>(self: Arc<Self>, mut reader: R) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let mut buf = vec![0u8; self.get_buffer().max(DEFAULT_ATT_MTU as usize)];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::msg(ErrorKind::Io(IoErrorKind::ResetByPeer), "L2CAP channel closed by peer"));
            }
            self.dispatch_incoming(&buf[..n]);
        }
    }

    fn dispatch_incoming(self: &Arc<Self>, pdu: &[u8]) {
        let Some(&op) = pdu.first() else { return };

        if op == opcode::HANDLE_NOTIFY || op == opcode::HANDLE_IND {
            match codec::decode_handle_value(pdu) {
                Ok(hv) => {
                    self.notify_subscribers(hv.handle, &hv.value);
                    let handler = self.inner.lock().unwrap().handler.clone();
                    if op == opcode::HANDLE_IND {
                        handler.on_indication(hv.handle, &hv.value);
                        let confirmation = codec::encode_handle_value_cnf();
                        let mut inner = self.inner.lock().unwrap();
                        inner.outgoing.push_front(Command::new(confirmation).0);
                        drop(inner);
                        self.woken.notify_one();
                    } else {
                        handler.on_notification(hv.handle, &hv.value);
                    }
                }
                Err(err) => log::warn!("malformed handle value PDU: {err}"),
            }
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        let Some(awaiting) = inner.awaiting.take() else {
            log::warn!("unsolicited ATT PDU with opcode {op:#04x}, dropping");
            return;
        };

        if op == opcode::ERROR_RESP {
            match codec::decode_error_resp(pdu) {
                Ok(resp) if resp.request_opcode == awaiting.opcode => {
                    drop(inner);
                    awaiting.completion.fail(Error::att(resp.code));
                }
                Ok(resp) => {
                    log::warn!(
                        "error response for opcode {:#04x} while awaiting {:#04x}",
                        resp.request_opcode,
                        awaiting.opcode
                    );
                    inner.awaiting = Some(awaiting);
                }
                Err(err) => {
                    inner.awaiting = Some(awaiting);
                    drop(inner);
                    log::warn!("malformed error response: {err}");
                }
            }
        } else if op == awaiting.expected_response {
            drop(inner);
            awaiting.completion.succeed(pdu.to_vec());
        } else {
            log::warn!("unexpected opcode {:#04x} while awaiting {:#04x}", op, awaiting.expected_response);
            inner.awaiting = Some(awaiting);
        }
        self.woken.notify_one();
    }

    fn notify_subscribers(&self, handle: Handle, value: &[u8]) {
        let inner = self.inner.lock().unwrap();
        for subscription in inner.subscriptions.iter().filter(|s| s.handle == handle) {
            (subscription.callback)(handle, value);
        }
    }

    async fn write_loop<W>(self: Arc<Self>, mut writer: W) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                if inner.awaiting.is_some() {
                    // A request is outstanding; only commands with no response may pass it.
                    inner.outgoing.iter().position(|c| !c.expects_response()).map(|pos| inner.outgoing.remove(pos).unwrap())
                } else {
                    inner.outgoing.pop_front()
                }
            };

            let mut command = match next {
                Some(command) => command,
                None => {
                    self.woken.notified().await;
                    continue;
                }
            };

            writer.write_all(&command.pdu).await?;
            command.mark_sent(Instant::now());

            if command.expects_response() {
                self.inner.lock().unwrap().awaiting = Some(command);
            } else {
                command.completion.succeed_empty();
            }
        }
    }

    async fn timeout_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(TIMEOUT_POLL_INTERVAL).await;
            let expired = {
                let mut inner = self.inner.lock().unwrap();
                match &inner.awaiting {
                    Some(command) => match command.submitted_at {
                        Some(at) if at.elapsed() >= REQUEST_TIMEOUT => inner.awaiting.take(),
                        _ => None,
                    },
                    None => None,
                }
            };
            if let Some(command) = expired {
                command.completion.fail(Error::new(ErrorKind::Att(AttErrorKind::Timeout)));
                self.woken.notify_one();
            }
        }
    }
}

trait ResultExt<T> {
    fn unwrap_err_or(self, default: impl FnOnce() -> Error) -> Error;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn unwrap_err_or(self, default: impl FnOnce() -> Error) -> Error {
        match self {
            Ok(_) => default(),
            Err(err) => err,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opcode;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[tokio::test]
    async fn read_request_round_trips_through_a_duplex_socket() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let completion = transport.submit(codec::encode_read_req(Handle::from_u16(3)));

        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(buf[0], opcode::READ_REQ);

        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::READ_RESP, 0xAB]).await.unwrap();

        let payload = completion.wait_async(Duration::from_secs(1)).await.unwrap();
        assert_eq!(payload.into_one(), Some(vec![opcode::READ_RESP, 0xAB]));

        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn second_request_waits_behind_the_first() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let first = transport.submit(codec::encode_read_req(Handle::from_u16(1)));
        let second = transport.submit(codec::encode_read_req(Handle::from_u16(2)));

        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 1);

        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::READ_RESP, 0x01]).await.unwrap();
        first.wait_async(Duration::from_secs(1)).await.unwrap();

        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(u16::from_le_bytes([buf[1], buf[2]]), 2);
        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::READ_RESP, 0x02]).await.unwrap();
        second.wait_async(Duration::from_secs(1)).await.unwrap();

        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn notifications_reach_subscribers_without_an_in_flight_request() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        transport.subscribe(
            Handle::from_u16(0x10),
            Box::new(move |_handle, _value| {
                seen2.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        let mut notification = vec![opcode::HANDLE_NOTIFY];
        notification.extend_from_slice(&0x0010u16.to_le_bytes());
        notification.extend_from_slice(b"x");
        tokio::io::AsyncWriteExt::write_all(&mut server, &notification).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);

        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn cancel_swallows_the_reply_to_an_in_flight_request() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let completion = transport.submit(codec::encode_read_req(Handle::from_u16(1)));

        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        let id = {
            let inner = transport.inner.lock().unwrap();
            inner.awaiting.as_ref().unwrap().id
        };

        assert!(transport.cancel(id));
        let err = completion.wait_async(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Att(AttErrorKind::Aborted)));

        // The peer's reply arrives after cancellation; it must be swallowed rather than
        // resolve a completion nobody is waiting on, and a second request must still be
        // able to proceed afterwards (the slot was freed once the reply landed).
        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::READ_RESP, 0xAB]).await.unwrap();
        let second = transport.submit(codec::encode_read_req(Handle::from_u16(2)));
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::READ_RESP, 0xCD]).await.unwrap();
        let payload = second.wait_async(Duration::from_secs(1)).await.unwrap();
        assert_eq!(payload.into_one(), Some(vec![opcode::READ_RESP, 0xCD]));

        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn hangup_fails_every_outstanding_command() {
        let transport = Transport::new();
        let (client, server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let completion = transport.submit(codec::encode_read_req(Handle::from_u16(1)));
        drop(server);

        let err = completion.wait_async(Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Io(IoErrorKind::ResetByPeer)));
        assert!(transport.is_stale());
        let _ = runner.await;
    }
}

//! Outstanding ATT commands queued on a [`crate::transport::Transport`].

use crate::{codec, completion::Completion};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// A single submitted ATT request, response-pending command, or fire-and-forget command,
/// queued for transmission and (if it expects one) matched against the peer's reply.
#[derive(Debug)]
pub struct Command {
    /// Monotonically increasing id, assigned at submission, used only for logging/ordering.
    pub id: u64,
    /// Opcode of the outgoing PDU (the first byte of `pdu`).
    pub opcode: u8,
    /// The fully encoded outgoing PDU.
    pub pdu: Vec<u8>,
    /// The opcode expected in the peer's reply, or `0` if none is expected.
    pub expected_response: u8,
    /// Set once the bytes have been written to the socket.
    pub sent: bool,
    /// Timestamp the PDU was actually written, used to enforce the per-request timeout.
    pub submitted_at: Option<Instant>,
    /// Shared sink the caller is waiting on.
    pub completion: Arc<Completion>,
}

impl Command {
    /// Builds a new command from an already-encoded PDU, deriving its expected response
    /// opcode from the PDU's own opcode byte.
    pub fn new(pdu: Vec<u8>) -> (Self, Arc<Completion>) {
        let opcode = pdu.first().copied().unwrap_or(0);
        let completion = Completion::new();
        let command = Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            opcode,
            expected_response: codec::expected_response(opcode),
            pdu,
            sent: false,
            submitted_at: None,
            completion: completion.clone(),
        };
        (command, completion)
    }

    /// Whether this command is a request awaiting a matching response (as opposed to a
    /// fire-and-forget command like `Write Command`).
    pub fn expects_response(&self) -> bool {
        self.expected_response != 0
    }

    /// Records that the PDU has been written to the socket.
    pub fn mark_sent(&mut self, at: Instant) {
        self.sent = true;
        self.submitted_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::opcode;

    #[test]
    fn derives_expected_response_from_opcode() {
        let (cmd, _) = Command::new(vec![opcode::READ_REQ, 0x01, 0x00]);
        assert_eq!(cmd.expected_response, opcode::READ_RESP);
        assert!(cmd.expects_response());
    }

    #[test]
    fn write_command_expects_no_response() {
        let (cmd, _) = Command::new(vec![opcode::WRITE_CMD, 0x01, 0x00, 0xAA]);
        assert!(!cmd.expects_response());
    }

    #[test]
    fn ids_are_monotonically_increasing() {
        let (a, _) = Command::new(vec![opcode::READ_REQ, 0x01, 0x00]);
        let (b, _) = Command::new(vec![opcode::READ_REQ, 0x02, 0x00]);
        assert!(b.id > a.id);
    }
}

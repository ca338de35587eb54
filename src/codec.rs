//! Pure encode/decode functions for ATT protocol data units (PDUs).
//!
//! Every function here is free of I/O and side effects: encoders append bytes to a caller
//! owned `Vec<u8>`, decoders borrow from the byte slice handed to them. Byte order is
//! little-endian throughout, per the Attribute Protocol wire format.

use crate::{
    error::{AttErrorKind, Error, ErrorKind, IoErrorKind},
    handle::Handle,
    uuid_ext::UuidExt,
};
use uuid::Uuid;

/// ATT opcode values (Bluetooth Core Spec, Attribute Protocol).
pub mod opcode {
    pub const ERROR_RESP: u8 = 0x01;
    pub const EXCHANGE_MTU_REQ: u8 = 0x02;
    pub const EXCHANGE_MTU_RESP: u8 = 0x03;
    pub const FIND_INFO_REQ: u8 = 0x04;
    pub const FIND_INFO_RESP: u8 = 0x05;
    pub const FIND_BY_TYPE_REQ: u8 = 0x06;
    pub const FIND_BY_TYPE_RESP: u8 = 0x07;
    pub const READ_BY_TYPE_REQ: u8 = 0x08;
    pub const READ_BY_TYPE_RESP: u8 = 0x09;
    pub const READ_REQ: u8 = 0x0A;
    pub const READ_RESP: u8 = 0x0B;
    pub const READ_BLOB_REQ: u8 = 0x0C;
    pub const READ_BLOB_RESP: u8 = 0x0D;
    pub const READ_MULTI_REQ: u8 = 0x0E;
    pub const READ_MULTI_RESP: u8 = 0x0F;
    pub const READ_BY_GROUP_REQ: u8 = 0x10;
    pub const READ_BY_GROUP_RESP: u8 = 0x11;
    pub const WRITE_REQ: u8 = 0x12;
    pub const WRITE_RESP: u8 = 0x13;
    pub const PREP_WRITE_REQ: u8 = 0x16;
    pub const PREP_WRITE_RESP: u8 = 0x17;
    pub const EXEC_WRITE_REQ: u8 = 0x18;
    pub const EXEC_WRITE_RESP: u8 = 0x19;
    pub const HANDLE_NOTIFY: u8 = 0x1B;
    pub const HANDLE_IND: u8 = 0x1D;
    pub const HANDLE_CNF: u8 = 0x1E;
    pub const WRITE_CMD: u8 = 0x52;
    pub const SIGNED_WRITE_CMD: u8 = 0xD2;

    /// Sentinel used by event subscriptions to match any request opcode.
    pub const ALL_REQUESTS: u8 = 0x00;
}
use opcode::*;

/// Returns the expected response opcode for a submitted request/command opcode, or `0` if
/// the command expects no reply (write-without-response variants, or confirmations).
pub fn expected_response(req_opcode: u8) -> u8 {
    match req_opcode {
        EXCHANGE_MTU_REQ => EXCHANGE_MTU_RESP,
        FIND_INFO_REQ => FIND_INFO_RESP,
        FIND_BY_TYPE_REQ => FIND_BY_TYPE_RESP,
        READ_BY_TYPE_REQ => READ_BY_TYPE_RESP,
        READ_REQ => READ_RESP,
        READ_BLOB_REQ => READ_BLOB_RESP,
        READ_MULTI_REQ => READ_MULTI_RESP,
        READ_BY_GROUP_REQ => READ_BY_GROUP_RESP,
        WRITE_REQ => WRITE_RESP,
        PREP_WRITE_REQ => PREP_WRITE_RESP,
        EXEC_WRITE_REQ => EXEC_WRITE_RESP,
        HANDLE_IND => HANDLE_CNF,
        _ => 0,
    }
}

/// Whether `opcode` is one the server can use to reply to, or spontaneously send, a PDU the
/// client did not request — i.e. it belongs on the response queue (§3 "Command").
pub fn is_response(opcode: u8) -> bool {
    matches!(
        opcode,
        ERROR_RESP
            | EXCHANGE_MTU_RESP
            | FIND_INFO_RESP
            | FIND_BY_TYPE_RESP
            | READ_BY_TYPE_RESP
            | READ_RESP
            | READ_BLOB_RESP
            | READ_MULTI_RESP
            | READ_BY_GROUP_RESP
            | WRITE_RESP
            | PREP_WRITE_RESP
            | EXEC_WRITE_RESP
            | HANDLE_CNF
    )
}

/// Whether `opcode` is a client-to-server request (or the one command that carries one,
/// `WRITE_CMD`).
pub fn is_request(opcode: u8) -> bool {
    matches!(
        opcode,
        EXCHANGE_MTU_REQ
            | FIND_INFO_REQ
            | FIND_BY_TYPE_REQ
            | READ_BY_TYPE_REQ
            | READ_REQ
            | READ_BLOB_REQ
            | READ_MULTI_REQ
            | READ_BY_GROUP_REQ
            | WRITE_REQ
            | PREP_WRITE_REQ
            | EXEC_WRITE_REQ
            | WRITE_CMD
    )
}

/// Reads the `u16le` handle at byte offset 1, as used for subscription handle filtering.
/// Returns `None` for PDUs shorter than 3 bytes.
pub fn pdu_handle(pdu: &[u8]) -> Option<Handle> {
    if pdu.len() >= 3 {
        Some(Handle::from_u16(u16::from_le_bytes([pdu[1], pdu[2]])))
    } else {
        None
    }
}

fn invalid_pdu(message: impl Into<String>) -> Error {
    Error::msg(ErrorKind::Att(AttErrorKind::InvalidPdu), message)
}

fn eof() -> Error {
    Error::msg(ErrorKind::Io(IoErrorKind::InvalidArgument("truncated ATT PDU".into())), "truncated ATT PDU")
}

fn read_u16(buf: &[u8], at: usize) -> Result<u16, Error> {
    let bytes = buf.get(at..at + 2).ok_or_else(eof)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_handle(buf: &[u8], at: usize) -> Result<Handle, Error> {
    Ok(Handle::from_u16(read_u16(buf, at)?))
}

/// Encodes a UUID in its shortest wire form: 2 bytes if it has a 16-bit short form, else 16
/// bytes.
pub fn encode_uuid(out: &mut Vec<u8>, uuid: Uuid) {
    if let Some(short) = uuid.as_u16() {
        out.extend_from_slice(&short.to_le_bytes());
    } else {
        out.extend_from_slice(uuid.as_bytes());
    }
}

/// Decodes a UUID from its wire form (2 or 16 bytes, matching `format=0x01`/`0x02` in
/// `FIND_INFO_RESP` or the trailing bytes of a `READ_BY_TYPE_REQ`/`READ_BY_GROUP_REQ`).
pub fn decode_uuid(bytes: &[u8]) -> Result<Uuid, Error> {
    match bytes.len() {
        2 => Ok(Uuid::from_u16(u16::from_le_bytes([bytes[0], bytes[1]]))),
        16 => {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(bytes);
            Ok(Uuid::from_bytes(raw))
        }
        n => Err(invalid_pdu(format!("invalid UUID length {n}"))),
    }
}

// ---------------------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------------------

/// `Exchange MTU Request` / `Exchange MTU Response` (same shape, opcode differs).
pub fn encode_exchange_mtu(opcode: u8, mtu: u16) -> Vec<u8> {
    let mut out = vec![opcode];
    out.extend_from_slice(&mtu.to_le_bytes());
    out
}

/// `Find Information Request`.
pub fn encode_find_info_req(start: Handle, end: Handle) -> Vec<u8> {
    let mut out = vec![FIND_INFO_REQ];
    out.extend_from_slice(&start.as_u16().to_le_bytes());
    out.extend_from_slice(&end.as_u16().to_le_bytes());
    out
}

/// `Read By Type Request`.
pub fn encode_read_by_type_req(start: Handle, end: Handle, uuid: Uuid) -> Vec<u8> {
    let mut out = vec![READ_BY_TYPE_REQ];
    out.extend_from_slice(&start.as_u16().to_le_bytes());
    out.extend_from_slice(&end.as_u16().to_le_bytes());
    encode_uuid(&mut out, uuid);
    out
}

/// `Read By Group Type Request`.
pub fn encode_read_by_group_req(start: Handle, end: Handle, uuid: Uuid) -> Vec<u8> {
    let mut out = vec![READ_BY_GROUP_REQ];
    out.extend_from_slice(&start.as_u16().to_le_bytes());
    out.extend_from_slice(&end.as_u16().to_le_bytes());
    encode_uuid(&mut out, uuid);
    out
}

/// `Read Request`.
pub fn encode_read_req(handle: Handle) -> Vec<u8> {
    let mut out = vec![READ_REQ];
    out.extend_from_slice(&handle.as_u16().to_le_bytes());
    out
}

/// `Read Blob Request`.
pub fn encode_read_blob_req(handle: Handle, offset: u16) -> Vec<u8> {
    let mut out = vec![READ_BLOB_REQ];
    out.extend_from_slice(&handle.as_u16().to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out
}

/// `Write Request` (opcode `0x12`) or `Write Command` (opcode `0x52`), same shape.
pub fn encode_write(opcode: u8, handle: Handle, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + value.len());
    out.push(opcode);
    out.extend_from_slice(&handle.as_u16().to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// `Prepare Write Request`.
pub fn encode_prepare_write_req(handle: Handle, offset: u16, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + value.len());
    out.push(PREP_WRITE_REQ);
    out.extend_from_slice(&handle.as_u16().to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(value);
    out
}

/// `Execute Write Request`. `flag = true` commits queued writes, `false` cancels them.
pub fn encode_execute_write_req(flag: bool) -> Vec<u8> {
    vec![EXEC_WRITE_REQ, if flag { 0x01 } else { 0x00 }]
}

/// `Handle Value Confirmation`, sent in response to an indication.
pub fn encode_handle_value_cnf() -> Vec<u8> {
    vec![HANDLE_CNF]
}

// ---------------------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------------------

/// A decoded `Error Response`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub request_opcode: u8,
    pub handle: Handle,
    pub code: u8,
}

/// Decodes an `Error Response` PDU (opcode `0x01`).
pub fn decode_error_resp(pdu: &[u8]) -> Result<ErrorResponse, Error> {
    if pdu.len() != 5 {
        return Err(invalid_pdu("error response must be 5 bytes"));
    }
    Ok(ErrorResponse { request_opcode: pdu[1], handle: read_handle(pdu, 2)?, code: pdu[4] })
}

/// Decodes an `Exchange MTU Response` PDU, returning the server's MTU.
pub fn decode_exchange_mtu_resp(pdu: &[u8]) -> Result<u16, Error> {
    if pdu.first() != Some(&EXCHANGE_MTU_RESP) || pdu.len() != 3 {
        return Err(invalid_pdu("malformed exchange MTU response"));
    }
    read_u16(pdu, 1)
}

/// One `(handle, uuid)` pair from a `Find Information Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInfoEntry {
    pub handle: Handle,
    pub uuid: Uuid,
}

/// Decodes a `Find Information Response` PDU into its list of `(handle, uuid)` entries.
pub fn decode_find_info_resp(pdu: &[u8]) -> Result<Vec<FindInfoEntry>, Error> {
    if pdu.first() != Some(&FIND_INFO_RESP) || pdu.len() < 2 {
        return Err(invalid_pdu("malformed find information response"));
    }
    let uuid_len = match pdu[1] {
        0x01 => 2,
        0x02 => 16,
        other => return Err(invalid_pdu(format!("unknown find-info format {other:#04x}"))),
    };
    let body = &pdu[2..];
    let stride = 2 + uuid_len;
    if stride == 0 || body.len() % stride != 0 {
        return Err(invalid_pdu("find information response body misaligned"));
    }
    let mut entries = Vec::with_capacity(body.len() / stride);
    for chunk in body.chunks_exact(stride) {
        let handle = read_handle(chunk, 0)?;
        let uuid = decode_uuid(&chunk[2..])?;
        entries.push(FindInfoEntry { handle, uuid });
    }
    Ok(entries)
}

/// One `(handle, value)` pair from a `Read By Type Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByTypeEntry {
    pub handle: Handle,
    pub value: Vec<u8>,
}

/// Decodes a `Read By Type Response` PDU into its list of `(handle, value)` entries.
pub fn decode_read_by_type_resp(pdu: &[u8]) -> Result<Vec<ByTypeEntry>, Error> {
    if pdu.first() != Some(&READ_BY_TYPE_RESP) || pdu.len() < 2 {
        return Err(invalid_pdu("malformed read by type response"));
    }
    let stride = pdu[1] as usize;
    if stride < 3 {
        return Err(invalid_pdu("read by type response entry too short"));
    }
    let body = &pdu[2..];
    if body.len() % stride != 0 {
        return Err(invalid_pdu("read by type response body misaligned"));
    }
    let mut entries = Vec::with_capacity(body.len() / stride);
    for chunk in body.chunks_exact(stride) {
        entries.push(ByTypeEntry { handle: read_handle(chunk, 0)?, value: chunk[2..].to_vec() });
    }
    Ok(entries)
}

/// One `(start, end, value)` group from a `Read By Group Type Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByGroupEntry {
    pub start: Handle,
    pub end: Handle,
    pub value: Vec<u8>,
}

/// Decodes a `Read By Group Type Response` PDU into its list of `(start, end, value)` groups.
pub fn decode_read_by_group_resp(pdu: &[u8]) -> Result<Vec<ByGroupEntry>, Error> {
    if pdu.first() != Some(&READ_BY_GROUP_RESP) || pdu.len() < 2 {
        return Err(invalid_pdu("malformed read by group type response"));
    }
    let stride = pdu[1] as usize;
    if stride < 5 {
        return Err(invalid_pdu("read by group response entry too short"));
    }
    let body = &pdu[2..];
    if body.len() % stride != 0 {
        return Err(invalid_pdu("read by group response body misaligned"));
    }
    let mut entries = Vec::with_capacity(body.len() / stride);
    for chunk in body.chunks_exact(stride) {
        entries.push(ByGroupEntry {
            start: read_handle(chunk, 0)?,
            end: read_handle(chunk, 2)?,
            value: chunk[4..].to_vec(),
        });
    }
    Ok(entries)
}

/// Decodes a `Read Response` / `Read Blob Response` PDU, returning the value bytes.
pub fn decode_read_resp(pdu: &[u8]) -> Result<&[u8], Error> {
    match pdu.first() {
        Some(&READ_RESP) | Some(&READ_BLOB_RESP) => Ok(&pdu[1..]),
        _ => Err(invalid_pdu("malformed read response")),
    }
}

/// A decoded `Handle Value Notification` or `Handle Value Indication`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValue {
    pub handle: Handle,
    pub value: Vec<u8>,
}

/// Decodes a `Handle Value Notification`/`Indication` PDU.
pub fn decode_handle_value(pdu: &[u8]) -> Result<HandleValue, Error> {
    match pdu.first() {
        Some(&HANDLE_NOTIFY) | Some(&HANDLE_IND) => {
            if pdu.len() < 3 {
                return Err(invalid_pdu("handle value PDU too short"));
            }
            Ok(HandleValue { handle: read_handle(pdu, 1)?, value: pdu[3..].to_vec() })
        }
        _ => Err(invalid_pdu("not a handle value PDU")),
    }
}

/// A decoded `Prepare Write Response` — the peer's echo of the queued write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareWriteEcho {
    pub handle: Handle,
    pub offset: u16,
    pub value: Vec<u8>,
}

/// Decodes a `Prepare Write Response` PDU.
pub fn decode_prepare_write_resp(pdu: &[u8]) -> Result<PrepareWriteEcho, Error> {
    if pdu.first() != Some(&PREP_WRITE_RESP) || pdu.len() < 5 {
        return Err(invalid_pdu("malformed prepare write response"));
    }
    Ok(PrepareWriteEcho { handle: read_handle(pdu, 1)?, offset: read_u16(pdu, 3)?, value: pdu[5..].to_vec() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_mtu_round_trips() {
        let pdu = encode_exchange_mtu(EXCHANGE_MTU_REQ, 247);
        assert_eq!(pdu, vec![EXCHANGE_MTU_REQ, 247, 0]);
        let resp = encode_exchange_mtu(EXCHANGE_MTU_RESP, 185);
        assert_eq!(decode_exchange_mtu_resp(&resp).unwrap(), 185);
    }

    #[test]
    fn read_by_group_type_round_trips() {
        let mut pdu = vec![READ_BY_GROUP_RESP, 6];
        pdu.extend_from_slice(&1u16.to_le_bytes());
        pdu.extend_from_slice(&9u16.to_le_bytes());
        pdu.extend_from_slice(&0x1800u16.to_le_bytes());
        let entries = decode_read_by_group_resp(&pdu).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].start, Handle::from_u16(1));
        assert_eq!(entries[0].end, Handle::from_u16(9));
        assert_eq!(entries[0].value, 0x1800u16.to_le_bytes());
    }

    #[test]
    fn find_info_resp_rejects_misaligned_body() {
        let pdu = vec![FIND_INFO_RESP, 0x01, 0x01, 0x00, 0x02]; // 3 trailing bytes, not a multiple of 4
        assert!(decode_find_info_resp(&pdu).is_err());
    }

    #[test]
    fn handle_value_notification_decodes() {
        let mut pdu = vec![HANDLE_NOTIFY];
        pdu.extend_from_slice(&0x002Eu16.to_le_bytes());
        pdu.extend_from_slice(b"hi");
        let hv = decode_handle_value(&pdu).unwrap();
        assert_eq!(hv.handle, Handle::from_u16(0x002E));
        assert_eq!(hv.value, b"hi");
    }

    #[test]
    fn opcode_classification_matches_table() {
        assert!(is_request(READ_BY_GROUP_REQ));
        assert!(is_request(WRITE_CMD));
        assert!(!is_request(WRITE_RESP));
        assert!(is_response(ERROR_RESP));
        assert!(is_response(HANDLE_CNF));
        assert_eq!(expected_response(WRITE_CMD), 0);
        assert_eq!(expected_response(HANDLE_IND), HANDLE_CNF);
    }

    #[test]
    fn uuid_wire_form_picks_short_when_possible() {
        let mut out = Vec::new();
        encode_uuid(&mut out, Uuid::from_u16(0x2902));
        assert_eq!(out, 0x2902u16.to_le_bytes());

        let full = Uuid::parse_str("12345678-1234-5678-1234-567812345678").unwrap();
        let mut out = Vec::new();
        encode_uuid(&mut out, full);
        assert_eq!(out.len(), 16);
    }
}

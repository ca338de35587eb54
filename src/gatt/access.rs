//! GATT data access: reads, writes, MTU exchange, notification/indication subscription, and
//! the long read/write procedures built from `Read Blob` and `Prepare`/`Execute Write`.

use crate::{
    codec::{self, opcode},
    error::{AttErrorKind, Error, ErrorKind},
    handle::Handle,
    model::cccd,
    transport::{NotifyCallback, SubscriptionId, Transport, REQUEST_TIMEOUT},
};
use std::sync::Arc;
use uuid::Uuid;

async fn submit_and_wait(transport: &Arc<Transport>, pdu: Vec<u8>) -> Result<Vec<u8>, Error> {
    let completion = transport.submit(pdu);
    completion.wait_async(REQUEST_TIMEOUT).await.map(|payload| payload.into_one().unwrap_or_default())
}

/// Negotiates the ATT MTU with the peer and records it on the transport.
///
/// Per the Attribute Protocol, this must be the first request sent on a newly connected
/// bearer, and is only ever attempted once.
pub async fn exchange_mtu(transport: &Arc<Transport>, client_mtu: u16) -> Result<u16, Error> {
    let pdu = codec::encode_exchange_mtu(opcode::EXCHANGE_MTU_REQ, client_mtu);
    let response = submit_and_wait(transport, pdu).await?;
    let server_mtu = codec::decode_exchange_mtu_resp(&response)?;
    let negotiated = client_mtu.min(server_mtu).max(crate::transport::DEFAULT_ATT_MTU);
    transport.set_mtu(negotiated);
    Ok(negotiated)
}

/// Reads the value at `handle`. For values longer than `ATT_MTU - 1`, only the first
/// `ATT_MTU - 1` bytes are returned; use [`read_long`] to retrieve the full value.
pub async fn read_by_handle(transport: &Arc<Transport>, handle: Handle) -> Result<Vec<u8>, Error> {
    let pdu = codec::encode_read_req(handle);
    let response = submit_and_wait(transport, pdu).await?;
    Ok(codec::decode_read_resp(&response)?.to_vec())
}

/// Reads the value of every attribute of type `uuid` within `start..=end`, a direct read by
/// characteristic UUID rather than by handle. Paginates the same way the discovery
/// procedures do, yielding every entry's value rather than just the first (§4.E: "each
/// entry's `(handle, value)` payload is yielded").
pub async fn read_by_uuid(transport: &Arc<Transport>, start: Handle, end: Handle, uuid: Uuid) -> Result<Vec<Vec<u8>>, Error> {
    let mut values = Vec::new();
    let mut cursor = start;
    loop {
        let pdu = codec::encode_read_by_type_req(cursor, end, uuid);
        let response = match submit_and_wait(transport, pdu).await {
            Ok(bytes) => bytes,
            Err(err) if matches!(&err.kind, ErrorKind::Att(AttErrorKind::AttributeNotFound)) => break,
            Err(err) => return Err(err),
        };
        let entries = codec::decode_read_by_type_resp(&response)?;
        let Some(last) = entries.last() else { break };
        let last_handle = last.handle;
        values.extend(entries.into_iter().map(|entry| entry.value));
        if last_handle >= end {
            break;
        }
        cursor = last_handle.next();
    }
    if values.is_empty() {
        return Err(Error::new(ErrorKind::Att(AttErrorKind::AttributeNotFound)));
    }
    Ok(values)
}

/// Reads the full value at `handle` by issuing `Read Blob Request`s past the first
/// `ATT_MTU - 1` bytes until the peer returns a short (or empty) blob.
pub async fn read_long(transport: &Arc<Transport>, handle: Handle) -> Result<Vec<u8>, Error> {
    let mut value = read_by_handle(transport, handle).await?;
    let chunk_len = transport.mtu().saturating_sub(1).max(1) as usize;
    while value.len() % chunk_len == 0 && !value.is_empty() {
        let pdu = codec::encode_read_blob_req(handle, value.len() as u16);
        let blob = match submit_and_wait(transport, pdu).await {
            Ok(resp) => codec::decode_read_resp(&resp)?.to_vec(),
            Err(err) if matches!(&err.kind, ErrorKind::Att(AttErrorKind::InvalidOffset)) => break,
            Err(err) => return Err(err),
        };
        if blob.is_empty() {
            break;
        }
        let blob_len = blob.len();
        value.extend(blob);
        if blob_len < chunk_len {
            break;
        }
    }
    Ok(value)
}

/// Writes `value` to `handle` and waits for the peer's `Write Response`.
pub async fn write_by_handle(transport: &Arc<Transport>, handle: Handle, value: &[u8]) -> Result<(), Error> {
    let pdu = codec::encode_write(opcode::WRITE_REQ, handle, value);
    submit_and_wait(transport, pdu).await.map(|_| ())
}

/// Writes `value` to `handle` without requesting a response.
pub async fn write_cmd(transport: &Arc<Transport>, handle: Handle, value: &[u8]) -> Result<(), Error> {
    let pdu = codec::encode_write(opcode::WRITE_CMD, handle, value);
    let completion = transport.submit(pdu);
    completion.wait_async(REQUEST_TIMEOUT).await.map(|_| ())
}

/// Writes `value` to `handle` using `Prepare Write`/`Execute Write`, required when `value`
/// would not fit in a single `Write Request` (`> ATT_MTU - 3` bytes).
pub async fn write_long(transport: &Arc<Transport>, handle: Handle, value: &[u8]) -> Result<(), Error> {
    let chunk_len = transport.mtu().saturating_sub(5).max(1) as usize;
    for (offset, chunk) in value.chunks(chunk_len).enumerate() {
        let pdu = codec::encode_prepare_write_req(handle, (offset * chunk_len) as u16, chunk);
        let response = match submit_and_wait(transport, pdu).await {
            Ok(resp) => resp,
            Err(err) => {
                let _ = execute_write(transport, false).await;
                return Err(err);
            }
        };
        let echo = codec::decode_prepare_write_resp(&response)?;
        if echo.value != chunk {
            let _ = execute_write(transport, false).await;
            return Err(Error::msg(ErrorKind::Att(AttErrorKind::InvalidPdu), "prepare write echo mismatch"));
        }
    }
    execute_write(transport, true).await
}

async fn execute_write(transport: &Arc<Transport>, commit: bool) -> Result<(), Error> {
    let pdu = codec::encode_execute_write_req(commit);
    submit_and_wait(transport, pdu).await.map(|_| ())
}

/// Enables notifications (or indications) for `characteristic_value_handle` by writing to
/// its Client Characteristic Configuration Descriptor at `cccd_handle`, and registers
/// `callback` to receive subsequent `Handle Value Notification`/`Indication` PDUs.
pub async fn enable_notifications(
    transport: &Arc<Transport>,
    characteristic_value_handle: Handle,
    cccd_handle: Handle,
    indications: bool,
    callback: NotifyCallback,
) -> Result<SubscriptionId, Error> {
    let bits = if indications { cccd::INDICATION } else { cccd::NOTIFICATION };
    write_by_handle(transport, cccd_handle, &bits.to_le_bytes()).await?;
    Ok(transport.subscribe(characteristic_value_handle, callback))
}

/// Disables a subscription previously returned by [`enable_notifications`] and clears the
/// peer's CCCD back to `0x0000`.
pub async fn disable_notifications(
    transport: &Arc<Transport>,
    cccd_handle: Handle,
    subscription: SubscriptionId,
) -> Result<(), Error> {
    transport.unsubscribe(subscription);
    write_by_handle(transport, cccd_handle, &0u16.to_le_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{transport::Transport, uuid_ext::UuidExt};

    #[tokio::test]
    async fn exchange_mtu_negotiates_the_smaller_value() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { exchange_mtu(&transport, 247).await }
        });

        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut server, &codec::encode_exchange_mtu(opcode::EXCHANGE_MTU_RESP, 185))
            .await
            .unwrap();

        let negotiated = call.await.unwrap().unwrap();
        assert_eq!(negotiated, 185);
        assert_eq!(transport.mtu(), 185);

        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn write_by_handle_waits_for_response() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(256);
        let runner = tokio::spawn(transport.clone().run(client));

        let call = tokio::spawn({
            let transport = transport.clone();
            async move { write_by_handle(&transport, Handle::from_u16(5), b"on").await }
        });

        let mut buf = [0u8; 5];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        assert_eq!(buf[0], opcode::WRITE_REQ);
        tokio::io::AsyncWriteExt::write_all(&mut server, &[opcode::WRITE_RESP]).await.unwrap();

        call.await.unwrap().unwrap();
        drop(server);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn read_by_uuid_yields_every_entry_across_pages() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(512);
        let runner = tokio::spawn(transport.clone().run(client));

        let call = tokio::spawn({
            let transport = transport.clone();
            async move {
                read_by_uuid(&transport, Handle::from_u16(1), Handle::from_u16(0xFFFF), Uuid::from_u16(0x2A00)).await
            }
        });

        let mut buf = [0u8; 7];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        let mut first_resp = vec![opcode::READ_BY_TYPE_RESP, 3];
        first_resp.extend_from_slice(&1u16.to_le_bytes());
        first_resp.push(0xAA);
        first_resp.extend_from_slice(&2u16.to_le_bytes());
        first_resp.push(0xBB);
        tokio::io::AsyncWriteExt::write_all(&mut server, &first_resp).await.unwrap();

        tokio::io::AsyncReadExt::read_exact(&mut server, &mut buf).await.unwrap();
        let mut error_resp = vec![opcode::ERROR_RESP, opcode::READ_BY_TYPE_REQ];
        error_resp.extend_from_slice(&3u16.to_le_bytes());
        error_resp.push(AttErrorKind::AttributeNotFound.code());
        tokio::io::AsyncWriteExt::write_all(&mut server, &error_resp).await.unwrap();

        let values = call.await.unwrap().unwrap();
        assert_eq!(values, vec![vec![0xAA], vec![0xBB]]);

        drop(server);
        let _ = runner.await;
    }
}

//! GATT discovery procedures: primary services, included services, characteristics, and
//! characteristic descriptors.
//!
//! Every procedure here paginates over a handle range using the appropriate ATT request,
//! stopping either when the range is exhausted or when the peer replies `Attribute Not
//! Found` (the ATT-level "no more results" signal). A discovery procedure never terminates
//! early for any other reason: in particular, descriptor discovery (`FIND_INFO_REQ`) walks
//! every handle up to the end of the characteristic's range on its own terms, rather than
//! stopping because it sees a value it assumes belongs to the next characteristic.

use crate::{
    codec,
    error::{AttErrorKind, Error, ErrorKind},
    handle::Handle,
    model::{Characteristic, Descriptor, IncludedService, PrimaryService, Properties},
    transport::{Transport, REQUEST_TIMEOUT},
    uuid_ext::UuidExt,
};
use std::sync::Arc;
use uuid::Uuid;

const PRIMARY_SERVICE: u16 = 0x2800;
const INCLUDE: u16 = 0x2802;
const CHARACTERISTIC: u16 = 0x2803;

fn is_attribute_not_found(err: &Error) -> bool {
    matches!(&err.kind, ErrorKind::Att(AttErrorKind::AttributeNotFound))
}

async fn submit_and_wait(transport: &Arc<Transport>, pdu: Vec<u8>) -> Result<Vec<u8>, Error> {
    let completion = transport.submit(pdu);
    completion.wait_async(REQUEST_TIMEOUT).await.map(|payload| payload.into_one().unwrap_or_default())
}

/// Discovers every primary service in `0x0001..=0xFFFF`.
pub async fn discover_primary_services(transport: &Arc<Transport>) -> Result<Vec<PrimaryService>, Error> {
    discover_primary_services_in_range(transport, Handle::MIN, Handle::MAX).await
}

/// Discovers every primary service within `start..=end`.
pub async fn discover_primary_services_in_range(
    transport: &Arc<Transport>,
    start: Handle,
    end: Handle,
) -> Result<Vec<PrimaryService>, Error> {
    let mut services = Vec::new();
    let mut cursor = start;
    loop {
        let pdu = codec::encode_read_by_group_req(cursor, end, Uuid::from_u16(PRIMARY_SERVICE));
        let response = match submit_and_wait(transport, pdu).await {
            Ok(bytes) => bytes,
            Err(err) if is_attribute_not_found(&err) => break,
            Err(err) => return Err(err),
        };
        let entries = codec::decode_read_by_group_resp(&response)?;
        let Some(last) = entries.last() else { break };
        let last_end = last.end;
        for entry in entries {
            services.push(PrimaryService {
                handle: entry.start,
                end_group_handle: entry.end,
                uuid: codec::decode_uuid(&entry.value)?,
            });
        }
        if last_end >= end {
            break;
        }
        cursor = last_end.next();
    }
    Ok(services)
}

/// Discovers the services included by the service spanning `start..=end`.
pub async fn discover_included_services(
    transport: &Arc<Transport>,
    start: Handle,
    end: Handle,
) -> Result<Vec<IncludedService>, Error> {
    let mut included = Vec::new();
    let mut cursor = start;
    loop {
        let pdu = codec::encode_read_by_type_req(cursor, end, Uuid::from_u16(INCLUDE));
        let response = match submit_and_wait(transport, pdu).await {
            Ok(bytes) => bytes,
            Err(err) if is_attribute_not_found(&err) => break,
            Err(err) => return Err(err),
        };
        let entries = codec::decode_read_by_type_resp(&response)?;
        let Some(last) = entries.last() else { break };
        let last_handle = last.handle;
        for entry in entries {
            if entry.value.len() < 4 {
                return Err(Error::msg(ErrorKind::Att(AttErrorKind::InvalidPdu), "include declaration too short"));
            }
            let start_handle = Handle::from_u16(u16::from_le_bytes([entry.value[0], entry.value[1]]));
            let end_group_handle = Handle::from_u16(u16::from_le_bytes([entry.value[2], entry.value[3]]));
            let uuid = match entry.value.len() {
                6 => Some(Uuid::from_u16(u16::from_le_bytes([entry.value[4], entry.value[5]]))),
                4 => None,
                _ => return Err(Error::msg(ErrorKind::Att(AttErrorKind::InvalidPdu), "include declaration malformed")),
            };
            included.push(IncludedService { handle: entry.handle, start_handle, end_group_handle, uuid });
        }
        if last_handle >= end {
            break;
        }
        cursor = last_handle.next();
    }
    Ok(included)
}

/// Discovers every characteristic declared within `start..=end`, optionally filtered to a
/// single characteristic UUID (§4.E: "discard entries whose uuid ≠ the caller's filter").
pub async fn discover_characteristics(
    transport: &Arc<Transport>,
    start: Handle,
    end: Handle,
    uuid: Option<Uuid>,
) -> Result<Vec<Characteristic>, Error> {
    let mut characteristics = Vec::new();
    let mut cursor = start;
    loop {
        let pdu = codec::encode_read_by_type_req(cursor, end, Uuid::from_u16(CHARACTERISTIC));
        let response = match submit_and_wait(transport, pdu).await {
            Ok(bytes) => bytes,
            Err(err) if is_attribute_not_found(&err) => break,
            Err(err) => return Err(err),
        };
        let entries = codec::decode_read_by_type_resp(&response)?;
        let Some(last) = entries.last() else { break };
        let last_handle = last.handle;
        for entry in entries {
            if entry.value.len() < 3 {
                return Err(Error::msg(ErrorKind::Att(AttErrorKind::InvalidPdu), "characteristic declaration too short"));
            }
            let properties = Properties::from_bits_truncate(entry.value[0]);
            let value_handle = Handle::from_u16(u16::from_le_bytes([entry.value[1], entry.value[2]]));
            let char_uuid = codec::decode_uuid(&entry.value[3..])?;
            if uuid.is_some_and(|filter| filter != char_uuid) {
                continue;
            }
            characteristics.push(Characteristic {
                declaration_handle: entry.handle,
                value_handle,
                properties,
                uuid: char_uuid,
            });
        }
        if last_handle >= end {
            break;
        }
        cursor = last_handle.next();
    }
    Ok(characteristics)
}

/// Discovers every descriptor within `start..=end` (typically a characteristic's value
/// handle, exclusive, through the handle preceding the next characteristic or the service's
/// end group handle), optionally filtered to a single descriptor UUID.
pub async fn discover_descriptors(
    transport: &Arc<Transport>,
    start: Handle,
    end: Handle,
    uuid: Option<Uuid>,
) -> Result<Vec<Descriptor>, Error> {
    let mut descriptors = Vec::new();
    let mut cursor = start;
    loop {
        let pdu = codec::encode_find_info_req(cursor, end);
        let response = match submit_and_wait(transport, pdu).await {
            Ok(bytes) => bytes,
            Err(err) if is_attribute_not_found(&err) => break,
            Err(err) => return Err(err),
        };
        let entries = codec::decode_find_info_resp(&response)?;
        let Some(last) = entries.last() else { break };
        let last_handle = last.handle;
        for entry in entries {
            if uuid.is_some_and(|filter| filter != entry.uuid) {
                continue;
            }
            descriptors.push(Descriptor { handle: entry.handle, uuid: entry.uuid });
        }
        if last_handle >= end {
            break;
        }
        cursor = last_handle.next();
    }
    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::opcode, transport::Transport};

    async fn drive_one_request(server: &mut tokio::io::DuplexStream, response: &[u8]) -> Vec<u8> {
        let mut header = [0u8; 7];
        let n = tokio::io::AsyncReadExt::read(server, &mut header).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(server, response).await.unwrap();
        header[..n].to_vec()
    }

    #[tokio::test]
    async fn primary_service_discovery_paginates_until_full_range() {
        let transport = Transport::new();
        let (client, mut server) = tokio::io::duplex(512);
        let runner = tokio::spawn(transport.clone().run(client));

        let discovery = tokio::spawn({
            let transport = transport.clone();
            async move { discover_primary_services(&transport).await }
        });

        let mut first_resp = vec![opcode::READ_BY_GROUP_RESP, 6];
        first_resp.extend_from_slice(&1u16.to_le_bytes());
        first_resp.extend_from_slice(&5u16.to_le_bytes());
        first_resp.extend_from_slice(&0x1800u16.to_le_bytes());
        drive_one_request(&mut server, &first_resp).await;

        let mut error_resp = vec![opcode::ERROR_RESP, opcode::READ_BY_GROUP_REQ];
        error_resp.extend_from_slice(&6u16.to_le_bytes());
        error_resp.push(AttErrorKind::AttributeNotFound.code());
        drive_one_request(&mut server, &error_resp).await;

        let services = discovery.await.unwrap().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].handle, Handle::from_u16(1));
        assert_eq!(services[0].end_group_handle, Handle::from_u16(5));

        drop(server);
        let _ = runner.await;
    }
}

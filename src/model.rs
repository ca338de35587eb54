//! GATT data model: services, characteristics, descriptors, and the properties bitmask.

use crate::handle::Handle;
use uuid::Uuid;

bitflags::bitflags! {
    /// Characteristic properties, as carried in the value of a Characteristic Declaration.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Properties: u8 {
        /// Permits broadcasts of the characteristic value.
        const BROADCAST = 0x01;
        /// Permits reads of the characteristic value.
        const READ = 0x02;
        /// Permits writes without a response.
        const WRITE_WITHOUT_RESPONSE = 0x04;
        /// Permits writes with a response.
        const WRITE = 0x08;
        /// Permits notifications of the characteristic value without acknowledgement.
        const NOTIFY = 0x10;
        /// Permits indications of the characteristic value with acknowledgement.
        const INDICATE = 0x20;
        /// Permits signed writes to the characteristic value.
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        /// Additional characteristic properties are defined in the Characteristic Extended
        /// Properties descriptor.
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// Client Characteristic Configuration Descriptor (CCCD) bit values, written to enable
/// server-initiated updates.
pub mod cccd {
    /// Enables notifications.
    pub const NOTIFICATION: u16 = 0x0001;
    /// Enables indications.
    pub const INDICATION: u16 = 0x0002;
}

/// A primary or secondary service, as discovered by `GATT Discover Primary Services`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryService {
    /// Handle of the service declaration.
    pub handle: Handle,
    /// Handle of the last attribute belonging to this service (inclusive).
    pub end_group_handle: Handle,
    /// Service UUID.
    pub uuid: Uuid,
}

/// A service included by another service, as discovered by `GATT Find Included Services`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IncludedService {
    /// Handle of the Include declaration.
    pub handle: Handle,
    /// Handle of the first attribute of the included service.
    pub start_handle: Handle,
    /// Handle of the last attribute of the included service.
    pub end_group_handle: Handle,
    /// Service UUID, present only when it has a 16-bit short form (the wire PDU omits it
    /// otherwise and a separate read is required to discover it).
    pub uuid: Option<Uuid>,
}

/// A characteristic, as discovered by `GATT Discover Characteristics`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Characteristic {
    /// Handle of the Characteristic Declaration attribute.
    pub declaration_handle: Handle,
    /// Handle at which the characteristic value itself is stored.
    pub value_handle: Handle,
    /// Properties bitmask.
    pub properties: Properties,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

/// A characteristic descriptor, as discovered by `GATT Discover All Characteristic
/// Descriptors`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Descriptor {
    /// Handle of the descriptor.
    pub handle: Handle,
    /// Descriptor UUID.
    pub uuid: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_bitmask_matches_wire_values() {
        let props = Properties::READ | Properties::NOTIFY;
        assert_eq!(props.bits(), 0x02 | 0x10);
        assert!(props.contains(Properties::READ));
        assert!(!props.contains(Properties::WRITE));
    }

    #[test]
    fn properties_from_wire_byte_round_trips() {
        let props = Properties::from_bits_truncate(0x1E);
        assert!(props.contains(Properties::WRITE));
        assert!(props.contains(Properties::INDICATE));
        assert!(!props.contains(Properties::BROADCAST));
    }
}

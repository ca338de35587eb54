//! GATT procedures built on top of the ATT transport: discovery and data access.

pub mod access;
pub mod discovery;

pub use crate::model::{Characteristic, Descriptor, IncludedService, PrimaryService, Properties};

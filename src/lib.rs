#![cfg_attr(docsrs, feature(doc_cfg))]

//! # attrib — client-side Bluetooth Low Energy ATT/GATT
//!
//! This library implements a Bluetooth Low Energy Attribute Protocol (ATT) client and GATT
//! consumer on top of raw L2CAP sockets opened against the Linux kernel's BlueZ stack.
//! It does not implement a GATT server, advertising, pairing/bonding, RFCOMM, or any
//! classic (BR/EDR) profile — only the client role of ATT/GATT over LE.
//!
//! The following functionality is provided:
//!
//! * connecting to a peer's ATT fixed channel ([`Requester::connect`]/[`Requester::connect_blocking`])
//! * [GATT discovery](gatt::discovery): primary services, included services,
//!   characteristics, and characteristic descriptors
//! * [GATT data access](gatt::access): reads by handle or by UUID, writes (with and without
//!   response), long reads/writes via `Read Blob`/`Prepare Write`/`Execute Write`, MTU exchange,
//!   and notification/indication subscription
//! * [`Requester::update_connection_parameters`], an `LE Connection Update` request issued over
//!   a raw [HCI socket](hci)
//! * both asynchronous and blocking forms of every operation, all driven from one dedicated
//!   [event loop](event_loop) worker thread
//!
//! This library depends on the [tokio] asynchronous runtime.
//!
//! ## Crate features
//!
//! * `bluetoothd`: enables adapter power-on via a running Bluetooth daemon (`bluetoothd`)
//!   over D-Bus. Without it, the caller is responsible for powering the adapter before
//!   connecting.
//! * `serde`: adds [`serde::Serialize`]/[`serde::Deserialize`] to the data-model and error
//!   types.

pub mod addr;
#[cfg(feature = "bluetoothd")]
pub mod adapter;
pub mod codec;
pub mod command;
pub mod completion;
pub mod error;
pub mod event_loop;
pub mod gatt;
pub mod handle;
pub mod hci;
pub mod link;
pub mod model;
pub mod requester;
mod sock;
mod sys;
pub mod transport;
pub mod uuid_ext;

pub use addr::{Address, AddressType, InvalidAddress};
pub use error::{AttErrorKind, Error, ErrorKind, IoErrorKind, Result};
pub use handle::Handle;
pub use link::SecurityLevel;
pub use requester::{ConnectConfig, EventHandler, Requester};
pub use transport::{SubscriptionId, Transport};
pub use uuid_ext::UuidExt;

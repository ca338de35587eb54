//! The public connection facade: connect to a peer, discover its GATT database, and issue
//! reads/writes/notifications — from either an async caller or an ordinary blocking thread.
//!
//! Every `_blocking` method here is its plain `async fn` twin run to completion on the
//! shared [`crate::event_loop`] worker thread, with the result handed back across a
//! [`tokio::sync::oneshot`] channel. This keeps exactly one thread ever touching the
//! transport's socket, regardless of which thread — or which runtime — the caller is on.

use crate::{
    addr::{Address, AddressType},
    error::Error,
    event_loop,
    gatt::{access, discovery},
    handle::Handle,
    link::{AttSocket, SecurityLevel},
    model::{Characteristic, Descriptor, IncludedService, PrimaryService},
    transport::{NotifyCallback, SubscriptionId, Transport},
};
use uuid::Uuid;

pub use crate::transport::EventHandler;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Configuration for [`Requester::connect`]/[`Requester::connect_blocking`].
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Local adapter address to bind through; [`Address::any`] lets the kernel pick.
    pub local_address: Address,
    pub local_address_type: AddressType,
    pub peer_address: Address,
    pub peer_address_type: AddressType,
    /// ATT MTU this client offers during `Exchange MTU`.
    pub client_mtu: u16,
    /// Link-layer security level required before the bearer is allowed to connect.
    pub security: SecurityLevel,
    /// L2CAP PSM to connect to; `0` selects the fixed ATT channel (the common case).
    pub psm: u16,
    /// D-Bus object path of the adapter to power on before connecting
    /// (feature `bluetoothd` only; ignored otherwise).
    pub adapter_path: String,
    /// Controller index (as reported by `hciconfig`/`btmgmt`) the raw HCI socket used by
    /// [`Requester::update_connection_parameters`] binds to.
    pub hci_dev_id: u16,
}

impl ConnectConfig {
    /// Builds a config with sensible defaults (any local adapter, MTU 247, low security, the
    /// fixed ATT channel) for `peer`.
    pub fn new(peer_address: Address, peer_address_type: AddressType) -> Self {
        Self {
            local_address: Address::any(),
            local_address_type: AddressType::LePublic,
            peer_address,
            peer_address_type,
            client_mtu: 247,
            security: SecurityLevel::Low,
            psm: 0,
            #[cfg(feature = "bluetoothd")]
            adapter_path: crate::adapter::DEFAULT_ADAPTER_PATH.to_string(),
            #[cfg(not(feature = "bluetoothd"))]
            adapter_path: String::new(),
            hci_dev_id: 0,
        }
    }
}

fn block_on<F>(fut: F) -> F::Output
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    event_loop::handle().spawn(async move {
        let _ = tx.send(fut.await);
    });
    rx.blocking_recv().expect("event loop worker thread dropped the result channel")
}

/// A connected GATT client, driven by the shared event loop worker thread.
#[derive(Clone)]
pub struct Requester {
    transport: Arc<Transport>,
    connected: Arc<AtomicBool>,
    peer_address: Address,
    hci_dev_id: u16,
}

impl Requester {
    /// Connects to the peer described by `config`, asynchronously, using a no-op event
    /// handler.
    pub async fn connect(config: ConnectConfig) -> Result<Self, Error> {
        Self::connect_with_handler(config, Arc::new(crate::transport::NoopHandler)).await
    }

    /// Connects to the peer described by `config`, asynchronously. `handler` receives
    /// lifecycle callbacks for as long as the connection lives.
    pub async fn connect_with_handler(config: ConnectConfig, handler: Arc<dyn EventHandler>) -> Result<Self, Error> {
        #[cfg(feature = "bluetoothd")]
        crate::adapter::power_on(&config.adapter_path).await?;

        let socket = match AttSocket::connect(
            config.local_address,
            config.local_address_type,
            config.peer_address,
            config.peer_address_type,
            config.security,
            config.psm,
        )
        .await
        {
            Ok(socket) => socket,
            Err(err) => {
                handler.on_connect_failed(&err);
                return Err(err);
            }
        };

        let transport = Transport::new();
        transport.set_handler(handler.clone());
        let connected = Arc::new(AtomicBool::new(true));

        let run_transport = transport.clone();
        let run_connected = connected.clone();
        let run_handler = handler.clone();
        event_loop::handle().spawn(async move {
            let result = run_transport.run(socket).await;
            run_connected.store(false, Ordering::SeqCst);
            if let Err(err) = &result {
                log::warn!("transport run loop ended: {err}");
            }
            run_handler.on_disconnect();
        });

        let mtu = match access::exchange_mtu(&transport, config.client_mtu).await {
            Ok(mtu) => mtu,
            Err(err) => {
                handler.on_connect_failed(&err);
                transport.cancel_all(Error::not_connected());
                return Err(err);
            }
        };
        handler.on_connect(mtu);

        Ok(Self { transport, connected, peer_address: config.peer_address, hci_dev_id: config.hci_dev_id })
    }

    /// Connects to the peer described by `config`, blocking the calling thread until the
    /// connection (and its initial MTU exchange) completes.
    pub fn connect_blocking(config: ConnectConfig) -> Result<Self, Error> {
        Self::connect_with_handler_blocking(config, Arc::new(crate::transport::NoopHandler))
    }

    /// As [`Requester::connect_blocking`], with an [`EventHandler`] for lifecycle notifications.
    pub fn connect_with_handler_blocking(config: ConnectConfig, handler: Arc<dyn EventHandler>) -> Result<Self, Error> {
        block_on(Self::connect_with_handler(config, handler))
    }

    /// Whether the bearer is still connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The currently negotiated ATT MTU.
    pub fn mtu(&self) -> u16 {
        self.transport.mtu()
    }

    /// Re-runs `Exchange MTU` with `client_mtu`, returning the newly negotiated value.
    ///
    /// The Attribute Protocol permits this only once per bearer; calling it again on a
    /// connection that has already exchanged MTU will fail at the peer (`RequestNotSupported`).
    pub async fn exchange_mtu(&self, client_mtu: u16) -> Result<u16, Error> {
        access::exchange_mtu(&self.transport, client_mtu).await
    }

    /// As [`Requester::exchange_mtu`], blocking the calling thread.
    pub fn exchange_mtu_blocking(&self, client_mtu: u16) -> Result<u16, Error> {
        let transport = self.transport.clone();
        block_on(async move { access::exchange_mtu(&transport, client_mtu).await })
    }

    /// Overrides the locally recorded ATT MTU without renegotiating with the peer. Useful
    /// when the MTU was already established out-of-band.
    pub fn set_mtu(&self, mtu: u16) {
        self.transport.set_mtu(mtu);
    }

    /// Disconnects the bearer, failing every outstanding command.
    pub fn disconnect(&self) {
        self.transport.cancel_all(Error::not_connected());
    }

    /// Requests the controller change this connection's link-layer parameters (connection
    /// interval, peripheral latency, supervision timeout) via a raw HCI `LE Connection
    /// Update` command.
    pub async fn update_connection_parameters(&self, params: crate::hci::ConnectionParams) -> Result<(), Error> {
        let peer = self.peer_address;
        let dev_id = self.hci_dev_id;
        tokio::task::spawn_blocking(move || Self::issue_connection_update(dev_id, peer, params))
            .await
            .map_err(|_| Error::invalid_arg("HCI worker task panicked"))?
    }

    /// As [`Requester::update_connection_parameters`], blocking the calling thread.
    pub fn update_connection_parameters_blocking(&self, params: crate::hci::ConnectionParams) -> Result<(), Error> {
        Self::issue_connection_update(self.hci_dev_id, self.peer_address, params)
    }

    fn issue_connection_update(
        dev_id: u16,
        peer: Address,
        params: crate::hci::ConnectionParams,
    ) -> Result<(), Error> {
        let hci = crate::hci::HciSocket::open(dev_id)?;
        let conn_handle = hci.connection_handle(peer)?;
        hci.le_connection_update(conn_handle, params)
    }

    pub async fn discover_primary_services(&self) -> Result<Vec<PrimaryService>, Error> {
        discovery::discover_primary_services(&self.transport).await
    }

    pub fn discover_primary_services_blocking(&self) -> Result<Vec<PrimaryService>, Error> {
        let transport = self.transport.clone();
        block_on(async move { discovery::discover_primary_services(&transport).await })
    }

    pub async fn discover_included_services(&self, start: Handle, end: Handle) -> Result<Vec<IncludedService>, Error> {
        discovery::discover_included_services(&self.transport, start, end).await
    }

    pub fn discover_included_services_blocking(
        &self,
        start: Handle,
        end: Handle,
    ) -> Result<Vec<IncludedService>, Error> {
        let transport = self.transport.clone();
        block_on(async move { discovery::discover_included_services(&transport, start, end).await })
    }

    pub async fn discover_characteristics(
        &self,
        start: Handle,
        end: Handle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<Characteristic>, Error> {
        discovery::discover_characteristics(&self.transport, start, end, uuid).await
    }

    pub fn discover_characteristics_blocking(
        &self,
        start: Handle,
        end: Handle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<Characteristic>, Error> {
        let transport = self.transport.clone();
        block_on(async move { discovery::discover_characteristics(&transport, start, end, uuid).await })
    }

    pub async fn discover_descriptors(
        &self,
        start: Handle,
        end: Handle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<Descriptor>, Error> {
        discovery::discover_descriptors(&self.transport, start, end, uuid).await
    }

    pub fn discover_descriptors_blocking(
        &self,
        start: Handle,
        end: Handle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<Descriptor>, Error> {
        let transport = self.transport.clone();
        block_on(async move { discovery::discover_descriptors(&transport, start, end, uuid).await })
    }

    pub async fn read_by_handle(&self, handle: Handle) -> Result<Vec<u8>, Error> {
        access::read_by_handle(&self.transport, handle).await
    }

    pub fn read_by_handle_blocking(&self, handle: Handle) -> Result<Vec<u8>, Error> {
        let transport = self.transport.clone();
        block_on(async move { access::read_by_handle(&transport, handle).await })
    }

    pub async fn read_by_uuid(&self, start: Handle, end: Handle, uuid: Uuid) -> Result<Vec<Vec<u8>>, Error> {
        access::read_by_uuid(&self.transport, start, end, uuid).await
    }

    pub fn read_by_uuid_blocking(&self, start: Handle, end: Handle, uuid: Uuid) -> Result<Vec<Vec<u8>>, Error> {
        let transport = self.transport.clone();
        block_on(async move { access::read_by_uuid(&transport, start, end, uuid).await })
    }

    pub async fn read_long(&self, handle: Handle) -> Result<Vec<u8>, Error> {
        access::read_long(&self.transport, handle).await
    }

    pub fn read_long_blocking(&self, handle: Handle) -> Result<Vec<u8>, Error> {
        let transport = self.transport.clone();
        block_on(async move { access::read_long(&transport, handle).await })
    }

    pub async fn write_by_handle(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        access::write_by_handle(&self.transport, handle, &value).await
    }

    pub fn write_by_handle_blocking(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        let transport = self.transport.clone();
        block_on(async move { access::write_by_handle(&transport, handle, &value).await })
    }

    pub async fn write_cmd(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        access::write_cmd(&self.transport, handle, &value).await
    }

    pub fn write_cmd_blocking(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        let transport = self.transport.clone();
        block_on(async move { access::write_cmd(&transport, handle, &value).await })
    }

    pub async fn write_long(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        access::write_long(&self.transport, handle, &value).await
    }

    pub fn write_long_blocking(&self, handle: Handle, value: Vec<u8>) -> Result<(), Error> {
        let transport = self.transport.clone();
        block_on(async move { access::write_long(&transport, handle, &value).await })
    }

    pub async fn enable_notifications(
        &self,
        value_handle: Handle,
        cccd_handle: Handle,
        indications: bool,
        callback: NotifyCallback,
    ) -> Result<SubscriptionId, Error> {
        access::enable_notifications(&self.transport, value_handle, cccd_handle, indications, callback).await
    }

    pub fn enable_notifications_blocking(
        &self,
        value_handle: Handle,
        cccd_handle: Handle,
        indications: bool,
        callback: NotifyCallback,
    ) -> Result<SubscriptionId, Error> {
        let transport = self.transport.clone();
        block_on(async move {
            access::enable_notifications(&transport, value_handle, cccd_handle, indications, callback).await
        })
    }

    pub async fn disable_notifications(&self, cccd_handle: Handle, subscription: SubscriptionId) -> Result<(), Error> {
        access::disable_notifications(&self.transport, cccd_handle, subscription).await
    }

    pub fn disable_notifications_blocking(
        &self,
        cccd_handle: Handle,
        subscription: SubscriptionId,
    ) -> Result<(), Error> {
        let transport = self.transport.clone();
        block_on(async move { access::disable_notifications(&transport, cccd_handle, subscription).await })
    }
}

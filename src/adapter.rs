//! Bluetooth adapter power-on via BlueZ over D-Bus.
//!
//! This crate's transport connects through a raw L2CAP socket and never talks to
//! `bluetoothd` for anything else; this module exists only because an unpowered adapter
//! rejects `connect(2)` outright, and callers using the default `bluetoothd` feature
//! shouldn't have to shell out to `bluetoothctl` first.

use dbus::nonblock::{stdintf::org_freedesktop_dbus::Properties, Proxy, SyncConnection};
use dbus_tokio::connection;
use std::{sync::Arc, time::Duration};
use tokio::task::spawn_blocking;

use crate::error::{Error, ErrorKind, IoErrorKind};

const SERVICE_NAME: &str = "org.bluez";
const ADAPTER_INTERFACE: &str = "org.bluez.Adapter1";
const TIMEOUT: Duration = Duration::from_secs(10);

/// Default adapter object path (`hci0`).
pub const DEFAULT_ADAPTER_PATH: &str = "/org/bluez/hci0";

async fn connect() -> Result<(tokio::task::JoinHandle<()>, Arc<SyncConnection>), Error> {
    let (resource, connection) = spawn_blocking(connection::new_system_sync)
        .await
        .map_err(|err| Error::msg(ErrorKind::Io(IoErrorKind::Os(0)), err.to_string()))??;
    let driver = tokio::spawn(async move {
        let err = resource.await;
        log::trace!("system bus connection lost: {}", err);
    });
    Ok((driver, connection))
}

fn adapter_path(adapter_path: &str) -> Result<dbus::Path<'static>, Error> {
    dbus::Path::new(adapter_path.to_string()).map_err(|_| {
        Error::msg(ErrorKind::Io(IoErrorKind::InvalidArgument(adapter_path.to_string())), "invalid adapter path")
    })
}

async fn set_powered(connection: &Arc<SyncConnection>, path: &str, powered: bool) -> Result<(), Error> {
    let proxy = Proxy::new(SERVICE_NAME, adapter_path(path)?, TIMEOUT, connection.clone());
    proxy.set(ADAPTER_INTERFACE, "Powered", powered).await?;
    Ok(())
}

/// Powers on the named BlueZ adapter (e.g. `/org/bluez/hci0`), connecting to the system bus
/// for the duration of the call.
///
/// Returns once `org.bluez.Adapter1.Powered` has been set; does not wait for the controller
/// to finish settling (BlueZ reports the property as set before power-up necessarily
/// completes).
pub async fn power_on(path: &str) -> Result<(), Error> {
    let (driver, connection) = connect().await?;
    let result = set_powered(&connection, path, true).await;
    driver.abort();
    result
}

/// Powers off the named BlueZ adapter.
pub async fn power_off(path: &str) -> Result<(), Error> {
    let (driver, connection) = connect().await?;
    let result = set_powered(&connection, path, false).await;
    driver.abort();
    result
}

/// Reports whether the named BlueZ adapter is currently powered.
pub async fn is_powered(path: &str) -> Result<bool, Error> {
    let (driver, connection) = connect().await?;
    let proxy = Proxy::new(SERVICE_NAME, adapter_path(path)?, TIMEOUT, connection.clone());
    let result = proxy.get(ADAPTER_INTERFACE, "Powered").await.map_err(Error::from);
    driver.abort();
    result
}

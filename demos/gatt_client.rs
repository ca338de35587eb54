//! Connects to a peer's ATT fixed channel, discovers its GATT database, and reads the value
//! of every readable characteristic.

use attrib::{AddressType, ConnectConfig, Requester};
use std::env;

#[tokio::main(flavor = "current_thread")]
async fn main() -> attrib::Result<()> {
    env_logger::init();

    let peer: String = env::args().nth(1).expect("usage: gatt_client <peer-address>");
    let peer_address = peer.parse().expect("invalid peer address");
    let config = ConnectConfig::new(peer_address, AddressType::LeRandom);

    println!("Connecting to {}", peer_address);
    let requester = Requester::connect(config).await?;
    println!("Connected, negotiated MTU {}", requester.mtu());

    let services = requester.discover_primary_services().await?;
    for service in services {
        println!("Service {} ({}..={})", service.uuid, service.handle, service.end_group_handle);

        let characteristics =
            requester.discover_characteristics(service.handle.next(), service.end_group_handle, None).await?;
        for characteristic in characteristics {
            println!("    Characteristic {} (value handle {})", characteristic.uuid, characteristic.value_handle);

            if characteristic.properties.contains(attrib::model::Properties::READ) {
                match requester.read_by_handle(characteristic.value_handle).await {
                    Ok(value) => println!("        Value: {value:?}"),
                    Err(err) => println!("        Read failed: {err}"),
                }
            }
        }
    }

    requester.disconnect();
    Ok(())
}

//! BLE central link to the OBD2 adapter via the NimBLE host stack.
//!
//! NimBLE's client API is async; every call here is driven to completion
//! with `block_on` on the link task. Notifications arrive on the NimBLE
//! host task and go straight into the session's fragment sink.

use anyhow::{anyhow, Result};
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{BLEAddress, BLEAddressType, BLEClient, BLEDevice, BLERemoteCharacteristic};
use esp_idf_hal::task::block_on;
use gaugelink_core::{FragmentSink, RadioLink, TransportError};
use log::{debug, info, warn};

/// Bring up the NimBLE host and set the advertised name
pub fn init_device(name: &str) -> Result<()> {
    let _device = BLEDevice::take();
    BLEDevice::set_device_name(name).map_err(|e| anyhow!("Failed to set BLE name: {e:?}"))?;
    info!("BLE host started as {name:?}");
    Ok(())
}

fn parse_uuid(uuid: &str) -> Result<BleUuid, TransportError> {
    BleUuid::from_uuid128_string(uuid).map_err(|e| {
        warn!("Invalid UUID {uuid:?}: {e:?}");
        TransportError::CharacteristicNotFound
    })
}

/// Discovered endpoints of the adapter's UART service
#[derive(Clone, Copy)]
struct Endpoints {
    service: BleUuid,
    tx: BleUuid,
    rx: BleUuid,
}

pub struct NimbleLink {
    client: BLEClient,
    endpoints: Option<Endpoints>,
}

impl NimbleLink {
    pub fn new() -> Self {
        Self {
            client: BLEClient::new(),
            endpoints: None,
        }
    }

    /// Look up a characteristic of the adapter service (cached by NimBLE
    /// after the first discovery)
    async fn characteristic(
        client: &mut BLEClient,
        service: BleUuid,
        uuid: BleUuid,
    ) -> Result<&mut BLERemoteCharacteristic, TransportError> {
        let service = client
            .get_service(service)
            .await
            .map_err(|_| TransportError::ServiceNotFound)?;
        service
            .get_characteristic(uuid)
            .await
            .map_err(|_| TransportError::CharacteristicNotFound)
    }

    fn endpoints(&self) -> Result<Endpoints, TransportError> {
        self.endpoints.ok_or(TransportError::CharacteristicNotFound)
    }
}

impl RadioLink for NimbleLink {
    fn connect(&mut self, address: &str) -> Result<(), TransportError> {
        let addr = BLEAddress::from_str(address, BLEAddressType::Public)
            .ok_or_else(|| TransportError::ConnectFailed(format!("invalid address {address}")))?;

        self.endpoints = None;
        block_on(self.client.connect(&addr))
            .map_err(|e| TransportError::ConnectFailed(format!("{e:?}")))?;
        debug!("BLE connected to {address}");
        Ok(())
    }

    fn discover(&mut self, service: &str, tx: &str, rx: &str) -> Result<(), TransportError> {
        let endpoints = Endpoints {
            service: parse_uuid(service)?,
            tx: parse_uuid(tx)?,
            rx: parse_uuid(rx)?,
        };

        block_on(async {
            Self::characteristic(&mut self.client, endpoints.service, endpoints.tx).await?;
            let rx = Self::characteristic(&mut self.client, endpoints.service, endpoints.rx).await?;
            if rx.can_notify() {
                Ok(())
            } else {
                Err(TransportError::NotifyUnsupported)
            }
        })?;

        self.endpoints = Some(endpoints);
        Ok(())
    }

    fn subscribe(&mut self, sink: FragmentSink) -> Result<(), TransportError> {
        let endpoints = self.endpoints()?;
        block_on(async {
            let rx = Self::characteristic(&mut self.client, endpoints.service, endpoints.rx).await?;
            rx.on_notify(move |data| sink.deliver(data))
                .subscribe_notify(false)
                .await
                .map_err(|_| TransportError::NotifyUnsupported)
        })?;
        debug!("Subscribed to adapter notifications");
        Ok(())
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if !self.client.connected() {
            return Err(TransportError::NotConnected);
        }
        let endpoints = self.endpoints()?;
        block_on(async {
            let tx = Self::characteristic(&mut self.client, endpoints.service, endpoints.tx).await?;
            tx.write_value(payload, false)
                .await
                .map_err(|e| TransportError::WriteFailed(format!("{e:?}")))
        })
    }

    fn disconnect(&mut self) {
        self.endpoints = None;
        if self.client.connected() {
            if let Err(e) = self.client.disconnect() {
                warn!("BLE disconnect failed: {e:?}");
            }
        }
    }
}

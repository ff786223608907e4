//! BLE radio link abstraction.
//!
//! The adapter exposes one GATT service with a write ("TX") characteristic
//! for commands and a notify ("RX") characteristic for responses.

use derive_more::{Display, Error};

use crate::session::FragmentSink;

/// Errors from the radio link
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum TransportError {
    #[display("BLE connection failed: {_0}")]
    ConnectFailed(#[error(not(source))] String),
    #[display("Service not found")]
    ServiceNotFound,
    #[display("Characteristic not found")]
    CharacteristicNotFound,
    #[display("RX characteristic cannot notify")]
    NotifyUnsupported,
    #[display("Not connected")]
    NotConnected,
    #[display("Write failed: {_0}")]
    WriteFailed(#[error(not(source))] String),
}

/// Where to find the adapter and its UART-over-GATT endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTarget {
    /// Adapter MAC address (`aa:bb:cc:dd:ee:ff`)
    pub address: String,
    pub service_uuid: String,
    /// Characteristic commands are written to
    pub tx_uuid: String,
    /// Characteristic responses are notified on
    pub rx_uuid: String,
}

/// Connect/write/notify primitives of the BLE stack.
///
/// `subscribe` hands the link a [`FragmentSink`]; the link calls
/// [`FragmentSink::deliver`] from its own context for every notification.
pub trait RadioLink {
    fn connect(&mut self, address: &str) -> Result<(), TransportError>;

    /// Discover the service and both characteristics
    fn discover(&mut self, service: &str, tx: &str, rx: &str) -> Result<(), TransportError>;

    fn subscribe(&mut self, sink: FragmentSink) -> Result<(), TransportError>;

    /// Unacknowledged write of the full payload to the TX characteristic
    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    fn disconnect(&mut self);
}

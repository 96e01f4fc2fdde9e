use async_trait::async_trait;
use base64::Engine as _;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::error::DecodeError;

#[derive(Clone, Debug, PartialEq)]
pub struct BleDeviceInfo {
    pub id: String,
    pub name: String,
    pub rssi: i16,
}

/// A GATT service and the characteristics it exposes.
#[derive(Clone, Debug, PartialEq)]
pub struct GattService {
    pub uuid: String,
    pub characteristic_uuids: Vec<String>,
}

#[derive(Error, Clone, Debug, PartialEq)]
pub enum BleError {
    #[error("bluetooth permission denied")]
    PermissionDenied,
    #[error("bluetooth is off")]
    BluetoothOff,
    #[error("device not found")]
    DeviceNotFound,
    #[error("connection failed")]
    ConnectionFailed,
    #[error("service {0} not found")]
    ServiceNotFound(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(String),
    #[error("gatt error: {0}")]
    GattError(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("operation timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("unknown bluetooth error: {0}")]
    Unknown(String),
}

/// One notification: the raw characteristic value, or a terminal error.
pub type Notification = Result<Vec<u8>, BleError>;

/// Receiving half of a characteristic subscription.
///
/// Adapters push notifications into the paired sender in delivery order;
/// dropping the sender ends the stream.
#[derive(Debug)]
pub struct NotificationStream {
    rx: mpsc::Receiver<Notification>,
}

impl NotificationStream {
    pub fn new(rx: mpsc::Receiver<Notification>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<Notification>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Next notification, or `None` once the adapter has closed the stream.
    pub async fn next(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }
}

/// Connected-channel capability consumed by a sync session.
///
/// `scan` resolves once a device with the given name is seen and may wait
/// indefinitely; callers bound it with their own timeout.
#[async_trait]
pub trait BleAdapter: Send {
    type Session: Send;

    async fn scan(&mut self, device_name: &str) -> Result<BleDeviceInfo, BleError>;
    async fn connect(&mut self, device: &BleDeviceInfo) -> Result<Self::Session, BleError>;
    async fn discover_services(
        &mut self,
        session: &mut Self::Session,
    ) -> Result<Vec<GattService>, BleError>;
    async fn subscribe(
        &mut self,
        session: &mut Self::Session,
        service_uuid: &str,
        characteristic_uuid: &str,
    ) -> Result<NotificationStream, BleError>;
    async fn disconnect(&mut self, session: &mut Self::Session) -> Result<(), BleError>;
}

fn uuid_prefix(uuid: &str) -> String {
    uuid.chars().take(8).collect::<String>().to_lowercase()
}

/// Locate the log characteristic by the leading 8 characters of each UUID.
///
/// Platforms report UUIDs in different case and sometimes in 16-bit short
/// form expanded differently, so only the prefix is compared.
pub fn find_characteristic(
    services: &[GattService],
    service_uuid: &str,
    characteristic_uuid: &str,
) -> Result<(String, String), BleError> {
    let service_prefix = uuid_prefix(service_uuid);
    let service = services
        .iter()
        .find(|s| s.uuid.to_lowercase().contains(&service_prefix))
        .ok_or_else(|| BleError::ServiceNotFound(service_uuid.to_string()))?;

    let characteristic_prefix = uuid_prefix(characteristic_uuid);
    let characteristic = service
        .characteristic_uuids
        .iter()
        .find(|c| c.to_lowercase().contains(&characteristic_prefix))
        .ok_or_else(|| BleError::CharacteristicNotFound(characteristic_uuid.to_string()))?;

    Ok((service.uuid.clone(), characteristic.clone()))
}

/// Decode a characteristic value: base64 text carrying UTF-8.
pub fn decode_payload(raw: &[u8]) -> Result<String, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(raw.trim_ascii())
        .map_err(|_| DecodeError::InvalidBase64)?;
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

/// Inverse of [`decode_payload`], as the logger firmware encodes values.
pub fn encode_payload(text: &str) -> Vec<u8> {
    base64::engine::general_purpose::STANDARD
        .encode(text.as_bytes())
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    fn nus_services() -> Vec<GattService> {
        vec![
            GattService {
                uuid: "0000180A-0000-1000-8000-00805F9B34FB".to_string(),
                characteristic_uuids: vec!["00002a29-0000-1000-8000-00805f9b34fb".to_string()],
            },
            GattService {
                uuid: "6E400001-B5A3-F393-E0A9-E50E24DCCA9E".to_string(),
                characteristic_uuids: vec![
                    "6E400002-B5A3-F393-E0A9-E50E24DCCA9E".to_string(),
                    "6E400003-B5A3-F393-E0A9-E50E24DCCA9E".to_string(),
                ],
            },
        ]
    }

    #[test]
    fn test_find_characteristic_by_prefix() {
        let (service, characteristic) = find_characteristic(
            &nus_services(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e",
            "6e400003-b5a3-f393-e0a9-e50e24dcca9e",
        )
        .unwrap();
        assert_eq!(service, "6E400001-B5A3-F393-E0A9-E50E24DCCA9E");
        assert_eq!(characteristic, "6E400003-B5A3-F393-E0A9-E50E24DCCA9E");
    }

    #[test]
    fn test_find_characteristic_missing() {
        let err = find_characteristic(&nus_services(), "deadbeef-0000", "6e400003").unwrap_err();
        assert_eq!(err, BleError::ServiceNotFound("deadbeef-0000".to_string()));

        let err = find_characteristic(&nus_services(), "6e400001", "6e4000ff").unwrap_err();
        assert_eq!(err, BleError::CharacteristicNotFound("6e4000ff".to_string()));
    }

    #[test]
    fn test_payload_decoding() {
        let raw = encode_payload("{\"i\":0,");
        assert_eq!(raw, b"eyJpIjowLA==".to_vec());
        assert_eq!(decode_payload(&raw).unwrap(), "{\"i\":0,");

        assert_eq!(decode_payload(b"not base64!"), Err(DecodeError::InvalidBase64));
        let invalid_utf8 = base64::engine::general_purpose::STANDARD.encode([0xff, 0xfe]);
        assert_eq!(
            decode_payload(invalid_utf8.as_bytes()),
            Err(DecodeError::InvalidUtf8)
        );
    }

    #[tokio::test]
    async fn test_notification_stream_ends_when_sender_dropped() {
        let (tx, mut stream) = NotificationStream::channel(4);
        tx.send(Ok(b"abc".to_vec())).await.unwrap();
        tx.send(Err(BleError::Disconnected)).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(Ok(b"abc".to_vec())));
        assert_eq!(stream.next().await, Some(Err(BleError::Disconnected)));
        assert_eq!(stream.next().await, None);
    }
}

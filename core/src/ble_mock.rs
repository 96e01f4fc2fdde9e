use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::ble::{
    encode_payload, BleAdapter, BleDeviceInfo, BleError, GattService, NotificationStream,
};
use crate::config::{DEFAULT_CHARACTERISTIC_UUID, DEFAULT_DEVICE_NAME, DEFAULT_SERVICE_UUID};

/// One scripted step of a mock subscription.
#[derive(Clone, Debug)]
pub enum MockNotification {
    /// Text fragment, base64-encoded before delivery like the firmware does
    Fragment(String),
    /// Raw characteristic value delivered as-is
    Raw(Vec<u8>),
    Error(BleError),
    Delay(Duration),
}

#[derive(Clone, Debug, Default)]
pub struct MockSession {
    pub connected_device_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MockBleAdapter {
    pub devices: Vec<BleDeviceInfo>,
    pub services: Vec<GattService>,
    pub script: Vec<MockNotification>,
    /// Keep the stream open after the script runs out instead of closing it
    pub hold_open: bool,
    pub connect_error: Option<BleError>,
    /// Never complete `connect`
    pub connect_hangs: bool,
    disconnects: Arc<AtomicUsize>,
}

impl MockBleAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A logger advertising the standard service and streaming `text` in
    /// 20-byte notifications.
    pub fn with_log_text(text: &str) -> Self {
        Self {
            devices: vec![BleDeviceInfo {
                id: "mock-device-1".to_string(),
                name: DEFAULT_DEVICE_NAME.to_string(),
                rssi: -61,
            }],
            services: vec![GattService {
                uuid: DEFAULT_SERVICE_UUID.to_string(),
                characteristic_uuids: vec![DEFAULT_CHARACTERISTIC_UUID.to_string()],
            }],
            script: fragments(text, 20)
                .into_iter()
                .map(MockNotification::Fragment)
                .collect(),
            ..Self::default()
        }
    }

    /// A full 167-sample dive starting at `start_unix`, one sample per second.
    pub fn with_sample_data(start_unix: i64) -> Self {
        Self::with_log_text(&sample_log_text(start_unix, 167))
    }

    pub fn push(&mut self, step: MockNotification) -> &mut Self {
        self.script.push(step);
        self
    }

    /// Shared counter of `disconnect` calls, readable after the adapter is moved.
    pub fn disconnect_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.disconnects)
    }
}

/// Newline-delimited records for a dive of `count` samples.
pub fn sample_log_text(start_unix: i64, count: u32) -> String {
    (0..count)
        .map(|i| {
            let depth = 12.0 * (std::f64::consts::PI * i as f64 / count as f64).sin();
            format!(
                "{{\"i\":{},\"p\":{:.2},\"t\":{:.1},\"d\":{:.1},\"ts\":{}}}\n",
                i,
                1.013 + depth / 10.0,
                27.5 - depth / 10.0,
                depth,
                start_unix + i as i64
            )
        })
        .collect()
}

/// Split `text` into chunks of at most `size` bytes on char boundaries.
pub fn fragments(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if current.len() + ch.len_utf8() > size && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[async_trait]
impl BleAdapter for MockBleAdapter {
    type Session = MockSession;

    async fn scan(&mut self, device_name: &str) -> Result<BleDeviceInfo, BleError> {
        match self.devices.iter().find(|d| d.name == device_name) {
            Some(device) => Ok(device.clone()),
            // A real scan keeps listening until the caller gives up.
            None => std::future::pending().await,
        }
    }

    async fn connect(&mut self, device: &BleDeviceInfo) -> Result<Self::Session, BleError> {
        if let Some(err) = self.connect_error.clone() {
            return Err(err);
        }
        if self.connect_hangs {
            return std::future::pending().await;
        }
        let exists = self.devices.iter().any(|d| d.id == device.id);
        if !exists {
            return Err(BleError::DeviceNotFound);
        }
        Ok(MockSession {
            connected_device_id: Some(device.id.clone()),
        })
    }

    async fn discover_services(
        &mut self,
        session: &mut Self::Session,
    ) -> Result<Vec<GattService>, BleError> {
        if session.connected_device_id.is_none() {
            return Err(BleError::ConnectionFailed);
        }
        Ok(self.services.clone())
    }

    async fn subscribe(
        &mut self,
        session: &mut Self::Session,
        _service_uuid: &str,
        _characteristic_uuid: &str,
    ) -> Result<NotificationStream, BleError> {
        if session.connected_device_id.is_none() {
            return Err(BleError::ConnectionFailed);
        }

        let (tx, stream) = NotificationStream::channel(16);
        let script = self.script.clone();
        let hold_open = self.hold_open;
        tokio::spawn(async move {
            for step in script {
                let notification = match step {
                    MockNotification::Fragment(text) => Ok(encode_payload(&text)),
                    MockNotification::Raw(raw) => Ok(raw),
                    MockNotification::Error(err) => Err(err),
                    MockNotification::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                        continue;
                    }
                };
                if tx.send(notification).await.is_err() {
                    return;
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });
        Ok(stream)
    }

    async fn disconnect(&mut self, session: &mut Self::Session) -> Result<(), BleError> {
        session.connected_device_id = None;
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::decode_payload;

    #[test]
    fn test_fragments_respect_size() {
        let chunks = fragments("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
        assert_eq!(fragments("", 4), Vec::<String>::new());
    }

    #[test]
    fn test_sample_log_text_shape() {
        let text = sample_log_text(1_717_218_000, 167);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 167);
        assert!(lines[0].starts_with("{\"i\":0,"));
        assert!(lines[166].ends_with("\"ts\":1717218166}"));
    }

    #[tokio::test]
    async fn test_subscription_replays_script() {
        let mut adapter = MockBleAdapter::with_log_text("{\"i\":0}\n");
        let device = adapter.scan(DEFAULT_DEVICE_NAME).await.unwrap();
        let mut session = adapter.connect(&device).await.unwrap();
        let mut stream = adapter
            .subscribe(&mut session, DEFAULT_SERVICE_UUID, DEFAULT_CHARACTERISTIC_UUID)
            .await
            .unwrap();

        let mut received = String::new();
        while let Some(notification) = stream.next().await {
            received.push_str(&decode_payload(&notification.unwrap()).unwrap());
        }
        assert_eq!(received, "{\"i\":0}\n");
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let mut adapter = MockBleAdapter::new();
        let stranger = BleDeviceInfo {
            id: "other".to_string(),
            name: "Other".to_string(),
            rssi: -90,
        };
        assert_eq!(
            adapter.connect(&stranger).await.unwrap_err(),
            BleError::DeviceNotFound
        );
    }
}

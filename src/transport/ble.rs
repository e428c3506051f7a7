//! BLE GATT adapter.
//!
//! Requests are written to the write characteristic; the device answers on
//! the notify characteristic. The radio itself is abstracted behind
//! [`BleRadio`] so the host platform can provide it.
//!
//! # Reconnect
//!
//! When the radio reports an unsolicited disconnect, the link pump emits
//! `Disconnected { reconnecting: true }` and retries the last known device
//! with exponential backoff. Closing the link cancels a pending retry.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::protocol::decode;
use crate::settings::DeviceSettings;

use super::reconnect::{ReconnectOptions, ReconnectPolicy};
use super::{Adapter, AdapterEvent, EventSink, LinkCommand, LinkHandle, Target, TransportKind};

// ============================================================================
// Constants
// ============================================================================

/// GATT service exposed by the device.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xec2e0883_782d_433b_9a0c_6d5df5565410);

/// Characteristic requests are written to.
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xc2433dd7_137e_4e82_845e_a40f70dc4a8d);

/// Characteristic the device notifies on.
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xc2433dd7_137e_4e82_845e_a40f70dc4a8e);

// ============================================================================
// BleRadio
// ============================================================================

/// Event from the radio layer for one connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Value notified on a subscribed characteristic.
    Notification(Vec<u8>),
    /// The device dropped the connection.
    Disconnected,
}

/// BLE link primitive provided by the host platform.
#[async_trait]
pub trait BleRadio: Send + Sync {
    /// Connects to a device and returns its event stream.
    async fn connect(&self, device_id: &DeviceId) -> Result<mpsc::UnboundedReceiver<RadioEvent>>;

    /// Subscribes to notifications on a characteristic.
    async fn start_notifications(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()>;

    /// Writes the client configuration descriptor to enable notifications.
    async fn enable_notifications(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<()>;

    /// Writes a value to a characteristic.
    async fn write(
        &self,
        device_id: &DeviceId,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<()>;

    /// Disconnects from a device.
    async fn disconnect(&self, device_id: &DeviceId) -> Result<()>;
}

// ============================================================================
// BleAdapter
// ============================================================================

/// Opens BLE links and keeps them alive across radio drops.
pub struct BleAdapter {
    radio: Arc<dyn BleRadio>,
    settings: Arc<dyn DeviceSettings>,
    policy: Arc<Mutex<ReconnectPolicy>>,
}

impl BleAdapter {
    /// Creates an adapter over a radio.
    #[must_use]
    pub fn new(
        radio: Arc<dyn BleRadio>,
        settings: Arc<dyn DeviceSettings>,
        reconnect: ReconnectOptions,
    ) -> Self {
        Self {
            radio,
            settings,
            policy: Arc::new(Mutex::new(ReconnectPolicy::new(reconnect))),
        }
    }

    /// Returns the reconnect attempts made since the last reset.
    #[inline]
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.policy.lock().attempts()
    }
}

#[async_trait]
impl Adapter for BleAdapter {
    async fn open(&self, target: &Target, events: EventSink) -> Result<LinkHandle> {
        let Target::Ble { device_id } = target else {
            return Err(Error::config(format!("BLE adapter cannot open {target}")));
        };

        debug!(device = %device_id, link = %events.link(), "Opening BLE link");
        let radio_rx = establish(self.radio.as_ref(), device_id).await?;

        self.settings.set_last_device_id(Some(device_id.clone()));
        self.policy.lock().reset();
        info!(device = %device_id, "BLE link established");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = LinkHandle::new(events.link(), TransportKind::Ble, command_tx);

        let pump = LinkPump {
            radio: Arc::clone(&self.radio),
            settings: Arc::clone(&self.settings),
            policy: Arc::clone(&self.policy),
            device_id: device_id.clone(),
            events,
            commands: command_rx,
        };
        tokio::spawn(pump.run(radio_rx));

        Ok(handle)
    }
}

// ============================================================================
// Link Setup
// ============================================================================

/// Connects and subscribes, disconnecting again if the subscription fails.
async fn establish(
    radio: &dyn BleRadio,
    device_id: &DeviceId,
) -> Result<mpsc::UnboundedReceiver<RadioEvent>> {
    let radio_rx = radio.connect(device_id).await?;

    if let Err(e) = subscribe(radio, device_id).await {
        if let Err(disconnect_err) = radio.disconnect(device_id).await {
            debug!(device = %device_id, error = %disconnect_err, "Disconnect after failed subscription");
        }
        return Err(e);
    }

    Ok(radio_rx)
}

/// Subscribes to the notify characteristic, falling back once to an
/// explicit descriptor write.
async fn subscribe(radio: &dyn BleRadio, device_id: &DeviceId) -> Result<()> {
    let Err(first) = radio
        .start_notifications(device_id, SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
        .await
    else {
        return Ok(());
    };

    warn!(device = %device_id, error = %first, "Notification start failed, enabling via descriptor");

    radio
        .enable_notifications(device_id, SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
        .await
        .map_err(|e| Error::subscription(format!("{first}; descriptor write failed: {e}")))?;

    radio
        .start_notifications(device_id, SERVICE_UUID, NOTIFY_CHARACTERISTIC_UUID)
        .await
        .map_err(|e| Error::subscription(format!("{first}; retry failed: {e}")))
}

// ============================================================================
// LinkPump
// ============================================================================

/// Why [`LinkPump::serve`] returned.
enum Exit {
    Closed,
    Dropped,
}

/// Task owning one BLE link.
struct LinkPump {
    radio: Arc<dyn BleRadio>,
    settings: Arc<dyn DeviceSettings>,
    policy: Arc<Mutex<ReconnectPolicy>>,
    device_id: DeviceId,
    events: EventSink,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
}

impl LinkPump {
    async fn run(mut self, mut radio_rx: mpsc::UnboundedReceiver<RadioEvent>) {
        loop {
            match self.serve(&mut radio_rx).await {
                Exit::Closed => break,
                Exit::Dropped => match self.recover().await {
                    Some(next) => radio_rx = next,
                    None => break,
                },
            }
        }

        debug!(link = %self.events.link(), "BLE link pump terminated");
    }

    /// Moves data while the radio link is up.
    async fn serve(&mut self, radio_rx: &mut mpsc::UnboundedReceiver<RadioEvent>) -> Exit {
        loop {
            tokio::select! {
                event = radio_rx.recv() => match event {
                    Some(RadioEvent::Notification(raw)) => self.forward(raw),
                    Some(RadioEvent::Disconnected) | None => {
                        warn!(device = %self.device_id, "BLE link dropped");
                        return Exit::Dropped;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(LinkCommand::Send { payload, ack }) => {
                        let result = self
                            .radio
                            .write(&self.device_id, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, &payload)
                            .await
                            .map_err(|e| match e {
                                Error::Send { .. } => e,
                                other => Error::send(other.to_string()),
                            });
                        let _ = ack.send(result);
                    }

                    Some(LinkCommand::Close) | None => {
                        self.policy.lock().reset();
                        if let Err(e) = self.radio.disconnect(&self.device_id).await {
                            debug!(device = %self.device_id, error = %e, "BLE disconnect failed");
                        }
                        info!(device = %self.device_id, "BLE link closed");
                        return Exit::Closed;
                    }
                },
            }
        }
    }

    fn forward(&self, raw: Vec<u8>) {
        let parsed = match decode(&raw) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(device = %self.device_id, error = %e, "Undecodable notification");
                None
            }
        };
        self.events.emit(AdapterEvent::Data { raw, parsed });
    }

    /// Retries the last known device until it answers, the policy gives up,
    /// or the link is closed.
    async fn recover(&mut self) -> Option<mpsc::UnboundedReceiver<RadioEvent>> {
        let Some(device_id) = self.settings.last_device_id() else {
            debug!("No last known device, not reconnecting");
            self.events.emit(AdapterEvent::Disconnected { reconnecting: false });
            return None;
        };

        if !self.policy.lock().can_retry() {
            self.events.emit(AdapterEvent::Disconnected { reconnecting: false });
            return None;
        }

        self.events.emit(AdapterEvent::Disconnected { reconnecting: true });
        let radio = Arc::clone(&self.radio);

        loop {
            let Some(delay) = self.policy.lock().schedule() else {
                warn!(device = %device_id, "BLE reconnect attempts exhausted");
                self.events.emit(AdapterEvent::Disconnected { reconnecting: false });
                return None;
            };

            let attempt = self.policy.lock().attempts();
            info!(device = %device_id, attempt, ?delay, "Scheduling BLE reconnect");

            self.unless_closed(tokio::time::sleep(delay)).await?;

            let Some(outcome) = self.unless_closed(establish(radio.as_ref(), &device_id)).await else {
                let _ = radio.disconnect(&device_id).await;
                return None;
            };

            match outcome {
                Ok(radio_rx) => {
                    self.policy.lock().reset();
                    self.settings.set_last_device_id(Some(device_id.clone()));
                    info!(device = %device_id, attempt, "BLE link re-established");
                    self.device_id = device_id;
                    self.events.emit(AdapterEvent::Connected);
                    return Some(radio_rx);
                }
                Err(e) => warn!(device = %device_id, attempt, error = %e, "BLE reconnect failed"),
            }
        }
    }

    /// Drives `future` while serving commands. Writes are rejected; a close
    /// cancels the future, resets the policy and returns `None`.
    async fn unless_closed<F: Future>(&mut self, future: F) -> Option<F::Output> {
        tokio::pin!(future);

        loop {
            tokio::select! {
                output = &mut future => return Some(output),

                command = self.commands.recv() => match command {
                    Some(LinkCommand::Send { ack, .. }) => {
                        let _ = ack.send(Err(Error::send("BLE link is reconnecting")));
                    }
                    Some(LinkCommand::Close) | None => {
                        self.policy.lock().reset();
                        info!(device = %self.device_id, "BLE reconnect cancelled");
                        return None;
                    }
                },
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::Instant;

    use crate::protocol::Inbound;
    use crate::settings::MemorySettings;
    use crate::testing::MockRadio;
    use crate::transport::LinkEvent;

    fn adapter(radio: &Arc<MockRadio>) -> (BleAdapter, Arc<MemorySettings>) {
        let settings = Arc::new(MemorySettings::new());
        let adapter = BleAdapter::new(
            Arc::clone(radio) as Arc<dyn BleRadio>,
            Arc::clone(&settings) as Arc<dyn DeviceSettings>,
            ReconnectOptions::new(),
        );
        (adapter, settings)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> AdapterEvent {
        rx.recv().await.expect("link event").event
    }

    #[tokio::test]
    async fn test_open_records_device_and_moves_data() {
        let (radio, mut writes) = MockRadio::new();
        let (adapter, settings) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        assert_eq!(handle.kind(), TransportKind::Ble);
        assert_eq!(settings.last_device_id(), Some(DeviceId::new("dev-1")));

        handle.send(b"{\"requestType\":\"STATUS\"}".to_vec()).await.expect("send");
        assert_eq!(writes.recv().await.as_deref(), Some(&b"{\"requestType\":\"STATUS\"}"[..]));

        assert!(radio.notify(br#"{"requestType":"INTENSITY","intensity":7}"#));
        match next_event(&mut events).await {
            AdapterEvent::Data { parsed, .. } => {
                assert_eq!(parsed, Some(Inbound::Intensity { intensity: 7 }));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undecodable_notification_keeps_link() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        radio.notify(b"not json");

        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Data {
                raw: b"not json".to_vec(),
                parsed: None
            }
        );
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_subscription_falls_back_to_descriptor_write() {
        let (radio, _writes) = MockRadio::new();
        radio.fail_subscriptions(1);
        let (adapter, _) = adapter(&radio);

        let result = adapter.open(&Target::ble("dev-1"), EventSink::channel().0).await;
        assert!(result.is_ok());
        assert_eq!(radio.enable_calls(), 1);
    }

    #[tokio::test]
    async fn test_subscription_failure_after_fallback() {
        let (radio, _writes) = MockRadio::new();
        radio.fail_subscriptions(2);
        let (adapter, settings) = adapter(&radio);

        let err = adapter
            .open(&Target::ble("dev-1"), EventSink::channel().0)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Subscription { .. }));
        assert_eq!(radio.disconnects(), 1);
        assert_eq!(settings.last_device_id(), None);
    }

    #[tokio::test]
    async fn test_descriptor_write_failure() {
        let (radio, _writes) = MockRadio::new();
        radio.fail_subscriptions(1);
        radio.fail_enable();
        let (adapter, _) = adapter(&radio);

        let err = adapter
            .open(&Target::ble("dev-1"), EventSink::channel().0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Subscription { .. }));
    }

    #[tokio::test]
    async fn test_rejects_socket_target() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);

        let err = adapter
            .open(&Target::wifi("10.0.0.5"), EventSink::channel().0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(radio.connects(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_send_error() {
        let (radio, _writes) = MockRadio::new();
        radio.fail_writes();
        let (adapter, _) = adapter(&radio);

        let handle = adapter
            .open(&Target::ble("dev-1"), EventSink::channel().0)
            .await
            .expect("open");
        let err = handle.send(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Send { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_drop() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let _handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        let started = Instant::now();
        radio.drop_link();

        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Disconnected { reconnecting: true }
        );
        assert_eq!(next_event(&mut events).await, AdapterEvent::Connected);

        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(radio.connects(), 2);
        assert_eq!(adapter.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let _handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        radio.refuse_connects();
        let started = Instant::now();
        radio.drop_link();

        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Disconnected { reconnecting: true }
        );
        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Disconnected { reconnecting: false }
        );

        // 1 + 2 + 4 + 8 + 16
        assert_eq!(started.elapsed(), Duration::from_secs(31));
        assert_eq!(radio.connects(), 6);
        assert_eq!(adapter.reconnect_attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_scheduled_reconnect() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        radio.drop_link();
        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Disconnected { reconnecting: true }
        );
        assert_eq!(adapter.reconnect_attempts(), 1);

        handle.close();
        assert!(events.recv().await.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(radio.connects(), 1);
        assert_eq!(adapter.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_reconnecting_fails() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, _) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        radio.drop_link();
        next_event(&mut events).await;

        let err = handle.send(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Send { .. }));
    }

    #[tokio::test]
    async fn test_no_reconnect_without_last_device() {
        let (radio, _writes) = MockRadio::new();
        let (adapter, settings) = adapter(&radio);
        let (sink, mut events) = EventSink::channel();

        let _handle = adapter.open(&Target::ble("dev-1"), sink).await.expect("open");
        settings.set_last_device_id(None);
        radio.drop_link();

        assert_eq!(
            next_event(&mut events).await,
            AdapterEvent::Disconnected { reconnecting: false }
        );
        assert!(events.recv().await.is_none());
    }
}

//! Mock link primitives for unit tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::DeviceId;
use crate::protocol::Request;
use crate::transport::{BleRadio, LinkCommand, RadioEvent, SocketConnector, SocketLink};

// ============================================================================
// MockRadio
// ============================================================================

/// Scriptable [`BleRadio`].
pub struct MockRadio {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    enable_calls: AtomicUsize,
    subscribe_failures: AtomicUsize,
    refuse_connects: AtomicBool,
    enable_fails: AtomicBool,
    write_fails: AtomicBool,
    link: Mutex<Option<mpsc::UnboundedSender<RadioEvent>>>,
    writes: mpsc::UnboundedSender<Vec<u8>>,
}

impl MockRadio {
    /// Creates a radio and the receiver of every value written to it.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (writes, writes_rx) = mpsc::unbounded_channel();
        let radio = Self {
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            enable_calls: AtomicUsize::new(0),
            subscribe_failures: AtomicUsize::new(0),
            refuse_connects: AtomicBool::new(false),
            enable_fails: AtomicBool::new(false),
            write_fails: AtomicBool::new(false),
            link: Mutex::new(None),
            writes,
        };
        (Arc::new(radio), writes_rx)
    }

    /// Fails the next `count` notification starts.
    pub fn fail_subscriptions(&self, count: usize) {
        self.subscribe_failures.store(count, Ordering::SeqCst);
    }

    /// Fails every descriptor write.
    pub fn fail_enable(&self) {
        self.enable_fails.store(true, Ordering::SeqCst);
    }

    /// Fails every characteristic write.
    pub fn fail_writes(&self) {
        self.write_fails.store(true, Ordering::SeqCst);
    }

    /// Fails every further connect.
    pub fn refuse_connects(&self) {
        self.refuse_connects.store(true, Ordering::SeqCst);
    }

    /// Notifies a value on the current link.
    pub fn notify(&self, value: &[u8]) -> bool {
        self.link
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(RadioEvent::Notification(value.to_vec())).is_ok())
    }

    /// Simulates the device dropping the connection.
    pub fn drop_link(&self) {
        if let Some(tx) = self.link.lock().take() {
            let _ = tx.send(RadioEvent::Disconnected);
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BleRadio for MockRadio {
    async fn connect(&self, device_id: &DeviceId) -> Result<mpsc::UnboundedReceiver<RadioEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse_connects.load(Ordering::SeqCst) {
            return Err(Error::connection(format!("{device_id} unreachable")));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.link.lock() = Some(tx);
        Ok(rx)
    }

    async fn start_notifications(&self, _: &DeviceId, _: Uuid, _: Uuid) -> Result<()> {
        let failed = self
            .subscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::connection("GATT notify start rejected"));
        }
        Ok(())
    }

    async fn enable_notifications(&self, _: &DeviceId, _: Uuid, _: Uuid) -> Result<()> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        if self.enable_fails.load(Ordering::SeqCst) {
            return Err(Error::connection("descriptor write rejected"));
        }
        Ok(())
    }

    async fn write(&self, _: &DeviceId, _: Uuid, _: Uuid, value: &[u8]) -> Result<()> {
        if self.write_fails.load(Ordering::SeqCst) || self.link.lock().is_none() {
            return Err(Error::send("GATT write rejected"));
        }
        let _ = self.writes.send(value.to_vec());
        Ok(())
    }

    async fn disconnect(&self, _: &DeviceId) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.link.lock().take();
        Ok(())
    }
}

// ============================================================================
// MockConnector
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectMode {
    Accept,
    Hang,
    Refuse,
}

/// The device side of a mock socket.
pub struct MockPeer {
    /// URL the client connected to.
    pub url: String,
    /// Frames to deliver to the client. Dropping it closes the socket.
    pub remote: mpsc::UnboundedSender<Vec<u8>>,
    /// Payloads the client wrote.
    pub sent: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockPeer {
    /// Delivers a JSON value to the client.
    pub fn push(&self, value: serde_json::Value) {
        let _ = self.remote.send(value.to_string().into_bytes());
    }

    /// Waits for the next request of `request_type`, skipping status polls.
    pub async fn expect_request(&mut self, request_type: &str) -> serde_json::Value {
        expect_request(&mut self.sent, request_type).await
    }
}

/// Scriptable [`SocketConnector`].
pub struct MockConnector {
    mode: Mutex<ConnectMode>,
    open_delay: Mutex<Option<Duration>>,
    urls: Mutex<Vec<String>>,
    abandoned: Arc<AtomicBool>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockConnector {
    /// Creates a connector and the receiver of each accepted peer.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            mode: Mutex::new(ConnectMode::Accept),
            open_delay: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
            abandoned: Arc::new(AtomicBool::new(false)),
            peers,
        };
        (Arc::new(connector), peers_rx)
    }

    /// Accepts further connects.
    pub fn accept(&self) {
        *self.mode.lock() = ConnectMode::Accept;
    }

    /// Never completes further connects.
    pub fn hang(&self) {
        *self.mode.lock() = ConnectMode::Hang;
    }

    /// Refuses further connects.
    pub fn refuse(&self) {
        *self.mode.lock() = ConnectMode::Refuse;
    }

    /// Delays every further accepted connect by `delay`.
    pub fn slow(&self, delay: Duration) {
        *self.open_delay.lock() = Some(delay);
    }

    /// Returns every URL connected to so far.
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    /// Returns `true` once a hanging connect was dropped by its caller.
    pub fn abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SocketConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<SocketLink> {
        self.urls.lock().push(url.to_string());
        let mode = *self.mode.lock();

        match mode {
            ConnectMode::Refuse => return Err(Error::connection(format!("{url} refused"))),
            ConnectMode::Hang => {
                let _flag = DropFlag(Arc::clone(&self.abandoned));
                std::future::pending::<()>().await;
            }
            ConnectMode::Accept => {}
        }

        let delay = *self.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<LinkCommand>();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (remote, mut remote_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (sent_tx, sent) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = remote_rx.recv() => match frame {
                        Some(frame) => {
                            if frame_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },

                    command = command_rx.recv() => match command {
                        Some(LinkCommand::Send { payload, ack }) => {
                            let result = sent_tx
                                .send(payload)
                                .map_err(|_| Error::send("peer gone"));
                            let _ = ack.send(result);
                        }
                        Some(LinkCommand::Close) | None => break,
                    },
                }
            }
        });

        let _ = self.peers.send(MockPeer {
            url: url.to_string(),
            remote,
            sent,
        });

        Ok(SocketLink {
            commands: command_tx,
            frames: frame_rx,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Waits for the next written request of `request_type`, skipping status
/// polls unless they are what is expected.
pub async fn expect_request(
    rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    request_type: &str,
) -> serde_json::Value {
    loop {
        let payload = rx.recv().await.expect("request written");
        let value: serde_json::Value = serde_json::from_slice(&payload).expect("request JSON");
        let kind = value["requestType"].as_str().unwrap_or_default();

        if kind == request_type {
            return value;
        }
        assert_eq!(
            kind,
            Request::Status.request_type(),
            "unexpected request while waiting for {request_type}"
        );
    }
}

/// Yields until `condition` holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

//! Transport manager event loop.
//!
//! A single task owns the connection state, the active link, the pending
//! switch, the status snapshot and the poller. Callers reach it through
//! [`Command`]s; adapters report through [`LinkEvent`]s. Nothing here
//! blocks: adapter opens and writes run in spawned tasks and report back
//! as [`Internal`] messages.
//!
//! # Switch Handshake
//!
//! ```text
//! switch(kind) ──► SWITCH_TRANSPORT over current link
//!                        │
//!      status(reported = old kind) ──► merged, switch stays pending
//!      status(reported = kind) ─────► open socket (WIFI / REMOTE)
//!                                          │
//!                            opened ──► close old link, resolve
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{Level, debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{DeviceId, LinkId};
use crate::options::{DEFAULT_SERVER_URL, LinkOptions};
use crate::protocol::{DeviceStatus, Inbound, Request, encode};
use crate::transport::{
    Adapter, AdapterEvent, EventSink, LinkEvent, LinkHandle, Target, TransportKind,
};

use super::journal::DebugLog;
use super::poller::StatusPoller;
use super::state::{ConnectionState, PendingSwitch};
use super::{EventHandler, ManagerEvent};

// ============================================================================
// Messages
// ============================================================================

/// Request from a manager handle.
pub(crate) enum Command {
    /// Open a session to a target, replacing any current one.
    Connect {
        target: Target,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear the session down.
    Disconnect { reply: oneshot::Sender<()> },
    /// Look up the live link for a send.
    ActiveLink {
        reply: oneshot::Sender<Result<LinkHandle>>,
    },
    /// Move the session to another transport.
    Switch {
        kind: TransportKind,
        server_address: Option<String>,
        device_id: Option<DeviceId>,
        reply: oneshot::Sender<Result<DeviceStatus>>,
    },
    /// Stop the event loop.
    Shutdown,
}

/// Completion of work the loop spawned.
pub(crate) enum Internal {
    Opened {
        link: LinkId,
        result: Result<LinkHandle>,
    },
    SwitchSendFailed {
        switch: u64,
        error: Error,
    },
}

// ============================================================================
// Shared Snapshot
// ============================================================================

/// State readable from manager handles without a round trip.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub state: ConnectionState,
    pub status: Option<DeviceStatus>,
    pub pending: Option<PendingSwitch>,
    pub log: DebugLog,
}

// ============================================================================
// Loop State
// ============================================================================

/// What an in-flight open is for.
enum Purpose {
    Connect(oneshot::Sender<Result<()>>),
    /// Direct remote connect with no prior session.
    Pair,
    /// Socket for a confirmed switch.
    Handover { confirmed: DeviceStatus },
}

/// An adapter open that has not reported back yet.
struct Opening {
    link: LinkId,
    kind: TransportKind,
    purpose: Purpose,
    /// Events the new link raised before its handle arrived.
    early: Vec<AdapterEvent>,
}

impl Opening {
    fn abandon(self, error: Error) {
        if let Purpose::Connect(reply) = self.purpose {
            let _ = reply.send(Err(error));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwitchMode {
    Direct,
    Handover,
}

struct Switch {
    id: u64,
    view: PendingSwitch,
    mode: SwitchMode,
    deadline: Option<Instant>,
    reply: oneshot::Sender<Result<DeviceStatus>>,
}

// ============================================================================
// EventLoop
// ============================================================================

pub(crate) struct EventLoop {
    options: LinkOptions,
    ble: Option<Arc<dyn Adapter>>,
    socket: Arc<dyn Adapter>,
    shared: Arc<Mutex<Shared>>,
    event_handler: Arc<Mutex<Option<EventHandler>>>,

    commands: mpsc::UnboundedReceiver<Command>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    state: ConnectionState,
    active: Option<LinkHandle>,
    opening: Option<Opening>,
    switch: Option<Switch>,
    next_switch_id: u64,
    status: Option<DeviceStatus>,
    poller: StatusPoller,
}

impl EventLoop {
    pub(crate) fn new(
        options: LinkOptions,
        ble: Option<Arc<dyn Adapter>>,
        socket: Arc<dyn Adapter>,
        shared: Arc<Mutex<Shared>>,
        event_handler: Arc<Mutex<Option<EventHandler>>>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let poller = StatusPoller::new(options.status_interval);

        Self {
            options,
            ble,
            socket,
            shared,
            event_handler,
            commands,
            link_tx,
            link_rx,
            internal_tx,
            internal_rx,
            state: ConnectionState::Idle,
            active: None,
            opening: None,
            switch: None,
            next_switch_id: 0,
            status: None,
            poller,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Transport manager event loop started");

        loop {
            let deadline = self.switch.as_ref().and_then(|switch| switch.deadline);

            let flow = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => ControlFlow::Break(()),
                },

                Some(event) = self.link_rx.recv() => {
                    self.on_link_event(event);
                    ControlFlow::Continue(())
                }

                Some(message) = self.internal_rx.recv() => {
                    self.on_internal(message);
                    ControlFlow::Continue(())
                }

                () = self.poller.tick() => {
                    self.on_poll();
                    ControlFlow::Continue(())
                }

                () = wait_until(deadline) => {
                    self.on_switch_deadline();
                    ControlFlow::Continue(())
                }
            };

            self.publish();
            if flow.is_break() {
                break;
            }
        }

        self.teardown();
        self.publish();
        debug!("Transport manager event loop terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn on_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Connect { target, reply } => self.on_connect(target, reply),

            Command::Disconnect { reply } => {
                if !self.state.is_idle() || self.opening.is_some() {
                    self.set_state(ConnectionState::Disconnecting);
                    self.teardown();
                    self.note(Level::INFO, "Disconnected by user");
                }
                let _ = reply.send(());
            }

            Command::ActiveLink { reply } => {
                let _ = reply.send(self.active_link());
            }

            Command::Switch {
                kind,
                server_address,
                device_id,
                reply,
            } => self.on_switch(kind, server_address, device_id, reply),

            Command::Shutdown => return ControlFlow::Break(()),
        }

        ControlFlow::Continue(())
    }

    fn on_connect(&mut self, target: Target, reply: oneshot::Sender<Result<()>>) {
        if let Some(switch) = self.switch.take() {
            self.fail_switch(switch, Error::Superseded);
        }
        if let Some(opening) = self.opening.take() {
            opening.abandon(Error::Superseded);
        }
        if let Some(link) = self.active.take() {
            debug!(link = %link.id(), kind = %link.kind(), "Closing link for new connect");
            link.close();
        }
        self.poller.stop();
        self.set_status(None);

        let adapter = match self.adapter_for(target.kind()) {
            Ok(adapter) => adapter,
            Err(e) => {
                self.set_state(ConnectionState::Idle);
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.note(Level::INFO, format!("Connecting to {target}"));
        self.set_state(ConnectionState::Connecting);
        self.open(adapter, target, Purpose::Connect(reply));
    }

    fn on_switch(
        &mut self,
        kind: TransportKind,
        server_address: Option<String>,
        device_id: Option<DeviceId>,
        reply: oneshot::Sender<Result<DeviceStatus>>,
    ) {
        if let Some(previous) = self.switch.take() {
            self.note(
                Level::INFO,
                format!("Switch to {} superseded by switch to {kind}", previous.view.target),
            );
            self.fail_switch(previous, Error::Superseded);
        }

        let view = PendingSwitch {
            target: kind,
            server_address,
            device_id,
            awaiting_confirmation: true,
        };

        let link = match self.active_link() {
            Ok(link) => link,
            Err(_) if self.active.is_none() && kind == TransportKind::Remote => {
                self.start_pair(view, reply);
                return;
            }
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let payload = match encode(&Request::SwitchTransport {
            transport: kind,
            server_address: view.server_address.clone(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        // Paused until the switch resolves.
        self.poller.stop();

        let id = self.next_switch_id();
        self.switch = Some(Switch {
            id,
            view,
            mode: SwitchMode::Handover,
            deadline: self.options.switch_timeout.map(|timeout| Instant::now() + timeout),
            reply,
        });
        self.note(
            Level::INFO,
            format!("Requesting switch {} -> {kind}", link.kind()),
        );

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if let Err(error) = link.send(payload).await {
                let _ = internal_tx.send(Internal::SwitchSendFailed { switch: id, error });
            }
        });
    }

    /// Direct remote connect: no session yet, so pair through the relay and
    /// resolve on the first status.
    fn start_pair(&mut self, view: PendingSwitch, reply: oneshot::Sender<Result<DeviceStatus>>) {
        let (Some(server_address), Some(device_id)) =
            (view.server_address.clone(), view.device_id.clone())
        else {
            let error = if view.server_address.is_none() {
                Error::NotConnected
            } else {
                Error::config("direct remote connect requires a device id")
            };
            let _ = reply.send(Err(error));
            return;
        };

        if let Some(opening) = self.opening.take() {
            opening.abandon(Error::Superseded);
        }

        let target = Target::remote(server_address, device_id);
        self.note(Level::INFO, format!("Pairing through relay: {target}"));

        let id = self.next_switch_id();
        self.switch = Some(Switch {
            id,
            view,
            mode: SwitchMode::Direct,
            deadline: Some(Instant::now() + self.options.pair_timeout),
            reply,
        });

        self.set_state(ConnectionState::Connecting);
        let socket = Arc::clone(&self.socket);
        self.open(socket, target, Purpose::Pair);
    }

    fn active_link(&self) -> Result<LinkHandle> {
        match (self.state, &self.active) {
            (ConnectionState::Connected(_), Some(link)) => Ok(link.clone()),
            _ => Err(Error::NotConnected),
        }
    }

    // ========================================================================
    // Adapter Opens
    // ========================================================================

    fn adapter_for(&self, kind: TransportKind) -> Result<Arc<dyn Adapter>> {
        match kind {
            TransportKind::Ble => self
                .ble
                .clone()
                .ok_or_else(|| Error::config("no BLE radio configured")),
            TransportKind::Wifi | TransportKind::Remote => Ok(Arc::clone(&self.socket)),
        }
    }

    fn open(&mut self, adapter: Arc<dyn Adapter>, target: Target, purpose: Purpose) {
        let sink = EventSink::new(LinkId::generate(), self.link_tx.clone());
        let link = sink.link();

        if let Some(previous) = self.opening.replace(Opening {
            link,
            kind: target.kind(),
            purpose,
            early: Vec::new(),
        }) {
            previous.abandon(Error::Superseded);
        }

        debug!(%link, %target, "Opening link");

        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = adapter.open(&target, sink).await;
            let _ = internal_tx.send(Internal::Opened { link, result });
        });
    }

    fn on_internal(&mut self, message: Internal) {
        match message {
            Internal::Opened { link, result } => self.on_opened(link, result),

            Internal::SwitchSendFailed { switch, error } => {
                if self.switch.as_ref().is_some_and(|pending| pending.id == switch)
                    && let Some(pending) = self.switch.take()
                {
                    self.note(Level::ERROR, format!("Failed to send SWITCH_TRANSPORT: {error}"));
                    self.fail_switch(pending, error);
                }
            }
        }
    }

    fn on_opened(&mut self, link: LinkId, result: Result<LinkHandle>) {
        let Some(opening) = self.opening.take_if(|opening| opening.link == link) else {
            if let Ok(handle) = result {
                debug!(%link, "Closing link opened for an abandoned request");
                handle.close();
            }
            return;
        };

        let Opening {
            kind,
            purpose,
            early,
            ..
        } = opening;

        match (purpose, result) {
            (Purpose::Connect(reply), Ok(handle)) => {
                self.active = Some(handle);
                self.note(Level::INFO, format!("{kind} link established"));
                self.set_state(ConnectionState::Connected(kind));
                self.poller.restart();
                let _ = reply.send(Ok(()));
            }

            (Purpose::Connect(reply), Err(e)) => {
                self.note(Level::ERROR, format!("{kind} connect failed: {e}"));
                self.set_state(ConnectionState::Idle);
                let _ = reply.send(Err(e));
            }

            (Purpose::Pair, Ok(handle)) => {
                self.note(Level::DEBUG, "Relay socket open, waiting for status");
                self.request_status(handle.clone());
                self.active = Some(handle);
            }

            (Purpose::Pair, Err(e)) => {
                if let Some(switch) = self.switch.take() {
                    self.note(Level::ERROR, format!("Relay connect failed: {e}"));
                    self.fail_switch(switch, e);
                }
            }

            (Purpose::Handover { confirmed }, Ok(handle)) => {
                if let Some(old) = self.active.replace(handle) {
                    debug!(link = %old.id(), kind = %old.kind(), "Closing previous link");
                    old.close();
                }
                self.set_state(ConnectionState::Connected(kind));
                self.resolve_switch(confirmed);
            }

            (Purpose::Handover { .. }, Err(e)) => {
                if let Some(switch) = self.switch.take() {
                    self.note(Level::ERROR, format!("{kind} handover failed: {e}"));
                    self.fail_switch(switch, e);
                }
            }
        }

        if self.active.as_ref().is_some_and(|active| active.id() == link) {
            for event in early {
                self.on_active_event(event);
            }
        }
    }

    // ========================================================================
    // Link Events
    // ========================================================================

    fn on_link_event(&mut self, event: LinkEvent) {
        if self.active.as_ref().is_some_and(|active| active.id() == event.link) {
            self.on_active_event(event.event);
        } else if let Some(opening) = self.opening.as_mut()
            && opening.link == event.link
        {
            opening.early.push(event.event);
        } else {
            trace!(link = %event.link, "Dropping event from stale link");
        }
    }

    fn on_active_event(&mut self, event: AdapterEvent) {
        match event {
            AdapterEvent::Data { raw, parsed } => match parsed {
                Some(Inbound::Status(status)) => self.on_status(status),

                Some(Inbound::Intensity { intensity }) => match self.status.as_ref() {
                    Some(status) => {
                        let merged = status.with_intensity(intensity);
                        self.set_status(Some(merged));
                    }
                    None => debug!(intensity, "Intensity echo before first status"),
                },

                Some(Inbound::Other(value)) => self.emit(ManagerEvent::Message(value)),

                None => {
                    self.note(
                        Level::WARN,
                        format!("Undecodable payload: {}", String::from_utf8_lossy(&raw)),
                    );
                    self.emit(ManagerEvent::Undecodable(raw));
                }
            },

            AdapterEvent::Connected => {
                let kind = self.active.as_ref().map_or(TransportKind::Ble, LinkHandle::kind);
                self.note(Level::INFO, format!("{kind} link re-established"));
                self.set_state(ConnectionState::Connected(kind));
                self.poller.restart();
            }

            AdapterEvent::Disconnected { reconnecting: true } => {
                self.note(Level::WARN, "Link lost, reconnecting");
                self.poller.stop();
                self.set_state(ConnectionState::Connecting);
                if let Some(switch) = self.switch.take() {
                    self.fail_switch(switch, Error::ConnectionClosed);
                }
            }

            AdapterEvent::Disconnected { reconnecting: false } => {
                self.note(Level::WARN, "Link lost");
                self.active = None;
                self.poller.stop();
                if let Some(switch) = self.switch.take() {
                    self.fail_switch(switch, Error::ConnectionClosed);
                }
                self.set_status(None);
                self.set_state(ConnectionState::Idle);
            }

            AdapterEvent::Error(message) => {
                self.note(Level::WARN, format!("Link error: {message}"));
            }
        }
    }

    fn on_status(&mut self, status: DeviceStatus) {
        self.set_status(Some(status.clone()));

        let Some((mode, view)) = self
            .switch
            .as_ref()
            .filter(|switch| switch.view.awaiting_confirmation)
            .map(|switch| (switch.mode, switch.view.clone()))
        else {
            return;
        };

        if mode == SwitchMode::Direct {
            self.note(Level::INFO, "REMOTE link established");
            self.set_state(ConnectionState::Connected(TransportKind::Remote));
            self.resolve_switch(status);
            return;
        }

        if !status.reports(view.target) {
            trace!(target = %view.target, "Status does not confirm switch yet");
            return;
        }

        let next = match view.target {
            TransportKind::Ble => {
                self.resolve_switch(status);
                return;
            }
            TransportKind::Wifi => status
                .ip_address
                .clone()
                .map(Target::wifi)
                .ok_or_else(|| Error::protocol("WIFI confirmation carries no ipAddress")),
            TransportKind::Remote => {
                let server_address = view
                    .server_address
                    .or_else(|| status.server_address.clone())
                    .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());
                view.device_id
                    .or_else(|| status.device_id.clone())
                    .map(|device_id| Target::remote(server_address, device_id))
                    .ok_or_else(|| Error::protocol("REMOTE confirmation carries no deviceId"))
            }
        };

        match next {
            Ok(target) => {
                // Confirmed: only the socket open can fail it now.
                if let Some(switch) = self.switch.as_mut() {
                    switch.view.awaiting_confirmation = false;
                    switch.deadline = None;
                }
                self.note(
                    Level::INFO,
                    format!("Device confirmed {}, opening {target}", view.target),
                );
                let socket = Arc::clone(&self.socket);
                self.open(socket, target, Purpose::Handover { confirmed: status });
            }
            Err(e) => {
                if let Some(switch) = self.switch.take() {
                    self.note(Level::ERROR, e.to_string());
                    self.fail_switch(switch, e);
                }
            }
        }
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_poll(&mut self) {
        let Some(link) = self.active.clone() else {
            self.poller.stop();
            return;
        };

        trace!(link = %link.id(), "Status poll");
        self.request_status(link);
    }

    /// Sends one STATUS request without waiting for the write.
    fn request_status(&self, link: LinkHandle) {
        let payload = match encode(&Request::Status) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Failed to encode status request");
                return;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = link.send(payload).await {
                if e.is_recoverable() {
                    debug!(link = %link.id(), error = %e, "Status request failed");
                } else {
                    warn!(link = %link.id(), error = %e, "Status request failed");
                }
            }
        });
    }

    fn on_switch_deadline(&mut self) {
        let Some(switch) = self.switch.take() else {
            return;
        };

        let (operation, bound) = match switch.mode {
            SwitchMode::Direct => ("remote pair", self.options.pair_timeout),
            SwitchMode::Handover => (
                "transport switch confirmation",
                self.options.switch_timeout.unwrap_or_default(),
            ),
        };
        let timeout_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX);

        self.note(
            Level::WARN,
            format!("Switch to {} timed out after {timeout_ms}ms", switch.view.target),
        );
        self.fail_switch(switch, Error::timeout(operation, timeout_ms));
    }

    // ========================================================================
    // Switch Completion
    // ========================================================================

    fn resolve_switch(&mut self, status: DeviceStatus) {
        if let Some(switch) = self.switch.take() {
            self.note(Level::INFO, format!("Switch to {} complete", switch.view.target));
            let _ = switch.reply.send(Ok(status));
        }
        self.poller.restart();
    }

    /// Rejects a switch and unwinds what it started.
    fn fail_switch(&mut self, switch: Switch, error: Error) {
        if let Some(opening) = self
            .opening
            .take_if(|opening| !matches!(opening.purpose, Purpose::Connect(_)))
        {
            debug!(link = %opening.link, "Abandoning switch socket");
        }

        match switch.mode {
            SwitchMode::Direct => {
                if let Some(link) = self.active.take() {
                    link.close();
                }
                self.poller.stop();
                self.set_status(None);
                self.set_state(ConnectionState::Idle);
            }
            SwitchMode::Handover => {
                if self.state.is_connected() {
                    self.poller.start();
                }
            }
        }

        let _ = switch.reply.send(Err(error));
    }

    /// Closes everything and rejects whatever is outstanding.
    fn teardown(&mut self) {
        self.poller.stop();
        if let Some(switch) = self.switch.take() {
            self.fail_switch(switch, Error::ConnectionClosed);
        }
        if let Some(opening) = self.opening.take() {
            opening.abandon(Error::ConnectionClosed);
        }
        if let Some(link) = self.active.take() {
            link.close();
        }
        self.set_status(None);
        self.set_state(ConnectionState::Idle);
    }

    // ========================================================================
    // State Publication
    // ========================================================================

    fn next_switch_id(&mut self) -> u64 {
        self.next_switch_id += 1;
        self.next_switch_id
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.shared.lock().state = state;
        self.emit(ManagerEvent::StateChanged(state));
    }

    fn set_status(&mut self, status: Option<DeviceStatus>) {
        self.status.clone_from(&status);
        self.shared.lock().status.clone_from(&status);
        if let Some(status) = status {
            self.emit(ManagerEvent::StatusUpdated(status));
        }
    }

    fn publish(&self) {
        self.shared.lock().pending = self.switch.as_ref().map(|switch| switch.view.clone());
    }

    fn note(&self, level: Level, message: impl Into<String>) {
        self.shared.lock().log.record(level, message);
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(handler) = self.event_handler.lock().as_ref() {
            handler(event);
        }
    }
}

/// Sleeps until `deadline`, or forever without one.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

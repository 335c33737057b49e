// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Connection management for the live channel.
//!
//! A [`ConnectionManager`] owns one bidirectional connection and runs it as a
//! single background actor: connection attempts with bounded exponential
//! backoff, the heartbeat, the outbound send queue and inbound dispatch all
//! happen on that one task, so sends and received messages are never
//! processed concurrently and arrive in order.
//!
//! Callers never block on the network except in [`ConnectionManager::connect`],
//! which waits for the first attempt only. Everything else is reported to
//! registered [`ConnectionObserver`]s.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use pillar_core::protocol::{KIND_PING, KIND_PONG};
use pillar_core::{Envelope, Message};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectError, SendFailure};
use crate::transport::{Transport, TransportError, TransportFactory};

/// Lifecycle of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Closing => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection state visible to both the background task and callers.
///
/// Uses atomic fields for lock-free reads.
pub struct SharedConnectionState {
    state: AtomicU8,
    /// Consecutive failed or closed connections since the last success.
    attempt: AtomicU32,
}

impl SharedConnectionState {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected.to_u8()),
            attempt: AtomicU32::new(0),
        }
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::Acquire)
    }

    pub fn set_attempt(&self, attempt: u32) {
        self.attempt.store(attempt, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.get() == ConnectionState::Connecting
    }

    /// Moves `Disconnected -> Connecting`. Returns false if another
    /// connection is already active or being established.
    fn begin_connect(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Disconnected.to_u8(),
                ConnectionState::Connecting.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Human-readable status, e.g. `connecting (attempt 3)`.
    pub fn status_string(&self) -> String {
        match self.get() {
            ConnectionState::Connecting => {
                let attempt = self.attempt();
                if attempt > 0 {
                    format!("connecting (attempt {})", attempt)
                } else {
                    "connecting".to_string()
                }
            }
            other => other.as_str().to_string(),
        }
    }
}

impl Default for SharedConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// URL to connect to.
    pub url: String,
    /// Consecutive failed connections before giving up. Always at least 1.
    pub max_retries: u32,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the reconnection delay.
    pub max_delay: Duration,
    /// Ping interval while connected; `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Time allowed for a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:7890".to_string(),
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            heartbeat_interval: Some(Duration::from_secs(30)),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    /// Delay before reconnection attempt number `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Callbacks for connection lifecycle and inbound traffic.
///
/// All callbacks run on the connection task, one at a time and in order.
/// They must not block.
pub trait ConnectionObserver: Send + Sync {
    fn on_connect(&self) {}

    fn on_disconnect(&self, _reason: &str) {}

    fn on_error(&self, _error: &ConnectError) {}

    fn on_reconnecting(&self, _attempt: u32, _delay: Duration) {}

    /// An inbound envelope other than a keepalive.
    fn on_message(&self, _envelope: &Envelope) {}
}

struct Outbound {
    envelope: Envelope,
    /// Present for [`ConnectionManager::transmit`]; settled once the frame is written.
    ack: Option<oneshot::Sender<Result<(), SendFailure>>>,
}

struct Control {
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

struct Inner {
    config: ConnectionConfig,
    state: SharedConnectionState,
    online: AtomicBool,
    queue: Mutex<VecDeque<Outbound>>,
    wake: Notify,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    factory: TransportFactory,
    control: Mutex<Control>,
}

enum SessionEnd {
    Cancelled,
    Lost(String),
}

/// Owns the live connection. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, factory: TransportFactory) -> Self {
        let inner = Inner {
            config,
            state: SharedConnectionState::new(),
            online: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            observers: RwLock::new(Vec::new()),
            factory,
            control: Mutex::new(Control {
                cancel: CancellationToken::new(),
                driver: None,
            }),
        };
        ConnectionManager {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        let mut observers = self
            .inner
            .observers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        observers.push(observer);
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.is_connected()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.inner.state.attempt()
    }

    pub fn status_string(&self) -> String {
        self.inner.state.status_string()
    }

    /// Envelopes waiting for the next connection (or for the actor to write them).
    pub fn pending_sends(&self) -> usize {
        self.inner.queue().len()
    }

    pub fn is_network_available(&self) -> bool {
        self.inner.online.load(Ordering::Acquire)
    }

    /// Records whether the network is known to be reachable.
    ///
    /// While unavailable, `connect()` fails fast and the reconnect loop stops
    /// at its next attempt.
    pub fn set_network_available(&self, available: bool) {
        let was = self.inner.online.swap(available, Ordering::AcqRel);
        if was != available {
            info!(available, "network availability changed");
        }
    }

    /// Starts the connection actor and waits for the outcome of its first attempt.
    ///
    /// A no-op returning `Ok` if a connection is already established or being
    /// established. On failure the actor keeps retrying in the background
    /// with backoff; the error is also delivered to observers, and sends
    /// keep queueing either way.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        if !self.is_network_available() {
            let err = ConnectError::Offline;
            debug!("connect skipped: network offline");
            self.inner.emit_error(&err);
            return Err(err);
        }

        if !self.inner.state.begin_connect() {
            debug!(state = %self.state(), "connect ignored: already active");
            return Ok(());
        }
        self.inner.state.set_attempt(0);

        let cancel = CancellationToken::new();
        let (first_tx, first_rx) = oneshot::channel();
        {
            let mut control = self.inner.control();
            control.cancel = cancel.clone();
            let inner = Arc::clone(&self.inner);
            control.driver = Some(tokio::spawn(inner.drive(cancel, first_tx)));
        }

        first_rx.await.unwrap_or(Err(ConnectError::Cancelled))
    }

    /// Closes the connection and cancels any pending reconnection.
    ///
    /// Queued fire-and-forget envelopes stay queued for the next `connect()`.
    pub async fn disconnect(&self) {
        let driver = {
            let mut control = self.inner.control();
            control.cancel.cancel();
            control.driver.take()
        };
        if self.is_connected() {
            self.inner.state.set(ConnectionState::Closing);
        }
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!("connection task ended abnormally: {}", e);
            }
        }
        self.inner.state.set(ConnectionState::Disconnected);
    }

    /// Sends an envelope without waiting.
    ///
    /// Transmitted right away by the connection task when connected; otherwise
    /// queued in arrival order and flushed oldest-first after the next
    /// successful connect.
    pub fn send(&self, envelope: Envelope) {
        self.inner.enqueue(Outbound {
            envelope,
            ack: None,
        });
    }

    /// Sends an envelope and waits until the transport has written it.
    ///
    /// Fails immediately with [`SendFailure::NotConnected`] when there is no
    /// live connection; nothing is queued in that case.
    pub async fn transmit(&self, envelope: Envelope) -> Result<(), SendFailure> {
        if !self.is_connected() {
            return Err(SendFailure::NotConnected);
        }
        let (ack, done) = oneshot::channel();
        self.inner.enqueue(Outbound {
            envelope,
            ack: Some(ack),
        });
        done.await.unwrap_or(Err(SendFailure::ConnectionLost))
    }
}

impl Inner {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Outbound>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn emit_error(&self, error: &ConnectError) {
        for observer in self.observers() {
            observer.on_error(error);
        }
    }

    fn enqueue(&self, outbound: Outbound) {
        self.queue().push_back(outbound);
        self.wake.notify_one();
    }

    /// Background connection task with bounded exponential backoff.
    async fn drive(
        self: Arc<Self>,
        cancel: CancellationToken,
        first: oneshot::Sender<Result<(), ConnectError>>,
    ) {
        let mut first = Some(first);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if !self.online.load(Ordering::Acquire) {
                let err = ConnectError::Offline;
                info!("network offline, reconnection stopped");
                self.emit_error(&err);
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(err));
                }
                break;
            }

            self.state.set(ConnectionState::Connecting);
            let mut transport = (self.factory)();

            debug!(url = %self.config.url, attempt = self.state.attempt(), "connecting");
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::time::timeout(
                    self.config.connect_timeout,
                    transport.connect(&self.config.url),
                ) => result,
            };

            let connected = match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(classify(e)),
                Err(_) => Err(ConnectError::Timeout(self.config.connect_timeout)),
            };

            match connected {
                Ok(()) => {
                    self.state.set(ConnectionState::Connected);
                    self.state.set_attempt(0);
                    info!(url = %self.config.url, "connected");
                    for observer in self.observers() {
                        observer.on_connect();
                    }
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let end = self.run_session(&mut transport, &cancel).await;
                    self.fail_pending_acks();
                    if let Err(e) = transport.disconnect().await {
                        debug!("transport close failed: {}", e);
                    }

                    match end {
                        SessionEnd::Cancelled => {
                            info!("disconnected");
                            for observer in self.observers() {
                                observer.on_disconnect("disconnected by client");
                            }
                            break;
                        }
                        SessionEnd::Lost(reason) => {
                            warn!("connection lost: {}", reason);
                            for observer in self.observers() {
                                observer.on_disconnect(&reason);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("connection attempt failed: {}", err);
                    self.emit_error(&err);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(err));
                    }
                }
            }

            let attempt = self.state.attempt().saturating_add(1);
            self.state.set_attempt(attempt);

            if attempt >= self.config.max_retries {
                let err = ConnectError::RetriesExhausted { attempts: attempt };
                warn!("{}", err);
                self.emit_error(&err);
                break;
            }

            // Stay in `Connecting` while backing off so connect() remains a no-op
            self.state.set(ConnectionState::Connecting);
            let delay = self.config.backoff_delay(attempt);
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
            for observer in self.observers() {
                observer.on_reconnecting(attempt, delay);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.set(ConnectionState::Disconnected);
        if let Some(tx) = first.take() {
            let _ = tx.send(Err(ConnectError::Cancelled));
        }
    }

    /// Serves one established connection until it is lost or cancelled.
    async fn run_session(
        &self,
        transport: &mut Box<dyn Transport>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut heartbeat = self.config.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut ping_id = 0u64;

        loop {
            if let Err(reason) = self.flush_queue(transport).await {
                return SessionEnd::Lost(reason);
            }

            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = self.wake.notified() => {}
                _ = tick(&mut heartbeat) => {
                    ping_id = ping_id.wrapping_add(1);
                    trace!(ping_id, "heartbeat");
                    if let Err(e) = transport.send(&Envelope::ping(ping_id)).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                received = transport.recv() => match received {
                    Ok(Some(envelope)) => {
                        if let Err(reason) = self.dispatch(transport, envelope).await {
                            return SessionEnd::Lost(reason);
                        }
                    }
                    Ok(None) => return SessionEnd::Lost("connection closed by peer".to_string()),
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },
            }
        }
    }

    async fn dispatch(
        &self,
        transport: &mut Box<dyn Transport>,
        envelope: Envelope,
    ) -> Result<(), String> {
        match envelope.kind.as_str() {
            KIND_PONG => trace!("pong"),
            KIND_PING => {
                if let Ok(Message::Ping { id }) = envelope.decode() {
                    transport
                        .send(&Envelope::pong(id))
                        .await
                        .map_err(|e| e.to_string())?;
                }
            }
            _ => {
                for observer in self.observers() {
                    observer.on_message(&envelope);
                }
            }
        }
        Ok(())
    }

    /// Writes queued envelopes oldest-first. Each entry is removed only after
    /// the transport accepted it.
    async fn flush_queue(&self, transport: &mut Box<dyn Transport>) -> Result<(), String> {
        loop {
            let envelope = match self.queue().front() {
                Some(outbound) => outbound.envelope.clone(),
                None => return Ok(()),
            };

            match transport.send(&envelope).await {
                Ok(()) => {
                    let sent = self.queue().pop_front();
                    if let Some(ack) = sent.and_then(|o| o.ack) {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    // A waiting transmit() learns of the failure; a plain send() stays queued
                    let mut queue = self.queue();
                    if queue.front().is_some_and(|o| o.ack.is_some()) {
                        if let Some(ack) = queue.pop_front().and_then(|o| o.ack) {
                            let _ = ack.send(Err(SendFailure::Transport(reason.clone())));
                        }
                    }
                    return Err(reason);
                }
            }
        }
    }

    /// Settles every waiting transmit() with `ConnectionLost`.
    fn fail_pending_acks(&self) {
        let mut queue = self.queue();
        let mut kept = VecDeque::with_capacity(queue.len());
        for outbound in queue.drain(..) {
            match outbound.ack {
                Some(ack) => {
                    let _ = ack.send(Err(SendFailure::ConnectionLost));
                }
                None => kept.push_back(outbound),
            }
        }
        *queue = kept;
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn classify(error: TransportError) -> ConnectError {
    match error {
        TransportError::Rejected(reason) => ConnectError::Rejected(reason),
        other => ConnectError::Unreachable(other.to_string()),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;

// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Test helpers: an in-memory backend reachable through [`MockTransport`].

#![allow(clippy::unwrap_used)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pillar_core::protocol::KIND_EVENT;
use pillar_core::{Envelope, Message, SyncEvent};
use tokio::sync::mpsc;

use crate::connection::ConnectionConfig;
use crate::transport::{Transport, TransportError, TransportFactory, TransportFuture};

#[derive(Default)]
struct BackendState {
    /// Everything the client wrote, across sessions.
    outgoing: Vec<Envelope>,
    /// Feeds the live session's recv(). Dropping it closes the session.
    session_tx: Option<mpsc::UnboundedSender<Envelope>>,
    unreachable: bool,
    failing_connects: u32,
    failing_sends: u32,
    connects: u32,
}

/// The server side of every [`MockTransport`] it creates.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory(&self) -> TransportFactory {
        let state = Arc::clone(&self.state);
        Arc::new(move || {
            Box::new(MockTransport {
                state: Arc::clone(&state),
                session: None,
            }) as Box<dyn Transport>
        })
    }

    /// Delivers an envelope to the live session. Returns false if none.
    pub fn push(&self, envelope: Envelope) -> bool {
        let state = self.state.lock().unwrap();
        match &state.session_tx {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    pub fn push_event(&self, event: &SyncEvent) -> bool {
        self.push(Envelope::event(event).unwrap())
    }

    /// Closes the live session as if the peer went away.
    pub fn drop_connection(&self) {
        self.state.lock().unwrap().session_tx = None;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().unwrap().failing_connects = n;
    }

    /// The next `n` sends fail and break the session.
    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().unwrap().failing_sends = n;
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.state.lock().unwrap().outgoing.clone()
    }

    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent().into_iter().map(|e| e.kind).collect()
    }

    pub fn sent_events(&self) -> Vec<SyncEvent> {
        self.sent()
            .into_iter()
            .filter(|e| e.kind == KIND_EVENT)
            .filter_map(|e| match e.decode() {
                Ok(Message::Event(event)) => Some(event),
                _ => None,
            })
            .collect()
    }
}

/// Client half of a [`MockBackend`] session.
pub struct MockTransport {
    state: Arc<Mutex<BackendState>>,
    session: Option<mpsc::UnboundedReceiver<Envelope>>,
}

impl Transport for MockTransport {
    fn connect(&mut self, _url: &str) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.unreachable {
                return Err(TransportError::ConnectionFailed("mock unreachable".into()));
            }
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::ConnectionFailed("mock failure".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            state.session_tx = Some(tx);
            self.session = Some(rx);
            Ok(())
        })
    }

    fn disconnect(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.session = None;
            Ok(())
        })
    }

    fn send(&mut self, envelope: &Envelope) -> TransportFuture<'_, ()> {
        let envelope = envelope.clone();
        Box::pin(async move {
            if self.session.is_none() {
                return Err(TransportError::ConnectionClosed);
            }
            let mut state = self.state.lock().unwrap();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                state.session_tx = None;
                drop(state);
                self.session = None;
                return Err(TransportError::SendFailed("mock send failure".into()));
            }
            state.outgoing.push(envelope);
            Ok(())
        })
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<Envelope>> {
        Box::pin(async move {
            let rx = self.session.as_mut().ok_or(TransportError::ConnectionClosed)?;
            match rx.recv().await {
                Some(envelope) => Ok(Some(envelope)),
                None => {
                    self.session = None;
                    Ok(None)
                }
            }
        })
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

/// Fast-retry configuration for tests.
pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        url: "ws://mock".to_string(),
        max_retries: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        heartbeat_interval: None,
        connect_timeout: Duration::from_secs(1),
    }
}

/// Polls `check` until it holds, panicking after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `fut` with a two-second limit.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .unwrap()
}

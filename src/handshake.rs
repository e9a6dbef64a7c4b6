//! Application-protocol selection (ALPN / NPN / h2c upgrade).
//!
//! The TLS layer (or an upgrade handler) reports the negotiated protocol
//! name to a [`ProtocolSelectionMonitor`]; the engine waits for it with a
//! bounded timeout before building a session.

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{H2Error, Result};

/// Protocol identifiers that select this engine.
pub const HTTP2_PROTOCOLS: &[&str] = &[
    "h2",
    "h2c",
    "h2-14",
    "h2-15",
    "h2-16",
    "h2-17",
    "HTTP-draft-04/2.0",
];

/// True when a negotiated name selects HTTP/2 (final or draft identifiers).
pub fn is_http2_protocol(name: &str) -> bool {
    HTTP2_PROTOCOLS.contains(&name)
}

/// Callback fired once a protocol has been selected.
pub trait ProtocolObserver: Send {
    fn on_protocol_selected(&mut self, protocol: &str);
}

impl<F> ProtocolObserver for F
where
    F: FnMut(&str) + Send,
{
    fn on_protocol_selected(&mut self, protocol: &str) {
        self(protocol)
    }
}

/// Single-observer monitor for the negotiated protocol of one connection.
pub struct ProtocolSelectionMonitor {
    observer: Mutex<Option<Box<dyn ProtocolObserver>>>,
    selected: watch::Sender<Option<String>>,
}

impl fmt::Debug for ProtocolSelectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolSelectionMonitor")
            .field("attached", &self.observer.lock().is_some())
            .field("selected", &*self.selected.borrow())
            .finish()
    }
}

impl Default for ProtocolSelectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSelectionMonitor {
    pub fn new() -> Self {
        let (selected, _) = watch::channel(None);
        Self {
            observer: Mutex::new(None),
            selected,
        }
    }

    /// Attach the observer. Only one may be attached at a time.
    pub fn attach(&self, observer: Box<dyn ProtocolObserver>) -> Result<()> {
        let mut slot = self.observer.lock();
        if slot.is_some() {
            return Err(H2Error::MonitorBusy);
        }
        *slot = Some(observer);
        Ok(())
    }

    /// Returns false when nothing was attached.
    pub fn detach(&self) -> bool {
        self.observer.lock().take().is_some()
    }

    /// Record the negotiated protocol and notify the observer.
    pub fn on_protocol_selected(&self, protocol: &str) {
        debug!(protocol, "application protocol selected");
        self.selected.send_replace(Some(protocol.to_owned()));
        if let Some(observer) = self.observer.lock().as_mut() {
            observer.on_protocol_selected(protocol);
        }
    }

    pub fn selected(&self) -> Option<String> {
        self.selected.borrow().clone()
    }

    /// Wait for a selection, failing with `HandshakeTimeout` after `timeout`.
    pub async fn wait_selected(&self, timeout: Duration) -> Result<String> {
        let mut rx = self.selected.subscribe();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(protocol) = current {
                    return Ok(protocol);
                }
                if rx.changed().await.is_err() {
                    return Err(H2Error::HandshakeTimeout);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| H2Error::HandshakeTimeout)?
    }
}

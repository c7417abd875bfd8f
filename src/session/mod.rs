//! Publish/subscribe session on top of whichever stream is active.
//!
//! [`SessionManager`] binds the [`ByteStream`] matching the active transport,
//! handshakes when the session is down or a resync was requested, and
//! services it otherwise. It is the only writer of `session_connected`.

mod line;
mod publisher;

pub use line::{LineSession, MAX_LINE_LEN};
pub use publisher::{PublishOutcome, SessionPublisher};

use crate::config::BrokerConfig;
use crate::state::{ActiveTransport, StateHandle};
use crate::stream::ByteStream;
use log::{debug, info, warn};
use std::fmt;

/// Errors reported by a session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No stream bound, or the stream is down.
    NotConnected,
    /// Stream accepted fewer bytes than sent.
    WriteFailed { expected: usize, written: usize },
    /// Peer sent something the session cannot handle.
    Protocol(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "session not connected"),
            Self::WriteFailed { expected, written } => {
                write!(f, "write failed ({} of {} bytes)", written, expected)
            }
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}

/// Protocol driven over a [`ByteStream`] (MQTT in production).
pub trait SessionLayer: Send {
    /// Handshake over a freshly connected stream.
    fn open(&mut self, stream: &mut dyn ByteStream, broker: &BrokerConfig)
        -> Result<(), SessionError>;

    /// Process inbound traffic. An error means the session is lost.
    fn service(&mut self, stream: &mut dyn ByteStream) -> Result<(), SessionError>;

    fn publish(
        &mut self,
        stream: &mut dyn ByteStream,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), SessionError>;

    /// Most recent inbound message, if any.
    fn last_message(&self) -> Option<&str> {
        None
    }
}

/// The two streams a node can carry its session over.
pub struct Streams<'a> {
    pub wifi: &'a mut dyn ByteStream,
    pub cellular: &'a mut dyn ByteStream,
}

impl Streams<'_> {
    pub fn get(&mut self, transport: ActiveTransport) -> Option<&mut dyn ByteStream> {
        match transport {
            ActiveTransport::None => None,
            ActiveTransport::Wifi => Some(&mut *self.wifi),
            ActiveTransport::Cellular => Some(&mut *self.cellular),
        }
    }
}

/// What one session tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTick {
    /// No transport; nothing bound.
    Unbound,
    /// Stream or handshake failed; retried next tick.
    OpenFailed,
    /// Handshake completed.
    Opened,
    /// Session was up and got serviced.
    Serviced,
    /// Session was up and servicing it failed.
    Lost,
}

pub struct SessionManager {
    broker: BrokerConfig,
    state: StateHandle,
    session: Box<dyn SessionLayer>,
    bound: ActiveTransport,
}

impl SessionManager {
    pub fn new(broker: BrokerConfig, state: StateHandle, session: Box<dyn SessionLayer>) -> Self {
        Self {
            broker,
            state,
            session,
            bound: ActiveTransport::None,
        }
    }

    pub fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    /// Transport the session is currently bound to.
    pub fn bound(&self) -> ActiveTransport {
        self.bound
    }

    pub fn last_message(&self) -> Option<&str> {
        self.session.last_message()
    }

    /// A transport is active and the session handshake completed.
    pub fn is_open(&self) -> bool {
        let snapshot = self.state.snapshot();
        snapshot.active_transport != ActiveTransport::None && snapshot.session_connected
    }

    /// Run one session step against the current connectivity state.
    ///
    /// Consumes `force_resync`. On a resync or transport change the previously
    /// bound stream is stopped before anything else happens.
    pub fn tick(&mut self, streams: &mut Streams<'_>) -> SessionTick {
        let transport = self.state.active_transport();
        let resync = self.state.take_force_resync();

        if resync || transport != self.bound {
            if let Some(old) = streams.get(self.bound) {
                debug!("Releasing {} stream", self.bound);
                old.stop();
            }
            self.state.set_session_connected(false);
            self.bound = transport;
        }

        let Some(stream) = streams.get(transport) else {
            return SessionTick::Unbound;
        };

        if self.state.snapshot().session_connected && stream.connected() {
            return match self.session.service(stream) {
                Ok(()) => SessionTick::Serviced,
                Err(e) => {
                    warn!("Session over {} lost: {}", transport, e);
                    stream.stop();
                    self.state.set_session_connected(false);
                    SessionTick::Lost
                }
            };
        }

        if !stream.connected() && !stream.connect(&self.broker.host, self.broker.port) {
            self.state.set_session_connected(false);
            return SessionTick::OpenFailed;
        }
        match self.session.open(stream, &self.broker) {
            Ok(()) => {
                let up = self.state.set_session_connected(true);
                info!(
                    "Session open over {} to {}:{}",
                    transport, self.broker.host, self.broker.port
                );
                if up {
                    SessionTick::Opened
                } else {
                    SessionTick::OpenFailed
                }
            }
            Err(e) => {
                warn!("Session handshake over {} failed: {}", transport, e);
                stream.stop();
                self.state.set_session_connected(false);
                SessionTick::OpenFailed
            }
        }
    }

    /// Publish over the bound stream. Requires an open session.
    pub fn publish(
        &mut self,
        streams: &mut Streams<'_>,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::NotConnected);
        }
        let stream = streams
            .get(self.bound)
            .ok_or(SessionError::NotConnected)?;
        self.session.publish(stream, topic, payload)
    }
}

//! Discovery message definitions
//!
//! Defines the record advertised by a service and the wire variant tags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU8;

use super::{MSG_TYPE_GENERIC, MSG_TYPE_SIMPLE};

/// Well-known state codes exchanged during discovery.
///
/// `DiscoveryMessage::state` is a plain byte; codes outside this set are
/// still valid application states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiscoveryState {
    Connect = 0,
    ConnectResponse = 1,
    QueueData = 2,
    Error = 3,
}

impl DiscoveryState {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DiscoveryState::Connect),
            1 => Some(DiscoveryState::ConnectResponse),
            2 => Some(DiscoveryState::QueueData),
            3 => Some(DiscoveryState::Error),
            _ => None,
        }
    }
}

/// Wire variant selected by the leading tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    /// Fixed field layout (tag 0)
    Simple,
    /// MessagePack body behind a non-zero tag
    Generic(NonZeroU8),
}

impl MsgType {
    /// Default generic variant (tag 1)
    pub const GENERIC: MsgType = MsgType::Generic(NonZeroU8::MIN);

    /// The tag byte written at offset 0
    pub fn tag(self) -> u8 {
        match self {
            MsgType::Simple => MSG_TYPE_SIMPLE,
            MsgType::Generic(tag) => tag.get(),
        }
    }
}

impl From<u8> for MsgType {
    fn from(tag: u8) -> Self {
        match NonZeroU8::new(tag) {
            Some(tag) => MsgType::Generic(tag),
            None => MsgType::Simple,
        }
    }
}

/// A service advertisement.
///
/// An empty payload and an absent payload share one wire representation,
/// so `None` is the canonical form of both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    /// Application-defined status code
    pub state: u8,
    /// Port the advertising host listens on
    pub port: u16,
    /// Host or service identifier, at most 255 bytes
    pub host_server: String,
    /// Optional free-form payload
    pub payload: Option<String>,
}

impl DiscoveryMessage {
    pub fn new(state: u8, port: u16, host_server: impl Into<String>) -> Self {
        Self {
            state,
            port,
            host_server: host_server.into(),
            payload: None,
        }
    }

    /// Attach a payload. An empty string leaves the payload absent.
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        self.payload = if payload.is_empty() { None } else { Some(payload) };
        self
    }

    /// Payload bytes as written on the wire (empty when absent)
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().map(str::as_bytes).unwrap_or_default()
    }

    /// Well-known state, if `state` is one of the discovery codes
    pub fn discovery_state(&self) -> Option<DiscoveryState> {
        DiscoveryState::from_code(self.state)
    }

    /// Size of this message in the simple layout
    pub fn encoded_len(&self) -> usize {
        // tag + state + port + host_len + payload_len
        1 + 1 + 2 + 1 + self.host_server.len() + 8 + self.payload_bytes().len()
    }

    /// Copy with an empty payload folded into `None`
    pub(crate) fn normalized(&self) -> Self {
        let mut msg = self.clone();
        if msg.payload.as_deref() == Some("") {
            msg.payload = None;
        }
        msg
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} state={}", self.host_server, self.port, self.state)?;
        if let Some(state) = self.discovery_state() {
            write!(f, " ({:?})", state)?;
        }
        match &self.payload {
            Some(payload) => write!(f, " payload={} bytes", payload.len()),
            None => write!(f, " no payload"),
        }
    }
}

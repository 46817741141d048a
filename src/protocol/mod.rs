//! Protocol module - Defines the discovery wire format
//!
//! The simple layout (msgType 0) is a fixed sequence of little-endian fields:
//! - 1 byte message type
//! - 1 byte state
//! - 2 bytes port
//! - 1 byte host length, followed by the host bytes
//! - 8 bytes payload length, followed by the payload bytes
//!
//! Any other message type carries a MessagePack body after the tag byte.

mod message;
mod codec;

pub use message::*;
pub use codec::*;

/// Default UDP port for discovery datagrams
pub const DEFAULT_PORT: u16 = 24810;

/// Tag of the fixed-layout variant
pub const MSG_TYPE_SIMPLE: u8 = 0;

/// Tag used for the MessagePack variant when none is specified
pub const MSG_TYPE_GENERIC: u8 = 1;

/// Largest host identifier that fits the 8-bit length prefix
pub const MAX_HOST_LEN: usize = u8::MAX as usize;

//! Meshdisco - Service discovery messages
//!
//! Encodes and decodes the datagrams a service uses to advertise its state,
//! port and host identifier, and carries them over UDP.

pub mod config;
pub mod discovery;
pub mod protocol;

pub use protocol::{decode, decode_frame, encode, CodecError, DiscoveryMessage, Frame, MsgType};

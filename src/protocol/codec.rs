//! Protocol codec for encoding/decoding discovery messages
//!
//! Every call builds its own buffers; nothing is shared between calls.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::num::NonZeroU8;
use std::str::Utf8Error;
use thiserror::Error;

use super::{DiscoveryMessage, MsgType, MAX_HOST_LEN, MSG_TYPE_SIMPLE};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed buffer: {field} needs {needed} bytes, {remaining} remaining")]
    MalformedBuffer {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Invalid UTF-8 in {field}: {source}")]
    InvalidEncoding {
        field: &'static str,
        #[source]
        source: Utf8Error,
    },

    #[error("Unsupported message type: {0}")]
    UnsupportedMsgType(u8),

    #[error("Field too large: {field} is {len} bytes (max: {max})")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Generic encode error: {0}")]
    GenericEncode(#[from] rmp_serde::encode::Error),

    #[error("Generic decode error: {0}")]
    GenericDecode(#[from] rmp_serde::decode::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A decoded datagram together with the variant it was carried in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MsgType,
    pub message: DiscoveryMessage,
}

impl Frame {
    pub fn new(msg_type: MsgType, message: DiscoveryMessage) -> Self {
        Self { msg_type, message }
    }
}

/// Encode a message using the variant selected by `msg_type`.
///
/// Tag 0 produces the fixed layout; any other tag produces the tag byte
/// followed by a MessagePack map of the message fields.
pub fn encode(message: &DiscoveryMessage, msg_type: impl Into<MsgType>) -> CodecResult<Bytes> {
    check_host_len(&message.host_server)?;

    match msg_type.into() {
        MsgType::Simple => Ok(encode_simple(message)),
        MsgType::Generic(tag) => encode_generic(message, tag),
    }
}

fn encode_simple(message: &DiscoveryMessage) -> Bytes {
    let host = message.host_server.as_bytes();
    let payload = message.payload_bytes();

    let mut buf = BytesMut::with_capacity(message.encoded_len());
    buf.put_u8(MsgType::Simple.tag());
    buf.put_u8(message.state);
    buf.put_u16_le(message.port);
    // Length checked by the caller
    buf.put_u8(host.len() as u8);
    buf.put_slice(host);
    buf.put_u64_le(payload.len() as u64);
    buf.put_slice(payload);

    buf.freeze()
}

fn encode_generic(message: &DiscoveryMessage, tag: NonZeroU8) -> CodecResult<Bytes> {
    let body = rmp_serde::to_vec_named(&message.normalized())?;

    let mut buf = BytesMut::with_capacity(1 + body.len());
    buf.put_u8(tag.get());
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Decode a fixed-layout (tag 0) message.
///
/// Any other tag fails with `UnsupportedMsgType`; use [`decode_frame`] to
/// accept both variants.
pub fn decode(buf: &[u8]) -> CodecResult<DiscoveryMessage> {
    let mut reader = Reader::new(buf);

    let tag = reader.read_u8("msg_type")?;
    if tag != MSG_TYPE_SIMPLE {
        return Err(CodecError::UnsupportedMsgType(tag));
    }

    decode_simple_body(reader)
}

/// Decode a message in either variant, reporting which one it used.
pub fn decode_frame(buf: &[u8]) -> CodecResult<Frame> {
    let result = match buf.first().copied().map(MsgType::from) {
        None => Err(CodecError::MalformedBuffer {
            field: "msg_type",
            needed: 1,
            remaining: 0,
        }),
        Some(MsgType::Simple) => decode(buf).map(|message| Frame::new(MsgType::Simple, message)),
        Some(msg_type) => decode_generic(&buf[1..]).map(|message| Frame::new(msg_type, message)),
    };

    if let Err(e) = &result {
        tracing::trace!("Failed to decode {} byte frame: {}", buf.len(), e);
    }
    result
}

fn decode_simple_body(mut reader: Reader<'_>) -> CodecResult<DiscoveryMessage> {
    let state = reader.read_u8("state")?;
    let port = reader.read_u16_le("port")?;
    let host_len = reader.read_u8("host_len")? as usize;
    let host_server = reader.read_str("host_server", host_len)?.to_owned();

    let payload_len = reader.read_u64_le("payload_len")?;
    let payload = if payload_len == 0 {
        None
    } else {
        let len = usize::try_from(payload_len).map_err(|_| CodecError::MalformedBuffer {
            field: "payload",
            needed: usize::MAX,
            remaining: reader.remaining(),
        })?;
        Some(reader.read_str("payload", len)?.to_owned())
    };

    // Bytes after the payload are ignored
    if reader.remaining() > 0 {
        tracing::trace!("Ignoring {} bytes after payload", reader.remaining());
    }

    Ok(DiscoveryMessage {
        state,
        port,
        host_server,
        payload,
    })
}

fn decode_generic(body: &[u8]) -> CodecResult<DiscoveryMessage> {
    let message: DiscoveryMessage = rmp_serde::from_slice(body)?;
    check_host_len(&message.host_server)?;
    Ok(message.normalized())
}

fn check_host_len(host_server: &str) -> CodecResult<()> {
    if host_server.len() > MAX_HOST_LEN {
        return Err(CodecError::FieldTooLarge {
            field: "host_server",
            len: host_server.len(),
            max: MAX_HOST_LEN,
        });
    }
    Ok(())
}

/// Bounds-checked cursor over a datagram
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, field: &'static str, needed: usize) -> CodecResult<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::MalformedBuffer {
                field,
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn read_u8(&mut self, field: &'static str) -> CodecResult<u8> {
        self.ensure(field, 1)?;
        Ok(self.buf.get_u8())
    }

    fn read_u16_le(&mut self, field: &'static str) -> CodecResult<u16> {
        self.ensure(field, 2)?;
        Ok(self.buf.get_u16_le())
    }

    fn read_u64_le(&mut self, field: &'static str) -> CodecResult<u64> {
        self.ensure(field, 8)?;
        Ok(self.buf.get_u64_le())
    }

    fn read_str(&mut self, field: &'static str, len: usize) -> CodecResult<&'a str> {
        self.ensure(field, len)?;
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        std::str::from_utf8(head).map_err(|source| CodecError::InvalidEncoding { field, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MSG_TYPE_GENERIC, MSG_TYPE_SIMPLE};

    const SVC_A_NO_PAYLOAD: [u8; 18] = [
        0x00, 0x01, 0x90, 0x1F, 0x05, 0x73, 0x76, 0x63, 0x2D, 0x61, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00,
    ];

    fn svc_a() -> DiscoveryMessage {
        DiscoveryMessage::new(1, 8080, "svc-a")
    }

    #[test]
    fn test_encode_known_bytes_without_payload() {
        let encoded = encode(&svc_a(), MSG_TYPE_SIMPLE).unwrap();
        assert_eq!(&encoded[..], &SVC_A_NO_PAYLOAD);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, svc_a());
        assert_eq!(decoded.payload, None);
    }

    #[test]
    fn test_encode_known_bytes_with_payload() {
        let msg = svc_a().with_payload("ok");
        let encoded = encode(&msg, MSG_TYPE_SIMPLE).unwrap();

        assert_eq!(&encoded[..10], &SVC_A_NO_PAYLOAD[..10]);
        assert_eq!(
            &encoded[10..],
            &[0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x6F, 0x6B]
        );
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_roundtrip_multibyte_text() {
        let msg = DiscoveryMessage::new(200, u16::MAX, "hôte-é").with_payload("données ✓");
        let encoded = encode(&msg, MsgType::Simple).unwrap();
        assert_eq!(encoded.len(), msg.encoded_len());
        assert_eq!(decode(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_empty_and_absent_payload_encode_identically() {
        let mut empty = svc_a();
        empty.payload = Some(String::new());

        let a = encode(&empty, MSG_TYPE_SIMPLE).unwrap();
        let b = encode(&svc_a(), MSG_TYPE_SIMPLE).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode(&a).unwrap().payload, None);
    }

    #[test]
    fn test_host_length_boundary() {
        let msg = DiscoveryMessage::new(0, 1, "h".repeat(255));
        let encoded = encode(&msg, MSG_TYPE_SIMPLE).unwrap();
        assert_eq!(encoded[4], 255);
        assert_eq!(decode(&encoded).unwrap(), msg);

        let msg = DiscoveryMessage::new(0, 1, "h".repeat(256));
        match encode(&msg, MSG_TYPE_SIMPLE) {
            Err(CodecError::FieldTooLarge { field, len, max }) => {
                assert_eq!(field, "host_server");
                assert_eq!(len, 256);
                assert_eq!(max, 255);
            }
            other => panic!("expected FieldTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_buffers_are_malformed() {
        for msg in [svc_a(), svc_a().with_payload("payload")] {
            let encoded = encode(&msg, MSG_TYPE_SIMPLE).unwrap();
            for len in 0..encoded.len() {
                match decode(&encoded[..len]) {
                    Err(CodecError::MalformedBuffer { .. }) => {}
                    other => panic!("prefix of {} bytes: expected MalformedBuffer, got {:?}", len, other),
                }
            }
        }
    }

    #[test]
    fn test_host_len_beyond_buffer() {
        let buf = [0x00, 0x01, 0x90, 0x1F, 0x20, b'a', b'b'];
        match decode(&buf) {
            Err(CodecError::MalformedBuffer { field, needed, remaining }) => {
                assert_eq!(field, "host_server");
                assert_eq!(needed, 32);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected MalformedBuffer, got {:?}", other),
        }
    }

    #[test]
    fn test_huge_payload_len_is_malformed() {
        let mut buf = SVC_A_NO_PAYLOAD.to_vec();
        buf[10..18].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&buf), Err(CodecError::MalformedBuffer { .. })));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut buf = vec![0x00, 0x01, 0x90, 0x1F, 0x02, 0xFF, 0xFE];
        buf.extend_from_slice(&0u64.to_le_bytes());
        match decode(&buf) {
            Err(CodecError::InvalidEncoding { field, .. }) => assert_eq!(field, "host_server"),
            other => panic!("expected InvalidEncoding, got {:?}", other),
        }

        let mut buf = SVC_A_NO_PAYLOAD.to_vec();
        buf[10..18].copy_from_slice(&1u64.to_le_bytes());
        buf.push(0xC3);
        match decode(&buf) {
            Err(CodecError::InvalidEncoding { field, .. }) => assert_eq!(field, "payload"),
            other => panic!("expected InvalidEncoding, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut buf = SVC_A_NO_PAYLOAD.to_vec();
        buf.push(0x00);
        assert_eq!(decode(&buf).unwrap(), svc_a());

        let msg = svc_a().with_payload("ok");
        let mut buf = encode(&msg, MSG_TYPE_SIMPLE).unwrap().to_vec();
        buf.extend_from_slice(&[0xAA, 0xBB]);
        assert_eq!(decode(&buf).unwrap(), msg);
        assert_eq!(decode_frame(&buf).unwrap(), Frame::new(MsgType::Simple, msg));
    }

    #[test]
    fn test_decode_rejects_non_simple_tag() {
        let mut buf = SVC_A_NO_PAYLOAD.to_vec();
        buf[0] = 0x01;
        assert!(matches!(decode(&buf), Err(CodecError::UnsupportedMsgType(1))));
    }

    #[test]
    fn test_generic_variant_roundtrip() {
        let msg = svc_a().with_payload("{\"queues\":[\"a\",\"b\"]}");
        let encoded = encode(&msg, MSG_TYPE_GENERIC).unwrap();
        assert_eq!(encoded[0], MSG_TYPE_GENERIC);

        assert!(matches!(decode(&encoded), Err(CodecError::UnsupportedMsgType(1))));

        let frame = decode_frame(&encoded).unwrap();
        assert_eq!(frame.msg_type, MsgType::GENERIC);
        assert_eq!(frame.message, msg);
    }

    #[test]
    fn test_generic_variant_keeps_custom_tag() {
        let encoded = encode(&svc_a(), 9u8).unwrap();
        assert_eq!(encoded[0], 9);
        let frame = decode_frame(&encoded).unwrap();
        assert_eq!(frame, Frame::new(MsgType::from(9), svc_a()));
    }

    #[test]
    fn test_tag_zero_always_uses_fixed_layout() {
        assert!(NonZeroU8::new(0).is_none());

        let encoded = encode(&svc_a(), MsgType::from(0)).unwrap();
        assert_eq!(&encoded[..], &SVC_A_NO_PAYLOAD);
        assert_eq!(decode_frame(&encoded).unwrap(), Frame::new(MsgType::Simple, svc_a()));
    }

    #[test]
    fn test_generic_variant_normalizes_empty_payload() {
        let mut empty = svc_a();
        empty.payload = Some(String::new());

        let a = encode(&empty, MSG_TYPE_GENERIC).unwrap();
        let b = encode(&svc_a(), MSG_TYPE_GENERIC).unwrap();
        assert_eq!(a, b);
        assert_eq!(decode_frame(&a).unwrap().message.payload, None);
    }

    #[test]
    fn test_generic_variant_enforces_host_limit() {
        let long = DiscoveryMessage::new(0, 1, "h".repeat(300));
        assert!(matches!(
            encode(&long, MSG_TYPE_GENERIC),
            Err(CodecError::FieldTooLarge { .. })
        ));

        let mut buf = vec![MSG_TYPE_GENERIC];
        buf.extend(rmp_serde::to_vec_named(&long).unwrap());
        assert!(matches!(
            decode_frame(&buf),
            Err(CodecError::FieldTooLarge { .. })
        ));
    }

    #[test]
    fn test_decode_frame_simple_and_errors() {
        let frame = decode_frame(&SVC_A_NO_PAYLOAD).unwrap();
        assert_eq!(frame, Frame::new(MsgType::Simple, svc_a()));

        assert!(matches!(
            decode_frame(&[]),
            Err(CodecError::MalformedBuffer { field: "msg_type", .. })
        ));
        assert!(matches!(
            decode_frame(&[MSG_TYPE_GENERIC, 0xC1]),
            Err(CodecError::GenericDecode(_))
        ));
    }
}

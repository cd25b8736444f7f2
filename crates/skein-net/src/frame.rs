//! Wire framing
//!
//! Every message travels as one self-delimited frame, all integers
//! big-endian:
//!
//! ```text
//!   0        8        12       16
//!   ┌────────┬────────┬────────┬──────────────────┐
//!   │ event  │  tag   │  size  │ payload (size B) │
//!   │  u64   │  u32   │  u32   │                  │
//!   └────────┴────────┴────────┴──────────────────┘
//! ```
//!
//! A read never continues a frame from a previous read, so an incomplete
//! frame at the end of a buffer is dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use skein_core::Event;

use crate::error::{NetError, NetResult};
use crate::tag::Tag;

pub const HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub event: Event,
    pub tag: Tag,
    /// Payload length in bytes
    pub size: u32,
}

impl Header {
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u64(self.event.as_u64());
        buf.put_u32(self.tag.as_u32());
        buf.put_u32(self.size);
    }

    /// Read a header from the front of `buf` without consuming it.
    pub fn peek(buf: &[u8]) -> Option<Header> {
        let mut head = buf.get(..HEADER_SIZE)?;
        Some(Header {
            event: Event::from_raw(head.get_u64()),
            tag: Tag::new(head.get_u32()),
            size: head.get_u32(),
        })
    }

    /// Header plus payload length
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE.saturating_add(self.size as usize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub payload: Bytes,
}

/// Build one frame.
pub fn encode(event: Event, tag: Tag, payload: &[u8]) -> NetResult<Bytes> {
    if tag == Tag::NONE {
        return Err(NetError::Malformed("tag none cannot be sent".into()));
    }
    let size = u32::try_from(payload.len()).map_err(|_| {
        NetError::Malformed(format!("payload of {} bytes exceeds the frame limit", payload.len()))
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    Header { event, tag, size }.put(&mut buf);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Frames split out of one read
#[derive(Debug, Default)]
pub struct Decoded {
    pub frames: Vec<Frame>,
    /// Bytes of an incomplete trailing frame
    pub dropped_bytes: usize,
    /// Whole frames discarded for carrying tag none
    pub rejected: usize,
}

/// Split a read buffer into whole frames.
pub fn decode(mut raw: Bytes) -> Decoded {
    let mut decoded = Decoded::default();

    while let Some(header) = Header::peek(&raw) {
        let len = header.frame_len();
        if raw.len() < len {
            break;
        }
        let mut frame = raw.split_to(len);
        frame.advance(HEADER_SIZE);

        if header.tag == Tag::NONE {
            decoded.rejected += 1;
            continue;
        }
        decoded.frames.push(Frame {
            header,
            payload: frame,
        });
    }

    decoded.dropped_bytes = raw.len();
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout_is_big_endian() {
        let frame = encode(Event::from_raw(0x0102030405060708), Tag::new(0x11), b"hi").unwrap();
        assert_eq!(
            &frame[..],
            &[1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0x11, 0, 0, 0, 2, b'h', b'i'][..]
        );
    }

    #[test]
    fn test_decode_several() {
        let mut buf = BytesMut::new();
        buf.put_slice(&encode(Event::from_raw(1), Tag::user(0), b"one").unwrap());
        buf.put_slice(&encode(Event::from_raw(2), Tag::ERROR, b"").unwrap());

        let decoded = decode(buf.freeze());
        assert_eq!(decoded.frames.len(), 2);
        assert_eq!(decoded.frames[0].payload, Bytes::from_static(b"one"));
        assert_eq!(decoded.frames[1].header.tag, Tag::ERROR);
        assert_eq!(decoded.dropped_bytes, 0);
    }

    #[test]
    fn test_trailing_partial_dropped() {
        let whole = encode(Event::from_raw(9), Tag::user(1), b"payload").unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(&whole);
        buf.put_slice(&whole[..whole.len() - 3]);

        let decoded = decode(buf.freeze());
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.dropped_bytes, whole.len() - 3);
    }

    #[test]
    fn test_tag_none_rejected() {
        assert!(matches!(
            encode(Event::from_raw(1), Tag::NONE, b""),
            Err(NetError::Malformed(_))
        ));

        let mut buf = BytesMut::new();
        Header {
            event: Event::from_raw(1),
            tag: Tag::NONE,
            size: 1,
        }
        .put(&mut buf);
        buf.put_u8(0);
        buf.put_slice(&encode(Event::from_raw(2), Tag::user(0), b"x").unwrap());

        let decoded = decode(buf.freeze());
        assert_eq!(decoded.rejected, 1);
        assert_eq!(decoded.frames.len(), 1);
        assert_eq!(decoded.frames[0].header.event, Event::from_raw(2));
    }

    fn frame_strategy() -> impl Strategy<Value = (u64, u32, Vec<u8>)> {
        (
            any::<u64>(),
            1u32..,
            proptest::collection::vec(any::<u8>(), 0..64),
        )
    }

    proptest! {
        #[test]
        fn prop_truncation_yields_whole_prefix(
            frames in proptest::collection::vec(frame_strategy(), 0..8),
            cut in any::<proptest::sample::Index>(),
        ) {
            let mut buf = BytesMut::new();
            let mut ends = Vec::new();
            for (event, tag, payload) in &frames {
                buf.put_slice(&encode(Event::from_raw(*event), Tag::new(*tag), payload).unwrap());
                ends.push(buf.len());
            }
            let cut = cut.index(buf.len() + 1);
            let decoded = decode(buf.freeze().slice(..cut));

            let whole = ends.iter().take_while(|end| **end <= cut).count();
            prop_assert_eq!(decoded.frames.len(), whole);
            for (frame, (event, tag, payload)) in decoded.frames.iter().zip(&frames) {
                prop_assert_eq!(frame.header.event, Event::from_raw(*event));
                prop_assert_eq!(frame.header.tag, Tag::new(*tag));
                prop_assert_eq!(&frame.payload[..], &payload[..]);
            }
            let consumed = if whole == 0 { 0 } else { ends[whole - 1] };
            prop_assert_eq!(decoded.dropped_bytes, cut - consumed);
        }

        #[test]
        fn prop_arbitrary_bytes_never_panic(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let len = raw.len();
            let decoded = decode(Bytes::from(raw));
            let mut consumed = 0;
            for frame in &decoded.frames {
                prop_assert_eq!(frame.payload.len(), frame.header.size as usize);
                prop_assert_ne!(frame.header.tag, Tag::NONE);
                consumed += frame.header.frame_len();
            }
            prop_assert!(consumed + decoded.dropped_bytes <= len);
        }
    }
}

//! Length-prefixed framing.
//!
//! ## Wire format
//!
//! ```text
//! length:   u32 big-endian  (4)
//! payload:  [u8]            (length)
//! ```
//!
//! No version byte, no checksum. One frame carries exactly one payload.
//! The decoder is stateful only through the caller's read buffer: partial
//! frames stay in the buffer until the rest arrives, and a buffer holding
//! several frames yields them one `decode` call at a time.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Default upper bound on a single payload (32 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

// ── FrameCodec ───────────────────────────────────────────────────

/// Encoder / decoder for wirecast frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl FrameCodec {
    /// Codec that refuses frames declaring more than `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Like [`encode_frame`], but refuses payloads this codec's peer would
    /// reject on receive.
    pub fn encode_payload(&self, payload: &[u8]) -> Result<Bytes, WireError> {
        if payload.len() > self.max_frame_len {
            return Err(WireError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_len,
            });
        }
        encode_frame(payload)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        // Reject on the header alone; the stream cannot resynchronize.
        if len > self.max_frame_len {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: self.max_frame_len,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = frame_len(item.len())?;
        dst.reserve(HEADER_LEN + item.len());
        dst.put_u32(len);
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// Encode one payload into a standalone, shareable frame.
///
/// The returned `Bytes` is cheap to clone, so one encoded frame can be
/// queued on any number of connections.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, WireError> {
    let len = frame_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(len);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

fn frame_len(size: usize) -> Result<u32, WireError> {
    u32::try_from(size).map_err(|_| WireError::FrameTooLarge {
        size,
        max: u32::MAX as usize,
    })
}

// ── Object payloads ──────────────────────────────────────────────

/// Serialize a value into an opaque payload with bincode.
pub fn encode_object<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a payload produced by [`encode_object`].
pub fn decode_object<T: DeserializeOwned>(payload: &[u8]) -> Result<T, WireError> {
    Ok(bincode::deserialize(payload)?)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde::Deserialize;
    use tokio_util::codec::FramedRead;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            out.push(frame);
        }
        out
    }

    #[test]
    fn header_is_big_endian_length() {
        let frame = encode_frame(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 3, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn roundtrip_payloads() {
        let mut codec = FrameCodec::default();
        for payload in [&b""[..], &b"x"[..], &[0xFF; 2000][..]] {
            let mut buf = BytesMut::from(&encode_frame(payload).unwrap()[..]);
            let frames = decode_all(&mut codec, &mut buf);
            assert_eq!(frames, vec![Bytes::copy_from_slice(payload)]);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn partial_frame_stays_buffered() {
        let mut codec = FrameCodec::default();
        let frame = encode_frame(b"hello world").unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[2..7]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&frame[7..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "hello world");
    }

    #[test]
    fn coalesced_frames_split_apart() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_frame(b"one").unwrap());
        buf.extend_from_slice(&encode_frame(b"").unwrap());
        buf.extend_from_slice(&encode_frame(b"three").unwrap());
        // Trailing half of a fourth frame.
        buf.extend_from_slice(&encode_frame(b"four").unwrap()[..5]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec!["one", "", "three"]);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn oversized_header_rejected_before_payload_arrives() {
        let mut codec = FrameCodec::new(16);
        let mut buf = BytesMut::from(&17u32.to_be_bytes()[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { size: 17, max: 16 }));
    }

    #[test]
    fn encoder_matches_encode_frame() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"abc"), &mut dst).unwrap();
        assert_eq!(&dst[..], &encode_frame(b"abc").unwrap()[..]);
    }

    #[test]
    fn encode_payload_enforces_max() {
        let codec = FrameCodec::new(4);
        assert_eq!(codec.encode_payload(b"abcd").unwrap().len(), HEADER_LEN + 4);
        let err = codec.encode_payload(b"abcde").unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { size: 5, max: 4 }));
    }

    #[tokio::test]
    async fn framed_read_over_split_and_coalesced_reads() {
        let a = encode_frame(&[0xAA; 700]).unwrap();
        let b = encode_frame(b"second").unwrap();
        let c = encode_frame(b"third").unwrap();

        let mut bc = Vec::new();
        bc.extend_from_slice(&b);
        bc.extend_from_slice(&c);

        // `a` arrives in three reads; `b` and `c` arrive in one.
        let mock = tokio_test::io::Builder::new()
            .read(&a[..3])
            .read(&a[3..400])
            .read(&a[400..])
            .read(&bc)
            .build();

        let mut reader = FramedRead::new(mock, FrameCodec::default());
        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 700);
        assert!(first.iter().all(|&x| x == 0xAA));
        assert_eq!(reader.next().await.unwrap().unwrap(), "second");
        assert_eq!(reader.next().await.unwrap().unwrap(), "third");
        assert!(reader.next().await.is_none());
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    }

    #[test]
    fn object_payload_roundtrip() {
        let snap = Snapshot {
            width: 2,
            height: 1,
            pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
        };
        let payload = encode_object(&snap).unwrap();
        let back: Snapshot = decode_object(&payload).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn object_decode_garbage_is_encoding_error() {
        let err = decode_object::<Snapshot>(&[0x01]).unwrap_err();
        assert!(matches!(err, WireError::Encoding(_)));
    }
}

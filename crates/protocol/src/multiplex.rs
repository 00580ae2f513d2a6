//! Length-delimited framing: wraps [`crate::envelope::encode`]/`decode`
//! around a 4-byte big-endian length prefix so [`Request`](crate::Request)
//! and [`Response`](crate::Response) values can be read and written
//! directly against an `AsyncRead + AsyncWrite` connection via
//! `tokio_util::codec::Framed`.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::ProtocolError;

/// Upper bound on one frame's payload length. A peer advertising a larger
/// frame has violated the protocol (this mirrors the "oversize tree"
/// fatal case — a single frame this large could only be a corrupt or
/// hostile length field, never a legitimate message).
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// A `tokio_util` codec that frames values of type `T` with a 4-byte
/// big-endian length prefix and serializes them with
/// [`crate::envelope::encode`].
pub struct MessageCodec<T> {
    inner: LengthDelimitedCodec,
    _item: PhantomData<fn() -> T>,
}

impl<T> MessageCodec<T> {
    /// Constructs a codec bounded by [`MAX_FRAME_LEN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_FRAME_LEN)
                .big_endian()
                .length_field_length(4)
                .new_codec(),
            _item: PhantomData,
        }
    }
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = crate::envelope::encode(&item)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::OversizedFrame {
                len: payload.len() as u32,
                max: MAX_FRAME_LEN as u32,
            });
        }
        self.inner
            .encode(Bytes::from(payload), dst)
            .map_err(ProtocolError::Io)
    }
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.inner.decode(src).map_err(ProtocolError::Io)? else {
            return Ok(None);
        };
        Ok(Some(crate::envelope::decode(&frame)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Request;

    #[test]
    fn request_round_trips_through_the_codec() {
        let mut codec = MessageCodec::<Request>::new();
        let mut buffer = BytesMut::new();
        codec
            .encode(Request::Scan { baseline: None }, &mut buffer)
            .expect("encode");

        let decoded = codec
            .decode(&mut buffer)
            .expect("decode")
            .expect("a full frame was buffered");
        assert!(matches!(decoded, Request::Scan { baseline: None }));
        assert!(buffer.is_empty());
    }

    #[test]
    fn decode_returns_none_until_the_frame_is_complete() {
        let mut codec = MessageCodec::<Request>::new();
        let mut full = BytesMut::new();
        codec
            .encode(Request::Shutdown, &mut full)
            .expect("encode");

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(codec.decode(&mut partial).expect("no error yet").is_none());
    }

    #[test]
    fn oversized_payload_is_rejected_before_framing() {
        let mut codec = MessageCodec::<Vec<u8>>::new();
        let mut buffer = BytesMut::new();
        let oversized = vec![0u8; MAX_FRAME_LEN + 1];
        let error = codec
            .encode(oversized, &mut buffer)
            .expect_err("payload exceeds the limit");
        assert!(matches!(error, ProtocolError::OversizedFrame { .. }));
    }
}

//! Codec boundary between typed messages and datagram payloads.
//!
//! The transport never looks inside a payload: it carries whatever bytes the
//! codec produces verbatim, and hands inbound bytes back to the codec.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// An outgoing message could not be encoded.
#[derive(Debug, Clone, Error)]
#[error("failed to encode message: {0}")]
pub struct EncodeFailure(pub String);

/// Inbound bytes did not decode to the expected message type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to decode {len} byte message: {reason}")]
pub struct DecodeFailure {
    /// Size of the payload that failed to decode.
    pub len: usize,
    pub reason: String,
}

/// Encodes messages of type `M` to bytes and back.
///
/// Codecs are stateless and shared between the listener task and every
/// channel of a peer group, hence `Send + Sync`.
pub trait Codec<M>: Send + Sync + 'static {
    fn encode(&self, message: &M) -> Result<Bytes, EncodeFailure>;

    fn decode(&self, bytes: &[u8]) -> Result<M, DecodeFailure>;
}

/// Compact binary codec backed by `bincode`.
pub struct BincodeCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> BincodeCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for BincodeCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for BincodeCodec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

impl<M> Codec<M> for BincodeCodec<M>
where
    M: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, message: &M) -> Result<Bytes, EncodeFailure> {
        bincode::serialize(message)
            .map(Bytes::from)
            .map_err(|e| EncodeFailure(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, DecodeFailure> {
        bincode::deserialize(bytes).map_err(|e| DecodeFailure {
            len: bytes.len(),
            reason: e.to_string(),
        })
    }
}

/// Human-readable codec backed by `serde_json`, handy when sniffing traffic.
pub struct JsonCodec<M> {
    _marker: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for JsonCodec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<M> Codec<M> for JsonCodec<M>
where
    M: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, message: &M) -> Result<Bytes, EncodeFailure> {
        serde_json::to_vec(message)
            .map(Bytes::from)
            .map_err(|e| EncodeFailure(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<M, DecodeFailure> {
        serde_json::from_slice(bytes).map_err(|e| DecodeFailure {
            len: bytes.len(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Ping {
        Ping(u32),
        Pong { seq: u32, note: String },
    }

    #[test]
    fn test_bincode_codec_decodes_what_it_encodes() {
        let codec = BincodeCodec::<Ping>::new();
        let msg = Ping::Pong {
            seq: 7,
            note: "hi".into(),
        };
        let bytes = codec.encode(&msg).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_bincode_codec_reports_garbage() {
        let codec = BincodeCodec::<Ping>::new();
        // Variant index 9 does not exist.
        let failure = codec.decode(&[9, 0, 0, 0]).unwrap_err();
        assert_eq!(failure.len, 4);
    }

    #[test]
    fn test_json_codec_is_interchangeable() {
        let codec = JsonCodec::<Ping>::new();
        let bytes = codec.encode(&Ping::Ping(3)).unwrap();
        assert_eq!(&bytes[..], br#"{"Ping":3}"#);
        assert_eq!(codec.decode(&bytes).unwrap(), Ping::Ping(3));
        assert!(codec.decode(b"{").is_err());
    }
}

//! Payload decoding.
//!
//! The retry controller hands successful bodies to a `ResponseDecoder`;
//! a decode failure is terminal for that logical request.

use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors produced while decoding a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too short: expected 4 byte length prefix, got {0} bytes")]
    MissingPrefix(usize),

    #[error("frame length mismatch: prefix says {declared} bytes, payload has {actual}")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Turns a response body into a model.
pub trait ResponseDecoder<T>: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

/// serde_json decoder for any `DeserializeOwned` model.
#[derive(Debug)]
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseDecoder<T> for JsonDecoder<T> {
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Strips a 4-byte big-endian length prefix, then delegates to `inner`.
#[derive(Debug, Default)]
pub struct LengthPrefixed<D> {
    inner: D,
}

impl<D> LengthPrefixed<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

impl<T, D: ResponseDecoder<T>> ResponseDecoder<T> for LengthPrefixed<D> {
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        let (prefix, payload) = bytes
            .split_first_chunk::<4>()
            .ok_or(DecodeError::MissingPrefix(bytes.len()))?;
        let declared = u32::from_be_bytes(*prefix) as usize;
        if declared != payload.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }
        self.inner.decode(payload)
    }
}

/// Passes the body through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawBytes;

impl ResponseDecoder<bytes::Bytes> for RawBytes {
    fn decode(&self, bytes: &[u8]) -> Result<bytes::Bytes, DecodeError> {
        Ok(bytes::Bytes::copy_from_slice(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Video {
        id: String,
    }

    #[test]
    fn test_json_decoder() {
        let decoder = JsonDecoder::<Video>::new();
        let video = decoder.decode(br#"{"id":"v1"}"#).unwrap();
        assert_eq!(video, Video { id: "v1".into() });
        assert!(decoder.decode(b"nope").is_err());
    }

    #[test]
    fn test_length_prefixed() {
        let decoder = LengthPrefixed::new(JsonDecoder::<Video>::new());
        let payload = br#"{"id":"v2"}"#;
        let mut framed = (payload.len() as u32).to_be_bytes().to_vec();
        framed.extend_from_slice(payload);

        assert_eq!(decoder.decode(&framed).unwrap().id, "v2");

        framed.push(b' ');
        assert!(matches!(
            decoder.decode(&framed),
            Err(DecodeError::LengthMismatch { declared: 11, actual: 12 })
        ));
        assert!(matches!(decoder.decode(&[0, 1]), Err(DecodeError::MissingPrefix(2))));
    }
}

//! Type-tagged payload codec.
//!
//! The decrypted, decompressed body of a non-control frame is one type byte
//! followed by a type-specific serialization:
//!
//! | Type | Value | Serialization        |
//! |------|-------|----------------------|
//! | Raw  | 1     | opaque bytes         |
//! | HTTP request | 2 | HTTP/1.x wire form |
//! | HTTP response | 3 | HTTP/1.x wire form |

use crate::error::EncodingError;
use crate::http::{HttpRequest, HttpResponse};
use bytes::Bytes;

/// Tag byte for raw stream bytes.
pub const TYPE_RAW: u8 = 1;
/// Tag byte for an HTTP request.
pub const TYPE_REQUEST: u8 = 2;
/// Tag byte for an HTTP response.
pub const TYPE_RESPONSE: u8 = 3;

/// A decoded payload envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque bytes, used for traffic on streams.
    Raw(Bytes),
    /// An HTTP request for the call dispatcher.
    Request(HttpRequest),
    /// An HTTP response for the call dispatcher.
    Response(HttpResponse),
}

impl Payload {
    /// The tag byte this payload serializes under.
    pub fn type_byte(&self) -> u8 {
        match self {
            Payload::Raw(_) => TYPE_RAW,
            Payload::Request(_) => TYPE_REQUEST,
            Payload::Response(_) => TYPE_RESPONSE,
        }
    }

    /// Serializes the payload: tag byte followed by the typed body.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Raw(data) => {
                let mut buf = Vec::with_capacity(1 + data.len());
                buf.push(TYPE_RAW);
                buf.extend_from_slice(data);
                buf
            }
            Payload::Request(req) => {
                let body = req.to_bytes();
                let mut buf = Vec::with_capacity(1 + body.len());
                buf.push(TYPE_REQUEST);
                buf.extend_from_slice(&body);
                buf
            }
            Payload::Response(resp) => {
                let body = resp.to_bytes();
                let mut buf = Vec::with_capacity(1 + body.len());
                buf.push(TYPE_RESPONSE);
                buf.extend_from_slice(&body);
                buf
            }
        }
    }

    /// Deserializes a payload from its tag byte and body.
    pub fn decode(data: &[u8]) -> Result<Self, EncodingError> {
        let (&tag, body) = data.split_first().ok_or(EncodingError::EmptyPayload)?;
        match tag {
            TYPE_RAW => Ok(Payload::Raw(Bytes::copy_from_slice(body))),
            TYPE_REQUEST => Ok(Payload::Request(HttpRequest::parse(body)?)),
            TYPE_RESPONSE => Ok(Payload::Response(HttpResponse::parse(body)?)),
            other => Err(EncodingError::UnsupportedType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        let payload = Payload::Raw(Bytes::from_static(b"ping"));
        let encoded = payload.encode();
        assert_eq!(encoded[0], TYPE_RAW);
        assert_eq!(Payload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_request_roundtrip() {
        let req = HttpRequest::new("GET", "/status").with_header("Accept", "*/*");
        let payload = Payload::Request(req);
        let encoded = payload.encode();
        assert_eq!(encoded[0], TYPE_REQUEST);
        assert_eq!(Payload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = HttpResponse::new(404).with_body(&b"missing"[..]);
        let payload = Payload::Response(resp);
        let encoded = payload.encode();
        assert_eq!(encoded[0], TYPE_RESPONSE);
        assert_eq!(Payload::decode(&encoded).unwrap(), payload);
    }

    #[test]
    fn test_unknown_type() {
        let err = Payload::decode(&[9, 1, 2, 3]).unwrap_err();
        assert_eq!(err, EncodingError::UnsupportedType(9));
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(Payload::decode(&[]).unwrap_err(), EncodingError::EmptyPayload);
    }

    #[test]
    fn test_empty_raw_body() {
        let payload = Payload::Raw(Bytes::new());
        let encoded = payload.encode();
        assert_eq!(encoded, vec![TYPE_RAW]);
        assert_eq!(Payload::decode(&encoded).unwrap(), payload);
    }
}

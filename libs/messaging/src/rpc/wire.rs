//! Correlation framing
//!
//! Every request and reply on an RPC link carries the correlation id, the
//! per-send sequence number and the body text. Frames start with a two-byte
//! magic so stray traffic on a shared endpoint is rejected rather than
//! misread.

use bytes::Bytes;
use network::{Result, TransportError};
use serde::{Deserialize, Serialize};

/// Leading bytes of every RPC frame
pub const MAGIC: [u8; 2] = *b"NM";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFrame {
    pub correlation_id: String,
    /// Distinguishes repeated sends on one id; replies echo it
    pub sequence: u64,
    pub body: String,
}

impl RpcFrame {
    pub fn new(correlation_id: impl Into<String>, sequence: u64, body: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            sequence,
            body: body.into(),
        }
    }

    /// The reply to this request: same id and sequence, new body
    pub fn reply(&self, body: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            sequence: self.sequence,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let mut frame = MAGIC.to_vec();
        bincode::serialize_into(&mut frame, self)
            .map_err(|e| TransportError::protocol_with_source("failed to encode rpc frame", e))?;
        Ok(Bytes::from(frame))
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let payload = frame
            .strip_prefix(&MAGIC[..])
            .ok_or_else(|| TransportError::protocol("frame does not carry the rpc magic"))?;
        bincode::deserialize(payload)
            .map_err(|e| TransportError::protocol_with_source("malformed rpc frame", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reply_echoes_correlation() {
        let request = RpcFrame::new("6f1c", 3, "foo");
        let reply = request.reply("foo reply");
        assert_eq!(reply.correlation_id, "6f1c");
        assert_eq!(reply.sequence, 3);

        let decoded = RpcFrame::decode(&reply.encode().unwrap()).unwrap();
        assert_eq!(decoded, reply);
    }

    #[test]
    fn test_rejects_foreign_frames() {
        assert!(RpcFrame::decode(b"").is_err());
        assert!(RpcFrame::decode(b"foo reply").is_err());
        assert!(RpcFrame::decode(b"NM\xff").is_err());
    }

    proptest! {
        #[test]
        fn decode_never_panics(frame in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = RpcFrame::decode(&frame);
        }
    }
}

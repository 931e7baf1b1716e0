//! Trusted co-located peers only
//!
//! High-throughput paths where the producer writes raw reference values into
//! the frame: a single machine word, or a packed array of
//! `(reference, size)` records. The references are only meaningful inside
//! the producer's address space. This module never dereferences them; it
//! only moves the numbers, and it is the one place frames are reinterpreted
//! as anything other than text.

use crate::pull::PullChannel;
use crate::push::PushChannel;
use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use network::{Result, TransportError};
use std::mem::size_of;

/// Bytes of an embedded reference
pub const REFERENCE_SIZE: usize = size_of::<usize>();

/// Bytes of one packed record
pub const RECORD_SIZE: usize = size_of::<PayloadRecord>();

/// One `(reference, size)` pair, laid out as a 64-bit producer packs it
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct PayloadRecord {
    pub reference: u64,
    pub size: u32,
    /// Padding of the producer's layout
    pub reserved: u32,
}

impl PayloadRecord {
    pub fn new(reference: u64, size: u32) -> Self {
        Self {
            reference,
            size,
            reserved: 0,
        }
    }
}

/// First machine word of the frame, native endian
pub fn decode_reference(frame: &[u8]) -> Result<usize> {
    let word = frame.get(..REFERENCE_SIZE).ok_or_else(|| {
        TransportError::protocol(format!(
            "frame of {} bytes is shorter than a reference ({} bytes)",
            frame.len(),
            REFERENCE_SIZE
        ))
    })?;
    Ok(bytemuck::pod_read_unaligned::<usize>(word))
}

/// Every whole record in the frame; a trailing partial record is ignored
pub fn decode_records(frame: &[u8]) -> Vec<PayloadRecord> {
    frame
        .chunks_exact(RECORD_SIZE)
        .map(bytemuck::pod_read_unaligned::<PayloadRecord>)
        .collect()
}

pub fn encode_reference(reference: usize) -> Bytes {
    Bytes::copy_from_slice(&reference.to_ne_bytes())
}

pub fn encode_records(records: &[PayloadRecord]) -> Bytes {
    Bytes::copy_from_slice(bytemuck::cast_slice(records))
}

impl PullChannel {
    /// Receive one frame carrying an embedded reference
    pub async fn receive_reference(&self) -> Result<usize> {
        let buffer = self.receive_raw().await?;
        let reference = decode_reference(&buffer);
        buffer.release();
        reference
    }

    /// Receive one frame carrying packed records, copied into an owned vector
    pub async fn receive_records(&self) -> Result<Vec<PayloadRecord>> {
        let buffer = self.receive_raw().await?;
        let records = decode_records(&buffer);
        buffer.release();
        Ok(records)
    }
}

impl PushChannel {
    pub async fn send_reference(&self, reference: usize) -> Result<()> {
        self.send_bytes(encode_reference(reference)).await
    }

    pub async fn send_records(&self, records: &[PayloadRecord]) -> Result<()> {
        self.send_bytes(encode_records(records)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layout() {
        assert_eq!(RECORD_SIZE, 16);
        assert_eq!(std::mem::align_of::<PayloadRecord>(), 8);
    }

    #[test]
    fn test_decode_reference() {
        let mut frame = 0xdead_beef_usize.to_ne_bytes().to_vec();
        frame.extend_from_slice(b"trailing bytes are ignored");
        assert_eq!(decode_reference(&frame).unwrap(), 0xdead_beef);

        let err = decode_reference(&frame[..REFERENCE_SIZE - 1]).unwrap_err();
        assert_eq!(err.category(), "protocol");
    }

    #[test]
    fn test_decode_records_ignores_partial_tail() {
        let records = [PayloadRecord::new(0x1000, 64), PayloadRecord::new(0x2000, 1500)];
        let mut frame = encode_records(&records).to_vec();
        frame.extend_from_slice(&[0xff; RECORD_SIZE - 1]);

        assert_eq!(decode_records(&frame), records);
        assert!(decode_records(&frame[..RECORD_SIZE - 1]).is_empty());
    }

    #[test]
    fn test_decode_records_unaligned() {
        let records = [PayloadRecord::new(7, 9)];
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&encode_records(&records));

        assert_eq!(decode_records(&shifted[1..]), records);
    }
}

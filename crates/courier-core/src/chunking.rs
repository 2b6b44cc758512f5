//! Stream segmentation for byte-limited transports
//!
//! When a payload exceeds what every active transport can carry in one
//! piece, it is split into numbered chunks preceded by a stream-header
//! record. Each record's first 8 bytes are two **little-endian** u32s —
//! `(stream_id, num_chunks)` on the header, `(stream_id, chunk_num)` on a
//! chunk. This differs from the big-endian channel prefix of the outer
//! frame on purpose; the two layers must not be unified.
//!
//! Reassembly by `stream_id` happens on the receiving application's side,
//! not here.

use crate::errors::{CourierError, Result};
use crate::node::Node;
use crate::types::Msg;

/// Bytes of chunk header prepended to every record.
pub const CHUNK_OVERHEAD: u32 = 8;

/// Ceiling on the mesh-wide chunk size regardless of transport limits.
pub const MAX_CHUNK_SIZE: u32 = 64 * 1024;

// ----------------------------------------------------------------------------
// Records
// ----------------------------------------------------------------------------

/// Manifest record announcing a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub stream_id: u32,
    pub num_chunks: u32,
}

impl StreamHeader {
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&self.stream_id.to_le_bytes());
        out[4..].copy_from_slice(&self.num_chunks.to_le_bytes());
        out
    }
}

/// One numbered piece of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub stream_id: u32,
    pub chunk_num: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.data.len());
        out.extend_from_slice(&self.stream_id.to_le_bytes());
        out.extend_from_slice(&self.chunk_num.to_le_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

// ----------------------------------------------------------------------------
// Segmentation
// ----------------------------------------------------------------------------

/// The chunk size for a node: the smallest byte limit across its policies'
/// transports, never above [`MAX_CHUNK_SIZE`].
pub fn chunk_size(node: &Node) -> u32 {
    let mut size = MAX_CHUNK_SIZE;
    for policy in node.policies() {
        let limit = policy.transport().byte_limit();
        if limit < size {
            size = limit;
        }
    }
    size
}

/// Split `payload` into chunks of `chunk_size - 8` payload bytes each.
/// The last chunk carries the remainder.
pub fn segment(stream_id: u32, payload: &[u8], chunk_size: u32) -> Result<(StreamHeader, Vec<Chunk>)> {
    if chunk_size <= CHUNK_OVERHEAD {
        return Err(CourierError::InvalidChunkSize(chunk_size));
    }
    let cap = (chunk_size - CHUNK_OVERHEAD) as usize;
    let num_chunks = payload.len().div_ceil(cap) as u32;

    let mut chunks = Vec::with_capacity(num_chunks as usize);
    for (i, piece) in payload.chunks(cap).enumerate() {
        chunks.push(Chunk {
            stream_id,
            chunk_num: i as u32,
            data: piece.to_vec(),
        });
    }
    Ok((
        StreamHeader {
            stream_id,
            num_chunks,
        },
        chunks,
    ))
}

/// Send a large message as a header record plus numbered chunk records.
/// Empty payloads emit nothing.
pub fn send_chunked(node: &Node, chunk_size: u32, msg: &Msg) -> Result<()> {
    if msg.content.is_empty() {
        return Ok(());
    }
    let stream_id: u32 = rand::random();
    let (header, chunks) = segment(stream_id, &msg.content, chunk_size)?;

    let mut record = Msg {
        content: header.to_bytes().to_vec(),
        chunked: true,
        stream_header: true,
        ..msg.clone()
    };
    node.send_msg(&record)?;

    record.stream_header = false;
    for chunk in chunks {
        record.content = chunk.to_bytes();
        node.send_msg(&record)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> Vec<u8> {
        let mut sorted: Vec<&Chunk> = chunks.iter().collect();
        sorted.sort_by_key(|c| c.chunk_num);
        sorted.iter().flat_map(|c| c.data.clone()).collect()
    }

    #[test]
    fn test_exact_multiple_has_no_remainder() {
        let payload = vec![0x5A; 131_072];
        let (header, chunks) = segment(7, &payload, 65_544).unwrap();

        assert_eq!(header.num_chunks, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.data.len() == 65_536));
        assert_eq!(reassemble(&chunks), payload);
    }

    #[test]
    fn test_remainder_chunk() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let (header, chunks) = segment(9, &payload, 65_544).unwrap();

        assert_eq!(header.num_chunks, 2);
        assert_eq!(chunks[0].data.len(), 65_536);
        assert_eq!(chunks[1].data.len(), 34_464);
        assert_eq!(reassemble(&chunks), payload);
    }

    #[test]
    fn test_tiny_chunk_size() {
        let payload = b"abcdefghij".to_vec();
        let (header, chunks) = segment(1, &payload, 9).unwrap();
        assert_eq!(header.num_chunks, 10);
        assert!(chunks.iter().all(|c| c.data.len() == 1));
        assert_eq!(reassemble(&chunks), payload);
    }

    #[test]
    fn test_chunk_size_must_exceed_overhead() {
        assert!(matches!(
            segment(1, b"x", 8),
            Err(CourierError::InvalidChunkSize(8))
        ));
    }

    #[test]
    fn test_record_headers_are_little_endian() {
        let header = StreamHeader {
            stream_id: 0x0102_0304,
            num_chunks: 2,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..], &[0x02, 0x00, 0x00, 0x00]);

        let chunk = Chunk {
            stream_id: 0x0102_0304,
            chunk_num: 1,
            data: b"zz".to_vec(),
        };
        let bytes = chunk.to_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(&bytes[8..], b"zz");
    }

    #[test]
    fn test_chunk_count_formula() {
        for (len, size) in [(1usize, 9u32), (100, 20), (4096, 1000), (65_537, 65_544)] {
            let payload = vec![0u8; len];
            let (header, _) = segment(1, &payload, size).unwrap();
            let cap = (size - CHUNK_OVERHEAD) as usize;
            assert_eq!(header.num_chunks as usize, len.div_ceil(cap));
        }
    }
}

//! # Snapshot Format
//!
//! Binary encoding of a whole `GraphMap`.
//!
//! Format: Header (5 bytes) + postcard-serialized `SerializableGraphMap`.
//! - 4 bytes: Magic ("GMAP")
//! - 1 byte: Version
//!
//! Size and header are validated before the payload is decoded. Decoded
//! entities are re-validated when the map is rebuilt (`GraphMap::from_parts`).

use crate::map::SerializableGraphMap;
use crate::primitives;
use crate::types::GraphError;

/// Maximum accepted snapshot size (500 MB), checked before decoding.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 500 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

// =============================================================================
// HEADER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn is_current_version(&self) -> bool {
        self.version == primitives::FORMAT_VERSION
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(GraphError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if !self.is_current_version() {
            return Err(GraphError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        if bytes.len() < HEADER_SIZE {
            return Err(GraphError::DeserializationError(format!(
                "Data too short: minimum {} bytes required",
                HEADER_SIZE
            )));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        Ok(Self {
            magic,
            version: bytes[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Encode header + payload. Pure transformation, no I/O.
pub fn map_to_bytes(map: &SerializableGraphMap) -> Result<Vec<u8>, GraphError> {
    let payload =
        postcard::to_stdvec(map).map_err(|e| GraphError::SerializationError(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&PersistenceHeader::new().to_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Decode a snapshot after checking size and header.
pub fn map_from_bytes(bytes: &[u8]) -> Result<SerializableGraphMap, GraphError> {
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(GraphError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        GraphError::DeserializationError(format!("Failed to decode graph data: {}", e))
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GraphEdge, GraphNode};

    fn sample() -> SerializableGraphMap {
        SerializableGraphMap {
            nodes: vec![
                GraphNode::new("node1").expect("node").with_tags("name=marko"),
                GraphNode::new("node2")
                    .expect("node")
                    .with_entity(b"payload".to_vec())
                    .expect("entity"),
            ],
            edges: vec![
                GraphEdge::new("node1", "node2")
                    .expect("edge")
                    .with_edge_type("knows")
                    .expect("type")
                    .with_tags("knows,level=1"),
            ],
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = PersistenceHeader::new();
        let restored = PersistenceHeader::from_bytes(&header.to_bytes()).expect("parse header");
        assert_eq!(restored, header);
        assert!(restored.validate().is_ok());
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let bytes1 = map_to_bytes(&sample()).expect("encode");
        let decoded = map_from_bytes(&bytes1).expect("decode");
        assert_eq!(decoded, sample_with_ids(&decoded));
        let bytes2 = map_to_bytes(&decoded).expect("encode");
        assert_eq!(bytes1, bytes2, "decode -> encode must reproduce the bytes");
    }

    // Edge ids are random, so compare against the sample shape with the
    // decoded ids patched in.
    fn sample_with_ids(decoded: &SerializableGraphMap) -> SerializableGraphMap {
        let mut expected = sample();
        for (edge, original) in expected.edges.iter_mut().zip(&decoded.edges) {
            *edge = edge.clone().with_id(original.id());
        }
        expected
    }

    #[test]
    fn empty_map_roundtrip() {
        let empty = SerializableGraphMap {
            nodes: Vec::new(),
            edges: Vec::new(),
        };
        let bytes = map_to_bytes(&empty).expect("encode");
        assert_eq!(&bytes[0..4], primitives::MAGIC_BYTES);
        assert_eq!(map_from_bytes(&bytes).expect("decode"), empty);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = map_to_bytes(&sample()).expect("encode");
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(matches!(
            map_from_bytes(&bytes),
            Err(GraphError::DeserializationError(_))
        ));
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = map_to_bytes(&sample()).expect("encode");
        bytes[4] = primitives::FORMAT_VERSION + 1;
        let header = PersistenceHeader::from_bytes(&bytes).expect("header");
        assert!(!header.is_current_version());
        assert!(map_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(map_from_bytes(b"GMA").is_err());
        let bytes = map_to_bytes(&sample()).expect("encode");
        assert!(map_from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}

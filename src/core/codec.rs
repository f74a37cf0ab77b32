//! Schema binary codec
//!
//! On-disk layout of a schema file:
//!
//! ```text
//! ┌──────────────┬──────────────┬───────────────────────────┐
//! │ magic (8B)   │ crc32 (4B LE)│ bincode(Schema) payload   │
//! │ "TDBSCHM\0"  │ of payload   │                           │
//! └──────────────┴──────────────┴───────────────────────────┘
//! ```

use crate::error::{Result, StorageError};
use crate::schema::Schema;
use bincode::Options;

pub const SCHEMA_MAGIC: [u8; 8] = *b"TDBSCHM\x00";

const HEADER_LEN: usize = SCHEMA_MAGIC.len() + 4;

/// Encodes schemas to bytes and back
///
/// Implementations must round-trip: `decode(encode(s)) == s` for every valid `s`.
pub trait SchemaCodec: Send + Sync {
    /// Serialize a schema; fails on a schema that does not validate
    fn encode(&self, schema: &Schema) -> Result<Vec<u8>>;

    /// Deserialize a schema; fails on malformed bytes
    fn decode(&self, bytes: &[u8]) -> Result<Schema>;
}

/// Default codec: magic + CRC32 header over a bincode payload
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        BincodeCodec
    }
}

impl SchemaCodec for BincodeCodec {
    fn encode(&self, schema: &Schema) -> Result<Vec<u8>> {
        schema.validate()?;

        let payload = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .serialize(schema)?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&SCHEMA_MAGIC);
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Schema> {
        if bytes.len() < HEADER_LEN {
            return Err(StorageError::Schema(format!(
                "schema buffer too short ({} bytes)",
                bytes.len()
            )));
        }

        let (magic, rest) = bytes.split_at(SCHEMA_MAGIC.len());
        if magic != SCHEMA_MAGIC {
            return Err(StorageError::Schema("invalid schema magic".to_string()));
        }

        let (checksum, payload) = rest.split_at(4);
        let expected = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        if crc32fast::hash(payload) != expected {
            return Err(StorageError::Schema("schema checksum mismatch".to_string()));
        }

        // The limit keeps a corrupt length prefix from driving a huge allocation
        let schema: Schema = bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .with_limit(payload.len() as u64)
            .reject_trailing_bytes()
            .deserialize(payload)?;

        schema.validate()?;
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::schema::{Attribute, CellOrder, Datatype, Dimension};

    fn sample() -> Schema {
        Schema::array(
            "/data/ws/arr",
            vec![
                Attribute::new("a1", Datatype::Int32),
                Attribute::new("a2", Datatype::Char),
            ],
            vec![Dimension::new("x", 0, 99), Dimension::new("y", -5, 5)],
        )
        .unwrap()
        .with_cell_order(CellOrder::ColMajor)
    }

    #[test]
    fn test_roundtrip() -> Result<()> {
        let codec = BincodeCodec::new();
        let schema = sample();
        let bytes = codec.encode(&schema)?;

        assert_eq!(&bytes[..8], &SCHEMA_MAGIC);
        assert_eq!(codec.decode(&bytes)?, schema);
        Ok(())
    }

    #[test]
    fn test_encode_rejects_invalid_schema() {
        let mut schema = sample();
        schema.attributes.clear();

        let err = BincodeCodec.encode(&schema).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let codec = BincodeCodec;
        let bytes = codec.encode(&sample()).unwrap();

        // truncated
        assert_eq!(codec.decode(&bytes[..5]).unwrap_err().kind(), ErrorKind::Schema);
        assert_eq!(
            codec.decode(&bytes[..bytes.len() - 1]).unwrap_err().kind(),
            ErrorKind::Schema
        );

        // flipped payload byte
        let mut flipped = bytes.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xFF;
        assert_eq!(codec.decode(&flipped).unwrap_err().kind(), ErrorKind::Schema);

        // bad magic
        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(codec.decode(&bad_magic).unwrap_err().kind(), ErrorKind::Schema);

        // trailing garbage under a checksum that still matches
        let mut trailing = bytes;
        trailing.push(0);
        let crc = crc32fast::hash(&trailing[HEADER_LEN..]);
        trailing[SCHEMA_MAGIC.len()..HEADER_LEN].copy_from_slice(&crc.to_le_bytes());
        let err = codec.decode(&trailing).unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)), "{:?}", err);
    }
}

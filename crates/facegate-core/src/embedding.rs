use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Output dimension of the default face embedding model.
pub const DEFAULT_EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("invalid embedding blob size: {len} bytes (expected {expected})")]
    InvalidBlob { len: usize, expected: usize },
    #[error("invalid embedding dimension: {dim} (expected {expected})")]
    InvalidDim { dim: usize, expected: usize },
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidValue,
    #[error("embedding is not a byte sequence")]
    NotBytes,
}

/// A face identity vector produced by the embedding model.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Check length and finiteness against the expected dimension.
    pub fn validate(&self, expected_dim: usize) -> Result<(), EmbeddingError> {
        if self.values.len() != expected_dim {
            return Err(EmbeddingError::InvalidDim {
                dim: self.values.len(),
                expected: expected_dim,
            });
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidValue);
        }
        Ok(())
    }

    /// Stored layout: consecutive little-endian IEEE-754 `f32`s.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.values.len() * 4);
        for &v in &self.values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    /// Reinterpret stored bytes as `f32`s. This is a bit-level view of the
    /// buffer, not a numeric conversion of each byte.
    pub fn from_le_bytes(bytes: &[u8], expected_dim: usize) -> Result<Self, EmbeddingError> {
        let expected = expected_dim * 4;
        if bytes.len() != expected {
            return Err(EmbeddingError::InvalidBlob {
                len: bytes.len(),
                expected,
            });
        }

        let mut values = Vec::with_capacity(expected_dim);
        for chunk in bytes.chunks_exact(4) {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !v.is_finite() {
                return Err(EmbeddingError::InvalidValue);
            }
            values.push(v);
        }

        Ok(Self { values })
    }
}

/// An enrolled embedding as it arrives from the gallery owner.
///
/// Accepts a plain byte array or the JSON form of a Node.js `Buffer`
/// (`{"type": "Buffer", "data": [...]}`). Anything else is kept as
/// [`EmbeddingBlob::Unreadable`] so one bad entry never rejects the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingBlob {
    Bytes(Vec<u8>),
    Buffer { data: Vec<u8> },
    Unreadable(serde_json::Value),
}

impl EmbeddingBlob {
    pub fn decode(&self, expected_dim: usize) -> Result<Embedding, EmbeddingError> {
        match self {
            Self::Bytes(bytes) | Self::Buffer { data: bytes } => {
                Embedding::from_le_bytes(bytes, expected_dim)
            }
            Self::Unreadable(_) => Err(EmbeddingError::NotBytes),
        }
    }
}

impl Default for EmbeddingBlob {
    /// An entry without an embedding is present but unreadable.
    fn default() -> Self {
        Self::Unreadable(serde_json::Value::Null)
    }
}

impl From<&Embedding> for EmbeddingBlob {
    fn from(embedding: &Embedding) -> Self {
        Self::Bytes(embedding.to_le_bytes())
    }
}

/// One enrolled identity. Supplied fresh by the caller on every match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub embedding: EmbeddingBlob,
}

impl GalleryEntry {
    pub fn new(id: impl Into<String>, name: Option<String>, embedding: &Embedding) -> Self {
        Self {
            id: id.into(),
            name,
            embedding: EmbeddingBlob::from(embedding),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_byte_fidelity() {
        let mut values = vec![0.5f32; DEFAULT_EMBEDDING_DIM];
        values[0] = 0.0;
        values[1] = -0.0;
        values[2] = 1.0;
        values[3] = -1.0;
        values[4] = f32::MIN_POSITIVE;
        values[5] = f32::EPSILON;
        values[6] = std::f32::consts::PI;
        values[7] = 0.123456789;

        let bytes = Embedding::new(values.clone()).to_le_bytes();
        let recovered = Embedding::from_le_bytes(&bytes, DEFAULT_EMBEDDING_DIM).unwrap();
        for (orig, rec) in values.iter().zip(recovered.values.iter()) {
            assert_eq!(orig.to_bits(), rec.to_bits(), "mismatch: {orig} vs {rec}");
        }
    }

    #[test]
    fn test_bytes_are_reinterpreted_not_cast() {
        // 1.0f32 little-endian is 00 00 80 3f
        let emb = Embedding::from_le_bytes(&[0x00, 0x00, 0x80, 0x3f], 1).unwrap();
        assert_eq!(emb.values, vec![1.0]);
    }

    #[test]
    fn test_rejects_nan() {
        let mut values = vec![0.5f32; 4];
        values[2] = f32::NAN;
        let bytes = Embedding::new(values).to_le_bytes();
        let err = Embedding::from_le_bytes(&bytes, 4).unwrap_err();
        assert_eq!(err, EmbeddingError::InvalidValue);
    }

    #[test]
    fn test_rejects_infinity() {
        let bytes = Embedding::new(vec![f32::INFINITY, 0.0]).to_le_bytes();
        assert_eq!(
            Embedding::from_le_bytes(&bytes, 2).unwrap_err(),
            EmbeddingError::InvalidValue
        );
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = Embedding::from_le_bytes(&[0u8; 100], DEFAULT_EMBEDDING_DIM).unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::InvalidBlob {
                len: 100,
                expected: 2048
            }
        );
    }

    #[test]
    fn test_validate() {
        assert!(Embedding::new(vec![0.1; 8]).validate(8).is_ok());
        assert_eq!(
            Embedding::new(vec![0.1; 4]).validate(8).unwrap_err(),
            EmbeddingError::InvalidDim {
                dim: 4,
                expected: 8
            }
        );
        assert_eq!(
            Embedding::new(vec![f32::NEG_INFINITY]).validate(1).unwrap_err(),
            EmbeddingError::InvalidValue
        );
    }

    #[test]
    fn test_gallery_entry_wire_forms() {
        let json = r#"[
            {"_id": "a1", "name": "Ada", "embedding": [0, 0, 128, 63]},
            {"id": "b2", "embedding": {"type": "Buffer", "data": [0, 0, 128, 191]}},
            {"_id": "c3", "embedding": [0.25, 0.5]},
            {"_id": "d4", "embedding": "AACAPw=="}
        ]"#;
        let entries: Vec<GalleryEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].id, "a1");
        assert_eq!(entries[0].name.as_deref(), Some("Ada"));
        assert_eq!(entries[0].embedding.decode(1).unwrap().values, vec![1.0]);
        assert_eq!(entries[1].name, None);
        assert_eq!(entries[1].embedding.decode(1).unwrap().values, vec![-1.0]);
        assert_eq!(entries[2].embedding.decode(1).unwrap_err(), EmbeddingError::NotBytes);
        assert_eq!(entries[3].embedding.decode(1).unwrap_err(), EmbeddingError::NotBytes);
    }

    #[test]
    fn test_out_of_range_bytes_unreadable() {
        let entry: GalleryEntry =
            serde_json::from_str(r#"{"_id": "x", "embedding": [0, 300, 0, 0]}"#).unwrap();
        assert!(matches!(entry.embedding, EmbeddingBlob::Unreadable(_)));
    }

    #[test]
    fn test_missing_embedding_unreadable() {
        let entry: GalleryEntry = serde_json::from_str(r#"{"_id": "noemb"}"#).unwrap();
        assert_eq!(entry.embedding, EmbeddingBlob::Unreadable(serde_json::Value::Null));
        assert_eq!(entry.embedding.decode(1).unwrap_err(), EmbeddingError::NotBytes);
    }
}

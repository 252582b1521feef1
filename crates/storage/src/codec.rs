//! Serde encodings for records stored as artifacts

use bytes::Bytes;
use runtime_core::error::BoxError;
use runtime_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// On-disk encoding of a serialized record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// Human-readable JSON (serde_json)
    Json,

    /// Compact binary (bincode)
    Bincode,
}

impl ArtifactFormat {
    /// Serialize `value` into a fresh buffer
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf, value)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    /// Deserialize a record previously produced by [`encode`](Self::encode)
    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            ArtifactFormat::Json => Ok(serde_json::from_slice(data)?),
            ArtifactFormat::Bincode => {
                bincode::deserialize(data).map_err(|e| Error::Serialization(e.to_string()))
            }
        }
    }

    pub(crate) fn encode_into<T: Serialize>(
        &self,
        buf: &mut Vec<u8>,
        value: &T,
    ) -> std::result::Result<(), BoxError> {
        match self {
            ArtifactFormat::Json => serde_json::to_writer_pretty(buf, value)?,
            ArtifactFormat::Bincode => bincode::serialize_into(buf, value)?,
        }
        Ok(())
    }
}

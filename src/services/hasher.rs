use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// Uploaded content together with its SHA-256 digest
#[derive(Debug, Clone)]
pub struct HashedContent {
    /// Lower-case hex SHA-256
    pub digest: String,
    pub bytes: Bytes,
    pub size: u64,
}

/// Anything upload bytes arrive from in chunks
#[async_trait]
pub trait ChunkSource: Send {
    /// Next chunk, `None` once the input is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// Hashes content while capturing it, so the upload is read exactly once
pub struct ContentHasher {
    hasher: Sha256,
    buffer: BytesMut,
    max_bytes: u64,
}

impl ContentHasher {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            hasher: Sha256::new(),
            buffer: BytesMut::new(),
            max_bytes,
        }
    }

    /// Feed one chunk into both the digest and the capture buffer
    pub fn update(&mut self, chunk: &[u8]) -> Result<()> {
        let total = self.buffer.len() as u64 + chunk.len() as u64;
        if total > self.max_bytes {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds the {} byte limit",
                self.max_bytes
            )));
        }
        self.hasher.update(chunk);
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    pub fn finish(self) -> HashedContent {
        let bytes = self.buffer.freeze();
        HashedContent {
            digest: hex::encode(self.hasher.finalize()),
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// Drain a chunk source through the hasher. A failing read aborts
    /// before anything is handed on.
    pub async fn read_all<S>(source: &mut S, max_bytes: u64) -> Result<HashedContent>
    where
        S: ChunkSource + ?Sized,
    {
        let mut hasher = Self::new(max_bytes);
        while let Some(chunk) = source.next_chunk().await? {
            hasher.update(&chunk)?;
        }
        Ok(hasher.finish())
    }
}

#[cfg(test)]
impl HashedContent {
    /// Hash an in-memory buffer in one go
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let bytes = data.into();
        HashedContent {
            digest: hex::encode(Sha256::digest(&bytes)),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

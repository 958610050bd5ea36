pub mod local;
pub mod memory;
pub mod provider;

pub use local::*;
pub use memory::*;
pub use provider::*;

use std::sync::Arc;

use crate::config::{Config, StorageBackend};

/// Build the object store selected in the configuration
pub fn build_blob_store(config: &Config) -> Arc<dyn BlobStore> {
    let store: Arc<dyn BlobStore> = match config.storage.backend {
        StorageBackend::Local => {
            tracing::info!("Blob store root: {}", config.storage.local_path);
            Arc::new(LocalBlobStore::new(
                &config.storage.local_path,
                &config.server.public_url,
                UrlSigner::new(config.storage.presign_secret.clone()),
            ))
        }
        StorageBackend::Memory => {
            tracing::warn!("In-memory blob store selected; objects are lost on restart");
            Arc::new(MemoryBlobStore::new())
        }
    };
    tracing::info!("Using {} blob store", store.storage_type());
    store
}

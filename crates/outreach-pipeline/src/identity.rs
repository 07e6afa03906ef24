use std::collections::HashMap;

use outreach_adapters::{AdapterError, ChannelSource};
use outreach_core::{normalize_handle, Identity};
use tokio::sync::RwLock;
use tracing::debug;

/// Channel reference -> resolved identity. Writes are insert-or-overwrite, so
/// concurrent resolution of the same reference is harmless.
#[derive(Debug, Default)]
pub struct IdentityCache {
    entries: RwLock<HashMap<String, Identity>>,
}

fn cache_key(reference: &str) -> String {
    normalize_handle(reference)
        .unwrap_or_else(|| reference.trim().to_string())
        .to_ascii_lowercase()
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, reference: &str) -> Option<Identity> {
        self.entries.read().await.get(&cache_key(reference)).cloned()
    }

    pub async fn resolve(
        &self,
        source: &dyn ChannelSource,
        reference: &str,
    ) -> Result<Identity, AdapterError> {
        if let Some(hit) = self.get(reference).await {
            return Ok(hit);
        }
        let identity = source.resolve_identity(reference).await?;
        debug!(reference, id = identity.id, "resolved channel identity");
        self.entries
            .write()
            .await
            .insert(cache_key(reference), identity.clone());
        Ok(identity)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

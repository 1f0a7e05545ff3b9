use std::sync::Arc;

use conclave_core::errors::ProviderError;
use conclave_core::provider::{ProviderBackend, ProviderConfig};
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::factory::BackendFactory;

type Slot = Arc<OnceCell<Arc<dyn ProviderBackend>>>;

/// One configured backend per provider name, built lazily on first use.
///
/// Each name has its own cell, so concurrent first uses of one provider
/// construct exactly once while other providers proceed independently. A
/// failed construction leaves the cell empty and the next use retries.
pub struct BackendCache {
    factory: BackendFactory,
    slots: DashMap<String, Slot>,
}

impl BackendCache {
    pub fn new(factory: BackendFactory) -> Self {
        Self {
            factory,
            slots: DashMap::new(),
        }
    }

    pub fn factory(&self) -> &BackendFactory {
        &self.factory
    }

    pub async fn get(&self, provider: &ProviderConfig) -> Result<Arc<dyn ProviderBackend>, ProviderError> {
        // Clone the slot out so no shard lock is held across the await.
        let slot: Slot = Arc::clone(self.slots.entry(provider.name.clone()).or_default().value());
        let backend = slot
            .get_or_try_init(|| async {
                debug!(provider = %provider.name, kind = %provider.kind, "configuring backend");
                self.factory.create(provider)
            })
            .await?;
        Ok(Arc::clone(backend))
    }

    /// Whether a backend for `name` has been configured.
    pub fn is_configured(&self, name: &str) -> bool {
        self.slots
            .get(name)
            .is_some_and(|slot| slot.initialized())
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every configured backend.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

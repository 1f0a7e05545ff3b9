use std::collections::HashMap;
use std::sync::Arc;

use conclave_core::errors::{ProviderError, ProviderErrorKind};
use conclave_core::provider::{ProviderBackend, ProviderConfig};

type Constructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ProviderBackend>, ProviderError> + Send + Sync>;

/// Maps a vendor tag to the constructor of its backend.
#[derive(Clone, Default)]
pub struct BackendFactory {
    constructors: HashMap<String, Constructor>,
}

impl BackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ProviderBackend>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(constructor));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, kind: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ProviderBackend>, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, constructor);
        self
    }

    /// Register a ready-made backend shared by every provider of `kind`.
    pub fn with_backend(self, kind: impl Into<String>, backend: Arc<dyn ProviderBackend>) -> Self {
        self.with(kind, move |_| Ok(Arc::clone(&backend)))
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn create(&self, provider: &ProviderConfig) -> Result<Arc<dyn ProviderBackend>, ProviderError> {
        let constructor = self.constructors.get(&provider.kind).ok_or_else(|| {
            ProviderError::new(
                &provider.name,
                ProviderErrorKind::UnknownKind,
                format!(
                    "unknown provider kind '{}' (registered: {})",
                    provider.kind,
                    self.kinds().join(", ")
                ),
            )
        })?;
        constructor(provider)
    }
}

impl std::fmt::Debug for BackendFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendFactory")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    #[test]
    fn creates_registered_kind() {
        let factory = BackendFactory::new().with_backend("mock", Arc::new(MockBackend::new()));
        let provider = ProviderConfig::new("p", "mock", "k");
        assert!(factory.create(&provider).is_ok());
        assert!(factory.supports("mock"));
        assert_eq!(factory.kinds(), vec!["mock"]);
    }

    #[test]
    fn unknown_kind_is_provider_error() {
        let factory = BackendFactory::new();
        let provider = ProviderConfig::new("local", "cohere", "k");
        let err = factory.create(&provider).err().unwrap();
        assert_eq!(err.kind, ProviderErrorKind::UnknownKind);
        assert_eq!(err.provider, "local");
        assert!(err.message.contains("cohere"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn constructor_sees_provider_config() {
        let factory = BackendFactory::new().with("mock", |p: &ProviderConfig| {
            if p.api_key().is_empty() {
                Err(ProviderError::new(&p.name, ProviderErrorKind::Authentication, "no key"))
            } else {
                Ok(Arc::new(MockBackend::new()) as Arc<dyn ProviderBackend>)
            }
        });
        assert!(factory.create(&ProviderConfig::new("a", "mock", "sk")).is_ok());
        let err = factory.create(&ProviderConfig::new("b", "mock", "")).err().unwrap();
        assert_eq!(err.kind, ProviderErrorKind::Authentication);
    }
}

//! Plugin registry: resolves provider and publisher names to fresh instances.

use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::{Provider, ShellProvider};
use crate::publisher::{FileSystemPublisher, Publisher};

/// Builds a provider for a single job.
pub type ProviderFactory = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

/// Builds a publisher for a single job.
pub type PublisherFactory = Arc<dyn Fn() -> Box<dyn Publisher> + Send + Sync>;

/// Registry of available providers and publishers, keyed by lowercase name.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    providers: HashMap<String, ProviderFactory>,
    publishers: HashMap<String, PublisherFactory>,
}

impl PluginRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the shell provider and file system publisher.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_provider("shell", || Box::new(ShellProvider::new()));
        registry.register_publisher("filesystem", || Box::new(FileSystemPublisher::new()));
        registry
    }

    /// Register a provider factory. A later registration replaces an earlier one.
    pub fn register_provider<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.providers.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(provider = %key, "Replaced existing provider registration");
        } else {
            tracing::debug!("Registered provider: {}", key);
        }
    }

    /// Register a publisher factory. A later registration replaces an earlier one.
    pub fn register_publisher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Publisher> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.publishers.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::warn!(publisher = %key, "Replaced existing publisher registration");
        } else {
            tracing::debug!("Registered publisher: {}", key);
        }
    }

    /// Build a new provider instance by name.
    pub fn provider(&self, name: &str) -> Option<Box<dyn Provider>> {
        self.providers.get(&name.to_lowercase()).map(|factory| factory())
    }

    /// Build a new publisher instance by name.
    pub fn publisher(&self, name: &str) -> Option<Box<dyn Publisher>> {
        self.publishers.get(&name.to_lowercase()).map(|factory| factory())
    }

    /// List registered provider names.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// List registered publisher names.
    pub fn publisher_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.publishers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("providers", &self.provider_names())
            .field("publishers", &self.publisher_names())
            .finish()
    }
}

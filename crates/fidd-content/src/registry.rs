//! Process-wide lookup of content services by name.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::service::FiddContentService;

/// Named content services shared between threads.
#[derive(Default)]
pub struct ContentServiceRegistry {
    services: RwLock<HashMap<String, Arc<dyn FiddContentService>>>,
}

impl ContentServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `name` unless the name is taken.
    ///
    /// Returns `true` when this call inserted it.
    pub fn add_if_absent(&self, name: &str, service: Arc<dyn FiddContentService>) -> bool {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(name) {
            return false;
        }
        services.insert(name.to_string(), service);
        tracing::debug!(%name, "registered content service");
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FiddContentService>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn FiddContentService>> {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for ContentServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

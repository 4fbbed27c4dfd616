use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::storage::{KeyValueStore, StorageError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Light,
    Dark,
}

impl ThemePreference {
    pub fn toggled(self) -> Self {
        match self {
            ThemePreference::Light => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::Light,
        }
    }

    pub fn is_dark(self) -> bool {
        self == ThemePreference::Dark
    }
}

/// Persists the theme under its own key, separate from chat history.
pub struct ThemeStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    fallback: ThemePreference,
}

impl ThemeStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, fallback: ThemePreference) -> Self {
        ThemeStore {
            store,
            key: key.into(),
            fallback,
        }
    }

    /// Unreadable or unrecognised values fall back to the configured default.
    pub fn load(&self) -> ThemePreference {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.fallback,
            Err(e) => {
                warn!(key = %self.key, "Could not read theme preference: {}", e);
                return self.fallback;
            }
        };

        match serde_json::from_str::<ThemePreference>(&raw) {
            Ok(theme) => theme,
            Err(e) => {
                warn!(key = %self.key, "Ignoring corrupt theme preference: {}", e);
                self.fallback
            }
        }
    }

    pub fn save(&self, theme: ThemePreference) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(&theme)?;
        self.store.set(&self.key, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn theme_store(store: &MemoryStore) -> ThemeStore {
        ThemeStore::new(Arc::new(store.clone()), "theme", ThemePreference::Light)
    }

    #[test]
    fn missing_value_uses_fallback() {
        let store = MemoryStore::new();
        assert_eq!(theme_store(&store).load(), ThemePreference::Light);
    }

    #[test]
    fn saved_theme_is_a_json_string() {
        let store = MemoryStore::new();
        theme_store(&store).save(ThemePreference::Dark).unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("\"dark\""));
        assert_eq!(theme_store(&store).load(), ThemePreference::Dark);
    }

    #[test]
    fn corrupt_value_uses_fallback() {
        let store = MemoryStore::new();
        store.set("theme", "purple").unwrap();
        assert_eq!(theme_store(&store).load(), ThemePreference::Light);

        store.set("theme", "\"solarized\"").unwrap();
        assert_eq!(theme_store(&store).load(), ThemePreference::Light);
    }

    #[test]
    fn toggled_flips_both_ways() {
        assert_eq!(ThemePreference::Light.toggled(), ThemePreference::Dark);
        assert_eq!(ThemePreference::Dark.toggled(), ThemePreference::Light);
        assert!(ThemePreference::Dark.is_dark());
    }
}

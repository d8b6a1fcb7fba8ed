use std::sync::Arc;

use crate::error::Result;
use crate::storage::KeyValueStore;

pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Persisted light/dark preference.
pub struct ThemePreference {
    store: Arc<dyn KeyValueStore>,
    current: Theme,
}

impl ThemePreference {
    /// Reads the saved theme, falling back to the OS colour scheme when nothing
    /// (or nothing valid) is saved.
    pub async fn load(store: Arc<dyn KeyValueStore>, prefers_dark: bool) -> Result<Self> {
        let saved = store.get(THEME_KEY).await?.and_then(|v| Theme::parse(&v));
        let current = saved.unwrap_or(if prefers_dark { Theme::Dark } else { Theme::Light });
        store.set(THEME_KEY, current.as_str()).await?;
        Ok(Self { store, current })
    }

    pub fn theme(&self) -> Theme {
        self.current
    }

    pub async fn toggle(&mut self) -> Result<Theme> {
        let next = self.current.toggled();
        self.store.set(THEME_KEY, next.as_str()).await?;
        self.current = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyValueStore;

    #[tokio::test]
    async fn falls_back_to_os_preference() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let theme = ThemePreference::load(store.clone(), true).await.unwrap();
        assert_eq!(theme.theme(), Theme::Dark);
        assert_eq!(store.get(THEME_KEY).await.unwrap().as_deref(), Some("dark"));
    }

    #[tokio::test]
    async fn saved_theme_wins_over_os_preference() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        store.set(THEME_KEY, "light").await.unwrap();
        let theme = ThemePreference::load(store, true).await.unwrap();
        assert_eq!(theme.theme(), Theme::Light);
    }

    #[tokio::test]
    async fn toggle_persists() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let mut theme = ThemePreference::load(store.clone(), false).await.unwrap();

        assert_eq!(theme.toggle().await.unwrap(), Theme::Dark);
        assert_eq!(store.get(THEME_KEY).await.unwrap().as_deref(), Some("dark"));
        assert_eq!(theme.toggle().await.unwrap(), Theme::Light);
    }
}

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::Result;
use crate::storage::KeyValueStore;

pub const SESSION_ID_KEY: &str = "chat_session_id";

/// Hands out the per-profile session identifier, creating it on first use.
#[derive(Clone)]
pub struct SessionIdentifierStore {
    store: Arc<dyn KeyValueStore>,
}

impl SessionIdentifierStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn get_or_create(&self) -> Result<String> {
        if let Some(existing) = self.store.get(SESSION_ID_KEY).await? {
            if !existing.trim().is_empty() {
                return Ok(existing);
            }
        }

        let session_id = Uuid::new_v4().to_string();
        self.store.set(SESSION_ID_KEY, &session_id).await?;
        info!(session_id = %session_id, "Created new chat session identifier");
        Ok(session_id)
    }
}

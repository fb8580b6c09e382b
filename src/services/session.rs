//! In-memory list of interactive query results.
//!
//! Handlers receive the session through axum `State`; entries live until they
//! are removed or the session is cleared.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::IndicatorResult;

/// One stored query result.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub result: IndicatorResult,
}

/// Accumulated query results, shared between handlers.
#[derive(Debug, Clone, Default)]
pub struct QuerySession {
    entries: Arc<RwLock<Vec<SessionEntry>>>,
}

impl QuerySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a result and return the new entry.
    pub async fn push(&self, result: IndicatorResult) -> SessionEntry {
        let entry = SessionEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            result,
        };
        self.entries.write().await.push(entry.clone());
        entry
    }

    /// All entries in insertion order.
    pub async fn list(&self) -> Vec<SessionEntry> {
        self.entries.read().await.clone()
    }

    /// Results only, in insertion order.
    pub async fn results(&self) -> Vec<IndicatorResult> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| e.result.clone())
            .collect()
    }

    /// Remove one entry. Returns `false` if the id is unknown.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Remove every entry and return how many there were.
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        removed
    }
}
